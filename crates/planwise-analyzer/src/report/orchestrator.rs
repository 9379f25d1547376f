//! The `analyze_query` pipeline and the report it produces

use super::evidence::ValidatedEvidence;
use super::summary::PlanSummary;
use crate::config::AdvisorConfig;
use crate::explain::{PlanParseError, PlanTree, RawPlan, normalize};
use crate::features::{ParseError, QueryFeatures, QueryType, extract_features_for};
use crate::rules::RulesEngine;
use crate::scoring::{ImpactTier, ScoredFinding, Scorer};
use planwise_core::{EngineKind, IndexUsage};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use thiserror::Error;

const SEPARATOR: &str =
    "================================================================================";

#[derive(Debug, Error)]
pub enum AnalyzeError {
    #[error(transparent)]
    Query(#[from] ParseError),

    #[error(transparent)]
    Plan(#[from] PlanParseError),
}

/// Evidence from a validation trial, tied to the finding it validated
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationRecord {
    /// Index into `Report::findings`
    pub finding_index: usize,
    pub evidence: ValidatedEvidence,
}

/// Ordered, scored recommendations for one query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub engine: EngineKind,
    pub query: String,
    pub query_type: QueryType,
    pub tables: Vec<String>,
    pub plan: PlanSummary,
    /// Sorted by impact, then confidence, then rule declaration order
    pub findings: Vec<ScoredFinding>,
    #[serde(default)]
    pub validations: Vec<ValidationRecord>,
}

impl Report {
    pub fn count_by_impact(&self, tier: ImpactTier) -> usize {
        self.findings.iter().filter(|f| f.impact == tier).count()
    }

    /// Appends trial evidence for the finding at `finding_index`
    pub fn attach_validation(&mut self, finding_index: usize, evidence: ValidatedEvidence) {
        self.validations.push(ValidationRecord {
            finding_index,
            evidence,
        });
    }

    pub fn render_text(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{SEPARATOR}")?;
        writeln!(f, "PLANWISE RECOMMENDATION REPORT")?;
        writeln!(f, "{SEPARATOR}")?;
        writeln!(f)?;
        writeln!(f, "ENGINE: {}", self.engine)?;
        writeln!(f, "QUERY:")?;
        writeln!(f, "  {}", self.query.trim())?;
        writeln!(f, "  {} on {}", self.query_type.as_str(), self.tables.join(", "))?;
        writeln!(f)?;

        writeln!(f, "QUERY PLAN:")?;
        writeln!(f, "  Root: {}", self.plan.root)?;
        writeln!(
            f,
            "  Total cost: {:.2} ({} nodes)",
            self.plan.total_cost, self.plan.node_count
        )?;
        let full_scans = self.plan.full_scans();
        if !full_scans.is_empty() {
            writeln!(f, "  Full scans: {}", full_scans.join(", "))?;
        }
        if let Some(ms) = self.plan.execution_time_ms {
            writeln!(f, "  Execution time: {ms:.3} ms")?;
        }
        if self.plan.malformed {
            writeln!(
                f,
                "  WARNING: plan costs are inconsistent; impact tiers default to LOW"
            )?;
        }
        writeln!(f)?;

        if self.findings.is_empty() {
            writeln!(f, "RECOMMENDATIONS: None found")?;
            writeln!(f)?;
        } else {
            writeln!(f, "RECOMMENDATIONS:")?;
            for (i, scored) in self.findings.iter().enumerate() {
                let finding = &scored.finding;
                writeln!(
                    f,
                    "  {}. {} ({} impact, confidence {:.2})",
                    i + 1,
                    finding.category,
                    scored.impact,
                    scored.confidence
                )?;
                writeln!(f, "     Rule ID: {}", finding.rule_id)?;
                writeln!(f, "     Target: {}", finding.target)?;
                writeln!(f, "     Rationale: {}", finding.rationale)?;
                writeln!(f, "     Suggested Action: {}", finding.suggested_action)?;
                if !finding.caveats.is_empty() {
                    writeln!(f, "     Caveats:")?;
                    for caveat in &finding.caveats {
                        writeln!(f, "       - {caveat}")?;
                    }
                }
                for record in self.validations.iter().filter(|v| v.finding_index == i) {
                    writeln!(f, "     Validation: {}", record.evidence)?;
                }
                writeln!(f)?;
            }
        }

        writeln!(f, "SUMMARY:")?;
        writeln!(f, "  Total Recommendations: {}", self.findings.len())?;
        writeln!(f, "  High Impact: {}", self.count_by_impact(ImpactTier::High))?;
        writeln!(f, "  Medium Impact: {}", self.count_by_impact(ImpactTier::Medium))?;
        write!(f, "  Low Impact: {}", self.count_by_impact(ImpactTier::Low))
    }
}

/// Runs the full pipeline with one configuration
#[derive(Default)]
pub struct Advisor {
    rules: RulesEngine,
    scorer: Scorer,
}

impl Advisor {
    pub fn new(config: AdvisorConfig) -> Self {
        Self {
            scorer: Scorer::new(config.clone()),
            rules: RulesEngine::new(config),
        }
    }

    pub fn rules(&self) -> &RulesEngine {
        &self.rules
    }

    /// Extracts features, normalizes the plan, evaluates rules over both
    /// and over the index usage snapshot, then scores and orders the result.
    #[tracing::instrument(
        skip_all,
        fields(engine = %engine, sql_preview = %sql.chars().take(100).collect::<String>())
    )]
    pub fn analyze(
        &self,
        engine: EngineKind,
        sql: &str,
        raw_plan: &RawPlan,
        usage: &[IndexUsage],
    ) -> Result<Report, AnalyzeError> {
        let features = extract_features_for(engine, sql)?;
        let plan = normalize(engine, raw_plan)?;
        Ok(self.build_report(engine, sql, &features, &plan, usage))
    }

    /// Drop candidates from a usage snapshot alone, ranked like report findings
    pub fn unused_indexes(&self, engine: EngineKind, usage: &[IndexUsage]) -> Vec<ScoredFinding> {
        let mut findings = self.score_index_usage(engine, usage);
        findings.sort_by(rank);
        findings
    }

    fn score_index_usage(&self, engine: EngineKind, usage: &[IndexUsage]) -> Vec<ScoredFinding> {
        self.rules
            .evaluate_index_usage(usage, engine)
            .iter()
            .map(|finding| self.scorer.score_unbound(finding))
            .collect()
    }

    /// Builds a report from already extracted features and a normalized plan
    pub fn build_report(
        &self,
        engine: EngineKind,
        sql: &str,
        features: &QueryFeatures,
        plan: &PlanTree,
        usage: &[IndexUsage],
    ) -> Report {
        let mut findings: Vec<ScoredFinding> = self
            .rules
            .evaluate(plan, features)
            .iter()
            .map(|finding| self.scorer.score(finding, plan, features))
            .collect();
        findings.extend(self.score_index_usage(engine, usage));
        // stable, so equal scores keep rule-declaration order
        findings.sort_by(rank);

        tracing::debug!(
            findings = findings.len(),
            malformed = plan.is_malformed(),
            "report assembled"
        );

        Report {
            engine,
            query: sql.to_string(),
            query_type: features.query_type,
            tables: features.tables.iter().map(|t| t.name.clone()).collect(),
            plan: PlanSummary::from_tree(plan).resolve_relations(features),
            findings,
            validations: Vec::new(),
        }
    }
}

fn rank(a: &ScoredFinding, b: &ScoredFinding) -> Ordering {
    b.impact
        .cmp(&a.impact)
        .then_with(|| b.confidence.total_cmp(&a.confidence))
}

/// One-shot pipeline: query text, raw plan and usage snapshot to a report
pub fn analyze_query(
    engine: EngineKind,
    sql: &str,
    raw_plan: &RawPlan,
    usage: &[IndexUsage],
    config: AdvisorConfig,
) -> Result<Report, AnalyzeError> {
    Advisor::new(config).analyze(engine, sql, raw_plan, usage)
}
