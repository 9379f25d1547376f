//! Deterministic scoring.
//!
//! Confidence starts from a per-category base certainty. Observed evidence
//! moves it toward 1 as `base + (1 - base) * strength`, so stronger evidence
//! never lowers it; findings with only indirect or no evidence fall below
//! the base. Impact is the triggering node's share of the plan's total cost.

use crate::config::AdvisorConfig;
use crate::explain::{PlanNode, PlanTree};
use crate::features::{PredicateKind, QueryFeatures};
use crate::rules::{Category, Finding, SchemaChange, StatsIssueRule};
use serde::{Deserialize, Serialize};
use std::fmt;

const GIB: u64 = 1024 * 1024 * 1024;
const MIB: u64 = 1024 * 1024;

/// Spill size at which a sort's evidence is considered conclusive
const SPILL_SATURATION_KB: f64 = 64.0 * 1024.0;

/// Coarse share-of-cost bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ImpactTier {
    Low,
    Medium,
    High,
}

impl ImpactTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
        }
    }
}

impl fmt::Display for ImpactTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A finding together with its score. The finding itself is left untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredFinding {
    pub finding: Finding,
    /// In `[0, 1]`
    pub confidence: f64,
    pub impact: ImpactTier,
    /// Triggering node cost over plan total cost, when it could be computed
    pub cost_share: Option<f64>,
    /// How the score was arrived at
    pub notes: Vec<String>,
}

impl ScoredFinding {
    pub fn rule_id(&self) -> &str {
        &self.finding.rule_id
    }
}

/// How much the evidence behind a finding says, each strength in `[0, 1]`
#[derive(Debug, Clone, Copy, PartialEq)]
enum Signal {
    /// Measured or estimated row counts, spill sizes or cost ratios
    Observed(f64),
    /// Only indirect hints from the query text
    Partial(f64),
    Absent,
}

impl Signal {
    /// Observed evidence raises confidence from the base toward 1; partial
    /// or absent evidence lowers it toward half the base.
    fn confidence(self, base: f64) -> f64 {
        match self {
            Signal::Observed(s) => base + (1.0 - base) * s.clamp(0.0, 1.0),
            Signal::Partial(s) => base * (0.5 + 0.5 * s.clamp(0.0, 1.0)),
            Signal::Absent => base * 0.5,
        }
    }
}

struct Strength {
    signal: Signal,
    note: String,
}

#[derive(Debug, Clone, Default)]
pub struct Scorer {
    config: AdvisorConfig,
}

impl Scorer {
    pub fn new(config: AdvisorConfig) -> Self {
        Self { config }
    }

    /// Scores a finding against the plan and features that produced it
    pub fn score(
        &self,
        finding: &Finding,
        plan: &PlanTree,
        features: &QueryFeatures,
    ) -> ScoredFinding {
        let mut notes = Vec::new();
        let node = finding.node_id.and_then(|id| plan.node(id));
        if finding.node_id.is_some() && node.is_none() {
            notes.push("triggering node is not part of this plan".to_string());
        }

        let strength = match node {
            Some(node) => self.node_strength(finding, node, features),
            None => self.snapshot_strength(finding),
        };
        let mut confidence = strength.signal.confidence(base_confidence(finding.category));
        notes.push(strength.note);

        let (impact, cost_share) = match (finding.node_id, node) {
            (Some(_), Some(node)) => {
                if plan.is_malformed() {
                    notes.push(format!(
                        "plan is malformed ({} cost violation(s)); cost share not computed",
                        plan.diagnostics.len()
                    ));
                    confidence *= 0.5;
                    (ImpactTier::Low, None)
                } else {
                    self.cost_share_impact(node, plan, &mut notes)
                }
            }
            (Some(_), None) => {
                confidence *= 0.5;
                (ImpactTier::Low, None)
            }
            (None, _) => (size_impact(finding), None),
        };

        ScoredFinding {
            finding: finding.clone(),
            confidence: confidence.clamp(0.0, 1.0),
            impact,
            cost_share,
            notes,
        }
    }

    /// Scores a finding that was not derived from a plan (index usage)
    pub fn score_unbound(&self, finding: &Finding) -> ScoredFinding {
        let strength = self.snapshot_strength(finding);
        let confidence = strength.signal.confidence(base_confidence(finding.category));
        ScoredFinding {
            finding: finding.clone(),
            confidence: confidence.clamp(0.0, 1.0),
            impact: size_impact(finding),
            cost_share: None,
            notes: vec![strength.note],
        }
    }

    fn cost_share_impact(
        &self,
        node: &PlanNode,
        plan: &PlanTree,
        notes: &mut Vec<String>,
    ) -> (ImpactTier, Option<f64>) {
        let total = plan.total_cost();
        if total <= 0.0 {
            notes.push("plan reports no cost; impact defaults to LOW".to_string());
            return (ImpactTier::Low, None);
        }
        // a node under a LIMIT may cost more than the prorated root
        let share = (node.cost.total / total).clamp(0.0, 1.0);
        let tier = if share > self.config.impact_majority_share {
            ImpactTier::High
        } else if share >= self.config.impact_floor_share {
            ImpactTier::Medium
        } else {
            ImpactTier::Low
        };
        notes.push(format!("node accounts for {:.0}% of plan cost", share * 100.0));
        (tier, Some(share))
    }

    fn node_strength(
        &self,
        finding: &Finding,
        node: &PlanNode,
        features: &QueryFeatures,
    ) -> Strength {
        match finding.category {
            Category::MissingIndex => self.filter_strength(finding, node, features),
            Category::InefficientSort => spill_strength(node),
            Category::InefficientJoin => {
                let threshold = self.config.nested_loop_cost_threshold;
                let value = if node.cost.total > 0.0 {
                    (1.0 - threshold / node.cost.total).clamp(0.0, 1.0)
                } else {
                    0.0
                };
                Strength {
                    signal: Signal::Observed(value),
                    note: format!(
                        "join cost {:.2} against threshold {:.2}",
                        node.cost.total, threshold
                    ),
                }
            }
            Category::StatsIssue => match StatsIssueRule::divergence(node) {
                Some(divergence) => {
                    let threshold = self.config.stats_divergence_threshold;
                    let value = if threshold >= 1.0 {
                        1.0
                    } else {
                        ((divergence - threshold) / (1.0 - threshold)).clamp(0.0, 1.0)
                    };
                    Strength {
                        signal: Signal::Observed(value),
                        note: format!("row estimate off by {:.0}%", divergence * 100.0),
                    }
                }
                None => Strength {
                    signal: Signal::Absent,
                    note: "no execution statistics to compare estimates with".to_string(),
                },
            },
            Category::UnusedIndexCandidate => self.snapshot_strength(finding),
        }
    }

    fn filter_strength(
        &self,
        finding: &Finding,
        node: &PlanNode,
        features: &QueryFeatures,
    ) -> Strength {
        if let (Some(examined), Some(removed)) = (node.rows_examined(), node.rows_removed_by_filter)
            && examined > 0
        {
            return Strength {
                signal: Signal::Observed(removed as f64 / examined as f64),
                note: format!("measured: filter discarded {removed} of {examined} rows"),
            };
        }

        if let Some(pct) = node.filtered_pct {
            let discount = self.config.estimated_evidence_discount;
            let selectivity = (1.0 - pct / 100.0).clamp(0.0, 1.0);
            return Strength {
                signal: Signal::Observed(selectivity * discount),
                note: format!(
                    "estimated: optimizer expects {pct:.1}% of rows to pass (discounted by {discount})"
                ),
            };
        }

        // Without row counts, lean on how the columns are filtered: equality
        // lookups are the case an index serves best.
        let columns = &finding.target.columns;
        let equality = columns
            .iter()
            .filter(|column| {
                features.predicates.iter().any(|p| {
                    &p.column.column == *column
                        && matches!(p.kind, PredicateKind::Equality | PredicateKind::InList)
                })
            })
            .count();
        let share = if columns.is_empty() {
            0.0
        } else {
            equality as f64 / columns.len() as f64
        };
        Strength {
            signal: Signal::Partial(share),
            note: format!(
                "no row counts in plan; {equality} of {} column(s) filtered by equality",
                columns.len()
            ),
        }
    }

    fn snapshot_strength(&self, finding: &Finding) -> Strength {
        match (&finding.change, finding.evidence.times_used) {
            (SchemaChange::DropIndex { .. }, Some(0)) => Strength {
                signal: Signal::Observed(0.5),
                note: "index usage counter is zero for the observed window".to_string(),
            },
            _ => Strength {
                signal: Signal::Absent,
                note: "no usage evidence".to_string(),
            },
        }
    }
}

fn spill_strength(node: &PlanNode) -> Strength {
    let external = node
        .sort_method
        .as_deref()
        .is_some_and(|m| m.to_ascii_lowercase().starts_with("external"));
    match node.space_used_kb {
        Some(kb) if external => Strength {
            signal: Signal::Observed(0.5 + 0.5 * (kb as f64 / SPILL_SATURATION_KB).min(1.0)),
            note: format!("sort spilled {kb} kB to disk"),
        },
        _ if external => Strength {
            signal: Signal::Observed(0.5),
            note: "sort spilled to disk".to_string(),
        },
        _ => Strength {
            signal: Signal::Absent,
            note: "filesort reported without spill size; it may have run in memory".to_string(),
        },
    }
}

fn base_confidence(category: Category) -> f64 {
    match category {
        Category::MissingIndex => 0.6,
        Category::InefficientSort => 0.55,
        Category::InefficientJoin => 0.45,
        Category::StatsIssue => 0.5,
        Category::UnusedIndexCandidate => 0.5,
    }
}

fn size_impact(finding: &Finding) -> ImpactTier {
    match finding.evidence.index_size_bytes {
        Some(bytes) if bytes >= GIB => ImpactTier::High,
        Some(bytes) if bytes >= 10 * MIB => ImpactTier::Medium,
        _ => ImpactTier::Low,
    }
}

/// Scores with default thresholds
pub fn score(finding: &Finding, plan: &PlanTree, features: &QueryFeatures) -> ScoredFinding {
    Scorer::default().score(finding, plan, features)
}
