//! Rule evaluation over a plan tree

use super::builtin::{UNUSED_INDEX_RULE, default_rules, unused_index_finding};
use super::finding::{Category, Finding};
use crate::config::AdvisorConfig;
use crate::explain::{PlanNode, PlanTree};
use crate::features::QueryFeatures;
use planwise_core::{EngineKind, IndexUsage};
use std::collections::HashSet;

/// Everything a rule may consult besides the node it is looking at
#[derive(Debug, Clone, Copy)]
pub struct RuleContext<'a> {
    pub features: &'a QueryFeatures,
    pub engine: EngineKind,
    pub config: &'a AdvisorConfig,
}

/// A single detection rule.
///
/// Rules are pure: the same node, ancestors and context always produce the
/// same answer, and a rule that cannot decide simply returns `None`.
pub trait Rule: Send + Sync {
    /// Stable identifier carried by every finding the rule emits
    fn id(&self) -> &'static str;

    fn category(&self) -> Category;

    /// Checks one node; `ancestors` runs from the root down to its parent
    fn check(
        &self,
        node: &PlanNode,
        ancestors: &[&PlanNode],
        ctx: &RuleContext<'_>,
    ) -> Option<Finding>;
}

/// Runs an ordered set of rules against plans and index-usage snapshots
pub struct RulesEngine {
    rules: Vec<Box<dyn Rule>>,
    config: AdvisorConfig,
}

impl Default for RulesEngine {
    fn default() -> Self {
        Self::new(AdvisorConfig::default())
    }
}

impl RulesEngine {
    /// The built-in rules, minus any the config disables
    pub fn new(config: AdvisorConfig) -> Self {
        let rules = default_rules()
            .into_iter()
            .filter(|rule| config.is_rule_enabled(rule.id()))
            .collect();
        Self { rules, config }
    }

    /// An engine running exactly `rules`, in the given order
    pub fn with_rules(rules: Vec<Box<dyn Rule>>, config: AdvisorConfig) -> Self {
        Self { rules, config }
    }

    pub fn config(&self) -> &AdvisorConfig {
        &self.config
    }

    /// Ids of the plan rules this engine runs, in declaration order
    pub fn rule_ids(&self) -> Vec<&'static str> {
        self.rules.iter().map(|r| r.id()).collect()
    }

    /// Walks the plan once and returns every finding, grouped by rule in
    /// declaration order and in pre-order within a rule. Findings that
    /// repeat an earlier (rule, action) pair are dropped.
    #[tracing::instrument(skip_all, fields(engine = %plan.engine, nodes = plan.node_count()))]
    pub fn evaluate(&self, plan: &PlanTree, features: &QueryFeatures) -> Vec<Finding> {
        let ctx = RuleContext {
            features,
            engine: plan.engine,
            config: &self.config,
        };

        let mut per_rule: Vec<Vec<Finding>> = self.rules.iter().map(|_| Vec::new()).collect();
        plan.walk(|node, ancestors| {
            for (rule, found) in self.rules.iter().zip(per_rule.iter_mut()) {
                if let Some(finding) = rule.check(node, ancestors, &ctx) {
                    tracing::debug!(rule = rule.id(), node = node.id, "rule matched");
                    found.push(finding);
                }
            }
        });

        let findings = dedupe(per_rule.into_iter().flatten());
        tracing::debug!(count = findings.len(), "rules evaluated");
        findings
    }

    /// Flags never-used, non-constraint indexes from a usage snapshot
    pub fn evaluate_index_usage(&self, usage: &[IndexUsage], engine: EngineKind) -> Vec<Finding> {
        if !self.config.is_rule_enabled(UNUSED_INDEX_RULE) {
            return Vec::new();
        }
        dedupe(
            usage
                .iter()
                .filter_map(|entry| unused_index_finding(entry, engine)),
        )
    }
}

/// Evaluates the built-in rules with default thresholds
pub fn evaluate_rules(plan: &PlanTree, features: &QueryFeatures) -> Vec<Finding> {
    RulesEngine::default().evaluate(plan, features)
}

/// Evaluates the unused-index rule with default settings
pub fn evaluate_index_usage(usage: &[IndexUsage], engine: EngineKind) -> Vec<Finding> {
    RulesEngine::default().evaluate_index_usage(usage, engine)
}

fn dedupe(findings: impl Iterator<Item = Finding>) -> Vec<Finding> {
    let mut seen = HashSet::new();
    findings
        .filter(|f| seen.insert((f.rule_id.clone(), f.suggested_action.clone())))
        .collect()
}

#[cfg(test)]
mod tests;
