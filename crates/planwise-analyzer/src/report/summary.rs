//! Compact plan summaries for reports and before/after comparisons

use crate::explain::{NodeKind, PlanTree};
use crate::features::QueryFeatures;
use serde::{Deserialize, Serialize};

/// How one relation is read by the plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanSummary {
    pub relation: String,
    pub kind: NodeKind,
    pub node_type: String,
    pub index: Option<String>,
}

impl ScanSummary {
    pub fn label(&self) -> String {
        match &self.index {
            Some(index) => format!("{} on {} using {}", self.node_type, self.relation, index),
            None => format!("{} on {}", self.node_type, self.relation),
        }
    }
}

/// The handful of plan figures a report shows
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanSummary {
    pub root: String,
    pub total_cost: f64,
    pub node_count: usize,
    /// Every node that reads a relation, in pre-order
    pub scans: Vec<ScanSummary>,
    pub execution_time_ms: Option<f64>,
    pub malformed: bool,
}

impl PlanSummary {
    pub fn from_tree(tree: &PlanTree) -> Self {
        let scans = tree
            .iter_nodes()
            .filter_map(|node| {
                Some(ScanSummary {
                    relation: node.relation.clone()?,
                    kind: node.kind,
                    node_type: node.node_type.clone(),
                    index: node.index_name.clone(),
                })
            })
            .collect();

        Self {
            root: tree.root.label(),
            total_cost: tree.total_cost(),
            node_count: tree.node_count(),
            scans,
            execution_time_ms: tree.execution_time_ms,
            malformed: tree.is_malformed(),
        }
    }

    /// Rewrites alias relations (as MySQL reports them) to table names
    pub fn resolve_relations(mut self, features: &QueryFeatures) -> Self {
        for scan in &mut self.scans {
            if let Some(table) = features.resolve_table(&scan.relation) {
                scan.relation = table.to_string();
            }
        }
        self
    }

    /// Relations read by a full scan, without repeats
    pub fn full_scans(&self) -> Vec<&str> {
        let mut tables: Vec<&str> = Vec::new();
        for scan in self.scans.iter().filter(|s| s.kind.is_full_scan()) {
            if !tables.contains(&scan.relation.as_str()) {
                tables.push(&scan.relation);
            }
        }
        tables
    }

    pub fn has_full_scan_on(&self, table: &str) -> bool {
        self.scans
            .iter()
            .any(|s| s.kind.is_full_scan() && s.relation.eq_ignore_ascii_case(table))
    }

    pub fn has_index_access_on(&self, table: &str) -> bool {
        self.scans
            .iter()
            .any(|s| s.kind.is_index_access() && s.relation.eq_ignore_ascii_case(table))
    }

    /// Labels of every scan, joined for one-line display
    pub fn access_paths(&self) -> String {
        self.scans
            .iter()
            .map(ScanSummary::label)
            .collect::<Vec<_>>()
            .join("; ")
    }
}

#[cfg(test)]
mod tests;
