//! Findings produced by rules

use planwise_core::EngineKind;
use serde::{Deserialize, Serialize};
use std::fmt;

/// What kind of opportunity a finding describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Category {
    MissingIndex,
    UnusedIndexCandidate,
    InefficientSort,
    InefficientJoin,
    StatsIssue,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MissingIndex => "MISSING_INDEX",
            Self::UnusedIndexCandidate => "UNUSED_INDEX_CANDIDATE",
            Self::InefficientSort => "INEFFICIENT_SORT",
            Self::InefficientJoin => "INEFFICIENT_JOIN",
            Self::StatsIssue => "STATS_ISSUE",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The schema change a finding proposes, kept alongside its DDL text so the
/// validation harness can derive the inverse statement.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SchemaChange {
    CreateIndex {
        name: String,
        table: String,
        columns: Vec<String>,
    },
    DropIndex {
        name: String,
        table: String,
        /// Schema the index lives in; unqualified names resolve via the search path
        #[serde(default, skip_serializing_if = "Option::is_none")]
        schema: Option<String>,
        /// Full CREATE INDEX statement, when known, for recreating the index
        definition: Option<String>,
    },
    Analyze {
        tables: Vec<String>,
    },
}

impl SchemaChange {
    /// Builds a CREATE INDEX change named `idx_<table>_<col>_<col>`
    pub fn create_index(table: &str, columns: Vec<String>) -> Self {
        SchemaChange::CreateIndex {
            name: index_name(table, &columns),
            table: table.to_string(),
            columns,
        }
    }

    /// The table the change applies to (the first one for ANALYZE)
    pub fn table(&self) -> &str {
        match self {
            SchemaChange::CreateIndex { table, .. } | SchemaChange::DropIndex { table, .. } => {
                table
            }
            SchemaChange::Analyze { tables } => tables.first().map(String::as_str).unwrap_or(""),
        }
    }

    /// Whether the change creates or removes an object that can be undone
    pub fn is_reversible(&self) -> bool {
        !matches!(self, SchemaChange::Analyze { .. })
    }

    /// Renders the change as a statement valid for `engine`
    pub fn to_sql(&self, engine: EngineKind) -> String {
        let q = |ident: &str| engine.quote_ident(ident);
        match self {
            SchemaChange::CreateIndex {
                name,
                table,
                columns,
            } => {
                let cols: Vec<String> = columns.iter().map(|c| q(c)).collect();
                format!("CREATE INDEX {} ON {} ({});", q(name), q(table), cols.join(", "))
            }
            SchemaChange::DropIndex {
                name,
                table,
                schema,
                ..
            } => {
                let qualify = |ident: &str| match schema {
                    Some(schema) => format!("{}.{}", q(schema), q(ident)),
                    None => q(ident),
                };
                match engine {
                    EngineKind::Postgresql => format!("DROP INDEX {};", qualify(name)),
                    EngineKind::Mysql => format!("DROP INDEX {} ON {};", q(name), qualify(table)),
                }
            }
            SchemaChange::Analyze { tables } => {
                let tables: Vec<String> = tables.iter().map(|t| q(t)).collect();
                match engine {
                    EngineKind::Postgresql => format!("ANALYZE {};", tables.join(", ")),
                    EngineKind::Mysql => format!("ANALYZE TABLE {};", tables.join(", ")),
                }
            }
        }
    }
}

/// `idx_<table>_<col>_<col>`, truncated to the 63-byte identifier limit
/// PostgreSQL enforces (MySQL allows 64).
pub fn index_name(table: &str, columns: &[String]) -> String {
    let mut name = format!("idx_{}_{}", table, columns.join("_"));
    if name.len() > 63 {
        let mut end = 63;
        while !name.is_char_boundary(end) {
            end -= 1;
        }
        name.truncate(end);
    }
    name
}

/// The object a finding is about
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    pub table: String,
    #[serde(default)]
    pub columns: Vec<String>,
    #[serde(default)]
    pub index: Option<String>,
}

impl Target {
    pub fn columns(table: impl Into<String>, columns: Vec<String>) -> Self {
        Self {
            table: table.into(),
            columns,
            index: None,
        }
    }

    pub fn index(table: impl Into<String>, index: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            columns: Vec::new(),
            index: Some(index.into()),
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.index {
            Some(index) => write!(f, "{} on {}", index, self.table),
            None if self.columns.is_empty() => write!(f, "{}", self.table),
            None => write!(f, "{}({})", self.table, self.columns.join(", ")),
        }
    }
}

/// Observed facts that made a rule fire
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Evidence {
    /// Label of the triggering plan node
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_cost: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_rows: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual_rows: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rows_removed_by_filter: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filtered_pct: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort_method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub times_used: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index_size_bytes: Option<u64>,
}

/// An unscored detection produced by a single rule.
///
/// Findings are never modified after a rule emits them; scoring wraps them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    /// Stable rule identifier, e.g. `MISSING_INDEX_001`
    pub rule_id: String,
    pub category: Category,
    pub target: Target,
    pub rationale: String,
    /// DDL statement valid for the engine the plan came from
    pub suggested_action: String,
    pub change: SchemaChange,
    /// Pre-order id of the triggering plan node; `None` for snapshot-driven rules
    pub node_id: Option<usize>,
    pub evidence: Evidence,
    pub caveats: Vec<String>,
}

impl Finding {
    /// Whether this finding was derived from the plan tree
    pub fn is_plan_bound(&self) -> bool {
        self.node_id.is_some()
    }
}

#[cfg(test)]
mod tests;
