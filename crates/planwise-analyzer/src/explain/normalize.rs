//! The single normalization boundary between engine payloads and the plan tree

use crate::explain::plan::PlanTree;
use crate::explain::{mysql, postgres};
use planwise_core::{EngineKind, QueryResult, UnknownEngine, Value};
use thiserror::Error;

/// Errors that can occur while normalizing an EXPLAIN payload
#[derive(Debug, Error)]
pub enum PlanParseError {
    #[error(transparent)]
    UnknownEngine(#[from] UnknownEngine),

    #[error("Empty EXPLAIN output")]
    Empty,

    #[error("Invalid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("Missing {0} in EXPLAIN output")]
    MissingRoot(&'static str),

    #[error("Missing required field '{field}' on {node_type} node")]
    MissingField {
        node_type: String,
        field: &'static str,
    },

    #[error("Invalid plan structure: {0}")]
    InvalidStructure(String),

    #[error("{engine} does not produce {format} EXPLAIN output")]
    UnsupportedFormat {
        engine: EngineKind,
        format: &'static str,
    },
}

/// Result type for plan normalization
pub type Result<T> = std::result::Result<T, PlanParseError>;

/// A raw EXPLAIN payload, before any engine-specific interpretation
#[derive(Debug, Clone, PartialEq)]
pub enum RawPlan {
    /// Structured output (`FORMAT JSON`)
    Json(serde_json::Value),
    /// Text output as a client printed it (tab or pipe separated rows)
    Text(String),
    /// Tabular output as result rows, keyed by column name
    Table {
        columns: Vec<String>,
        rows: Vec<Vec<Option<String>>>,
    },
}

impl RawPlan {
    /// Interprets text as JSON when it looks like JSON, otherwise as tabular text
    pub fn parse(text: &str) -> Result<Self> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(PlanParseError::Empty);
        }
        if trimmed.starts_with('[') || trimmed.starts_with('{') {
            Ok(RawPlan::Json(serde_json::from_str(trimmed)?))
        } else {
            Ok(RawPlan::Text(trimmed.to_string()))
        }
    }

    /// Builds a payload from rows returned by running EXPLAIN on a connection.
    ///
    /// A single-cell result holding JSON is treated as structured output;
    /// anything else is treated as the tabular format.
    pub fn from_query_result(result: &QueryResult) -> Result<Self> {
        if !result.has_rows() {
            return Err(PlanParseError::Empty);
        }
        if result.columns.len() == 1
            && result.row_count() == 1
            && let Some(json) = result.first_value().and_then(Value::to_json)
        {
            return Ok(RawPlan::Json(json));
        }

        let columns = result.columns.iter().map(|c| c.name.clone()).collect();
        let rows = result
            .rows
            .iter()
            .map(|row| {
                row.values
                    .iter()
                    .map(|v| if v.is_null() { None } else { Some(v.to_string()) })
                    .collect()
            })
            .collect();
        Ok(RawPlan::Table { columns, rows })
    }
}

/// Normalizes an EXPLAIN payload tagged with an engine identifier.
///
/// The identifier must be exactly `postgresql` or `mysql`.
pub fn normalize_plan(engine_id: &str, raw_plan: &str) -> Result<PlanTree> {
    let engine: EngineKind = engine_id.parse()?;
    normalize(engine, &RawPlan::parse(raw_plan)?)
}

/// Normalizes an already-classified payload for a known engine
#[tracing::instrument(skip_all, fields(engine = %engine))]
pub fn normalize(engine: EngineKind, raw: &RawPlan) -> Result<PlanTree> {
    let tree = match (engine, raw) {
        (EngineKind::Postgresql, RawPlan::Json(value)) => postgres::parse_json_explain(value)?,
        (EngineKind::Postgresql, RawPlan::Text(_) | RawPlan::Table { .. }) => {
            return Err(PlanParseError::UnsupportedFormat {
                engine,
                format: "tabular",
            });
        }
        (EngineKind::Mysql, RawPlan::Json(value)) => mysql::parse_json_explain(value)?,
        (EngineKind::Mysql, RawPlan::Text(text)) => mysql::parse_tabular_text(text)?,
        (EngineKind::Mysql, RawPlan::Table { columns, rows }) => {
            mysql::parse_tabular_rows(columns, rows)?
        }
    };

    if tree.is_malformed() {
        for diagnostic in &tree.diagnostics {
            tracing::warn!(%diagnostic, "plan violates the cost invariant");
        }
    }
    tracing::debug!(
        nodes = tree.node_count(),
        total_cost = tree.total_cost(),
        malformed = tree.is_malformed(),
        "normalized plan"
    );
    Ok(tree)
}

/// Reads a number that engines sometimes print as a JSON string ("10.25")
pub(crate) fn json_f64(value: Option<&serde_json::Value>) -> Option<f64> {
    match value? {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Reads a row count, rounding fractional per-loop averages
pub(crate) fn json_rows(value: Option<&serde_json::Value>) -> Option<u64> {
    json_f64(value).filter(|v| *v >= 0.0).map(|v| v.round() as u64)
}

pub(crate) fn json_str(value: Option<&serde_json::Value>) -> Option<String> {
    value.and_then(|v| v.as_str()).map(str::to_string)
}

pub(crate) fn json_strings(value: Option<&serde_json::Value>) -> Vec<String> {
    value
        .and_then(|v| v.as_array())
        .map(|items| {
            items
                .iter()
                .filter_map(|k| k.as_str().map(String::from))
                .collect()
        })
        .unwrap_or_default()
}
