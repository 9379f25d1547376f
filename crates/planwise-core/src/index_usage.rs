//! Index usage snapshot records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One index's usage counters over an observation window.
///
/// Snapshots are produced by a periodic collector and consumed only by the
/// unused-index rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexUsage {
    #[serde(default)]
    pub schema: Option<String>,
    pub table: String,
    pub index: String,
    /// Times the index was used for a scan since counters were last reset
    pub times_used: u64,
    #[serde(default)]
    pub size_bytes: Option<u64>,
    /// Primary key or unique constraint indexes are never drop candidates
    #[serde(default)]
    pub is_unique: bool,
    #[serde(default)]
    pub is_primary: bool,
    #[serde(default)]
    pub observed_at: Option<DateTime<Utc>>,
}

impl IndexUsage {
    pub fn new(table: impl Into<String>, index: impl Into<String>, times_used: u64) -> Self {
        Self {
            schema: None,
            table: table.into(),
            index: index.into(),
            times_used,
            size_bytes: None,
            is_unique: false,
            is_primary: false,
            observed_at: None,
        }
    }

    pub fn with_size_bytes(mut self, size: u64) -> Self {
        self.size_bytes = Some(size);
        self
    }

    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    pub fn unique(mut self) -> Self {
        self.is_unique = true;
        self
    }

    pub fn primary(mut self) -> Self {
        self.is_primary = true;
        self.is_unique = true;
        self
    }

    /// Whether this index backs a constraint and must be kept
    pub fn is_constraint(&self) -> bool {
        self.is_primary || self.is_unique
    }

    /// Human-readable size, in the style of `pg_size_pretty`
    pub fn size_pretty(&self) -> Option<String> {
        self.size_bytes.map(|bytes| {
            const UNITS: [&str; 4] = ["bytes", "kB", "MB", "GB"];
            let mut size = bytes as f64;
            let mut unit = 0;
            while size >= 10240.0 && unit < UNITS.len() - 1 {
                size /= 1024.0;
                unit += 1;
            }
            format!("{} {}", size.round() as u64, UNITS[unit])
        })
    }
}
