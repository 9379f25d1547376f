//! EXPLAIN normalization
//!
//! Turns engine-tagged EXPLAIN payloads into a single generic `PlanTree`:
//! - PostgreSQL `EXPLAIN (FORMAT JSON)`, with or without `ANALYZE`
//! - MySQL `EXPLAIN FORMAT=JSON`
//! - MySQL traditional tabular `EXPLAIN` (as text or as result rows)
//!
//! # Example
//!
//! ```
//! use planwise_analyzer::explain::{normalize_plan, NodeKind};
//!
//! let pg_json = r#"[{"Plan": {"Node Type": "Seq Scan", "Relation Name": "users",
//!                    "Startup Cost": 0.0, "Total Cost": 10.0, "Plan Rows": 100}}]"#;
//! let tree = normalize_plan("postgresql", pg_json).unwrap();
//! assert_eq!(tree.root.kind, NodeKind::SeqScan);
//! ```

pub mod mysql;
pub mod normalize;
pub mod plan;
pub mod postgres;

pub use normalize::{PlanParseError, RawPlan, normalize, normalize_plan};
pub use plan::{
    JoinType, NodeCost, NodeKind, PlanDiagnostic, PlanNode, PlanNodeIterator, PlanTree,
};
