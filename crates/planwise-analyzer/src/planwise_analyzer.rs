//! Planwise Analyzer - plan-driven optimization advice
//!
//! This crate provides the pure, synchronous half of the advisor:
//! - Extracting predicate/table/clause features from query text
//! - Normalizing PostgreSQL and MySQL EXPLAIN output into one plan tree
//! - Running detection rules over the tree
//! - Scoring findings with a confidence and an impact tier
//! - Assembling everything into a recommendation report
//!
//! Nothing here touches the network, so every entry point can be called
//! concurrently for independent queries.

pub mod config;
pub mod explain;
pub mod features;
pub mod report;
pub mod rules;
pub mod scoring;

pub use config::*;
pub use explain::*;
pub use features::*;
pub use report::*;
pub use rules::*;
pub use scoring::*;
