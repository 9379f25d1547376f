//! Planwise Core - shared abstractions for the plan advisor
//!
//! This crate defines the seams every other planwise crate depends on:
//!
//! - `Connection` - the live database handle supplied by a connection provider
//! - `EngineKind` - the two supported engines and their identifiers
//! - `IndexUsage` - one row of an index-usage snapshot
//! - Common result types like `Value`, `Row` and `QueryResult`

mod connection;
mod engine;
mod error;
mod index_usage;
mod types;

pub use connection::*;
pub use engine::*;
pub use error::*;
pub use index_usage::*;
pub use types::*;
