//! Planwise Validation - reversible trials of suggested schema changes
//!
//! The harness is the only part of planwise that mutates a live database.
//! It measures a query, applies one finding's change, measures again and
//! always undoes the change, producing `ValidatedEvidence` on success.
//!
//! Trials against the same (table, definition) pair must not overlap;
//! `TrialLocks` provides the keyed lock callers share for that.

mod config;
mod error;
mod harness;
mod locks;
mod measure;
mod trial;

pub use config::*;
pub use error::*;
pub use harness::*;
pub use locks::*;
pub use measure::*;
