//! Failures reported by a `Connection`
//!
//! Analyzer and harness errors live in their own crates and wrap this one
//! where a database round-trip is involved.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PlanwiseError {
    /// The session could not be opened or was lost
    #[error("connection failed: {0}")]
    Connection(String),

    /// The server rejected a statement
    #[error("statement failed: {0}")]
    Query(String),

    #[error("driver error: {0}")]
    Driver(String),

    /// Bad URL or option, detected before any round-trip
    #[error("invalid connection settings: {0}")]
    Configuration(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("could not decode JSON: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0} is not supported")]
    NotSupported(String),

    #[error("operation cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, PlanwiseError>;
