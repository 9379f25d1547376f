//! Harness states and trial failures

use planwise_analyzer::{ParseError, PlanParseError};
use planwise_core::PlanwiseError;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Phase of a validation trial
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HarnessState {
    Idle,
    /// Baseline measurement and the trial DDL
    Applying,
    Measuring,
    Reverting,
    Done,
    Failed,
}

impl HarnessState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "IDLE",
            Self::Applying => "APPLYING",
            Self::Measuring => "MEASURING",
            Self::Reverting => "REVERTING",
            Self::Done => "DONE",
            Self::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

impl fmt::Display for HarnessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What went wrong inside a phase
#[derive(Debug, Error)]
pub enum HarnessErrorKind {
    #[error("{0} cannot be trialed because it has no inverse")]
    NotReversible(String),

    #[error("cancelled")]
    Cancelled,

    #[error("invalid query: {0}")]
    Query(#[from] ParseError),

    #[error("`{sql}` failed: {source}")]
    Statement {
        sql: String,
        #[source]
        source: PlanwiseError,
    },

    #[error("could not read the plan: {0}")]
    Plan(#[from] PlanParseError),

    #[error("no definition found for index {index} on {table}")]
    MissingDefinition { table: String, index: String },
}

impl HarnessErrorKind {
    pub(crate) fn statement(sql: &str, source: PlanwiseError) -> Self {
        HarnessErrorKind::Statement {
            sql: sql.to_string(),
            source,
        }
    }
}

/// A failed trial and the phase it failed in.
///
/// Failures while APPLYING or MEASURING left nothing behind. A failure
/// while REVERTING means the trial change is still in the database and
/// someone has to remove it by hand.
#[derive(Debug, Error)]
#[error("validation failed while {phase}: {kind}{}", manual_cleanup(.pending_revert))]
pub struct HarnessError {
    pub phase: HarnessState,
    #[source]
    pub kind: HarnessErrorKind,
    /// Statement that still needs to run, set only for escalated failures
    pub pending_revert: Option<String>,
}

fn manual_cleanup(pending: &Option<String>) -> String {
    match pending {
        Some(sql) => format!("; MANUAL CLEANUP REQUIRED: run `{sql}`"),
        None => String::new(),
    }
}

impl HarnessError {
    pub fn new(phase: HarnessState, kind: HarnessErrorKind) -> Self {
        Self {
            phase,
            kind,
            pending_revert: None,
        }
    }

    pub(crate) fn revert_failed(revert_sql: &str, source: PlanwiseError) -> Self {
        Self {
            phase: HarnessState::Reverting,
            kind: HarnessErrorKind::statement(revert_sql, source),
            pending_revert: Some(revert_sql.to_string()),
        }
    }

    /// Whether the database may have been left mutated.
    ///
    /// Escalated errors must reach an operator; never log them as warnings.
    pub fn is_escalated(&self) -> bool {
        self.phase == HarnessState::Reverting
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.kind, HarnessErrorKind::Cancelled)
    }
}
