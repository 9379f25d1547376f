//! Evidence gathered by a validation trial

use super::summary::PlanSummary;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Overall verdict on a trial's measured improvement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Assessment {
    Excellent,
    Good,
    Moderate,
    Minimal,
    Negative,
}

impl Assessment {
    /// EXCELLENT and GOOD require the plan itself to have improved;
    /// otherwise only the timing counts.
    pub fn from_improvement(improvement_pct: f64, plan_improved: bool) -> Self {
        if plan_improved && improvement_pct > 50.0 {
            Assessment::Excellent
        } else if plan_improved && improvement_pct > 20.0 {
            Assessment::Good
        } else if improvement_pct > 10.0 {
            Assessment::Moderate
        } else if improvement_pct > 0.0 {
            Assessment::Minimal
        } else {
            Assessment::Negative
        }
    }

    /// Whether the change is worth keeping
    pub fn is_worthwhile(&self) -> bool {
        matches!(self, Self::Excellent | Self::Good | Self::Moderate)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Excellent => "EXCELLENT",
            Self::Good => "GOOD",
            Self::Moderate => "MODERATE",
            Self::Minimal => "MINIMAL",
            Self::Negative => "NEGATIVE",
        }
    }
}

impl fmt::Display for Assessment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Wall-clock timing of the query in one trial phase
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimingSample {
    pub first_run_ms: f64,
    /// Mean over all runs (equal to `first_run_ms` when only one ran)
    pub mean_ms: f64,
    pub runs: u32,
}

impl TimingSample {
    pub fn from_runs(runs: &[f64]) -> Option<Self> {
        let first = *runs.first()?;
        Some(Self {
            first_run_ms: first,
            mean_ms: runs.iter().sum::<f64>() / runs.len() as f64,
            runs: runs.len() as u32,
        })
    }
}

/// Relative change from `before` to `after`, positive when `after` is smaller
pub fn improvement_pct(before: f64, after: f64) -> f64 {
    if before > 0.0 {
        (before - after) / before * 100.0
    } else {
        0.0
    }
}

/// What a completed trial measured
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidatedEvidence {
    pub rule_id: String,
    /// The DDL that was applied for the trial
    pub applied: String,
    /// The DDL that undid it
    pub reverted_with: String,
    pub before: PlanSummary,
    pub after: PlanSummary,
    pub before_time: TimingSample,
    pub after_time: TimingSample,
    /// Based on mean execution times
    pub improvement_pct: f64,
    pub cost_change_pct: Option<f64>,
    /// A full scan on the target table became an index access
    pub plan_improved: bool,
    pub assessment: Assessment,
    /// True only when the revert statement succeeded
    pub reverted: bool,
}

impl fmt::Display for ValidatedEvidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {:.2} ms -> {:.2} ms ({:+.1}%)",
            self.assessment, self.before_time.mean_ms, self.after_time.mean_ms, self.improvement_pct
        )?;
        if let Some(cost) = self.cost_change_pct {
            write!(f, ", cost {cost:+.1}%")?;
        }
        if self.plan_improved {
            write!(f, ", plan improved")?;
        }
        write!(f, ", {}", if self.reverted { "reverted" } else { "NOT reverted" })
    }
}
