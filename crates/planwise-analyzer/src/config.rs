//! Advisor thresholds
//!
//! Every number a rule or the scorer compares against lives here, so a
//! deployment can tune them from the `[advisor]` table of a config file.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to parse config: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("invalid value for '{field}': {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Tunables shared by the rules engine and the scorer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdvisorConfig {
    /// Relative estimate error, `|estimated - actual| / max`, above which
    /// statistics are considered stale
    pub stats_divergence_threshold: f64,
    /// Nested loop joins cheaper than this are left alone
    pub nested_loop_cost_threshold: f64,
    /// Cost share above which a finding's impact is HIGH
    pub impact_majority_share: f64,
    /// Cost share below which a finding's impact is LOW
    pub impact_floor_share: f64,
    /// Weight applied to estimated (rather than measured) evidence
    pub estimated_evidence_discount: f64,
    /// Rule ids that are skipped entirely
    pub disabled_rules: Vec<String>,
}

impl Default for AdvisorConfig {
    fn default() -> Self {
        Self {
            stats_divergence_threshold: 0.5,
            nested_loop_cost_threshold: 1000.0,
            impact_majority_share: 0.5,
            impact_floor_share: 0.1,
            estimated_evidence_discount: 0.8,
            disabled_rules: Vec::new(),
        }
    }
}

impl AdvisorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses the body of an `[advisor]` table
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: AdvisorConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let fractions = [
            ("stats_divergence_threshold", self.stats_divergence_threshold),
            ("impact_majority_share", self.impact_majority_share),
            ("impact_floor_share", self.impact_floor_share),
            ("estimated_evidence_discount", self.estimated_evidence_discount),
        ];
        for (field, value) in fractions {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::Invalid {
                    field,
                    reason: format!("{value} is outside 0.0..=1.0"),
                });
            }
        }
        if self.impact_floor_share > self.impact_majority_share {
            return Err(ConfigError::Invalid {
                field: "impact_floor_share",
                reason: format!(
                    "{} exceeds impact_majority_share {}",
                    self.impact_floor_share, self.impact_majority_share
                ),
            });
        }
        if self.nested_loop_cost_threshold < 0.0 {
            return Err(ConfigError::Invalid {
                field: "nested_loop_cost_threshold",
                reason: "must not be negative".to_string(),
            });
        }
        Ok(())
    }

    pub fn is_rule_enabled(&self, rule_id: &str) -> bool {
        !self
            .disabled_rules
            .iter()
            .any(|id| id.eq_ignore_ascii_case(rule_id))
    }

    pub fn with_stats_divergence_threshold(mut self, threshold: f64) -> Self {
        self.stats_divergence_threshold = threshold.clamp(0.0, 1.0);
        self
    }

    pub fn with_nested_loop_cost_threshold(mut self, threshold: f64) -> Self {
        self.nested_loop_cost_threshold = threshold.max(0.0);
        self
    }

    pub fn with_impact_shares(mut self, floor: f64, majority: f64) -> Self {
        let majority = majority.clamp(0.0, 1.0);
        self.impact_majority_share = majority;
        self.impact_floor_share = floor.clamp(0.0, majority);
        self
    }

    pub fn with_estimated_evidence_discount(mut self, discount: f64) -> Self {
        self.estimated_evidence_discount = discount.clamp(0.0, 1.0);
        self
    }

    pub fn with_disabled_rule(mut self, rule_id: impl Into<String>) -> Self {
        self.disabled_rules.push(rule_id.into());
        self
    }
}

#[cfg(test)]
mod tests;
