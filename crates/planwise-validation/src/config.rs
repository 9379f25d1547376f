//! Harness settings, read from the `[harness]` table of a config file

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HarnessConfigError {
    #[error("failed to parse harness config: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("iterations must be at least 1")]
    ZeroIterations,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// How many times the query runs in each measured phase
    pub iterations: u32,
    /// When false, each phase runs the query once regardless of `iterations`
    pub repeat_runs: bool,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            iterations: 3,
            repeat_runs: true,
        }
    }
}

impl HarnessConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, HarnessConfigError> {
        let config: HarnessConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), HarnessConfigError> {
        if self.iterations == 0 {
            return Err(HarnessConfigError::ZeroIterations);
        }
        Ok(())
    }

    /// Runs per measured phase
    pub fn runs(&self) -> u32 {
        if self.repeat_runs {
            self.iterations.max(1)
        } else {
            1
        }
    }

    pub fn with_iterations(mut self, iterations: u32) -> Self {
        self.iterations = iterations.max(1);
        self
    }

    pub fn with_repeat_runs(mut self, repeat: bool) -> Self {
        self.repeat_runs = repeat;
        self
    }
}
