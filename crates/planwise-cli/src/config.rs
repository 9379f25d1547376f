//! The optional `--config` file

use anyhow::Context;
use planwise_analyzer::AdvisorConfig;
use planwise_validation::HarnessConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// `[advisor]` and `[harness]` tables; both may be omitted
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlanwiseConfig {
    pub advisor: AdvisorConfig,
    pub harness: HarnessConfig,
}

impl PlanwiseConfig {
    pub fn from_toml_str(text: &str) -> anyhow::Result<Self> {
        let config: Self = toml::from_str(text).context("invalid configuration")?;
        config
            .advisor
            .validate()
            .context("invalid [advisor] configuration")?;
        config
            .harness
            .validate()
            .context("invalid [harness] configuration")?;
        Ok(config)
    }

    /// Defaults when no file is given
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config = Self::from_toml_str(&text)
            .with_context(|| format!("in config file {}", path.display()))?;
        tracing::debug!(path = %path.display(), "loaded configuration");
        Ok(config)
    }
}
