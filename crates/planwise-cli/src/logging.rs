//! Log output for the binary
//!
//! Logs go to stderr so report output on stdout stays machine-readable.
//! `RUST_LOG` takes precedence over the filter chosen on the command line.

use tracing_subscriber::EnvFilter;

pub const DEFAULT_FILTER: &str = "warn,planwise=info";
pub const VERBOSE_FILTER: &str = "warn,planwise=debug";

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub default_filter: String,
    /// One JSON object per event instead of human-readable lines
    pub json: bool,
}

impl LoggingConfig {
    pub fn new(verbose: bool, json: bool) -> Self {
        Self {
            default_filter: if verbose { VERBOSE_FILTER } else { DEFAULT_FILTER }.to_string(),
            json,
        }
    }
}

pub fn init(config: &LoggingConfig) -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.default_filter));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(true);
    let installed = if config.json {
        builder.json().with_current_span(true).try_init()
    } else {
        builder.try_init()
    };
    installed.map_err(|e| anyhow::anyhow!("failed to install log subscriber: {e}"))
}
