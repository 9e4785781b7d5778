//! Process wide `tracing` subscriber setup.

use tracing_subscriber::EnvFilter;

use crate::config::OutputConfig;

/// Builds the log filter: `RUST_LOG` wins when set, otherwise the level follows `-v` and `-q`.
pub fn env_filter(output: &OutputConfig) -> EnvFilter {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return filter;
    }
    match output.level() {
        Some(level) => EnvFilter::new(level.as_str()),
        None => EnvFilter::new("off"),
    }
}

/// Installs a stderr subscriber. Fails if another global subscriber is already set.
pub fn init(output: &OutputConfig) -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter(output))
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init()
        .map_err(|error| anyhow::anyhow!("failed to initialize logging: {error}"))
}
