//! Tracing setup for services embedding the storage layer.

use crate::config::LoggingConfig;

/// Initialize the global tracing subscriber from `config`.
///
/// `RUST_LOG` takes precedence over the configured level.  Call once at
/// process startup; a second call returns an error from the subscriber
/// registry and is propagated to the caller.
pub fn init(config: &LoggingConfig) -> anyhow::Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.level));

    if config.format == "json" {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .try_init()
            .map_err(|e| anyhow::anyhow!("failed to initialize logging: {e}"))?;
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .try_init()
            .map_err(|e| anyhow::anyhow!("failed to initialize logging: {e}"))?;
    }

    Ok(())
}
