//! `tracing` subscriber setup.
//!
//! Logs go to stderr so stdout stays parseable. `RUST_LOG` takes
//! precedence over `[logging].level`.

use anyhow::Result;
use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;

pub fn init(config: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .map_err(|e| anyhow::anyhow!("invalid logging.level '{}': {}", config.level, e))?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    let installed = if config.format == "json" {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    // A subscriber may already be installed (tests, embedding hosts).
    if let Err(e) = installed {
        tracing::debug!(error = %e, "tracing subscriber already set");
    }
    Ok(())
}
