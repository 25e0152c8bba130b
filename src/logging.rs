//! Logging infrastructure.
//!
//! Builds the tracing subscriber from the `logger` block of `app.yaml`:
//! a root level, a more specific level for this crate, and a plain or JSON
//! output format. `RUST_LOG` overrides the configured levels when set.

use anyhow::{Context as _, Result};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt as _, util::SubscriberInitExt as _};

use crate::config::{LoggerConfig, LoggerFormat};

/// Initializes the logging system with console output.
///
/// # Errors
///
/// Returns error when the level filter cannot be constructed, or when a
/// subscriber was already installed.
pub fn init(config: &LoggerConfig) -> Result<()> {
    let directives = format!(
        "{},varpoint={}",
        config.root_level.as_filter(),
        config.app_level.as_filter()
    );

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&directives))
        .context("Failed to create env filter")?;

    match config.format {
        LoggerFormat::Json => {
            let layer = fmt::layer()
                .json()
                .with_target(true)
                .with_thread_names(true)
                .with_line_number(true)
                .with_file(true);
            tracing_subscriber::registry()
                .with(env_filter)
                .with(layer)
                .try_init()
                .context("Failed to install the JSON subscriber")?;
        }
        LoggerFormat::Plain => {
            let layer = fmt::layer()
                .with_target(true)
                .with_thread_names(true)
                .with_line_number(true)
                .with_file(true);
            tracing_subscriber::registry()
                .with(env_filter)
                .with(layer)
                .try_init()
                .context("Failed to install the subscriber")?;
        }
    }

    tracing::info!("Logging is now configured. Welcome!");
    tracing::debug!("DEBUG-level logging is enabled.");

    Ok(())
}
