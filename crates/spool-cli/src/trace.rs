use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

use crate::settings::{LogFormat, LogSettings};

/// `RUST_LOG` wins over the configured level.
fn build_env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}

pub fn init(log: &LogSettings) -> anyhow::Result<()> {
    let filter = build_env_filter(&log.level);
    match log.format {
        LogFormat::Text => {
            let layer = tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_level(true)
                .compact()
                .with_filter(filter);
            tracing_subscriber::registry().with(layer).try_init()?;
        }
        LogFormat::Json => {
            let layer = tracing_subscriber::fmt::layer()
                .json()
                .with_target(true)
                .with_level(true)
                .with_filter(filter);
            tracing_subscriber::registry().with(layer).try_init()?;
        }
    }
    Ok(())
}
