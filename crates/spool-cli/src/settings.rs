//! Settings - spool バイナリの設定ファイル
//!
//! ```toml
//! [log]
//! level = "debug"
//! format = "json"
//!
//! [broker]
//! lease_duration_ms = 10000
//! ```

use std::path::Path;

use serde::Deserialize;
use spool_core::BrokerConfig;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub broker: BrokerConfig,
    pub log: LogSettings,
}

impl Default for Settings {
    fn default() -> Self {
        // ファイル無しで動かす demo 向けに retry と forward を短くしておく
        let mut broker = BrokerConfig::default();
        broker.retry.scale_ms = 200;
        broker.retry.max_delay_ms = 2_000;
        broker.forwarder.interval_ms = 100;
        broker.recoverer.interval_ms = 1_000;
        Self {
            broker,
            log: LogSettings::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    /// Used when `RUST_LOG` is unset.
    pub level: String,
    pub format: LogFormat,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl Settings {
    /// Reads `path` if given, otherwise the built-in defaults. The broker section is validated
    /// either way.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let settings: Settings = match path {
            Some(p) => spool_core::config::load(p)?,
            None => Settings::default(),
        };
        settings.broker.validate()?;
        Ok(settings)
    }
}
