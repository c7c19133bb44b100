//! Layered settings.
//!
//! Values come from built-in defaults, then an optional config file, then
//! `STREAMWATCH_*` environment variables. The CLI applies its own flags on
//! top of the result.
//!
//! ```toml
//! controller = "http://127.0.0.1:9090"
//! secret = "s3cret"
//! reconnect_delay = "500ms"
//! flush_interval = 50
//! max_log_lines = 1000
//! log_level = "warning"
//! backlog_url = "http://127.0.0.1:9090/logs/history"
//! backlog_timeout = "5s"
//! ```

use std::path::Path;
use std::time::Duration;

use config::{Config, Environment, File};
use serde::{Deserialize, Deserializer};
use streamwatch_types::Severity;

use crate::backlog::DEFAULT_BACKLOG_TIMEOUT;
use crate::duration::parse_duration;
use crate::error::{Error, Result};
use crate::router::TRANSPORT_ERROR_MARKER;

/// Prefix of environment overrides, e.g. `STREAMWATCH_SECRET`.
pub const ENV_PREFIX: &str = "STREAMWATCH";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Backend controller base URL.
    pub controller: String,

    /// Bearer token for the controller.
    pub secret: Option<String>,

    #[serde(deserialize_with = "duration_field")]
    pub reconnect_delay: Duration,

    /// Coalescing window for live log lines.
    #[serde(deserialize_with = "duration_field")]
    pub flush_interval: Duration,

    pub max_log_lines: usize,

    /// Minimum severity of the log stream.
    pub log_level: Severity,

    /// Where to fetch the log backlog from. No backlog when unset.
    pub backlog_url: Option<String>,

    /// Longest wait for the backlog before live tailing starts without it.
    #[serde(deserialize_with = "duration_field")]
    pub backlog_timeout: Duration,

    /// Bound of each channel's inbound frame queue.
    pub channel_capacity: usize,

    /// Text frames starting with this are transport faults, not payloads.
    pub transport_error_marker: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            controller: "http://127.0.0.1:9090".to_string(),
            secret: None,
            reconnect_delay: Duration::from_millis(500),
            flush_interval: Duration::from_millis(50),
            max_log_lines: 1000,
            log_level: Severity::Info,
            backlog_url: None,
            backlog_timeout: DEFAULT_BACKLOG_TIMEOUT,
            channel_capacity: 256,
            transport_error_marker: TRANSPORT_ERROR_MARKER.to_string(),
        }
    }
}

impl Settings {
    /// Load settings, optionally from a file.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            if !path.exists() {
                return Err(Error::Config(format!("config file not found: {}", path.display())));
            }
            builder = builder.add_source(File::from(path));
        }

        let settings: Settings = builder
            .add_source(Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()?
            .try_deserialize()?;

        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.controller.trim().is_empty() {
            return Err(Error::Config("controller must not be empty".to_string()));
        }
        if self.max_log_lines == 0 {
            return Err(Error::Config("max_log_lines must be at least 1".to_string()));
        }
        if self.channel_capacity == 0 {
            return Err(Error::Config("channel_capacity must be at least 1".to_string()));
        }
        if self.backlog_timeout.is_zero() {
            return Err(Error::Config("backlog_timeout must be positive".to_string()));
        }
        if self.transport_error_marker.is_empty() {
            return Err(Error::Config("transport_error_marker must not be empty".to_string()));
        }
        Ok(())
    }
}

/// Accepts `"500ms"`-style strings or integer milliseconds.
fn duration_field<'de, D>(deserializer: D) -> std::result::Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Millis(u64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Millis(ms) => Ok(Duration::from_millis(ms)),
        Raw::Text(text) => parse_duration(&text).map_err(serde::de::Error::custom),
    }
}
