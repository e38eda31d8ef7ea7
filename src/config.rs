//! Layered configuration.
//!
//! Settings are resolved in order: built-in defaults, an optional TOML file,
//! then `SCRAPEWATCH_*` environment variables. The binary applies explicit
//! command-line flags on top.
//!
//! ```toml
//! endpoint = "http://search-engine:8080/metrics"
//! interval = "5s"
//! timeout = "5s"
//! history_capacity = 10000
//! range = "1h"
//! ```

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;

use crate::data::duration::parse_duration;
use crate::data::history::{self, TimeRange};
use crate::session::PollOptions;

/// Default scrape target.
pub const DEFAULT_ENDPOINT: &str = "http://localhost:8080/metrics";

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "SCRAPEWATCH";

/// Resolved settings before validation.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Prometheus endpoint to scrape.
    pub endpoint: String,
    /// Read payloads from this file instead of `endpoint`.
    pub file: Option<PathBuf>,
    /// Poll interval (e.g., "5s").
    pub interval: String,
    /// Per-poll timeout (e.g., "5s").
    pub timeout: String,
    /// Number of polls retained in history.
    pub history_capacity: usize,
    /// Default view window ("15m", "1h", "24h" or "7d").
    pub range: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            file: None,
            interval: "5s".to_string(),
            timeout: "5s".to_string(),
            history_capacity: history::DEFAULT_CAPACITY,
            range: TimeRange::default().label().to_string(),
        }
    }
}

impl Settings {
    /// Load settings from an optional config file and the process environment.
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        Self::from_sources(config_path, Environment::with_prefix(ENV_PREFIX))
    }

    fn from_sources(config_path: Option<&Path>, env: Environment) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = config_path {
            builder = builder.add_source(File::from(path));
        }

        let config = builder
            .add_source(env.try_parsing(true))
            .build()
            .context("Failed to load configuration")?;

        config
            .try_deserialize()
            .context("Invalid configuration")
    }

    /// Validated poll timing and retention.
    pub fn poll_options(&self) -> Result<PollOptions> {
        let interval = parse_duration(&self.interval)
            .with_context(|| format!("Invalid interval: {}", self.interval))?;
        let request_timeout = parse_duration(&self.timeout)
            .with_context(|| format!("Invalid timeout: {}", self.timeout))?;

        if interval.is_zero() {
            bail!("Poll interval must be greater than zero");
        }
        if request_timeout.is_zero() {
            bail!("Request timeout must be greater than zero");
        }
        if self.history_capacity == 0 {
            bail!("History capacity must be greater than zero");
        }

        Ok(PollOptions {
            interval,
            request_timeout,
            history_capacity: self.history_capacity,
        })
    }

    /// The configured default view window.
    pub fn time_range(&self) -> Result<TimeRange> {
        self.range.parse().map_err(anyhow::Error::msg)
    }
}
