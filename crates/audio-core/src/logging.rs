//! Log output for the bot process
//!
//! The filter is an `EnvFilter` directive string read from `BOTMIC_LOG`,
//! then `RUST_LOG`, defaulting to `info`. `BOTMIC_LOG_FORMAT=json` switches
//! to one JSON object per line for log shippers.

use crate::error::{AudioError, AudioResult};
use std::str::FromStr;
use tracing::debug;
use tracing_subscriber::{EnvFilter, fmt};

pub const LOG_FILTER_ENV: &str = "BOTMIC_LOG";
pub const LOG_FORMAT_ENV: &str = "BOTMIC_LOG_FORMAT";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = AudioError;

    fn from_str(value: &str) -> AudioResult<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "text" | "pretty" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(AudioError::config(format!("unknown log format '{}'", other))),
        }
    }
}

/// How the process logs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    /// `EnvFilter` directives, e.g. `info,botmic_signaling_core=debug`
    pub filter: String,
    pub format: LogFormat,
    /// Prefix records with source file and line
    pub source_location: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            format: LogFormat::Text,
            source_location: false,
        }
    }
}

impl LoggingConfig {
    pub fn from_env() -> AudioResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = filter.into();
        self
    }

    pub fn json(mut self) -> Self {
        self.format = LogFormat::Json;
        self
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> AudioResult<Self> {
        let mut config = Self::default();
        if let Some(filter) = lookup(LOG_FILTER_ENV).or_else(|| lookup("RUST_LOG")) {
            config.filter = filter;
        }
        if let Some(format) = lookup(LOG_FORMAT_ENV) {
            config.format = format.parse()?;
        }
        // JSON records carry file and line
        config.source_location = config.format == LogFormat::Json;
        config.env_filter()?;
        Ok(config)
    }

    fn env_filter(&self) -> AudioResult<EnvFilter> {
        EnvFilter::try_new(&self.filter)
            .map_err(|e| AudioError::config(format!("invalid log filter '{}': {}", self.filter, e)))
    }
}

/// Install the global subscriber.
///
/// Returns `Ok(false)` when one is already installed, so embedding hosts
/// and tests may call this more than once.
pub fn setup_logging(config: &LoggingConfig) -> AudioResult<bool> {
    let builder = fmt::Subscriber::builder()
        .with_env_filter(config.env_filter()?)
        .with_file(config.source_location)
        .with_line_number(config.source_location);

    let installed = match config.format {
        LogFormat::Text => builder.try_init().is_ok(),
        LogFormat::Json => builder.json().try_init().is_ok(),
    };
    if installed {
        debug!("Logging to stdout as {:?} with filter '{}'", config.format, config.filter);
    }
    Ok(installed)
}
