/*!
 * Structured logging setup
 *
 * Library code only emits `tracing` events; the binary installs a subscriber
 * once at startup with [`init_logging`]. `RUST_LOG`, when set, overrides the
 * configured level.
 */

use std::io;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use strum::Display;
use tracing_subscriber::{filter::EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use crate::error::{NerdStoreError, Result};

/// Output format of log lines
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum, Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum LogFormat {
    /// Multi-line, human-oriented
    Pretty,
    /// One line per event
    #[default]
    Compact,
    /// Newline-delimited JSON
    Json,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    pub format: LogFormat,
    /// Level for this crate: trace, debug, info, warn or error
    pub level: String,
    /// Full filter directive replacing the level
    pub filter: Option<String>,
    pub display_target: bool,
    pub display_thread_names: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::default(),
            level: "info".to_string(),
            filter: None,
            display_target: false,
            display_thread_names: true,
        }
    }
}

impl LoggingConfig {
    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.level = level.into();
        self
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    pub fn with_target(mut self, display: bool) -> Self {
        self.display_target = display;
        self
    }
}

/// Install the global subscriber; fails if one is already installed
pub fn init_logging(config: LoggingConfig) -> Result<()> {
    let filter = match std::env::var("RUST_LOG") {
        Ok(directives) if !directives.is_empty() => parse_filter(&directives)?,
        _ => build_filter(&config)?,
    };
    let registry = tracing_subscriber::registry().with(filter);
    let fmt = tracing_subscriber::fmt::layer()
        .with_target(config.display_target)
        .with_thread_names(config.display_thread_names)
        .with_writer(io::stderr);

    let installed = match config.format {
        LogFormat::Pretty => registry.with(fmt.pretty()).try_init(),
        LogFormat::Compact => registry.with(fmt.compact()).try_init(),
        LogFormat::Json => registry.with(fmt.json().flatten_event(true)).try_init(),
    };
    installed.map_err(|e| NerdStoreError::Config(format!("Failed to initialize logging: {}", e)))
}

fn build_filter(config: &LoggingConfig) -> Result<EnvFilter> {
    let directives = match &config.filter {
        Some(custom) => custom.clone(),
        None => {
            let level = config.level.trim().to_lowercase();
            if !matches!(level.as_str(), "trace" | "debug" | "info" | "warn" | "error") {
                return Err(NerdStoreError::Config(format!(
                    "Unknown log level: {}",
                    config.level
                )));
            }
            format!("warn,{}={}", env!("CARGO_PKG_NAME"), level)
        }
    };
    parse_filter(&directives)
}

fn parse_filter(directives: &str) -> Result<EnvFilter> {
    EnvFilter::try_new(directives)
        .map_err(|e| NerdStoreError::Config(format!("Invalid log filter: {}", e)))
}
