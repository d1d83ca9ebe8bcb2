//! Tracing subscriber for applications embedding the softphone core
//!
//! The core only emits `tracing` events under the `rvoip_softphone_core`
//! target. [`setup_logging`] installs a fmt subscriber scoped to that target
//! for applications (and test suites) that have none of their own.

use std::str::FromStr;

use tracing::Level;
use tracing_subscriber::{EnvFilter, fmt};

use crate::error::{ClientError, ClientResult};

/// Target every event of this crate is emitted under
pub const LOG_TARGET: &str = "rvoip_softphone_core";

/// Output format of the installed subscriber
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Compact,
    /// One JSON object per line, for log shippers
    Json,
}

/// What [`setup_logging`] installs
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Level for the softphone core's own events
    pub level: Level,
    /// Extra `EnvFilter` directives, e.g. for the embedding application
    pub directives: Vec<String>,
    pub format: LogFormat,
    /// Route output through libtest's capture
    pub test_writer: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            directives: Vec::new(),
            format: LogFormat::Compact,
            test_writer: false,
        }
    }
}

impl LoggingConfig {
    pub fn new(level: Level) -> Self {
        Self {
            level,
            ..Default::default()
        }
    }

    /// Debug output captured per test
    pub fn for_tests() -> Self {
        Self {
            level: Level::DEBUG,
            test_writer: true,
            ..Default::default()
        }
    }

    pub fn with_directive(mut self, directive: impl Into<String>) -> Self {
        self.directives.push(directive.into());
        self
    }

    pub fn with_json(mut self) -> Self {
        self.format = LogFormat::Json;
        self
    }

    /// The filter this config resolves to when `RUST_LOG` is unset
    pub fn filter(&self) -> ClientResult<EnvFilter> {
        let mut filter = format!("{}={}", LOG_TARGET, self.level.as_str().to_lowercase());
        for directive in &self.directives {
            filter.push(',');
            filter.push_str(directive);
        }
        EnvFilter::try_new(&filter)
            .map_err(|e| ClientError::configuration("directives", format!("{}: {}", filter, e)))
    }
}

/// Install a global subscriber. `RUST_LOG`, when set, replaces the
/// configured filter.
///
/// # Errors
///
/// `ClientError::Configuration` if a directive is malformed or a global
/// subscriber is already installed.
pub fn setup_logging(config: &LoggingConfig) -> ClientResult<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => config.filter()?,
    };
    let builder = fmt().with_env_filter(filter).with_target(true);

    let installed = match (config.format, config.test_writer) {
        (LogFormat::Compact, false) => builder.compact().try_init(),
        (LogFormat::Compact, true) => builder.compact().with_test_writer().try_init(),
        (LogFormat::Json, false) => builder.json().try_init(),
        (LogFormat::Json, true) => builder.json().with_test_writer().try_init(),
    };
    installed.map_err(|e| ClientError::configuration("logging", e.to_string()))?;

    tracing::debug!(target: LOG_TARGET, "Logging enabled for softphone core v{}", crate::VERSION);
    Ok(())
}

/// Parse a log level such as `"debug"` or `" WARN "`
pub fn parse_log_level(level: &str) -> ClientResult<Level> {
    Level::from_str(level.trim())
        .map_err(|_| ClientError::configuration("level", format!("Invalid log level: {}", level)))
}
