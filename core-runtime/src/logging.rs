//! # Logging & Tracing Infrastructure
//!
//! Configures the `tracing-subscriber` stack for the workspace. Output
//! format and default level come from [`LoggingConfig`]; the `RUST_LOG`
//! environment variable overrides the configured directives when set.
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::logging::{init_logging, LoggingConfig};
//!
//! init_logging(LoggingConfig::default()).expect("failed to initialize logging");
//! tracing::info!("core started");
//! ```

use crate::error::{Result, RuntimeError};
use tracing_subscriber::filter::EnvFilter;

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable format with colors
    Pretty,
    /// Compact single-line format for production
    Compact,
}

impl Default for LogFormat {
    fn default() -> Self {
        #[cfg(debug_assertions)]
        return Self::Pretty;

        #[cfg(not(debug_assertions))]
        return Self::Compact;
    }
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Output format
    pub format: LogFormat,
    /// Default filter directives, e.g. `"info,core_sync=debug"`
    pub directives: String,
    /// Whether to display the event target
    pub with_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::default(),
            directives: "info".to_string(),
            with_target: true,
        }
    }
}

impl LoggingConfig {
    /// Set the output format
    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    /// Set the default filter directives
    pub fn with_directives(mut self, directives: impl Into<String>) -> Self {
        self.directives = directives.into();
        self
    }

    /// Toggle target display
    pub fn with_target(mut self, display: bool) -> Self {
        self.with_target = display;
        self
    }
}

/// Initialize the global tracing subscriber.
///
/// Safe to call once per process; a second call reports
/// [`RuntimeError::Logging`] instead of panicking so embedding hosts can
/// race initialization without crashing.
pub fn init_logging(config: LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.directives.clone()));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(config.with_target);

    let result = match config.format {
        LogFormat::Pretty => builder.pretty().try_init(),
        LogFormat::Compact => builder.compact().try_init(),
    };

    result.map_err(|e| RuntimeError::Logging(e.to_string()))
}
