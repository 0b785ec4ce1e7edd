//! CampusCoin logging
//!
//! Shared tracing setup for the CLI and service binaries.
//!
//! ```no_run
//! use campuscoin_logging::{init, LogLevel};
//!
//! let verbose = false;
//! init(LogLevel::from_verbose(verbose));
//! ```

use tracing_subscriber::EnvFilter;

/// Log level for the application
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogLevel {
    /// Error messages only
    Error,
    /// Warnings and errors
    Warn,
    /// Info, warnings, and errors (default)
    #[default]
    Info,
    /// Debug messages and above
    Debug,
    /// All messages including trace
    Trace,
}

impl LogLevel {
    /// Map the common `--verbose` CLI flag onto a level
    pub fn from_verbose(verbose: bool) -> Self {
        if verbose {
            Self::Debug
        } else {
            Self::Info
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
            Self::Trace => "trace",
        }
    }
}

/// Initialize logging with the specified level.
///
/// `RUST_LOG` takes precedence over the requested level when set.
///
/// # Panics
///
/// Panics if a global subscriber was already installed; use [`try_init`]
/// to handle that case.
pub fn init(level: LogLevel) {
    try_init(level).expect("failed to initialize logging");
}

/// Try to initialize logging, returning an error if already initialized
pub fn try_init(level: LogLevel) -> Result<(), String> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .map_err(|e| e.to_string())
}

/// Initialize logging for test binaries: debug level, output captured by
/// the test framework, repeated calls are no-ops.
pub fn init_for_tests() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new("debug"))
        .with_test_writer()
        .try_init();
}
