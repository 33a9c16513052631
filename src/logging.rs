//! Leveled logging on top of `tracing`
//!
//! The crate logs through the `tracing` macros directly. This module adds the
//! `(level, message)` entry point for callers that report their own
//! conditions, and subscriber setup for applications without one.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::error::{Error, Result};

/// Message severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Debug,
    Info,
    Warning,
    Error,
    /// An error after which the stream cannot continue
    Severe,
}

/// Log a message at the given severity
pub fn log(severity: Severity, message: &str) {
    match severity {
        Severity::Debug => tracing::debug!("{}", message),
        Severity::Info => tracing::info!("{}", message),
        Severity::Warning => tracing::warn!("{}", message),
        Severity::Error => tracing::error!("{}", message),
        Severity::Severe => tracing::error!(severe = true, "{}", message),
    }
}

/// Install a global `fmt` subscriber filtered by `filter` (EnvFilter syntax)
pub fn init(filter: &str) -> Result<()> {
    let filter = EnvFilter::try_new(filter)
        .map_err(|e| Error::Config(format!("invalid log filter '{}': {}", filter, e)))?;

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_thread_names(true))
        .try_init()
        .map_err(|e| Error::Config(format!("logging already initialised: {}", e)))
}

/// Install a global subscriber from `RUST_LOG`, defaulting to `info`
pub fn init_from_env() -> Result<()> {
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into());
    init(&filter)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    #[test]
    fn test_severity_order() {
        assert!(Severity::Debug < Severity::Warning);
        assert!(Severity::Error < Severity::Severe);
    }

    #[traced_test]
    #[test]
    fn test_log_forwards_to_tracing() {
        log(Severity::Warning, "device list is empty");
        log(Severity::Severe, "stream torn down");
        assert!(logs_contain("device list is empty"));
        assert!(logs_contain("stream torn down"));
    }

    #[test]
    fn test_init_rejects_bad_filter() {
        assert!(init("realtime_audio=loud").is_err());
    }
}
