//! Structured logging for memo processes.
//!
//! Installs a `tracing` subscriber with an [`EnvFilter`] and a compact
//! formatter. `RUST_LOG` wins over the configured directive.

#![warn(missing_docs, clippy::pedantic)]

use thiserror::Error;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

/// Directive used when neither `RUST_LOG` nor the configuration sets one.
pub const DEFAULT_FILTER: &str = "info";

/// Subscriber settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryConfig {
    filter: String,
    with_target: bool,
    ansi: bool,
}

impl TelemetryConfig {
    /// Creates a configuration with the given fallback filter directive.
    #[must_use]
    pub fn new(filter: impl Into<String>) -> Self {
        Self {
            filter: filter.into(),
            ..Self::default()
        }
    }

    /// Toggles the event target (module path) in output.
    #[must_use]
    pub fn with_target(mut self, enabled: bool) -> Self {
        self.with_target = enabled;
        self
    }

    /// Toggles ANSI colours.
    #[must_use]
    pub fn with_ansi(mut self, enabled: bool) -> Self {
        self.ansi = enabled;
        self
    }

    /// Fallback filter directive.
    #[must_use]
    pub fn filter(&self) -> &str {
        &self.filter
    }

    /// Resolves the effective filter: `RUST_LOG` when set and valid, the
    /// configured directive otherwise.
    ///
    /// # Errors
    ///
    /// Returns [`TelemetryError::Filter`] when the configured directive does
    /// not parse.
    pub fn env_filter(&self) -> Result<EnvFilter, TelemetryError> {
        if let Ok(filter) = EnvFilter::try_from_default_env() {
            return Ok(filter);
        }
        EnvFilter::try_new(&self.filter).map_err(|err| TelemetryError::Filter {
            directive: self.filter.clone(),
            reason: err.to_string(),
        })
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            filter: DEFAULT_FILTER.to_owned(),
            with_target: true,
            ansi: true,
        }
    }
}

/// Errors raised while installing the subscriber.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// The filter directive is malformed.
    #[error("invalid log filter `{directive}`: {reason}")]
    Filter {
        /// Directive as configured.
        directive: String,
        /// Parser message.
        reason: String,
    },

    /// A global subscriber is already installed.
    #[error("tracing subscriber already installed: {0}")]
    AlreadyInstalled(String),
}

/// Installs the global subscriber.
///
/// # Errors
///
/// Returns [`TelemetryError`] when the filter is malformed or a subscriber is
/// already set.
pub fn try_init_tracing(config: &TelemetryConfig) -> Result<(), TelemetryError> {
    let filter = config.env_filter()?;
    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_target(config.with_target)
                .with_ansi(config.ansi)
                .compact(),
        )
        .try_init()
        .map_err(|err| TelemetryError::AlreadyInstalled(err.to_string()))?;

    tracing::debug!(filter = %config.filter, "tracing initialised");
    Ok(())
}

/// Installs the global subscriber, falling back to [`DEFAULT_FILTER`] when the
/// configured directive is malformed. A second call is a no-op.
pub fn init_tracing(config: &TelemetryConfig) {
    match try_init_tracing(config) {
        Ok(()) | Err(TelemetryError::AlreadyInstalled(_)) => {}
        Err(err @ TelemetryError::Filter { .. }) => {
            let fallback = TelemetryConfig {
                filter: DEFAULT_FILTER.to_owned(),
                ..config.clone()
            };
            if try_init_tracing(&fallback).is_ok() {
                tracing::warn!(error = %err, "using default log filter");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_directive_is_reported() {
        let config = TelemetryConfig::new("memo_store=notalevel");
        if std::env::var_os("RUST_LOG").is_none() {
            assert!(matches!(
                config.env_filter(),
                Err(TelemetryError::Filter { .. })
            ));
        }
    }

    #[test]
    fn second_install_is_rejected() {
        let config = TelemetryConfig::default().with_ansi(false);
        init_tracing(&config);
        assert!(matches!(
            try_init_tracing(&config),
            Err(TelemetryError::AlreadyInstalled(_))
        ));
    }
}
