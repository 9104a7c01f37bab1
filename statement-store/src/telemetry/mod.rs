//! Telemetry - Structured Logging Setup
//!
//! `TigerStyle`: Optional subscriber installation with graceful failure. Never
//! panics if a subscriber is already installed or the filter is malformed.
//!
//! The library itself only emits `tracing` events and spans; binaries and
//! test harnesses decide where they go.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use statement_store::telemetry::{init_telemetry, TelemetryConfig};
//!
//! // Initialize with defaults (reads RUST_LOG)
//! init_telemetry(TelemetryConfig::default()).expect("telemetry init");
//!
//! // Or configure explicitly
//! let config = TelemetryConfig::builder()
//!     .service_name("chatbot")
//!     .filter("statement_store=debug,info")
//!     .build();
//! # let _ = config;
//! ```
//!
//! ## Environment Variables
//!
//! - `RUST_LOG` - Filter directives; overrides the configured filter
//! - `STATEMENT_STORE_SERVICE_NAME` - Service name (default: "statement-store")

use thiserror::Error;
use tracing_subscriber::EnvFilter;

use crate::constants::{TELEMETRY_FILTER_DEFAULT, TELEMETRY_SERVICE_NAME_DEFAULT};

/// Environment variable naming the service in log output.
pub const TELEMETRY_SERVICE_NAME_ENV: &str = "STATEMENT_STORE_SERVICE_NAME";

/// Telemetry configuration errors
#[derive(Error, Debug)]
pub enum TelemetryError {
    /// Subscriber installation failed
    #[error("telemetry initialization failed: {reason}")]
    InitFailed {
        /// The reason for the failure
        reason: String,
    },

    /// Filter directives could not be parsed
    #[error("invalid filter: {filter}")]
    InvalidFilter {
        /// The rejected filter string
        filter: String,
    },
}

/// Result type for telemetry operations
pub type Result<T> = std::result::Result<T, TelemetryError>;

/// Configuration for log output
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Service name recorded on the startup event
    pub service_name: String,

    /// Filter directives used when `RUST_LOG` is unset (e.g. "info")
    pub filter: String,

    /// Whether to include the event target (module path)
    pub with_target: bool,

    /// Whether to emit ANSI colors
    pub ansi: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: std::env::var(TELEMETRY_SERVICE_NAME_ENV)
                .unwrap_or_else(|_| TELEMETRY_SERVICE_NAME_DEFAULT.to_string()),
            filter: TELEMETRY_FILTER_DEFAULT.to_string(),
            with_target: true,
            ansi: true,
        }
    }
}

impl TelemetryConfig {
    /// Create a new builder for `TelemetryConfig`
    #[must_use]
    pub fn builder() -> TelemetryConfigBuilder {
        TelemetryConfigBuilder::default()
    }

    /// Validate the configuration
    fn validate(&self) -> Result<()> {
        if self.service_name.is_empty() {
            return Err(TelemetryError::InitFailed {
                reason: "service_name cannot be empty".to_string(),
            });
        }

        EnvFilter::try_new(&self.filter).map_err(|_| TelemetryError::InvalidFilter {
            filter: self.filter.clone(),
        })?;

        Ok(())
    }

    /// `RUST_LOG` when set and valid, else the configured filter.
    fn env_filter(&self) -> Result<EnvFilter> {
        match EnvFilter::try_from_default_env() {
            Ok(filter) => Ok(filter),
            Err(_) => EnvFilter::try_new(&self.filter).map_err(|_| TelemetryError::InvalidFilter {
                filter: self.filter.clone(),
            }),
        }
    }
}

/// Builder for `TelemetryConfig`
#[derive(Default)]
pub struct TelemetryConfigBuilder {
    service_name: Option<String>,
    filter: Option<String>,
    with_target: Option<bool>,
    ansi: Option<bool>,
}

impl TelemetryConfigBuilder {
    /// Set the service name
    #[must_use]
    pub fn service_name(mut self, name: impl Into<String>) -> Self {
        self.service_name = Some(name.into());
        self
    }

    /// Set the fallback filter directives
    #[must_use]
    pub fn filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    /// Include or omit event targets
    #[must_use]
    pub fn with_target(mut self, with_target: bool) -> Self {
        self.with_target = Some(with_target);
        self
    }

    /// Enable or disable ANSI colors
    #[must_use]
    pub fn ansi(mut self, ansi: bool) -> Self {
        self.ansi = Some(ansi);
        self
    }

    /// Build the `TelemetryConfig`
    #[must_use]
    pub fn build(self) -> TelemetryConfig {
        let default = TelemetryConfig::default();
        TelemetryConfig {
            service_name: self.service_name.unwrap_or(default.service_name),
            filter: self.filter.unwrap_or(default.filter),
            with_target: self.with_target.unwrap_or(default.with_target),
            ansi: self.ansi.unwrap_or(default.ansi),
        }
    }
}

/// Install a global `fmt` subscriber filtered by `EnvFilter`.
///
/// # Errors
///
/// Returns `TelemetryError::InvalidFilter` for malformed directives.
/// Returns `TelemetryError::InitFailed` if a global subscriber is already set.
pub fn init_telemetry(config: TelemetryConfig) -> Result<()> {
    // Preconditions (TigerStyle)
    config.validate()?;

    tracing_subscriber::fmt()
        .with_env_filter(config.env_filter()?)
        .with_target(config.with_target)
        .with_ansi(config.ansi)
        .compact()
        .try_init()
        .map_err(|e| TelemetryError::InitFailed {
            reason: format!("failed to set global subscriber: {e}"),
        })?;

    tracing::info!(service_name = %config.service_name, "telemetry initialized");
    Ok(())
}
