//! Telemetry reporters for operation tracking
//!
//! This crate provides ready-made reporters for `ops-core`:
//!
//! - `logging` - `tracing` subscriber setup and a reporter that logs failed
//!   (and optionally successful) operations with their full context
//! - `metrics` - Prometheus counters and histograms per operation
//!
//! # Example
//!
//! ```rust,no_run
//! use ops_telemetry::{install, init_tracing, TelemetryConfig};
//!
//! let config = TelemetryConfig::from_env();
//! init_tracing(config.json_logs);
//!
//! let registry = prometheus::Registry::new();
//! let metrics = install(&config, &registry).unwrap();
//! ```

pub mod logging;
pub mod metrics;

pub use logging::{init_tracing, LogReporter};
pub use metrics::OpMetrics;

use std::sync::Arc;
use thiserror::Error;

/// Telemetry errors
#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, TelemetryError>;

/// Telemetry configuration
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Register a [`LogReporter`]
    pub log_reports: bool,

    /// Log successful operations as well as failed ones
    pub log_successes: bool,

    /// Register an [`OpMetrics`] reporter
    pub enable_metrics: bool,

    /// Prometheus namespace for operation metrics
    pub metrics_namespace: String,

    /// Emit JSON log lines from [`init_tracing`]
    pub json_logs: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_reports: true,
            log_successes: false,
            enable_metrics: true,
            metrics_namespace: "ops".to_string(),
            json_logs: true,
        }
    }
}

impl TelemetryConfig {
    /// Create a new config builder
    pub fn builder() -> TelemetryConfigBuilder {
        TelemetryConfigBuilder::new()
    }

    /// Create config from environment variables
    pub fn from_env() -> Self {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Create config from an arbitrary variable lookup. Unset or unparsable
    /// values fall back to the defaults.
    pub fn from_vars<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let flag = |key: &str, default: bool| {
            lookup(key)
                .and_then(|v| v.parse().ok())
                .unwrap_or(default)
        };

        Self {
            log_reports: flag("OPS_TELEMETRY_LOG_REPORTS", defaults.log_reports),
            log_successes: flag("OPS_TELEMETRY_LOG_SUCCESSES", defaults.log_successes),
            enable_metrics: flag("OPS_TELEMETRY_ENABLE_METRICS", defaults.enable_metrics),
            metrics_namespace: lookup("OPS_TELEMETRY_METRICS_NAMESPACE")
                .unwrap_or(defaults.metrics_namespace),
            json_logs: flag("OPS_TELEMETRY_JSON_LOGS", defaults.json_logs),
        }
    }

    /// Check the configuration for values Prometheus would reject.
    pub fn validate(&self) -> Result<()> {
        let namespace = &self.metrics_namespace;
        let valid = !namespace.is_empty()
            && namespace
                .chars()
                .next()
                .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
            && namespace
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_');

        if self.enable_metrics && !valid {
            return Err(TelemetryError::Config(format!(
                "invalid metrics namespace: {:?}",
                namespace
            )));
        }
        Ok(())
    }
}

/// Builder for TelemetryConfig
pub struct TelemetryConfigBuilder {
    config: TelemetryConfig,
}

impl TelemetryConfigBuilder {
    /// Create a new builder with defaults
    pub fn new() -> Self {
        Self {
            config: TelemetryConfig::default(),
        }
    }

    /// Enable or disable the log reporter
    pub fn log_reports(mut self, enabled: bool) -> Self {
        self.config.log_reports = enabled;
        self
    }

    /// Enable or disable logging of successful operations
    pub fn log_successes(mut self, enabled: bool) -> Self {
        self.config.log_successes = enabled;
        self
    }

    /// Enable metrics under the given namespace
    pub fn with_metrics(mut self, namespace: impl Into<String>) -> Self {
        self.config.enable_metrics = true;
        self.config.metrics_namespace = namespace.into();
        self
    }

    /// Disable metrics
    pub fn without_metrics(mut self) -> Self {
        self.config.enable_metrics = false;
        self
    }

    /// Choose JSON or plain text log lines
    pub fn json_logs(mut self, enabled: bool) -> Self {
        self.config.json_logs = enabled;
        self
    }

    /// Build the configuration
    pub fn build(self) -> TelemetryConfig {
        self.config
    }
}

impl Default for TelemetryConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Register the reporters selected by `config` with the process-wide
/// reporter registry.
///
/// Metric collectors are registered with `registry`; the returned handle can
/// be used to read them back. Reporters cannot be unregistered, so calling
/// this twice registers everything twice.
pub fn install(config: &TelemetryConfig, registry: &prometheus::Registry) -> Result<Option<Arc<OpMetrics>>> {
    config.validate()?;

    let metrics = if config.enable_metrics {
        let metrics = Arc::new(OpMetrics::new(registry, &config.metrics_namespace)?);
        ops_core::register_shared_reporter(metrics.clone());
        Some(metrics)
    } else {
        None
    };

    if config.log_reports {
        ops_core::register_reporter(LogReporter::new().with_successes(config.log_successes));
    }

    tracing::info!(
        log_reports = config.log_reports,
        enable_metrics = config.enable_metrics,
        namespace = %config.metrics_namespace,
        "Operation telemetry installed"
    );

    Ok(metrics)
}
