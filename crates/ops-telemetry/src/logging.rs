//! Tracing setup and a reporter that logs operation outcomes.

use ops_core::{ContextMap, Failure, Reporter, OP_KEY, ROOT_OP_KEY};
use serde_json::Value;
use tracing_subscriber::EnvFilter;

/// Initialize tracing/logging for the process.
///
/// Reads the filter from `RUST_LOG`, defaulting to `info`. Safe to call
/// multiple times (subsequent calls are no-ops).
pub fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(tracing_subscriber::fmt::time::SystemTime);

    let _ = if json {
        builder.json().with_target(false).try_init()
    } else {
        builder.with_target(false).try_init()
    };
}

/// Logs every failed operation at `warn` with its full context, and
/// optionally successful ones at `debug`.
#[derive(Debug, Clone, Default)]
pub struct LogReporter {
    log_successes: bool,
}

impl LogReporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Also log operations that exit without a failure.
    pub fn with_successes(mut self, enabled: bool) -> Self {
        self.log_successes = enabled;
        self
    }
}

impl Reporter for LogReporter {
    fn report(&self, failure: Option<&Failure>, ctx: &ContextMap) {
        let op = label(ctx, OP_KEY);
        let root_op = label(ctx, ROOT_OP_KEY);

        match failure {
            Some(failure) => {
                let context = serde_json::to_string(ctx).unwrap_or_default();
                tracing::warn!(
                    op = %op,
                    root_op = %root_op,
                    error = %failure,
                    causes = ?failure.causes,
                    context = %context,
                    "Operation failed"
                );
            }
            None if self.log_successes => {
                tracing::debug!(op = %op, root_op = %root_op, "Operation succeeded");
            }
            None => {}
        }
    }
}

/// String value of a tag, or `"unknown"` when missing or not a string.
pub(crate) fn label<'a>(ctx: &'a ContextMap, key: &str) -> &'a str {
    ctx.get(key).and_then(Value::as_str).unwrap_or("unknown")
}
