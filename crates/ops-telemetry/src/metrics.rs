//! Prometheus metrics for tracked operations
//!
//! - `ops_total` (counter) - Exited operations by op, root_op and result
//! - `op_duration_seconds` (histogram) - Duration of operations that carry an
//!   `elapsed_ms` tag
//!
//! # Example
//!
//! ```rust,no_run
//! use ops_telemetry::OpMetrics;
//! use prometheus::Registry;
//! use std::sync::Arc;
//!
//! let registry = Registry::new();
//! let metrics = Arc::new(OpMetrics::new(&registry, "myapp").unwrap());
//! ops_core::register_shared_reporter(metrics.clone());
//!
//! let op = ops_core::enter("sync_inventory");
//! op.put_elapsed(ops_core::ELAPSED_KEY);
//! op.exit();
//!
//! assert_eq!(metrics.count("sync_inventory", "sync_inventory", "success"), 1.0);
//! ```

use crate::logging::label;
use crate::Result;
use ops_core::{ContextMap, Failure, Reporter, ELAPSED_KEY, OP_KEY, ROOT_OP_KEY};
use prometheus::{CounterVec, HistogramOpts, HistogramVec, Opts, Registry};

const RESULT_SUCCESS: &str = "success";
const RESULT_FAILURE: &str = "failure";

/// Operation metrics for Prometheus
pub struct OpMetrics {
    /// Exited operations (by op, root_op, result)
    ops_total: CounterVec,

    /// Operation duration in seconds (by op, root_op)
    duration_seconds: HistogramVec,
}

impl OpMetrics {
    /// Create the collectors under `namespace` and register them with `registry`.
    pub fn new(registry: &Registry, namespace: &str) -> Result<Self> {
        let ops_total = CounterVec::new(
            Opts::new("ops_total", "Total number of exited operations").namespace(namespace),
            &["op", "root_op", "result"],
        )?;

        let duration_seconds = HistogramVec::new(
            HistogramOpts::new("op_duration_seconds", "Operation duration in seconds")
                .namespace(namespace)
                .buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]),
            &["op", "root_op"],
        )?;

        registry.register(Box::new(ops_total.clone()))?;
        registry.register(Box::new(duration_seconds.clone()))?;

        Ok(Self {
            ops_total,
            duration_seconds,
        })
    }

    /// Record one exited operation.
    pub fn record(&self, op: &str, root_op: &str, failed: bool, elapsed_ms: Option<f64>) {
        let result = if failed { RESULT_FAILURE } else { RESULT_SUCCESS };
        self.ops_total
            .with_label_values(&[op, root_op, result])
            .inc();

        if let Some(ms) = elapsed_ms {
            self.duration_seconds
                .with_label_values(&[op, root_op])
                .observe(ms / 1000.0);
        }
    }

    /// Current value of `ops_total` for the given labels.
    pub fn count(&self, op: &str, root_op: &str, result: &str) -> f64 {
        self.ops_total
            .with_label_values(&[op, root_op, result])
            .get()
    }

    /// Number of duration samples for the given labels.
    pub fn duration_samples(&self, op: &str, root_op: &str) -> u64 {
        self.duration_seconds
            .with_label_values(&[op, root_op])
            .get_sample_count()
    }
}

impl Reporter for OpMetrics {
    fn report(&self, failure: Option<&Failure>, ctx: &ContextMap) {
        let elapsed_ms = ctx.get(ELAPSED_KEY).and_then(|v| v.as_f64());
        self.record(
            label(ctx, OP_KEY),
            label(ctx, ROOT_OP_KEY),
            failure.is_some(),
            elapsed_ms,
        );
    }
}
