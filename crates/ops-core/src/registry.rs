//! Reporter registry.
//!
//! Reporters are registered once and kept for the lifetime of the process.
//! Each exit reads a snapshot of the list, so registration never blocks a
//! reporter that is already running and a reporter registered mid-exit only
//! sees later exits.

use crate::failure::Failure;
use ops_context::ContextMap;
use std::sync::{Arc, PoisonError, RwLock};

/// Receives the final status and flattened context of every exited operation.
///
/// Implemented for any `Fn(Option<&Failure>, &ContextMap) + Send + Sync`.
/// Reporters run synchronously on the thread calling `exit`; a panic inside a
/// reporter propagates to that caller and skips the remaining reporters.
pub trait Reporter: Send + Sync {
    /// Report one exit. `failure` is `None` when the operation succeeded.
    fn report(&self, failure: Option<&Failure>, ctx: &ContextMap);
}

impl<F> Reporter for F
where
    F: Fn(Option<&Failure>, &ContextMap) + Send + Sync,
{
    fn report(&self, failure: Option<&Failure>, ctx: &ContextMap) {
        self(failure, ctx)
    }
}

/// An append-only, ordered list of reporters.
pub struct ReporterRegistry {
    reporters: RwLock<Vec<Arc<dyn Reporter>>>,
}

impl ReporterRegistry {
    /// Create an empty registry.
    pub const fn new() -> Self {
        Self {
            reporters: RwLock::new(Vec::new()),
        }
    }

    /// Append a reporter. Duplicates are kept and invoked separately.
    pub fn register(&self, reporter: Arc<dyn Reporter>) {
        self.reporters
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(reporter);
    }

    /// Copy of the current list, in registration order.
    pub(crate) fn snapshot(&self) -> Vec<Arc<dyn Reporter>> {
        self.reporters
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of registered reporters.
    pub fn len(&self) -> usize {
        self.reporters
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ReporterRegistry {
    fn default() -> Self {
        Self::new()
    }
}

static GLOBAL: ReporterRegistry = ReporterRegistry::new();

/// The process-wide registry consulted by `Op::exit`.
pub(crate) fn global() -> &'static ReporterRegistry {
    &GLOBAL
}

/// Whether any reporter has been registered with the process-wide registry.
pub fn has_reporters() -> bool {
    !GLOBAL.is_empty()
}

/// Register a reporter with the process-wide registry.
pub fn register_reporter<R>(reporter: R)
where
    R: Reporter + 'static,
{
    GLOBAL.register(Arc::new(reporter));
}

/// Register an already shared reporter with the process-wide registry.
pub fn register_shared_reporter(reporter: Arc<dyn Reporter>) {
    GLOBAL.register(reporter);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn recording(log: &Arc<Mutex<Vec<&'static str>>>, name: &'static str) -> Arc<dyn Reporter> {
        let log = log.clone();
        Arc::new(move |_: Option<&Failure>, _: &ContextMap| {
            log.lock().unwrap().push(name);
        })
    }

    #[test]
    fn test_starts_empty() {
        let registry = ReporterRegistry::new();
        assert!(registry.is_empty());
        assert!(registry.snapshot().is_empty());
    }

    #[test]
    fn test_snapshot_preserves_order_and_duplicates() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let registry = ReporterRegistry::new();
        let first = recording(&log, "first");
        registry.register(first.clone());
        registry.register(recording(&log, "second"));
        registry.register(first);

        for reporter in registry.snapshot() {
            reporter.report(None, &ContextMap::new());
        }

        assert_eq!(registry.len(), 3);
        assert_eq!(*log.lock().unwrap(), vec!["first", "second", "first"]);
    }

    #[test]
    fn test_snapshot_is_independent_of_later_registrations() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let registry = ReporterRegistry::new();
        registry.register(recording(&log, "early"));

        let snapshot = registry.snapshot();
        registry.register(recording(&log, "late"));

        for reporter in &snapshot {
            reporter.report(None, &ContextMap::new());
        }

        assert_eq!(snapshot.len(), 1);
        assert_eq!(*log.lock().unwrap(), vec!["early"]);
    }
}
