//! Operation handles.
//!
//! An [`Op`] is one level of the context stack plus a latched failure. It is
//! created by [`enter`] (under the ambient scope) or [`Op::enter`] (under
//! another op) and finished by [`Op::exit`], which reports to every
//! registered reporter and hands back an op for the parent level.

use crate::failure::Failure;
use crate::registry::{self, ReporterRegistry};
use ops_context::{ContextMap, ContextStore, ScopeStore};
use serde_json::Value;
use std::error::Error;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

/// Tag holding the name of the innermost operation.
pub const OP_KEY: &str = "op";

/// Tag holding the name of the outermost operation in the chain.
pub const ROOT_OP_KEY: &str = "root_op";

/// Conventional tag for [`Op::put_elapsed`].
pub const ELAPSED_KEY: &str = "elapsed_ms";

/// A tracked operation.
///
/// Tags attached with [`put`](Op::put) live on this op's level and are
/// visible to nested ops. A failure recorded with
/// [`fail_on_error`](Op::fail_on_error) belongs to this op only; exiting a
/// child never marks its parent as failed.
///
/// An op is not meant to be shared between concurrently running units of
/// work. Use [`go`](Op::go) and enter a new op inside the spawned work
/// instead.
pub struct Op<S: ContextStore = ScopeStore> {
    store: S,
    scope: S::Scope,
    failure: Option<Failure>,
}

/// Enter a new operation under the ambient scope of the calling thread or
/// task, or under the global scope if there is none.
///
/// Inside a tokio runtime only tasks started with [`go_async`] or
/// [`Op::go_async`] have an ambient scope; plain `tokio::spawn` tasks enter
/// under the global scope.
pub fn enter(name: &str) -> Op {
    enter_in(ScopeStore::new(), name)
}

/// Like [`enter`], against an explicit store.
pub fn enter_in<S: ContextStore>(store: S, name: &str) -> Op<S> {
    let parent = store.current();
    Op::enter_under(store, parent.as_ref(), name)
}

/// Run `f` on a new thread that inherits the ambient scope of the caller.
pub fn go<F>(f: F)
where
    F: FnOnce() + Send + 'static,
{
    go_in(ScopeStore::new(), f);
}

/// Like [`go`], against an explicit store.
pub fn go_in<S, F>(store: S, f: F)
where
    S: ContextStore,
    F: FnOnce() + Send + 'static,
{
    let ambient = store.current().unwrap_or_else(|| store.global_scope());
    store.spawn(ambient, f);
}

/// Spawn `future` on the current tokio runtime, inheriting the ambient scope
/// of the caller.
///
/// # Panics
///
/// Panics when called outside of a tokio runtime.
pub fn go_async<F>(future: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    let store = ScopeStore::new();
    let ambient = store.current().unwrap_or_else(|| store.global_scope());
    store.spawn_task(ambient, future);
}

impl<S: ContextStore> Op<S> {
    fn enter_under(store: S, parent: Option<&S::Scope>, name: &str) -> Self {
        let scope = store.enter_scope(parent);
        store.put(&scope, OP_KEY, Value::from(name));
        store.put_if_absent(&scope, ROOT_OP_KEY, Value::from(name));
        tracing::trace!(op = name, "Entered op");

        Self {
            store,
            scope,
            failure: None,
        }
    }

    /// Enter a nested operation one level below this one.
    pub fn enter(&self, name: &str) -> Op<S> {
        Self::enter_under(self.store.clone(), Some(&self.scope), name)
    }

    /// Run `f` on a new thread whose ambient scope is this op's scope.
    ///
    /// Ops entered with [`enter`] inside `f` nest under this op, regardless of
    /// what happens to this op before `f` runs.
    pub fn go<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.store.spawn(self.scope.clone(), f);
    }

    /// Attach a static tag to this op's level, replacing any previous value.
    pub fn put(&self, key: &str, value: impl Into<Value>) -> &Self {
        self.store.put(&self.scope, key, value.into());
        self
    }

    /// Attach a tag whose value is computed each time the context is read.
    pub fn put_dynamic<F>(&self, key: &str, value_fn: F) -> &Self
    where
        F: Fn() -> Value + Send + Sync + 'static,
    {
        self.store.put_dynamic(&self.scope, key, Arc::new(value_fn));
        self
    }

    /// Attach a dynamic tag reporting the milliseconds elapsed since this call.
    pub fn put_elapsed(&self, key: &str) -> &Self {
        let started = Instant::now();
        self.put_dynamic(key, move || {
            Value::from(u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX))
        })
    }

    /// Mark this op as failed if `result` is an error, then return `result`
    /// unchanged.
    ///
    /// The latest error recorded wins.
    pub fn fail_on_error<T, E>(&mut self, result: Result<T, E>) -> Result<T, E>
    where
        E: Error + 'static,
    {
        if let Err(e) = &result {
            self.fail_with_error(e);
        }
        result
    }

    /// Like [`fail_on_error`](Op::fail_on_error), for error types that only
    /// deref to a trait object, such as `Box<dyn Error + Send + Sync>` or
    /// `anyhow::Error`.
    pub fn fail_on_dyn_error<T, E>(&mut self, result: Result<T, E>) -> Result<T, E>
    where
        E: AsRef<dyn Error + Send + Sync + 'static>,
    {
        if let Err(e) = &result {
            self.fail_with_error(e.as_ref());
        }
        result
    }

    /// Mark this op as failed with `err` and its source chain.
    pub fn fail_with_error(&mut self, err: &(dyn Error + 'static)) {
        self.failure = Some(Failure::from_error(err));
    }

    /// Mark this op as failed.
    pub fn fail(&mut self, failure: impl Into<Failure>) {
        self.failure = Some(failure.into());
    }

    /// The latched failure, if any.
    pub fn failure(&self) -> Option<&Failure> {
        self.failure.as_ref()
    }

    pub fn has_failed(&self) -> bool {
        self.failure.is_some()
    }

    /// This op's level in the context store.
    pub fn scope(&self) -> &S::Scope {
        &self.scope
    }

    /// The flattened context as reporters would see it right now.
    pub fn context(&self) -> ContextMap {
        self.flatten()
    }

    fn flatten(&self) -> ContextMap {
        let failure = self.failure.as_ref().map(|f| f as &(dyn Error + 'static));
        self.store.flatten(&self.scope, failure, true)
    }

    /// Finish this op: report to every registered reporter, then pop its
    /// level and return an op for the parent level with no failure latched.
    ///
    /// With no reporters registered, no context is flattened. Reporters run
    /// on the calling thread, in registration order.
    pub fn exit(self) -> Op<S> {
        self.exit_to(registry::global())
    }

    pub(crate) fn exit_to(self, registry: &ReporterRegistry) -> Op<S> {
        let reporters = registry.snapshot();
        if !reporters.is_empty() {
            let ctx = self.flatten();
            for reporter in &reporters {
                reporter.report(self.failure.as_ref(), &ctx);
            }
        }

        let parent = self.store.exit_scope(&self.scope);
        tracing::trace!(
            failed = self.failure.is_some(),
            reporters = reporters.len(),
            "Exited op"
        );

        Op {
            store: self.store,
            scope: parent,
            failure: None,
        }
    }
}

impl Op<ScopeStore> {
    /// Spawn `future` on the current tokio runtime with this op's scope as
    /// its ambient scope, carried across `.await` points.
    ///
    /// # Panics
    ///
    /// Panics when called outside of a tokio runtime.
    pub fn go_async<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.store.spawn_task(self.scope.clone(), future);
    }
}

impl<S: ContextStore> fmt::Debug for Op<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Op")
            .field("failure", &self.failure)
            .finish_non_exhaustive()
    }
}
