//! Ambient scope tracking and context-inheriting spawn.
//!
//! Each thread carries an optional "current" scope. Tasks started with
//! [`spawn_task`] carry their own in a tokio task-local, which takes
//! precedence over the thread's slot so the scope follows the task across
//! `.await` points and worker threads.
//!
//! Inside a tokio runtime the thread slot is never read or written: worker
//! threads are shared by unrelated tasks, so a plain `tokio::spawn` task (or
//! a `block_on` body) has no ambient scope and new scopes hang off the global
//! scope. Use [`spawn_task`] to give a task its own.

use crate::scope::Scope;
use std::cell::RefCell;
use std::future::Future;
use std::thread;
use tokio::task::JoinHandle;

const WORKER_THREAD_NAME: &str = "ops-context-worker";

thread_local! {
    static THREAD_SCOPE: RefCell<Option<Scope>> = const { RefCell::new(None) };
}

tokio::task_local! {
    static TASK_SCOPE: RefCell<Option<Scope>>;
}

/// The scope that is current for the calling thread or task.
pub fn current() -> Option<Scope> {
    if let Ok(scope) = TASK_SCOPE.try_with(|slot| slot.borrow().clone()) {
        return scope;
    }
    if in_runtime() {
        return None;
    }
    THREAD_SCOPE.with(|slot| slot.borrow().clone())
}

/// Replace the current scope of the calling thread or task, returning the
/// previous one.
///
/// Inside a tokio runtime without a task-local scope this does nothing and
/// returns `None`.
pub fn set_current(scope: Option<Scope>) -> Option<Scope> {
    replace_current(|_| true, scope)
}

/// Make `parent` current, but only if the current scope is still `exiting`.
///
/// A scope exited on a thread or task other than the one that entered it
/// leaves that thread's ambient scope alone.
pub fn restore_parent(exiting: &Scope, parent: Scope) {
    let exiting_id = exiting.id();
    replace_current(
        |current| current.map(Scope::id) == Some(exiting_id),
        Some(parent),
    );
}

fn replace_current<P>(should_replace: P, scope: Option<Scope>) -> Option<Scope>
where
    P: Fn(Option<&Scope>) -> bool,
{
    let swap = |slot: &RefCell<Option<Scope>>, scope: Option<Scope>| {
        if should_replace(slot.borrow().as_ref()) {
            slot.replace(scope)
        } else {
            slot.borrow().clone()
        }
    };

    let mut pending = Some(scope);
    if let Ok(previous) = TASK_SCOPE.try_with(|slot| swap(slot, pending.take().flatten())) {
        return previous;
    }
    if in_runtime() {
        return None;
    }
    THREAD_SCOPE.with(|slot| swap(slot, pending.take().flatten()))
}

fn in_runtime() -> bool {
    tokio::runtime::Handle::try_current().is_ok()
}

/// Run `f` with `scope` as the current scope, restoring the previous one
/// afterwards (also on unwind).
pub fn with_scope<R>(scope: Scope, f: impl FnOnce() -> R) -> R {
    let _guard = CurrentGuard {
        previous: set_current(Some(scope)),
    };
    f()
}

struct CurrentGuard {
    previous: Option<Scope>,
}

impl Drop for CurrentGuard {
    fn drop(&mut self) {
        set_current(self.previous.take());
    }
}

/// Run `f` on a new thread whose current scope starts as `ambient`.
///
/// The thread is detached. If the OS refuses to create it the error is logged
/// and `f` is dropped without running.
pub fn spawn_thread<F>(ambient: Scope, f: F)
where
    F: FnOnce() + Send + 'static,
{
    let ambient_id = ambient.id();
    let spawned = thread::Builder::new()
        .name(WORKER_THREAD_NAME.to_string())
        .spawn(move || {
            THREAD_SCOPE.with(|slot| *slot.borrow_mut() = Some(ambient));
            f();
        });

    if let Err(e) = spawned {
        tracing::error!(error = %e, scope_id = ambient_id, "Failed to spawn context-inheriting thread");
    }
}

/// Spawn `future` onto the current tokio runtime with `ambient` as the
/// task's current scope.
///
/// # Panics
///
/// Panics if called outside of a tokio runtime, like `tokio::spawn`.
pub fn spawn_task<F>(ambient: Scope, future: F) -> JoinHandle<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    tokio::spawn(TASK_SCOPE.scope(RefCell::new(Some(ambient)), future))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::mpsc;

    #[test]
    fn test_with_scope_restores_previous() {
        let outer = Scope::root();
        let inner = outer.child();

        with_scope(outer.clone(), || {
            assert_eq!(current().map(|s| s.id()), Some(outer.id()));
            with_scope(inner.clone(), || {
                assert_eq!(current().map(|s| s.id()), Some(inner.id()));
            });
            assert_eq!(current().map(|s| s.id()), Some(outer.id()));
        });
    }

    #[test]
    fn test_set_current_returns_previous() {
        let a = Scope::root();
        let b = Scope::root();

        let before = set_current(Some(a.clone()));
        let replaced = set_current(Some(b.clone()));
        assert_eq!(replaced.map(|s| s.id()), Some(a.id()));
        assert_eq!(current().map(|s| s.id()), Some(b.id()));

        set_current(before);
    }

    #[test]
    fn test_spawn_thread_inherits_ambient() {
        let scope = Scope::root();
        scope.put("request_id", json!("r-42"));
        let expected = scope.id();

        let (tx, rx) = mpsc::channel();
        spawn_thread(scope, move || {
            let seen = current();
            tx.send((
                seen.as_ref().map(Scope::id),
                seen.and_then(|s| s.get("request_id")),
            ))
            .unwrap();
        });

        let (id, request_id) = rx.recv().unwrap();
        assert_eq!(id, Some(expected));
        assert_eq!(request_id, Some(json!("r-42")));
    }

    #[tokio::test]
    async fn test_spawn_task_carries_scope_across_await() {
        let scope = Scope::root();
        let expected = scope.id();

        let seen = spawn_task(scope, async {
            tokio::task::yield_now().await;
            current().map(|s| s.id())
        })
        .await
        .unwrap();

        assert_eq!(seen, Some(expected));
    }

    #[test]
    fn test_restore_parent_skips_foreign_scope() {
        let mine = Scope::root();
        let foreign = Scope::root().child();

        let before = set_current(Some(mine.clone()));
        restore_parent(&foreign, Scope::root());
        assert_eq!(current().map(|s| s.id()), Some(mine.id()));

        let child = mine.child();
        set_current(Some(child.clone()));
        restore_parent(&child, mine.clone());
        assert_eq!(current().map(|s| s.id()), Some(mine.id()));

        set_current(before);
    }

    #[tokio::test]
    async fn test_runtime_without_task_scope_has_no_ambient() {
        let scope = Scope::root();
        assert!(set_current(Some(scope.clone())).is_none());
        assert!(current().is_none());

        let seen = tokio::spawn(async { current().map(|s| s.id()) })
            .await
            .unwrap();
        assert_eq!(seen, None);
    }

    #[tokio::test]
    async fn test_set_current_inside_task_is_task_local() {
        let parent = Scope::root();
        let child = parent.child();
        let child_id = child.id();

        let seen = spawn_task(parent, async move {
            set_current(Some(child));
            tokio::task::yield_now().await;
            current().map(|s| s.id())
        })
        .await
        .unwrap();

        assert_eq!(seen, Some(child_id));
    }
}
