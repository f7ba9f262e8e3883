//! The context store capability and its default implementation.

use crate::ambient;
use crate::scope::Scope;
use crate::value::{ContextMap, DynamicFn};
use serde_json::Value;
use std::error::Error;
use std::future::Future;
use std::sync::{Arc, OnceLock};
use tokio::task::JoinHandle;

/// Key holding the failure message (or `null`) in a flattened map.
pub const ERROR_KEY: &str = "error";

/// Key holding whether the operation failed in a flattened map.
pub const FAILED_KEY: &str = "failed";

/// Capabilities an operation tracker needs from a hierarchical context store.
///
/// Every scope chain is rooted at the store's global scope. Stores that track
/// an ambient scope make a newly entered scope ambient in `enter_scope` and
/// restore the parent in `exit_scope`, provided the exiting scope is still
/// the ambient one.
pub trait ContextStore: Clone + Send + Sync + 'static {
    /// Handle to one level of the stack.
    type Scope: Clone + Send + Sync + 'static;

    /// The root of every chain.
    fn global_scope(&self) -> Self::Scope;

    /// The ambient scope of the calling thread or task, if one was set.
    fn current(&self) -> Option<Self::Scope>;

    /// Create a child of `parent`, or of the global scope when `None`.
    fn enter_scope(&self, parent: Option<&Self::Scope>) -> Self::Scope;

    /// Attach or overwrite a static tag on `scope`.
    fn put(&self, scope: &Self::Scope, key: &str, value: Value);

    /// Attach a static tag unless `key` exists anywhere in the chain.
    fn put_if_absent(&self, scope: &Self::Scope, key: &str, value: Value);

    /// Attach a tag evaluated on every flatten.
    fn put_dynamic(&self, scope: &Self::Scope, key: &str, value_fn: DynamicFn);

    /// Merge the chain ending at `scope` into one map, descendants winning.
    ///
    /// With `include_failure`, the map also carries [`FAILED_KEY`] and
    /// [`ERROR_KEY`] (the failure's message or `null`), overriding any tags
    /// of the same name.
    fn flatten(
        &self,
        scope: &Self::Scope,
        failure: Option<&(dyn Error + 'static)>,
        include_failure: bool,
    ) -> ContextMap;

    /// Pop one level, returning the parent.
    fn exit_scope(&self, scope: &Self::Scope) -> Self::Scope;

    /// Run `f` concurrently with `ambient` as its inherited scope.
    fn spawn<F>(&self, ambient: Self::Scope, f: F)
    where
        F: FnOnce() + Send + 'static;
}

static GLOBAL_SCOPE: OnceLock<Scope> = OnceLock::new();

/// Default store: [`Scope`] trees with a thread/task-local ambient scope.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScopeStore;

impl ScopeStore {
    /// Create a handle to the store. All handles share the same global scope.
    pub fn new() -> Self {
        Self
    }

    /// Attach a process-wide static tag, visible at the lowest precedence in
    /// every flatten.
    pub fn put_global(&self, key: &str, value: Value) {
        global().put(key, value);
    }

    /// Attach a process-wide dynamic tag.
    pub fn put_global_dynamic<F>(&self, key: &str, value_fn: F)
    where
        F: Fn() -> Value + Send + Sync + 'static,
    {
        global().put_dynamic(key, Arc::new(value_fn));
    }

    /// Spawn `future` on the current tokio runtime, inheriting `ambient`.
    pub fn spawn_task<F>(&self, ambient: Scope, future: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        ambient::spawn_task(ambient, future)
    }

    /// Run `f` with `scope` as the ambient scope.
    pub fn with_scope<R>(&self, scope: Scope, f: impl FnOnce() -> R) -> R {
        ambient::with_scope(scope, f)
    }
}

fn global() -> &'static Scope {
    GLOBAL_SCOPE.get_or_init(Scope::root)
}

impl ContextStore for ScopeStore {
    type Scope = Scope;

    fn global_scope(&self) -> Scope {
        global().clone()
    }

    fn current(&self) -> Option<Scope> {
        ambient::current()
    }

    fn enter_scope(&self, parent: Option<&Scope>) -> Scope {
        let scope = parent.unwrap_or_else(|| global()).child();
        ambient::set_current(Some(scope.clone()));
        scope
    }

    fn put(&self, scope: &Scope, key: &str, value: Value) {
        scope.put(key, value);
    }

    fn put_if_absent(&self, scope: &Scope, key: &str, value: Value) {
        scope.put_if_absent(key, value);
    }

    fn put_dynamic(&self, scope: &Scope, key: &str, value_fn: DynamicFn) {
        scope.put_dynamic(key, value_fn);
    }

    fn flatten(
        &self,
        scope: &Scope,
        failure: Option<&(dyn Error + 'static)>,
        include_failure: bool,
    ) -> ContextMap {
        let mut map = scope.flatten();
        if include_failure {
            map.insert(FAILED_KEY.to_string(), Value::Bool(failure.is_some()));
            map.insert(
                ERROR_KEY.to_string(),
                failure.map_or(Value::Null, |e| Value::String(e.to_string())),
            );
        }
        map
    }

    fn exit_scope(&self, scope: &Scope) -> Scope {
        // The global scope has no parent; popping it leaves it in place.
        let parent = scope.parent().cloned().unwrap_or_else(|| scope.clone());
        ambient::restore_parent(scope, parent.clone());
        parent
    }

    fn spawn<F>(&self, ambient: Scope, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        ambient::spawn_thread(ambient, f);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::fmt;

    #[derive(Debug)]
    struct Boom;

    impl fmt::Display for Boom {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("boom")
        }
    }

    impl Error for Boom {}

    #[test]
    fn test_enter_scope_without_parent_hangs_off_global() {
        let store = ScopeStore::new();
        let scope = store.enter_scope(None);

        assert_eq!(scope.parent().map(Scope::id), Some(store.global_scope().id()));
        assert_eq!(store.current().map(|s| s.id()), Some(scope.id()));

        let parent = store.exit_scope(&scope);
        assert_eq!(parent.id(), store.global_scope().id());
    }

    #[test]
    fn test_exit_scope_restores_ambient_parent() {
        let store = ScopeStore::new();
        let outer = store.enter_scope(None);
        let inner = store.enter_scope(Some(&outer));
        assert_eq!(store.current().map(|s| s.id()), Some(inner.id()));

        let popped = store.exit_scope(&inner);
        assert_eq!(popped.id(), outer.id());
        assert_eq!(store.current().map(|s| s.id()), Some(outer.id()));
        store.exit_scope(&outer);
    }

    #[test]
    fn test_exit_on_other_thread_keeps_its_ambient() {
        let store = ScopeStore::new();
        let moved = store.enter_scope(None);
        store.exit_scope(&moved);

        let seen = std::thread::spawn(move || {
            let local = store.enter_scope(None);
            store.exit_scope(&moved);
            let seen = store.current().map(|s| s.id());
            store.exit_scope(&local);
            (seen, local.id())
        })
        .join()
        .unwrap();

        assert_eq!(seen.0, Some(seen.1));
    }

    #[tokio::test]
    async fn test_plain_tasks_do_not_share_ambient() {
        let store = ScopeStore::new();
        let (entered_tx, entered_rx) = tokio::sync::oneshot::channel();
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();

        let first = tokio::spawn(async move {
            let scope = store.enter_scope(None);
            store.put(&scope, "request_id", json!("A-1"));
            entered_tx.send(()).unwrap();
            release_rx.await.unwrap();
            store.exit_scope(&scope);
        });

        entered_rx.await.unwrap();
        let second = tokio::spawn(async move {
            let scope = store.enter_scope(store.current().as_ref());
            let parent = scope.parent().map(Scope::id);
            let request_id = scope.get("request_id");
            store.exit_scope(&scope);
            (parent, request_id)
        })
        .await
        .unwrap();
        release_tx.send(()).unwrap();
        first.await.unwrap();

        assert_eq!(second.0, Some(store.global_scope().id()));
        assert_eq!(second.1, None);
    }

    #[test]
    fn test_exit_global_scope_stays_put() {
        let store = ScopeStore::new();
        let global = store.global_scope();
        assert_eq!(store.exit_scope(&global).id(), global.id());
    }

    #[test]
    fn test_flatten_encodes_failure_fields() {
        let store = ScopeStore::new();
        let scope = store.enter_scope(None);
        store.put(&scope, "op", json!("upload"));

        let ok = store.flatten(&scope, None, true);
        assert_eq!(ok.get(FAILED_KEY), Some(&json!(false)));
        assert_eq!(ok.get(ERROR_KEY), Some(&Value::Null));

        let failed = store.flatten(&scope, Some(&Boom), true);
        assert_eq!(failed.get(FAILED_KEY), Some(&json!(true)));
        assert_eq!(failed.get(ERROR_KEY), Some(&json!("boom")));
        assert_eq!(failed.get("op"), Some(&json!("upload")));

        let bare = store.flatten(&scope, Some(&Boom), false);
        assert!(!bare.contains_key(ERROR_KEY));
        assert!(!bare.contains_key(FAILED_KEY));
        store.exit_scope(&scope);
    }

    #[test]
    fn test_global_tags_have_lowest_precedence() {
        let store = ScopeStore::new();
        store.put_global("store_test_service", json!("billing"));
        store.put_global("store_test_shadowed", json!("global"));

        let scope = store.enter_scope(None);
        store.put(&scope, "store_test_shadowed", json!("local"));

        let map = store.flatten(&scope, None, false);
        assert_eq!(map.get("store_test_service"), Some(&json!("billing")));
        assert_eq!(map.get("store_test_shadowed"), Some(&json!("local")));
        store.exit_scope(&scope);
    }

    #[test]
    fn test_put_if_absent_respects_global() {
        let store = ScopeStore::new();
        store.put_global("store_test_absent", json!("global"));

        let scope = store.enter_scope(None);
        store.put_if_absent(&scope, "store_test_absent", json!("local"));
        assert_eq!(scope.get("store_test_absent"), Some(json!("global")));
        store.exit_scope(&scope);
    }
}
