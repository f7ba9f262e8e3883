//! Scope levels of the hierarchical context stack.
//!
//! A [`Scope`] is a cheap, cloneable reference to one level of the stack.
//! Each level owns its own tags and links to its parent; reads walk the
//! chain from the root down so that descendants override ancestors.

use crate::value::{ContextMap, DynamicFn, TagValue};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

static NEXT_SCOPE_ID: AtomicU64 = AtomicU64::new(0);

/// One level of the context stack.
#[derive(Clone)]
pub struct Scope {
    inner: Arc<ScopeInner>,
}

struct ScopeInner {
    id: u64,
    parent: Option<Scope>,
    tags: RwLock<HashMap<String, TagValue>>,
}

impl Scope {
    /// Create a scope with no parent.
    pub fn root() -> Self {
        Self::with_parent(None)
    }

    /// Create a new level nested under this one.
    pub fn child(&self) -> Self {
        Self::with_parent(Some(self.clone()))
    }

    fn with_parent(parent: Option<Scope>) -> Self {
        Self {
            inner: Arc::new(ScopeInner {
                id: NEXT_SCOPE_ID.fetch_add(1, Ordering::Relaxed),
                parent,
                tags: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Process-unique identifier of this level.
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// The enclosing level, if any.
    pub fn parent(&self) -> Option<&Scope> {
        self.inner.parent.as_ref()
    }

    /// Number of levels above this one.
    pub fn depth(&self) -> usize {
        self.ancestors().count() - 1
    }

    /// Iterate from this level up to the root, this level first.
    pub fn ancestors(&self) -> Ancestors<'_> {
        Ancestors { next: Some(self) }
    }

    /// Attach or overwrite a static tag at this level.
    pub fn put(&self, key: impl Into<String>, value: Value) {
        self.write_tags().insert(key.into(), TagValue::Static(value));
    }

    /// Attach or overwrite a tag whose value is computed on every read.
    pub fn put_dynamic(&self, key: impl Into<String>, value_fn: DynamicFn) {
        self.write_tags().insert(key.into(), TagValue::Dynamic(value_fn));
    }

    /// Attach a static tag unless `key` is already defined on this level or
    /// any ancestor. Returns whether the tag was attached.
    pub fn put_if_absent(&self, key: impl Into<String>, value: Value) -> bool {
        let key = key.into();
        if self.parent().is_some_and(|parent| parent.contains_key(&key)) {
            return false;
        }

        let mut tags = self.write_tags();
        if tags.contains_key(&key) {
            return false;
        }
        tags.insert(key, TagValue::Static(value));
        true
    }

    /// Whether `key` is defined on this level or any ancestor.
    pub fn contains_key(&self, key: &str) -> bool {
        self.ancestors().any(|scope| scope.read_tags().contains_key(key))
    }

    /// Look up `key`, nearest level first. Dynamic tags are evaluated.
    pub fn get(&self, key: &str) -> Option<Value> {
        let tag = self
            .ancestors()
            .find_map(|scope| scope.read_tags().get(key).cloned())?;
        Some(tag.resolve())
    }

    /// Merge every level from the root down to this one into a single map.
    ///
    /// Descendants win on key collisions. Dynamic tags are evaluated after
    /// all locks are released, and only for the entries that survive the
    /// merge.
    pub fn flatten(&self) -> ContextMap {
        let chain: Vec<&Scope> = self.ancestors().collect();

        let mut merged: HashMap<String, TagValue> = HashMap::new();
        for scope in chain.into_iter().rev() {
            for (key, tag) in scope.read_tags().iter() {
                merged.insert(key.clone(), tag.clone());
            }
        }

        merged
            .into_iter()
            .map(|(key, tag)| (key, tag.resolve()))
            .collect()
    }

    fn read_tags(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, TagValue>> {
        self.inner.tags.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_tags(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, TagValue>> {
        self.inner.tags.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scope")
            .field("id", &self.id())
            .field("parent", &self.parent().map(Scope::id))
            .field("tags", &*self.read_tags())
            .finish()
    }
}

/// Iterator over a scope and its ancestors.
pub struct Ancestors<'a> {
    next: Option<&'a Scope>,
}

impl<'a> Iterator for Ancestors<'a> {
    type Item = &'a Scope;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next?;
        self.next = current.parent();
        Some(current)
    }
}
