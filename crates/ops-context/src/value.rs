//! Tag values stored on a scope level.

use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;

/// A flattened view of a scope chain, keyed by tag name.
pub type ContextMap = Map<String, Value>;

/// A function producing a tag value each time the context is flattened.
pub type DynamicFn = Arc<dyn Fn() -> Value + Send + Sync>;

/// A single tag attached to a scope.
#[derive(Clone)]
pub enum TagValue {
    /// A value fixed at attachment time.
    Static(Value),
    /// A value recomputed on every read.
    Dynamic(DynamicFn),
}

impl TagValue {
    /// Wrap a closure as a dynamic tag.
    pub fn dynamic<F>(value_fn: F) -> Self
    where
        F: Fn() -> Value + Send + Sync + 'static,
    {
        TagValue::Dynamic(Arc::new(value_fn))
    }

    /// Resolve the tag to a concrete value, invoking the function for dynamic tags.
    pub fn resolve(&self) -> Value {
        match self {
            TagValue::Static(value) => value.clone(),
            TagValue::Dynamic(value_fn) => value_fn(),
        }
    }

    /// Whether this tag is recomputed on each read.
    pub fn is_dynamic(&self) -> bool {
        matches!(self, TagValue::Dynamic(_))
    }
}

impl fmt::Debug for TagValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TagValue::Static(value) => f.debug_tuple("Static").field(value).finish(),
            TagValue::Dynamic(_) => f.write_str("Dynamic(..)"),
        }
    }
}

impl From<Value> for TagValue {
    fn from(value: Value) -> Self {
        TagValue::Static(value)
    }
}
