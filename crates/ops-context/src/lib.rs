//! Hierarchical context store for operation tracking.
//!
//! This crate keeps a stack of key/value tags per logical flow of execution.
//! Each level of the stack is a [`Scope`]; a scope sees the tags of all of its
//! ancestors, with nearer levels overriding farther ones.
//!
//! # Structure
//!
//! ```text
//! global scope (process-wide tags)
//!   └─ root operation scope
//!       └─ nested operation scope
//!           └─ ...
//! ```
//!
//! # Usage
//!
//! 1. Implement or pick a [`ContextStore`]; [`ScopeStore`] is the default.
//! 2. Enter scopes, attach static tags with `put` or lazily evaluated tags
//!    with `put_dynamic`.
//! 3. Call `flatten` to read the merged view.
//! 4. Use `spawn` (threads) or [`ScopeStore::spawn_task`] (tokio) to run work
//!    that inherits the current scope.

pub mod ambient;
pub mod scope;
pub mod store;
pub mod value;

pub use scope::Scope;
pub use store::{ContextStore, ScopeStore, ERROR_KEY, FAILED_KEY};
pub use value::{ContextMap, DynamicFn, TagValue};
