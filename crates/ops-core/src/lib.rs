//! Operation tracking with failure latching and context reporting.
//!
//! An operation is a unit of work, possibly nested and possibly spread over
//! several threads or tasks. Each [`Op`] carries key/value tags that nested
//! ops inherit, plus a latched failure. When an op exits, every registered
//! [`Reporter`] receives the failure (if any) and the flattened context, so
//! failures are correlated with the request and root operation they belong
//! to without each call site emitting metrics itself.
//!
//! # Example
//!
//! ```rust,no_run
//! use ops_core::{register_reporter, Failure, ContextMap};
//!
//! register_reporter(|failure: Option<&Failure>, ctx: &ContextMap| {
//!     if let Some(failure) = failure {
//!         eprintln!("{} failed: {} ({:?})", ctx["op"], failure, ctx);
//!     }
//! });
//!
//! let op = ops_core::enter("checkout");
//! op.put("request_id", "r-123");
//!
//! let mut charge = op.enter("charge_card");
//! let _ = charge.fail_on_error(std::fs::read("/nonexistent"));
//! // Reported with op=charge_card, root_op=checkout, request_id=r-123.
//! let op = charge.exit();
//!
//! op.exit();
//! ```
//!
//! With no reporters registered, exiting an op only pops its level.

pub mod failure;
pub mod op;
pub mod registry;

pub use failure::Failure;
pub use op::{enter, enter_in, go, go_async, go_in, Op, ELAPSED_KEY, OP_KEY, ROOT_OP_KEY};
pub use ops_context::{ContextMap, ContextStore, ScopeStore, ERROR_KEY, FAILED_KEY};
pub use registry::{has_reporters, register_reporter, register_shared_reporter, Reporter, ReporterRegistry};
