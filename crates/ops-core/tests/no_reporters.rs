//! Behaviour with no reporters registered
//!
//! Lives in its own test binary so nothing else registers a reporter in this
//! process.

use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[test]
fn test_exit_without_reporters_is_bookkeeping_only() {
    assert!(!ops_core::has_reporters());

    let evaluations = Arc::new(AtomicUsize::new(0));
    let counter = evaluations.clone();

    let mut op = ops_core::enter("no_reporters");
    op.put_dynamic("expensive", move || {
        counter.fetch_add(1, Ordering::SeqCst);
        json!("computed")
    });
    let mut child = op.enter("child");
    child.fail("ignored");

    let parent = child.exit();
    assert!(!parent.has_failed());

    // The returned handle is usable: it nests further and exits cleanly.
    let again = parent.enter("again");
    again.put("k", "v");
    let parent = again.exit();
    parent.exit();

    op.fail("also ignored");
    assert_eq!(evaluations.load(Ordering::SeqCst), 0);
}
