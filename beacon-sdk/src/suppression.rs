//! Marks threads whose telemetry must not feed back into the pipeline.
//!
//! The processor's worker thread enters a suppression scope for its whole
//! life. Anything it logs through `tracing` (export errors, retry notices)
//! would otherwise be picked up by the tracing bridge and appended to the very
//! buffer the worker is draining.
use std::cell::Cell;

thread_local! {
    static SUPPRESSION_ENABLED: Cell<bool> = const { Cell::new(false) };
}

/// Suppression scope for the current thread.
#[derive(Clone, Copy, Debug)]
pub(crate) struct SuppressionContext;

impl SuppressionContext {
    /// Enable suppression until the returned guard is dropped.
    pub(crate) fn attach() -> Guard {
        let was_suppressed = SUPPRESSION_ENABLED.with(|suppressed| suppressed.replace(true));
        Guard { was_suppressed }
    }

    pub(crate) fn is_suppressed() -> bool {
        SUPPRESSION_ENABLED.with(Cell::get)
    }
}

/// Restores the previous suppression state on drop.
#[derive(Debug)]
pub(crate) struct Guard {
    was_suppressed: bool,
}

impl Drop for Guard {
    fn drop(&mut self) {
        SUPPRESSION_ENABLED.with(|suppressed| suppressed.set(self.was_suppressed));
    }
}
