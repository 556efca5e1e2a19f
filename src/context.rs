//! Per-run shared state: cancellation flag and capture rate-limit clock.
//!
//! Both values are scoped to a run context object passed through the
//! pipeline rather than living in module globals, so runs stay independently
//! testable and cannot interfere with each other.

use rand::Rng;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

/// Minimum spacing between successful viewport captures, before jitter
pub const MIN_CAPTURE_GAP_MS: u64 = 600;

/// Upper bound on the random jitter added to the capture gap
pub const CAPTURE_JITTER_MS: u64 = 80;

/// Shared handle that requests cooperative cancellation of a run.
///
/// Cloneable and cheap; setting it is observed by the scroll loop at the next
/// iteration boundary. In-flight bounded waits finish first.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Run-scoped mutable state shared by every pipeline stage
#[derive(Debug, Default)]
pub struct RunContext {
    cancel: CancelHandle,
    /// Instant of the last successful viewport capture. Shared across all
    /// acquisitions in the run so backoff state is global to the run.
    last_capture_at: Mutex<Option<Instant>>,
}

impl RunContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear the cancellation flag at the start of a fresh run
    pub fn reset(&self) {
        self.cancel.reset();
        *self.last_capture_at.lock().unwrap() = None;
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Milliseconds to wait before the next capture attempt is allowed.
    /// Zero when the minimum gap has already elapsed.
    pub fn ms_until_capture_allowed(&self) -> u64 {
        let last = self.last_capture_at.lock().unwrap();
        match *last {
            None => 0,
            Some(at) => {
                let elapsed = at.elapsed().as_millis() as u64;
                if elapsed >= MIN_CAPTURE_GAP_MS {
                    0
                } else {
                    let jitter = rand::thread_rng().gen_range(0..CAPTURE_JITTER_MS);
                    MIN_CAPTURE_GAP_MS - elapsed + jitter
                }
            }
        }
    }

    /// Record a successful capture for rate limiting
    pub fn mark_capture(&self) {
        *self.last_capture_at.lock().unwrap() = Some(Instant::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_handle_is_shared() {
        let ctx = RunContext::new();
        let handle = ctx.cancel_handle();
        assert!(!ctx.is_cancelled());
        handle.cancel();
        assert!(ctx.is_cancelled());
        ctx.reset();
        assert!(!ctx.is_cancelled());
    }

    #[test]
    fn first_capture_needs_no_wait() {
        let ctx = RunContext::new();
        assert_eq!(ctx.ms_until_capture_allowed(), 0);
    }

    #[test]
    fn back_to_back_captures_are_spaced() {
        let ctx = RunContext::new();
        ctx.mark_capture();
        let wait = ctx.ms_until_capture_allowed();
        assert!(wait > 0 && wait <= MIN_CAPTURE_GAP_MS + CAPTURE_JITTER_MS);
    }
}
