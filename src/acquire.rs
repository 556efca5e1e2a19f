//! Rate-limited, retrying viewport frame acquisition.
//!
//! Host capture APIs are quota-throttled (a hard calls-per-second cap), so a
//! single shared "last successful capture" instant on the run context paces
//! every acquisition in the run, and quota rejections back off harder than
//! ordinary failures.

use log::warn;

use crate::bridge::PageBridge;
use crate::context::RunContext;
use crate::{Error, Result};

/// Total attempts before giving up on a frame
pub const MAX_ATTEMPTS: u32 = 4;

const QUOTA_BACKOFF_BASE_MS: u64 = 700;
const QUOTA_BACKOFF_STEP_MS: u64 = 250;
const PLAIN_BACKOFF_MS: u64 = 300;

/// Obtain one encoded raster snapshot of the currently visible region.
///
/// Enforces the minimum inter-capture spacing, retries up to
/// [`MAX_ATTEMPTS`] times, and surfaces [`Error::CaptureFailed`] when the
/// budget is exhausted. The caller decides whether that skips the step or
/// ends the run.
pub fn acquire_frame<B: PageBridge>(bridge: &mut B, ctx: &RunContext) -> Result<Vec<u8>> {
    let mut last_err: Option<Error> = None;

    for attempt in 0..MAX_ATTEMPTS {
        let wait = ctx.ms_until_capture_allowed();
        if wait > 0 {
            bridge.sleep(wait);
        }

        match bridge.capture_viewport() {
            Ok(data) if !data.is_empty() => {
                ctx.mark_capture();
                return Ok(data);
            }
            Ok(_) => {
                warn!("capture attempt {} returned an empty frame", attempt + 1);
                bridge.sleep(PLAIN_BACKOFF_MS);
            }
            Err(e) => {
                let backoff = if matches!(e, Error::CaptureQuota) {
                    QUOTA_BACKOFF_BASE_MS + QUOTA_BACKOFF_STEP_MS * attempt as u64
                } else {
                    PLAIN_BACKOFF_MS
                };
                warn!("capture attempt {} failed: {}", attempt + 1, e);
                last_err = Some(e);
                bridge.sleep(backoff);
            }
        }
    }

    if let Some(e) = last_err {
        warn!("giving up on frame after {} attempts: {}", MAX_ATTEMPTS, e);
    }
    Err(Error::CaptureFailed { attempts: MAX_ATTEMPTS })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::FakePage;

    #[test]
    fn succeeds_after_quota_failures() {
        let mut page = FakePage::new(1000.0, 800.0, 3000.0, 1.0);
        page.fail_captures_with_quota(2);
        let ctx = RunContext::new();
        let frame = acquire_frame(&mut page, &ctx).expect("retry should recover");
        assert!(!frame.is_empty());
        // Two rejected attempts, escalating backoff
        assert!(page.sleeps().contains(&700));
        assert!(page.sleeps().contains(&950));
    }

    #[test]
    fn exhausts_retries() {
        let mut page = FakePage::new(1000.0, 800.0, 3000.0, 1.0);
        page.fail_captures_with_quota(10);
        let ctx = RunContext::new();
        let err = acquire_frame(&mut page, &ctx).unwrap_err();
        assert!(matches!(err, Error::CaptureFailed { attempts: 4 }));
        assert_eq!(page.capture_attempts(), 4);
    }

    #[test]
    fn success_updates_shared_clock() {
        let mut page = FakePage::new(1000.0, 800.0, 3000.0, 1.0);
        let ctx = RunContext::new();
        acquire_frame(&mut page, &ctx).unwrap();
        assert!(ctx.ms_until_capture_allowed() > 0);
    }
}
