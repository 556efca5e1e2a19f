//! Scroll orchestration: step planning and drive-to-offset with escalating
//! recovery.
//!
//! Planning happens once, against a freshly re-measured document height, and
//! yields a gap-free partition of the target span. Driving the page through
//! the plan is best-effort: a page that resists programmatic scrolling gets a
//! reissued command and finally a synthetic wheel gesture, and a step that
//! still misses its offset is captured where it landed rather than aborting
//! the run.

use log::{debug, warn};

use crate::bridge::{CaptureMetrics, PageBridge};
use crate::geometry::{Css, Rect};

/// One scroll-to-offset-and-capture unit of work, CSS units
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CaptureStep {
    /// Vertical position to scroll to
    pub offset: f64,
    /// Height of page content this frame contributes (final step shrinks)
    pub clip_height: f64,
}

/// Vertical span a run will cover, CSS units
#[derive(Debug, Clone, Copy)]
pub struct CaptureBounds {
    pub start_y_css: f64,
    pub end_y_css: f64,
}

impl CaptureBounds {
    pub fn coverage_css(&self) -> f64 {
        (self.end_y_css - self.start_y_css).max(0.0)
    }
}

/// Extra coverage appended past the measured document end to tolerate late
/// content growth: 20% of a viewport, clamped to [40, 240]
pub fn safety_tail_css(viewport_height: f64) -> f64 {
    (viewport_height * 0.2).clamp(40.0, 240.0)
}

/// Compute the span to capture.
///
/// `latest_height` is a re-measurement taken immediately before planning; a
/// page may have grown since the metrics snapshot and coverage extends to at
/// least the latest height. A selection pins the span to its own edges and
/// gets no safety tail.
pub fn capture_bounds(
    metrics: &CaptureMetrics,
    latest_height: f64,
    start_from_current: bool,
    selection: Option<&Rect<Css>>,
) -> CaptureBounds {
    let dynamic_height = metrics.total_height.max(latest_height).max(0.0);

    let default_start = if start_from_current {
        metrics.scroll_y.floor().clamp(0.0, metrics.total_height.max(0.0))
    } else {
        0.0
    };

    let (start, end) = match selection {
        Some(sel) => {
            let start = sel.top.clamp(0.0, dynamic_height);
            let end = sel.bottom().min(dynamic_height).max(start + 1.0);
            (start, end)
        }
        None => {
            let end = dynamic_height + safety_tail_css(metrics.viewport_height);
            (default_start, end.max(default_start + 1.0))
        }
    };

    CaptureBounds { start_y_css: start, end_y_css: end }
}

/// Partition `[start, end)` into viewport-height steps, last step shrinking
/// to the remainder. Never overlaps, never leaves a gap.
pub fn plan_steps(bounds: &CaptureBounds, viewport_height: f64) -> Vec<CaptureStep> {
    let step_h = viewport_height.floor().max(1.0);
    let mut steps = Vec::new();
    let mut y = bounds.start_y_css;
    while y < bounds.end_y_css {
        let remaining = bounds.end_y_css - y;
        let clip = viewport_height.min(remaining);
        if clip <= 0.0 {
            break;
        }
        steps.push(CaptureStep { offset: y, clip_height: clip });
        y += step_h;
    }
    steps
}

/// Arrival tolerance in CSS units
const ARRIVE_EPS: f64 = 2.0;
const POLL_INTERVAL_MS: u64 = 60;
const POLL_BUDGET_MS: u64 = 1200;

/// Recovery strategies tried in order when polling alone does not arrive.
/// Each has its own engagement threshold and post-command wait.
#[derive(Debug, Clone, Copy)]
enum Recovery {
    Reissue,
    Gesture,
}

impl Recovery {
    fn threshold(self) -> f64 {
        match self {
            Recovery::Reissue => 4.0,
            Recovery::Gesture => 6.0,
        }
    }

    fn settle_ms(self) -> u64 {
        match self {
            Recovery::Reissue => 220,
            Recovery::Gesture => 260,
        }
    }

    fn apply<B: PageBridge>(self, bridge: &mut B, target: f64) {
        match self {
            Recovery::Reissue => {
                let _ = bridge.scroll_to(target);
            }
            Recovery::Gesture => {
                let delta = (target / 4.0).max(120.0);
                let _ = bridge.dispatch_scroll_gesture(delta);
            }
        }
    }
}

fn read_y<B: PageBridge>(bridge: &mut B) -> f64 {
    bridge.scroll_position().map(|(_, y)| y).unwrap_or(0.0)
}

/// Drive the page to `target` and wait until it settles there, escalating
/// through the recovery strategies when it resists. Timeouts are tolerated:
/// the returned value is the best observed position and the caller captures
/// whatever is visible there.
pub fn goto_offset<B: PageBridge>(bridge: &mut B, target: f64) -> f64 {
    let _ = bridge.scroll_to(target);

    let mut observed = read_y(bridge);
    let mut polls = POLL_BUDGET_MS / POLL_INTERVAL_MS;
    while (observed - target).abs() >= ARRIVE_EPS && polls > 0 {
        bridge.sleep(POLL_INTERVAL_MS);
        observed = read_y(bridge);
        polls -= 1;
    }

    for strategy in [Recovery::Reissue, Recovery::Gesture] {
        if (observed - target).abs() <= strategy.threshold() {
            break;
        }
        debug!("scroll recovery {:?} at offset {}", strategy, target);
        strategy.apply(bridge, target);
        bridge.sleep(strategy.settle_ms());
        observed = read_y(bridge);
    }

    if (observed - target).abs() >= ARRIVE_EPS {
        warn!(
            "scroll to {} settled at {}; capturing best-effort position",
            target, observed
        );
    }

    // Screenshots taken before paint completes show stale content
    let _ = bridge.settle_frames();
    observed
}
