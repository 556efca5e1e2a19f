//! Page bridge: the capability interface to the live page and its annotator.
//!
//! The capture core never touches a document directly. Everything it needs
//! from the host surface — scroll commands, position reads, render settling,
//! the annotator that paints and reports media labels, and the viewport
//! capture primitive itself — goes through this trait. Two implementations
//! exist: [`crate::cdp::CdpBridge`] over a live Chrome tab (feature `cdp`)
//! and [`crate::fake::FakePage`], a deterministic in-memory page used to test
//! the orchestrator and assembler in isolation.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::geometry::{Css, Rect};
use crate::Result;

/// Snapshot of the scrollable area taken once at run start, in CSS units
#[derive(Debug, Clone, Copy)]
pub struct CaptureMetrics {
    pub total_width: f64,
    pub total_height: f64,
    pub viewport_width: f64,
    pub viewport_height: f64,
    /// Device-to-logical pixel ratio reported by the page. Informational
    /// only: the assembler derives the real scale from the first frame.
    pub dpr: f64,
    pub scroll_x: f64,
    pub scroll_y: f64,
}

/// A discovered media reference in page-absolute CSS coordinates
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Label {
    /// Label text as painted, usually "[KIND] url"
    pub text: String,
    pub page_left: f64,
    pub page_top: f64,
    pub width: f64,
    pub height: f64,
    /// "IMG", "VID", "BG", or empty when the annotator did not report one
    #[serde(default)]
    pub kind: String,
}

impl Label {
    pub fn rect(&self) -> Rect<Css> {
        Rect::new(self.page_left, self.page_top, self.width, self.height)
    }
}

/// Options forwarded to the annotator's scan-and-paint pass
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnnotateOptions {
    pub include_background_images: bool,
    pub include_videos: bool,
    pub only_visible: bool,
    /// Extra CSS padding around the viewport considered "visible"
    pub viewport_pad_css: f64,
    pub exclude_encoded: bool,
    pub blocked_prefixes: Vec<String>,
    /// How long the annotator waits for overlay paint before resolving
    pub settle_delay_ms: u64,
}

impl AnnotateOptions {
    /// Per-step scan during the scroll loop
    pub fn step() -> Self {
        Self {
            include_background_images: true,
            include_videos: true,
            only_visible: true,
            viewport_pad_css: 240.0,
            exclude_encoded: true,
            blocked_prefixes: Vec::new(),
            settle_delay_ms: 220,
        }
    }

    /// Single-viewport scan, no padding
    pub fn viewport() -> Self {
        Self { viewport_pad_css: 0.0, settle_delay_ms: 200, ..Self::step() }
    }

    /// Post-loop recovery scan
    pub fn final_pass() -> Self {
        Self { settle_delay_ms: 300, ..Self::step() }
    }
}

/// Result of the interactive rectangle picker
#[derive(Debug, Clone, Copy)]
pub struct Selection {
    /// Selection in viewport-relative CSS units at pick time
    pub viewport: Rect<Css>,
    /// Selection in page-absolute CSS units
    pub page: Rect<Css>,
    pub device_pixel_ratio: f64,
}

/// Inline style values saved before smooth scrolling and snapping are
/// disabled, restored verbatim at run end
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScrollBehaviorBackup {
    pub html_scroll_behavior: Option<String>,
    pub body_scroll_behavior: Option<String>,
    pub html_snap: Option<String>,
    pub scroller_scroll_behavior: Option<String>,
    pub scroller_snap: Option<String>,
}

/// Capability interface to the live page.
///
/// Calls are synchronous per invocation, mirroring the command-per-call shape
/// of the underlying automation protocols; the async facade in
/// [`crate::async_api`] runs the whole pipeline on a worker thread.
///
/// Every method that talks to the page can fail when the page is navigating
/// or gone. The capture pipeline treats those failures as degraded results
/// (empty label list, best-effort position) rather than aborting the run.
pub trait PageBridge {
    /// Measure the scrollable area and current scroll position
    fn metrics(&mut self) -> Result<CaptureMetrics>;

    /// Re-measure the document height (pages grow under lazy loading)
    fn document_height(&mut self) -> Result<f64>;

    /// Command the vertical scroll position, CSS units
    fn scroll_to(&mut self, y: f64) -> Result<()>;

    /// Observed `(x, y)` scroll position, CSS units
    fn scroll_position(&mut self) -> Result<(f64, f64)>;

    /// Dispatch a synthetic wheel gesture at the viewport center. Last-resort
    /// recovery for pages that only respond to gesture-like input.
    fn dispatch_scroll_gesture(&mut self, delta_y: f64) -> Result<()>;

    /// Block until two render-frame boundaries have passed
    fn settle_frames(&mut self) -> Result<()>;

    /// Nudge the renderer into a repaint (transient transform toggle)
    fn force_repaint(&mut self) -> Result<()>;

    /// Disable smooth scrolling and scroll snapping, returning the previous
    /// inline values for restoration
    fn disable_smooth_scroll(&mut self) -> Result<ScrollBehaviorBackup>;

    fn restore_scroll_behavior(&mut self, backup: &ScrollBehaviorBackup) -> Result<()>;

    /// Scan the visible region, paint overlays, resolve after paint settles.
    /// `broad` extends the scan to subframes; `timeout_ms` bounds the wait.
    fn annotate_and_flush(
        &mut self,
        options: &AnnotateOptions,
        broad: bool,
        timeout_ms: u64,
    ) -> Result<bool>;

    /// Report all currently painted labels, page-absolute coordinates
    fn collect_labels(&mut self, broad: bool, timeout_ms: u64) -> Result<Vec<Label>>;

    /// Clear all overlays; returns the number removed
    fn remove_annotations(&mut self) -> Result<usize>;

    /// Hide the on-page progress indicator so it is not captured
    fn prepare_for_capture(&mut self) -> Result<()>;

    fn restore_after_capture(&mut self) -> Result<()>;

    /// Update the on-page progress indicator text (best effort)
    fn set_progress(&mut self, text: &str);

    /// Obtain one encoded raster snapshot of the currently visible region
    fn capture_viewport(&mut self) -> Result<Vec<u8>>;

    /// Interactive rectangle picker; `None` when the user cancels
    fn select_area_once(&mut self) -> Result<Option<Selection>>;

    /// `window.innerWidth` minus `documentElement.clientWidth`: the reserved
    /// scrollbar thickness in CSS units
    fn scrollbar_width_css(&mut self) -> Result<f64>;

    /// Current viewport inner width in CSS units
    fn viewport_inner_width(&mut self) -> Result<f64>;

    /// Whether the page is still reachable
    fn is_alive(&mut self) -> bool;

    /// Bounded wait. The fake bridge overrides this to be instantaneous so
    /// tests stay fast and deterministic.
    fn sleep(&mut self, ms: u64) {
        std::thread::sleep(Duration::from_millis(ms));
    }
}
