//! PageStitch Capture Engine
//!
//! A full-page capture engine that walks a scrollable page viewport by
//! viewport, captures rate-limited frames, stitches them into one
//! pixel-accurate composite, and exports the media labels discovered along
//! the way with coordinates that match the saved image.
//!
//! # Features
//!
//! - **CDP Backend** (`cdp` feature): drives a live Chrome tab via the
//!   DevTools protocol
//! - **Bridge Abstraction**: the pipeline runs against a [`PageBridge`]
//!   trait, so it is fully testable without a browser
//! - **Cooperative Cancellation**: a cancel raised mid-run still yields the
//!   frames captured so far
//!
//! # Example
//!
//! ```no_run
//! use pagestitch::{run_capture, CaptureOptions, RunContext};
//!
//! # #[cfg(feature = "cdp")]
//! # fn main() -> pagestitch::Result<()> {
//! let mut bridge = pagestitch::cdp::CdpBridge::launch("https://example.com")?;
//! let ctx = RunContext::new();
//! let options = CaptureOptions::default();
//! if let Some(capture) = run_capture(&mut bridge, &ctx, &options)? {
//!     println!("captured {}x{} px", capture.page_width_px, capture.page_height_px);
//!     for line in &capture.label_lines {
//!         println!("{}", line);
//!     }
//! }
//! # Ok(())
//! # }
//! # #[cfg(not(feature = "cdp"))]
//! # fn main() {}
//! ```

pub mod error;
pub use error::{Error, Result};

pub mod geometry;

pub mod bridge;
pub use bridge::{CaptureMetrics, Label, PageBridge, Selection};

pub mod context;
pub use context::{CancelHandle, RunContext};

pub mod acquire;
pub mod labels;
pub mod postprocess;
pub mod scroll;
pub mod stitch;

pub mod run;
pub use run::{capture_viewport_only, run_capture, CaptureOutput, FinalCapture, FramePart};

// Deterministic in-memory bridge, public so integration tests and downstream
// harnesses can drive the pipeline without a browser
pub mod fake;

#[cfg(feature = "cdp")]
pub mod cdp;

// Async-friendly capture API (worker-backed abstraction)
#[cfg(feature = "cdp")]
pub mod async_api;

#[cfg(feature = "cdp")]
pub use async_api::Session;

use geometry::{Css, Rect};

/// Configuration for one capture run
///
/// The defaults produce a labeled full-page composite downscaled to 1000 px
/// wide with whitespace edges trimmed.
///
/// # Examples
///
/// ```
/// let opts = pagestitch::CaptureOptions::default();
/// assert!(opts.collect_labels);
/// assert_eq!(opts.target_width_px, Some(1000));
/// ```
#[derive(Debug, Clone)]
pub struct CaptureOptions {
    /// Annotate each step and export discovered media labels
    pub collect_labels: bool,
    /// Include coordinates and page meta on exported label lines
    pub include_positions: bool,
    /// Return raw per-step frames instead of a stitched composite
    pub skip_stitch: bool,
    /// Begin the walk at the current scroll position instead of the top
    pub start_from_current: bool,
    /// Restrict the capture to a page-absolute rectangle
    pub selection: Option<Rect<Css>>,
    /// Downscale the composite to this width when wider; `None` keeps full
    /// resolution
    pub target_width_px: Option<u32>,
    /// Trim uniform background columns off both sides
    pub trim_whitespace: bool,
    /// Crop horizontally to the span of the discovered media labels
    pub crop_to_media_span: bool,
}

impl Default for CaptureOptions {
    fn default() -> Self {
        Self {
            collect_labels: true,
            include_positions: true,
            skip_stitch: false,
            start_from_current: false,
            selection: None,
            target_width_px: Some(1000),
            trim_whitespace: true,
            crop_to_media_span: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_options_are_full_labeled_capture() {
        let opts = CaptureOptions::default();
        assert!(opts.collect_labels);
        assert!(opts.include_positions);
        assert!(!opts.skip_stitch);
        assert!(!opts.start_from_current);
        assert!(opts.selection.is_none());
        assert_eq!(opts.target_width_px, Some(1000));
        assert!(opts.trim_whitespace);
    }
}
