//! Deterministic in-memory page for testing the orchestrator and assembler
//! in isolation.
//!
//! Frames are synthesized so that every pixel row encodes its absolute
//! device-row index in the red/green channels, which lets tests verify band
//! placement in the stitched composite. Scroll behavior, capture failures,
//! label sets and page growth are all configurable; waits are recorded
//! instead of slept so tests stay fast.

use image::{Rgba, RgbaImage};
use std::io::Cursor;

use crate::bridge::{
    AnnotateOptions, CaptureMetrics, Label, PageBridge, ScrollBehaviorBackup, Selection,
};
use crate::context::CancelHandle;
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq)]
enum ScrollMode {
    Cooperative,
    /// `scroll_to` is ignored; only the synthetic gesture moves the page
    GestureOnly,
    /// Nothing moves the page
    Refuse,
}

/// Deterministic fake implementation of [`PageBridge`]
pub struct FakePage {
    viewport_w: f64,
    viewport_h: f64,
    doc_height: f64,
    dpr: f64,

    scroll_x: f64,
    scroll_y: f64,
    pending_target: Option<f64>,
    lag_polls: u32,
    lag_polls_remaining: u32,
    scroll_mode: ScrollMode,

    labels: Vec<Label>,
    painted_band: Option<(f64, f64)>,

    growth_after_start: f64,
    scrollbar_css: f64,
    selection: Option<Selection>,

    quota_failures_remaining: u32,
    capture_attempts: u32,
    cancel_after: Option<(u32, CancelHandle)>,
    /// When set, every capture returns this exact byte payload
    frozen_frame: Option<Vec<u8>>,

    sleeps: Vec<u64>,
    gesture_dispatched: bool,
    repaints: u32,
    annotate_calls: u32,
    broad_annotate_calls: u32,
    remove_calls: u32,
    progress: Vec<String>,
    overlay_hidden: bool,
    behavior_restored: bool,
    alive: bool,
}

impl FakePage {
    pub fn new(viewport_w: f64, viewport_h: f64, doc_height: f64, dpr: f64) -> Self {
        Self {
            viewport_w,
            viewport_h,
            doc_height,
            dpr,
            scroll_x: 0.0,
            scroll_y: 0.0,
            pending_target: None,
            lag_polls: 0,
            lag_polls_remaining: 0,
            scroll_mode: ScrollMode::Cooperative,
            labels: Vec::new(),
            painted_band: None,
            growth_after_start: 0.0,
            scrollbar_css: 0.0,
            selection: None,
            quota_failures_remaining: 0,
            capture_attempts: 0,
            cancel_after: None,
            frozen_frame: None,
            sleeps: Vec::new(),
            gesture_dispatched: false,
            repaints: 0,
            annotate_calls: 0,
            broad_annotate_calls: 0,
            remove_calls: 0,
            progress: Vec::new(),
            overlay_hidden: false,
            behavior_restored: false,
            alive: true,
        }
    }

    // --- configuration ---

    pub fn set_labels(&mut self, labels: Vec<Label>) {
        self.labels = labels;
    }

    /// Respond to scroll commands only after `polls` position reads
    pub fn lag_scrolling(&mut self, polls: u32) {
        self.lag_polls = polls;
    }

    pub fn require_gesture(&mut self) {
        self.scroll_mode = ScrollMode::GestureOnly;
    }

    pub fn refuse_all_scrolling(&mut self) {
        self.scroll_mode = ScrollMode::Refuse;
    }

    /// Reject the next `n` capture attempts with a quota error
    pub fn fail_captures_with_quota(&mut self, n: u32) {
        self.quota_failures_remaining = n;
    }

    /// Make every capture return identical bytes (stuck renderer)
    pub fn freeze_frames(&mut self) {
        self.frozen_frame = Some(self.render_frame());
    }

    /// Raise `handle` once `n` captures have succeeded, simulating a user
    /// cancelling mid-run
    pub fn cancel_after_captures(&mut self, n: u32, handle: CancelHandle) {
        self.cancel_after = Some((n, handle));
    }

    /// Grow the document by `css` when height is re-measured after the
    /// metrics snapshot
    pub fn grow_after_start(&mut self, css: f64) {
        self.growth_after_start = css;
    }

    pub fn set_scrollbar_css(&mut self, css: f64) {
        self.scrollbar_css = css;
    }

    pub fn set_selection(&mut self, selection: Selection) {
        self.selection = Some(selection);
    }

    pub fn set_initial_scroll(&mut self, y: f64) {
        self.scroll_y = y;
    }

    pub fn kill(&mut self) {
        self.alive = false;
    }

    // --- observation ---

    pub fn sleeps(&self) -> &[u64] {
        &self.sleeps
    }

    pub fn capture_attempts(&self) -> u32 {
        self.capture_attempts
    }

    pub fn gesture_dispatched(&self) -> bool {
        self.gesture_dispatched
    }

    pub fn scroll_y(&self) -> f64 {
        self.scroll_y
    }

    pub fn behavior_restored(&self) -> bool {
        self.behavior_restored
    }

    pub fn annotate_calls(&self) -> u32 {
        self.annotate_calls
    }

    pub fn broad_annotate_calls(&self) -> u32 {
        self.broad_annotate_calls
    }

    pub fn remove_calls(&self) -> u32 {
        self.remove_calls
    }

    pub fn repaints(&self) -> u32 {
        self.repaints
    }

    pub fn progress_messages(&self) -> &[String] {
        &self.progress
    }

    fn total_height(&self) -> f64 {
        self.doc_height + self.growth_after_start
    }

    fn max_scroll(&self) -> f64 {
        (self.total_height() - self.viewport_h).max(0.0)
    }

    /// Render the currently visible viewport. Row `r` of the frame encodes
    /// `scroll_y * dpr + r` in its red/green channels.
    fn render_frame(&self) -> Vec<u8> {
        let w = (self.viewport_w * self.dpr).round() as u32;
        let h = (self.viewport_h * self.dpr).round() as u32;
        let base = (self.scroll_y * self.dpr).round() as u32;
        let img = RgbaImage::from_fn(w.max(1), h.max(1), |_, y| {
            let idx = base + y;
            Rgba([(idx >> 8) as u8, (idx & 0xff) as u8, 0, 255])
        });
        let mut buf = Cursor::new(Vec::new());
        image::DynamicImage::ImageRgba8(img)
            .write_to(&mut buf, image::ImageOutputFormat::Png)
            .expect("png encode");
        buf.into_inner()
    }
}

impl PageBridge for FakePage {
    fn metrics(&mut self) -> Result<CaptureMetrics> {
        Ok(CaptureMetrics {
            total_width: self.viewport_w,
            total_height: self.doc_height,
            viewport_width: self.viewport_w,
            viewport_height: self.viewport_h,
            dpr: self.dpr,
            scroll_x: self.scroll_x,
            scroll_y: self.scroll_y,
        })
    }

    fn document_height(&mut self) -> Result<f64> {
        Ok(self.total_height())
    }

    fn scroll_to(&mut self, y: f64) -> Result<()> {
        match self.scroll_mode {
            ScrollMode::Cooperative => {
                let clamped = y.clamp(0.0, self.max_scroll());
                if self.lag_polls > 0 {
                    self.pending_target = Some(clamped);
                    self.lag_polls_remaining = self.lag_polls;
                } else {
                    self.scroll_y = clamped;
                }
            }
            ScrollMode::GestureOnly | ScrollMode::Refuse => {
                self.pending_target = Some(y.clamp(0.0, self.max_scroll()));
            }
        }
        Ok(())
    }

    fn scroll_position(&mut self) -> Result<(f64, f64)> {
        if self.scroll_mode == ScrollMode::Cooperative {
            if let Some(target) = self.pending_target {
                if self.lag_polls_remaining > 0 {
                    self.lag_polls_remaining -= 1;
                } else {
                    self.scroll_y = target;
                    self.pending_target = None;
                }
            }
        }
        Ok((self.scroll_x, self.scroll_y))
    }

    fn dispatch_scroll_gesture(&mut self, _delta_y: f64) -> Result<()> {
        self.gesture_dispatched = true;
        if self.scroll_mode == ScrollMode::GestureOnly {
            if let Some(target) = self.pending_target.take() {
                self.scroll_y = target;
            }
        }
        Ok(())
    }

    fn settle_frames(&mut self) -> Result<()> {
        Ok(())
    }

    fn force_repaint(&mut self) -> Result<()> {
        self.repaints += 1;
        Ok(())
    }

    fn disable_smooth_scroll(&mut self) -> Result<ScrollBehaviorBackup> {
        Ok(ScrollBehaviorBackup {
            html_scroll_behavior: Some("smooth".to_string()),
            ..ScrollBehaviorBackup::default()
        })
    }

    fn restore_scroll_behavior(&mut self, _backup: &ScrollBehaviorBackup) -> Result<()> {
        self.behavior_restored = true;
        Ok(())
    }

    fn annotate_and_flush(
        &mut self,
        options: &AnnotateOptions,
        broad: bool,
        _timeout_ms: u64,
    ) -> Result<bool> {
        self.annotate_calls += 1;
        if broad {
            self.broad_annotate_calls += 1;
        }
        let pad = options.viewport_pad_css;
        self.painted_band = Some((self.scroll_y - pad, self.scroll_y + self.viewport_h + pad));
        Ok(true)
    }

    fn collect_labels(&mut self, _broad: bool, _timeout_ms: u64) -> Result<Vec<Label>> {
        let (top, bottom) = match self.painted_band {
            Some(band) => band,
            None => return Ok(Vec::new()),
        };
        Ok(self
            .labels
            .iter()
            .filter(|l| l.page_top + l.height > top && l.page_top < bottom)
            .cloned()
            .collect())
    }

    fn remove_annotations(&mut self) -> Result<usize> {
        self.remove_calls += 1;
        let had = self.painted_band.take();
        Ok(if had.is_some() { self.labels.len() } else { 0 })
    }

    fn prepare_for_capture(&mut self) -> Result<()> {
        self.overlay_hidden = true;
        Ok(())
    }

    fn restore_after_capture(&mut self) -> Result<()> {
        self.overlay_hidden = false;
        Ok(())
    }

    fn set_progress(&mut self, text: &str) {
        self.progress.push(text.to_string());
    }

    fn capture_viewport(&mut self) -> Result<Vec<u8>> {
        self.capture_attempts += 1;
        if self.quota_failures_remaining > 0 {
            self.quota_failures_remaining -= 1;
            return Err(Error::CaptureQuota);
        }
        if let Some((n, handle)) = &self.cancel_after {
            if self.capture_attempts >= *n {
                handle.cancel();
            }
        }
        if let Some(frozen) = &self.frozen_frame {
            return Ok(frozen.clone());
        }
        Ok(self.render_frame())
    }

    fn select_area_once(&mut self) -> Result<Option<Selection>> {
        Ok(self.selection)
    }

    fn scrollbar_width_css(&mut self) -> Result<f64> {
        Ok(self.scrollbar_css)
    }

    fn viewport_inner_width(&mut self) -> Result<f64> {
        Ok(self.viewport_w)
    }

    fn is_alive(&mut self) -> bool {
        self.alive
    }

    fn sleep(&mut self, ms: u64) {
        self.sleeps.push(ms);
    }
}
