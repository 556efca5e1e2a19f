//! Capture run orchestration.
//!
//! `run_capture` drives the whole pipeline against a [`PageBridge`]: plan the
//! vertical span, walk it step by step (scroll, settle, annotate, acquire),
//! assemble the frames, then apply the post-capture crops and export the
//! collected labels. The loop is cooperative: a cancel flag is honored at
//! step boundaries and whatever was captured up to that point is still
//! assembled and returned.

use image::RgbaImage;
use log::{debug, info, warn};

use crate::acquire::acquire_frame;
use crate::bridge::{AnnotateOptions, Label, PageBridge, Selection};
use crate::context::RunContext;
use crate::geometry::CoordinateMap;
use crate::labels::{render_lines, LabelCollector, LabelRecord};
use crate::postprocess::{
    crop_horiz, crop_rect, detect_side_trim, downscale_if_wider, media_span_crop,
    scrollbar_cut_px, trim_would_clip_labels, SpanCropOptions, TrimOptions,
};
use crate::scroll::{capture_bounds, goto_offset, plan_steps, CaptureBounds, CaptureStep};
use crate::stitch::{stitch, CapturedFrame, StitchMode};
use crate::{CaptureOptions, Error, Result};

/// After this many consecutive byte-identical frames the renderer is assumed
/// stuck and gets a repaint nudge
const DUPLICATE_REPAINT_STREAK: u32 = 6;
/// If the nudge does not break the streak, the loop aborts and stitches what
/// it has
const DUPLICATE_ABORT_STREAK: u32 = 8;
const REPAINT_SETTLE_MS: u64 = 120;

/// Labels this close to a trim edge veto the whitespace trim, pixels
const LABEL_TRIM_GUARD_PX: u32 = 12;

const VIEWPORT_PAINT_WAIT_MS: u64 = 160;
const VIEWPORT_ANNOTATE_TIMEOUT_MS: u64 = 1200;
const VIEWPORT_COLLECT_TIMEOUT_MS: u64 = 1000;

/// One raw frame kept unstitched, for callers that assemble externally
#[derive(Debug, Clone)]
pub struct FramePart {
    pub data: Vec<u8>,
    pub offset_css: f64,
    pub clip_height_css: f64,
}

/// What a finished run produced
#[derive(Debug)]
pub enum CaptureOutput {
    Composite(RgbaImage),
    /// Raw per-step frames, emitted when stitching is disabled
    Parts(Vec<FramePart>),
}

/// A finished capture: the image (or parts), the coordinate mapping for it,
/// and the exported labels
#[derive(Debug)]
pub struct FinalCapture {
    pub output: CaptureOutput,
    pub map: CoordinateMap,
    pub page_width_px: u32,
    pub page_height_px: u32,
    pub labels: Vec<LabelRecord>,
    pub label_lines: Vec<String>,
    pub steps_taken: usize,
    pub cancelled: bool,
}

struct LoopOutcome {
    frames: Vec<CapturedFrame>,
    steps: Vec<CaptureStep>,
    metrics: crate::bridge::CaptureMetrics,
    bounds: CaptureBounds,
    cancelled: bool,
}

/// Walk the planned span, capturing one frame per step.
///
/// Scroll behavior and position are restored on every exit path. A failed
/// step ends the walk early rather than failing the run; the frames captured
/// so far are still returned.
fn capture_loop<B: PageBridge>(
    bridge: &mut B,
    ctx: &RunContext,
    mut collector: Option<&mut LabelCollector>,
    options: &CaptureOptions,
) -> Result<LoopOutcome> {
    let metrics = bridge.metrics()?;
    let latest_height = bridge.document_height().unwrap_or(metrics.total_height);
    let bounds = capture_bounds(
        &metrics,
        latest_height,
        options.start_from_current,
        options.selection.as_ref(),
    );
    let plan = plan_steps(&bounds, metrics.viewport_height);
    info!(
        "capturing {} steps over {:.0} css units from offset {:.0}",
        plan.len(),
        bounds.coverage_css(),
        bounds.start_y_css
    );

    let behavior = match bridge.disable_smooth_scroll() {
        Ok(b) => Some(b),
        Err(e) => {
            warn!("could not disable smooth scrolling: {}", e);
            None
        }
    };
    let origin_y = metrics.scroll_y;

    let mut frames: Vec<CapturedFrame> = Vec::new();
    let mut steps: Vec<CaptureStep> = Vec::new();
    let mut dup_streak: u32 = 0;
    let mut cancelled = false;
    let total = plan.len();

    for (i, step) in plan.iter().enumerate() {
        if ctx.is_cancelled() {
            cancelled = true;
            break;
        }
        if !bridge.is_alive() {
            warn!("page went away at step {}/{}", i + 1, total);
            break;
        }
        bridge.set_progress(&format!("Capturing {}/{}", i + 1, total));

        goto_offset(bridge, step.offset);

        if let Some(c) = collector.as_deref_mut() {
            c.annotate_step(bridge);
            c.collect_step(bridge);
        }
        if ctx.is_cancelled() {
            cancelled = true;
            break;
        }

        let _ = bridge.prepare_for_capture();
        let acquired = acquire_frame(bridge, ctx);
        let _ = bridge.restore_after_capture();
        let data = match acquired {
            Ok(d) => d,
            Err(e) => {
                warn!("step {}/{} lost, ending walk: {}", i + 1, total, e);
                break;
            }
        };

        // Lazy-loading media often reports only after the capture settle
        if let Some(c) = collector.as_deref_mut() {
            c.collect_step(bridge);
        }

        if frames.last().map(|f| f.data == data).unwrap_or(false) {
            dup_streak += 1;
            if dup_streak == DUPLICATE_REPAINT_STREAK {
                warn!("{} identical frames, nudging a repaint", dup_streak);
                let _ = bridge.force_repaint();
                bridge.sleep(REPAINT_SETTLE_MS);
            } else if dup_streak >= DUPLICATE_ABORT_STREAK {
                warn!("still stuck after repaint, aborting the walk");
                break;
            }
        } else {
            dup_streak = 0;
        }

        let measured = image::load_from_memory(&data).map(|img| img.height()).ok();
        frames.push(CapturedFrame { data, measured_height_px: measured });
        steps.push(*step);
    }

    // A run that captured nothing still yields a single-viewport frame when
    // the page is reachable, so the caller always has something to save
    if frames.is_empty() && !cancelled && bridge.is_alive() {
        debug!("no step frames captured, falling back to one viewport frame");
        goto_offset(bridge, bounds.start_y_css);
        let _ = bridge.prepare_for_capture();
        let fallback = acquire_frame(bridge, ctx);
        let _ = bridge.restore_after_capture();
        if let Ok(data) = fallback {
            let measured = image::load_from_memory(&data).map(|img| img.height()).ok();
            frames.push(CapturedFrame { data, measured_height_px: measured });
            steps.push(CaptureStep {
                offset: bounds.start_y_css,
                clip_height: metrics.viewport_height.min(bounds.coverage_css()),
            });
        }
    }

    let _ = bridge.remove_annotations();
    let _ = bridge.scroll_to(origin_y);
    let _ = bridge.scroll_position();
    if let Some(b) = behavior {
        let _ = bridge.restore_scroll_behavior(&b);
    }

    Ok(LoopOutcome { frames, steps, metrics, bounds, cancelled })
}

/// Run a full capture: scroll walk, stitch, post-capture crops, label
/// export.
///
/// The caller owns the context lifecycle and calls [`RunContext::reset`]
/// before starting a fresh run; a cancel raised before this call is honored
/// immediately.
///
/// Returns `Ok(None)` only when the run was cancelled before any frame was
/// captured. A cancelled run with frames returns a partial composite with
/// `cancelled` set.
pub fn run_capture<B: PageBridge>(
    bridge: &mut B,
    ctx: &RunContext,
    options: &CaptureOptions,
) -> Result<Option<FinalCapture>> {
    let mut collector = options.collect_labels.then(LabelCollector::new);

    let outcome = capture_loop(bridge, ctx, collector.as_mut(), options)?;
    let steps_taken = outcome.steps.len();

    if let Some(c) = collector.as_mut() {
        if !outcome.cancelled && bridge.is_alive() {
            c.final_pass(bridge, steps_taken);
        }
    }

    if outcome.frames.is_empty() {
        if outcome.cancelled {
            info!("run cancelled before any frame was captured");
            return Ok(None);
        }
        return Err(Error::NoFramesCaptured);
    }

    if options.skip_stitch {
        return Ok(Some(export_parts(&outcome, collector.as_ref(), options)));
    }

    let mode = if options.selection.is_some() {
        StitchMode::Selection
    } else {
        StitchMode::Full
    };
    let stitched = stitch(
        &outcome.frames,
        &outcome.steps,
        &outcome.metrics,
        mode,
        outcome.bounds.coverage_css(),
        outcome.bounds.start_y_css,
    )?;
    let mut image = stitched.image;
    let mut map = CoordinateMap::new(stitched.scale, stitched.start_offset_css);

    match &options.selection {
        Some(sel) => {
            // Selection mode cuts the exact rectangle and skips every other
            // adjustment
            let top_rel_css = (sel.top - map.start_y_css).max(0.0);
            let left_px = ((sel.left * map.scale).floor()).max(0.0) as u32;
            let top_px = (top_rel_css * map.scale).floor() as u32;
            let width_px = ((sel.width * map.scale).ceil() as u32).max(1);
            let height_px = ((sel.height * map.scale).ceil() as u32).max(1);
            image = crop_rect(&image, left_px, top_px, width_px, height_px);
            map.crop_left_css = sel.left;
            map.crop_top_css = top_rel_css;
        }
        None => {
            if let Some(target) = options.target_width_px {
                if let Some((resized, factor)) = downscale_if_wider(&image, target) {
                    debug!("downscaled composite to {} wide (factor {:.4})", target, factor);
                    image = resized;
                    map.scale *= factor;
                }
            }

            let sb_css = bridge.scrollbar_width_css().unwrap_or(0.0);
            let cut = scrollbar_cut_px(sb_css, map.scale, image.width());
            if cut > 0 {
                debug!("cutting {} px scrollbar strip", cut);
                image = crop_horiz(&image, 0, image.width() - cut);
            }

            if options.trim_whitespace {
                if let Some(trim) = detect_side_trim(&image, &TrimOptions::default()) {
                    let known = collector.as_ref().map(|c| c.labels()).unwrap_or(&[]);
                    if trim_would_clip_labels(known, map.scale, trim, image.width(), LABEL_TRIM_GUARD_PX)
                    {
                        debug!("whitespace trim vetoed: would clip a labeled region");
                    } else {
                        let new_w = image.width() - trim.cut_left_px - trim.cut_right_px;
                        image = crop_horiz(&image, trim.cut_left_px, new_w);
                        map.crop_left_css += trim.cut_left_px as f64 / map.scale;
                    }
                }
            }

            if options.crop_to_media_span {
                if let Some(c) = collector.as_ref() {
                    // Span math runs in the current image's frame, so shift
                    // labels by whatever has been cropped off the left
                    let shifted: Vec<Label> = c
                        .labels()
                        .iter()
                        .map(|l| Label { page_left: l.page_left - map.crop_left_css, ..l.clone() })
                        .collect();
                    if let Some((left, width)) = media_span_crop(
                        &shifted,
                        image.width(),
                        map.scale,
                        &SpanCropOptions::default(),
                    ) {
                        image = crop_horiz(&image, left, width);
                        map.crop_left_css += left as f64 / map.scale;
                    }
                }
            }
        }
    }

    let records = collector
        .as_ref()
        .map(|c| c.export(&map, options.selection.as_ref()))
        .unwrap_or_default();
    let lines =
        render_lines(&records, options.include_positions, image.width(), image.height(), map.scale);

    Ok(Some(FinalCapture {
        page_width_px: image.width(),
        page_height_px: image.height(),
        output: CaptureOutput::Composite(image),
        map,
        labels: records,
        label_lines: lines,
        steps_taken,
        cancelled: outcome.cancelled,
    }))
}

/// Capture only the currently visible viewport, optionally cropped to a
/// picked rectangle, without any scrolling.
pub fn capture_viewport_only<B: PageBridge>(
    bridge: &mut B,
    ctx: &RunContext,
    selection: Option<&Selection>,
    options: &CaptureOptions,
) -> Result<FinalCapture> {
    let metrics = bridge.metrics()?;

    let mut collector = options.collect_labels.then(LabelCollector::new);
    if let Some(c) = collector.as_mut() {
        let _ = bridge.remove_annotations();
        let _ = bridge.annotate_and_flush(
            &AnnotateOptions::viewport(),
            false,
            VIEWPORT_ANNOTATE_TIMEOUT_MS,
        );
        bridge.sleep(VIEWPORT_PAINT_WAIT_MS);
        c.extend(
            bridge
                .collect_labels(false, VIEWPORT_COLLECT_TIMEOUT_MS)
                .unwrap_or_default(),
        );
    }

    let _ = bridge.prepare_for_capture();
    let acquired = acquire_frame(bridge, ctx);
    let _ = bridge.restore_after_capture();
    let _ = bridge.remove_annotations();
    let data = acquired?;

    let mut image = image::load_from_memory(&data)?.to_rgba8();
    let mut scale = if metrics.viewport_width > 0.0 {
        image.width() as f64 / metrics.viewport_width
    } else {
        metrics.dpr.max(1.0)
    };

    if selection.is_none() {
        if let Some(target) = options.target_width_px {
            if let Some((resized, factor)) = downscale_if_wider(&image, target) {
                image = resized;
                scale *= factor;
            }
        }
    }

    // Viewport exports use page-absolute label coordinates
    let mut map = CoordinateMap::new(scale, 0.0);
    let selection_page = selection.map(|s| s.page);

    if let Some(sel) = selection {
        let v = sel.viewport;
        let left_px = ((v.left * scale).floor()).max(0.0) as u32;
        let top_px = ((v.top * scale).floor()).max(0.0) as u32;
        let width_px = ((v.width * scale).ceil() as u32).max(1);
        let height_px = ((v.height * scale).ceil() as u32).max(1);
        image = crop_rect(&image, left_px, top_px, width_px, height_px);
        map.crop_left_css = sel.page.left;
        map.crop_top_css = sel.page.top;
    }

    let records = collector
        .as_ref()
        .map(|c| c.export(&map, selection_page.as_ref()))
        .unwrap_or_default();
    let lines =
        render_lines(&records, options.include_positions, image.width(), image.height(), map.scale);

    Ok(FinalCapture {
        page_width_px: image.width(),
        page_height_px: image.height(),
        output: CaptureOutput::Composite(image),
        map,
        labels: records,
        label_lines: lines,
        steps_taken: 1,
        cancelled: false,
    })
}

/// Export path when stitching is disabled: raw frames plus labels mapped
/// with the page-reported pixel ratio
fn export_parts(
    outcome: &LoopOutcome,
    collector: Option<&LabelCollector>,
    options: &CaptureOptions,
) -> FinalCapture {
    let scale = if outcome.metrics.dpr > 0.0 { outcome.metrics.dpr } else { 1.0 };
    let map = CoordinateMap::new(scale, outcome.bounds.start_y_css);
    let width_px = (outcome.metrics.viewport_width * scale).round() as u32;
    let height_px = (outcome.bounds.coverage_css() * scale).round() as u32;

    let parts: Vec<FramePart> = outcome
        .frames
        .iter()
        .zip(outcome.steps.iter())
        .map(|(frame, step)| FramePart {
            data: frame.data.clone(),
            offset_css: step.offset,
            clip_height_css: step.clip_height,
        })
        .collect();

    let records = collector
        .map(|c| c.export(&map, options.selection.as_ref()))
        .unwrap_or_default();
    let lines = render_lines(&records, options.include_positions, width_px, height_px, map.scale);

    FinalCapture {
        output: CaptureOutput::Parts(parts),
        map,
        page_width_px: width_px,
        page_height_px: height_px,
        labels: records,
        label_lines: lines,
        steps_taken: outcome.steps.len(),
        cancelled: outcome.cancelled,
    }
}

/// Encode a composite as JPEG at the given quality
pub fn encode_jpeg(image: &RgbaImage, quality: u8) -> Result<Vec<u8>> {
    use image::codecs::jpeg::JpegEncoder;
    let rgb = image::DynamicImage::ImageRgba8(image.clone()).to_rgb8();
    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, quality)
        .encode(&rgb, rgb.width(), rgb.height(), image::ColorType::Rgb8)
        .map_err(Error::from)?;
    Ok(out)
}
