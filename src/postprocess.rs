//! Deterministic post-capture crops.
//!
//! Applied to the full-composite path in a fixed order: output downscale,
//! scrollbar strip removal, whitespace edge trim, media-bound horizontal
//! crop, selection crop. Every step is best-effort; a step that finds
//! nothing to do leaves the image unmodified, and the whitespace trim aborts
//! entirely rather than clip into a labeled region.

use image::imageops::{crop_imm, resize, FilterType};
use image::RgbaImage;

use crate::bridge::Label;

/// Refuse any crop that would leave less than this many pixels of width
/// (or the full image when already narrower)
const MIN_REMAINING_WIDTH: u32 = 320;

/// Crop `width` columns starting at `left`, clamped to image bounds
pub fn crop_horiz(img: &RgbaImage, left: u32, width: u32) -> RgbaImage {
    let sx = left.min(img.width().saturating_sub(1));
    let w = width.clamp(1, img.width() - sx);
    crop_imm(img, sx, 0, w, img.height()).to_image()
}

/// Crop a rectangle, clamped to image bounds
pub fn crop_rect(img: &RgbaImage, left: u32, top: u32, width: u32, height: u32) -> RgbaImage {
    let sx = left.min(img.width().saturating_sub(1));
    let sy = top.min(img.height().saturating_sub(1));
    let w = width.clamp(1, img.width() - sx);
    let h = height.clamp(1, img.height() - sy);
    crop_imm(img, sx, sy, w, h).to_image()
}

/// Uniformly downscale to `target_width` preserving aspect ratio. `None`
/// when the image is already narrow enough; otherwise the resized image and
/// the applied scale factor, which callers fold into later coordinate math.
pub fn downscale_if_wider(img: &RgbaImage, target_width: u32) -> Option<(RgbaImage, f64)> {
    let (w, h) = img.dimensions();
    if target_width == 0 || w <= target_width {
        return None;
    }
    let factor = target_width as f64 / w as f64;
    let out_h = ((h as f64 * factor).round() as u32).max(1);
    let out = resize(img, target_width, out_h, FilterType::Lanczos3);
    Some((out, factor))
}

/// Pixels to cut from the right edge for a reserved scrollbar strip of
/// `sb_css` logical units. Zero when the cut would be degenerate: capped at
/// 25% of width and required to leave [`MIN_REMAINING_WIDTH`].
pub fn scrollbar_cut_px(sb_css: f64, scale: f64, width_px: u32) -> u32 {
    if sb_css <= 0.0 || !scale.is_finite() || scale <= 0.0 {
        return 0;
    }
    // +1 fudge for fractional device-pixel rounding at the strip edge
    let mut cut = (sb_css * scale).ceil() as u32 + 1;
    let max_cut = width_px / 4;
    if cut > max_cut {
        cut = max_cut;
    }
    let floor_w = MIN_REMAINING_WIDTH.min(width_px);
    if cut == 0 || width_px - cut < floor_w {
        0
    } else {
        cut
    }
}

/// Knobs for the whitespace edge trim
#[derive(Debug, Clone)]
pub struct TrimOptions {
    /// Per-channel color tolerance for "matches the background"
    pub tolerance: u8,
    /// Maximum columns to remove per side; `None` means 25% of width
    pub max_trim_px: Option<u32>,
    /// Bottom fraction excluded from sampling so footers do not bias the
    /// background estimate
    pub ignore_bottom_ratio: f64,
}

impl Default for TrimOptions {
    fn default() -> Self {
        Self { tolerance: 10, max_trim_px: None, ignore_bottom_ratio: 0.15 }
    }
}

/// Measured whitespace runs on both sides
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SideTrim {
    pub cut_left_px: u32,
    pub cut_right_px: u32,
}

/// Detect nearly-uniform columns at the left and right edges.
///
/// Walks inward from each edge while at least 97% of sampled pixels in the
/// column match that edge's average background color within a tolerance
/// sphere, or are near-transparent. `None` when no meaningful trim exists or
/// the remainder would be too narrow.
pub fn detect_side_trim(img: &RgbaImage, opts: &TrimOptions) -> Option<SideTrim> {
    let (w, h) = img.dimensions();
    if w <= 2 || h == 0 {
        return None;
    }

    let ignore = opts.ignore_bottom_ratio.clamp(0.0, 0.9);
    let usable_h = ((h as f64 * (1.0 - ignore)).floor() as u32).clamp(1, h);
    // Bounded row sample for speed on tall composites
    let row_step = (usable_h / 2048).max(1) as usize;

    let avg_color = |x: u32| -> [f64; 4] {
        let mut acc = [0.0f64; 4];
        let mut n = 0u32;
        for y in (0..usable_h).step_by(row_step * 2) {
            let p = img.get_pixel(x, y);
            for c in 0..4 {
                acc[c] += p[c] as f64;
            }
            n += 1;
        }
        acc.map(|v| v / n.max(1) as f64)
    };

    let tol = opts.tolerance as f64;
    // Rough RGB sphere; alpha is handled by the transparency escape below
    let near = |p: &image::Rgba<u8>, bg: &[f64; 4]| -> bool {
        let d = (p[0] as f64 - bg[0]).powi(2)
            + (p[1] as f64 - bg[1]).powi(2)
            + (p[2] as f64 - bg[2]).powi(2);
        d <= (tol * 3.0).powi(2)
    };

    let is_background_column = |x: u32, bg: &[f64; 4]| -> bool {
        let mut matches = 0u32;
        let mut total = 0u32;
        for y in (0..usable_h).step_by(row_step * 3) {
            let p = img.get_pixel(x, y);
            if p[3] < 10 || near(p, bg) {
                matches += 1;
            }
            total += 1;
        }
        total > 0 && matches as f64 / total as f64 >= 0.97
    };

    let max_each = match opts.max_trim_px {
        Some(m) => m.min(w * 45 / 100),
        None => w / 4,
    }
    .min(w / 2);

    let left_bg = avg_color(0);
    let mut cut_left = 0;
    for x in 0..max_each {
        if is_background_column(x, &left_bg) {
            cut_left = x + 1;
        } else {
            break;
        }
    }

    let right_bg = avg_color(w - 1);
    let mut cut_right = 0;
    for i in 0..max_each {
        if is_background_column(w - 1 - i, &right_bg) {
            cut_right = i + 1;
        } else {
            break;
        }
    }

    let remain = w - cut_left - cut_right;
    if remain < MIN_REMAINING_WIDTH.min(w) {
        return None;
    }
    if cut_left == 0 && cut_right == 0 {
        return None;
    }
    Some(SideTrim { cut_left_px: cut_left, cut_right_px: cut_right })
}

/// Would the proposed side trim cut into (or within `guard_px` of) any
/// label's mapped rectangle? A trim that clips a label is aborted entirely.
pub fn trim_would_clip_labels(
    labels: &[Label],
    scale: f64,
    trim: SideTrim,
    page_width_px: u32,
    guard_px: u32,
) -> bool {
    if !scale.is_finite() || scale <= 0.0 || labels.is_empty() {
        return false;
    }
    if trim.cut_left_px == 0 && trim.cut_right_px == 0 {
        return false;
    }
    let guard = guard_px as f64;
    for label in labels {
        if label.width <= 0.0 {
            continue;
        }
        let left_px = label.page_left * scale;
        let right_px = (label.page_left + label.width) * scale;
        if trim.cut_left_px > 0 && left_px - guard < trim.cut_left_px as f64 {
            return true;
        }
        if trim.cut_right_px > 0 {
            let dist_from_right = page_width_px as f64 - right_px;
            if dist_from_right - guard < trim.cut_right_px as f64 {
                return true;
            }
        }
    }
    false
}

/// Knobs for the media-bound horizontal crop
#[derive(Debug, Clone)]
pub struct SpanCropOptions {
    pub pad_css: f64,
    /// Labels narrower than this do not anchor the span
    pub min_media_width_css: f64,
    /// Maximum fraction of width removed per side
    pub max_crop_ratio: f64,
    /// Minimum fraction of page width the media span must cover
    pub min_span_ratio: f64,
}

impl Default for SpanCropOptions {
    fn default() -> Self {
        Self {
            pad_css: 12.0,
            min_media_width_css: 60.0,
            max_crop_ratio: 0.15,
            min_span_ratio: 0.5,
        }
    }
}

/// Compute a horizontal crop to the bounding span of sufficiently wide
/// labels, `(left_px, width_px)`. `None` when the span is too narrow a
/// fraction of the page (cropping would cut non-media content) or nothing
/// would be removed.
pub fn media_span_crop(
    labels: &[Label],
    page_width_px: u32,
    scale: f64,
    opts: &SpanCropOptions,
) -> Option<(u32, u32)> {
    if labels.is_empty() || page_width_px == 0 || !scale.is_finite() || scale <= 0.0 {
        return None;
    }
    let mut min_left = f64::INFINITY;
    let mut max_right = f64::NEG_INFINITY;
    for label in labels {
        if label.width < opts.min_media_width_css {
            continue;
        }
        min_left = min_left.min(label.page_left);
        max_right = max_right.max(label.page_left + label.width);
    }
    if !min_left.is_finite() || !max_right.is_finite() || max_right <= min_left {
        return None;
    }

    let page_w_css = page_width_px as f64 / scale;
    if (max_right - min_left) / page_w_css < opts.min_span_ratio {
        return None;
    }

    let pad = opts.pad_css.max(0.0);
    let mut left_px = (((min_left - pad) * scale).floor() as i64).max(0) as u32;
    let mut right_px = (((max_right + pad) * scale).ceil() as u32).min(page_width_px);

    let max_crop = (page_width_px as f64 * opts.max_crop_ratio.clamp(0.0, 0.45)) as u32;
    left_px = left_px.min(max_crop);
    if page_width_px - right_px > max_crop {
        right_px = page_width_px - max_crop;
    }
    if right_px - left_px < MIN_REMAINING_WIDTH.min(page_width_px) {
        return None;
    }
    if left_px == 0 && right_px >= page_width_px {
        return None;
    }
    Some((left_px, right_px - left_px))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    /// White background with a dark content block spanning the given columns
    fn framed(width: u32, height: u32, content_left: u32, content_right: u32) -> RgbaImage {
        RgbaImage::from_fn(width, height, |x, _| {
            if x >= content_left && x < content_right {
                Rgba([40, 40, 40, 255])
            } else {
                Rgba([255, 255, 255, 255])
            }
        })
    }

    fn label_at(left: f64, width: f64) -> Label {
        Label {
            text: "https://example.com/a.png".to_string(),
            page_left: left,
            page_top: 10.0,
            width,
            height: 20.0,
            kind: "IMG".to_string(),
        }
    }

    #[test]
    fn trims_white_margins_on_both_sides() {
        let img = framed(800, 200, 100, 700);
        let trim = detect_side_trim(&img, &TrimOptions::default()).unwrap();
        assert_eq!(trim.cut_left_px, 100);
        assert_eq!(trim.cut_right_px, 100);
        let cropped = crop_horiz(&img, trim.cut_left_px, 800 - trim.cut_left_px - trim.cut_right_px);
        assert_eq!(cropped.width(), 600);
    }

    #[test]
    fn trim_is_capped_per_side() {
        // Margins wider than 25% of the image stop at the cap
        let img = framed(1000, 100, 400, 600);
        let trim = detect_side_trim(&img, &TrimOptions::default()).unwrap();
        assert_eq!(trim.cut_left_px, 250);
        assert_eq!(trim.cut_right_px, 250);
    }

    #[test]
    fn no_trim_when_remainder_too_narrow() {
        let img = framed(400, 100, 150, 260);
        let trim = detect_side_trim(
            &img,
            &TrimOptions { max_trim_px: Some(200), ..TrimOptions::default() },
        );
        assert_eq!(trim, None);
    }

    #[test]
    fn fully_uniform_image_trims_to_cap() {
        let img = framed(800, 100, 0, 0);
        let trim = detect_side_trim(&img, &TrimOptions::default()).unwrap();
        assert_eq!(trim.cut_left_px, 200);
        assert_eq!(trim.cut_right_px, 200);
    }

    #[test]
    fn guard_blocks_trim_near_label() {
        // Label starts at css 105 (scale 1): a 100px left cut leaves only
        // 5px, inside the 12px guard
        let labels = vec![label_at(105.0, 200.0)];
        let trim = SideTrim { cut_left_px: 100, cut_right_px: 0 };
        assert!(trim_would_clip_labels(&labels, 1.0, trim, 800, 12));

        // Label far from the edge is safe
        let labels = vec![label_at(300.0, 200.0)];
        assert!(!trim_would_clip_labels(&labels, 1.0, trim, 800, 12));
    }

    #[test]
    fn guard_accounts_for_scale() {
        // css 60 maps to 120px at scale 2; a 110px cut leaves 10px < guard
        let labels = vec![label_at(60.0, 100.0)];
        let trim = SideTrim { cut_left_px: 110, cut_right_px: 0 };
        assert!(trim_would_clip_labels(&labels, 2.0, trim, 1600, 12));
    }

    #[test]
    fn scrollbar_cut_basics() {
        assert_eq!(scrollbar_cut_px(17.0, 2.0, 2000), 35);
        assert_eq!(scrollbar_cut_px(0.0, 2.0, 2000), 0);
        // Capped at 25% of width
        assert_eq!(scrollbar_cut_px(600.0, 2.0, 2000), 500);
        // Degenerate: would leave less than the floor width
        assert_eq!(scrollbar_cut_px(17.0, 2.0, 340), 0);
    }

    #[test]
    fn downscale_preserves_aspect() {
        let img = framed(2000, 1000, 0, 2000);
        let (out, factor) = downscale_if_wider(&img, 1000).unwrap();
        assert_eq!(out.dimensions(), (1000, 500));
        assert_eq!(factor, 0.5);
        assert!(downscale_if_wider(&out, 1000).is_none());
    }

    #[test]
    fn media_span_crop_requires_wide_span() {
        // Span 100..700 of a 800 css page (scale 1) covers 75% — crop with
        // 12 css pad, clamped at 15% per side
        let labels = vec![label_at(100.0, 300.0), label_at(400.0, 300.0)];
        let (left, width) = media_span_crop(&labels, 800, 1.0, &SpanCropOptions::default()).unwrap();
        assert_eq!(left, 88);
        assert_eq!(left + width, 712);

        // A narrow span is refused outright
        let labels = vec![label_at(300.0, 100.0)];
        assert!(media_span_crop(&labels, 800, 1.0, &SpanCropOptions::default()).is_none());
    }

    #[test]
    fn crop_rect_clamps_to_bounds() {
        let img = framed(100, 100, 0, 100);
        let out = crop_rect(&img, 90, 90, 50, 50);
        assert_eq!(out.dimensions(), (10, 10));
    }
}
