//! Pixel-accurate assembly of per-step frames into one composite raster.
//!
//! The assembler trusts measured frame heights over predicted ones (renderer
//! rounding drifts over many steps), draws each frame's bottom-aligned slice
//! into successive bands, and absorbs rounding error at the final band
//! instead of leaving a gap or overrun. Oversized results are uniformly
//! downscaled to the canvas ceiling rather than truncated.

use image::imageops::{crop_imm, replace, resize, FilterType};
use image::RgbaImage;
use log::warn;

use crate::bridge::CaptureMetrics;
use crate::scroll::CaptureStep;
use crate::{Error, Result};

/// Conservative per-engine limit on either raster dimension
pub const MAX_CANVAS_DIM: u32 = 32760;

/// One raw snapshot per successfully captured step
#[derive(Debug, Clone)]
pub struct CapturedFrame {
    /// Encoded raster bytes as returned by the capture primitive
    pub data: Vec<u8>,
    /// Actual decoded raster height in device pixels. May differ from
    /// `clip_height × scale` due to renderer rounding or interim page
    /// growth; `None` forces the predicted height.
    pub measured_height_px: Option<u32>,
}

/// How the composite is assembled
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StitchMode {
    /// Bands are bottom-aligned slices; output clamped to the planned
    /// coverage height
    Full,
    /// Single-step user-selection capture: the slice starts at the
    /// rectangle's top instead of being bottom-aligned
    Selection,
}

/// The assembled composite plus the metadata needed to map page coordinates
/// into it
#[derive(Debug)]
pub struct Stitched {
    pub image: RgbaImage,
    /// Device-to-logical scale, derived from the first frame's raster width
    pub scale: f64,
    /// CSS offset of the composite's top edge within the document
    pub start_offset_css: f64,
}

impl Stitched {
    pub fn width_px(&self) -> u32 {
        self.image.width()
    }

    pub fn height_px(&self) -> u32 {
        self.image.height()
    }
}

/// Assemble captured frames into one composite.
///
/// `coverage_css` is the planned vertical span; `start_offset_css` the CSS
/// offset of the first step. Frames that fail to decode are skipped with a
/// warning; zero decodable frames is [`Error::NoFramesCaptured`].
pub fn stitch(
    frames: &[CapturedFrame],
    steps: &[CaptureStep],
    metrics: &CaptureMetrics,
    mode: StitchMode,
    coverage_css: f64,
    start_offset_css: f64,
) -> Result<Stitched> {
    if metrics.viewport_width <= 0.0 {
        return Err(Error::Other("viewport width must be positive".into()));
    }

    // Decode, keeping each frame paired with its planned step
    let mut decoded: Vec<(RgbaImage, &CapturedFrame, &CaptureStep)> = Vec::new();
    for (frame, step) in frames.iter().zip(steps.iter()) {
        match image::load_from_memory(&frame.data) {
            Ok(img) => decoded.push((img.to_rgba8(), frame, step)),
            Err(e) => warn!("skipping undecodable frame at offset {}: {}", step.offset, e),
        }
    }
    if decoded.is_empty() {
        return Err(Error::NoFramesCaptured);
    }

    let width_px = decoded[0].0.width();
    let scale = width_px as f64 / metrics.viewport_width;
    let single_selection = mode == StitchMode::Selection && decoded.len() == 1;

    // Per-frame drawing height: measured raster height when available,
    // otherwise the predicted clip height
    let clip_heights_px: Vec<u32> = decoded
        .iter()
        .map(|(_, frame, step)| {
            if single_selection {
                return ((coverage_css * scale).round() as u32).max(1);
            }
            match frame.measured_height_px {
                Some(h) if h > 0 => h,
                _ => ((step.clip_height * scale).round() as u32).max(1),
            }
        })
        .collect();

    let total_height_px: u64 = clip_heights_px.iter().map(|&h| h as u64).sum();
    let scale_out = (MAX_CANVAS_DIM as f64 / width_px.max(1) as f64)
        .min(MAX_CANVAS_DIM as f64 / total_height_px.max(1) as f64)
        .min(1.0);

    let out_w = ((width_px as f64 * scale_out).round() as u32).max(1);
    let band_heights: Vec<u32> = clip_heights_px
        .iter()
        .map(|&h| ((h as f64 * scale_out).round() as u32).max(1))
        .collect();
    let total_out: u32 = band_heights.iter().sum();

    let canvas_height = if mode == StitchMode::Selection {
        total_out.max(1)
    } else {
        let desired_px = ((coverage_css * scale).round() as u32).max(1);
        let desired_out = ((desired_px as f64 * scale_out).round() as u32).max(1);
        total_out.max(1).min(desired_out)
    };

    let mut out = RgbaImage::new(out_w, canvas_height);
    let mut dy: u32 = 0;
    for (i, (bmp, _, _)) in decoded.iter().enumerate() {
        if dy >= canvas_height {
            break;
        }
        let mut ch = clip_heights_px[i].min(bmp.height());
        if ch == 0 {
            continue;
        }
        let mut dh = band_heights[i];
        if single_selection {
            dh = dh.min(canvas_height);
        } else if dy + dh > canvas_height {
            // Clamp the last band to exactly fill the remaining height
            let allowed = canvas_height - dy;
            if allowed == 0 {
                break;
            }
            let ratio = allowed as f64 / dh as f64;
            dh = allowed;
            ch = ((ch as f64 * ratio).round() as u32).clamp(1, bmp.height());
        }
        // Bottom-align the slice: content beneath the viewport bottom that
        // bled into the frame is cropped from the top. Selection mode reads
        // from the rectangle's top instead.
        let sy = if mode == StitchMode::Selection { 0 } else { bmp.height() - ch };

        let band = crop_imm(bmp, 0, sy, bmp.width(), ch).to_image();
        if band.width() == out_w && band.height() == dh {
            replace(&mut out, &band, 0, dy as i64);
        } else {
            let scaled = resize(&band, out_w, dh, FilterType::Triangle);
            replace(&mut out, &scaled, 0, dy as i64);
        }
        dy += dh;
    }

    Ok(Stitched { image: out, scale, start_offset_css })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;
    use std::io::Cursor;

    /// Encode a frame whose pixel rows carry their absolute row index in the
    /// red/green channels, so band placement is verifiable after stitching
    fn indexed_frame(width: u32, height: u32, first_row_index: u32) -> Vec<u8> {
        let img = RgbaImage::from_fn(width, height, |_, y| {
            let idx = first_row_index + y;
            Rgba([(idx >> 8) as u8, (idx & 0xff) as u8, 0, 255])
        });
        let mut buf = Cursor::new(Vec::new());
        image::DynamicImage::ImageRgba8(img)
            .write_to(&mut buf, image::ImageOutputFormat::Png)
            .unwrap();
        buf.into_inner()
    }

    fn row_index(img: &RgbaImage, y: u32) -> u32 {
        let p = img.get_pixel(0, y);
        ((p[0] as u32) << 8) | p[1] as u32
    }

    fn metrics(viewport_w: f64, viewport_h: f64) -> CaptureMetrics {
        CaptureMetrics {
            total_width: viewport_w,
            total_height: 10_000.0,
            viewport_width: viewport_w,
            viewport_height: viewport_h,
            dpr: 1.0,
            scroll_x: 0.0,
            scroll_y: 0.0,
        }
    }

    fn steps_of(clips: &[f64]) -> Vec<CaptureStep> {
        let mut offset = 0.0;
        clips
            .iter()
            .map(|&clip| {
                let s = CaptureStep { offset, clip_height: clip };
                offset += clip;
                s
            })
            .collect()
    }

    #[test]
    fn three_frames_at_2x_compose_to_6000() {
        // 3000 css page, 1000 css viewport, device scale 2
        let frames: Vec<CapturedFrame> = (0..3)
            .map(|i| CapturedFrame {
                data: indexed_frame(2000, 2000, i * 2000),
                measured_height_px: Some(2000),
            })
            .collect();
        let steps = steps_of(&[1000.0, 1000.0, 1000.0]);
        let out = stitch(&frames, &steps, &metrics(1000.0, 1000.0), StitchMode::Full, 3000.0, 0.0)
            .unwrap();
        assert_eq!(out.scale, 2.0);
        assert_eq!((out.width_px(), out.height_px()), (2000, 6000));
        // Each frame's content sits at its cumulative offset
        assert_eq!(row_index(&out.image, 0), 0);
        assert_eq!(row_index(&out.image, 2000), 2000);
        assert_eq!(row_index(&out.image, 4000), 4000);
        assert_eq!(row_index(&out.image, 5999), 5999);
    }

    #[test]
    fn predicted_height_used_when_measure_missing() {
        let frames = vec![CapturedFrame {
            data: indexed_frame(500, 600, 0),
            measured_height_px: None,
        }];
        let steps = steps_of(&[600.0]);
        let out = stitch(&frames, &steps, &metrics(500.0, 600.0), StitchMode::Full, 600.0, 0.0)
            .unwrap();
        assert_eq!(out.height_px(), 600);
        assert_eq!(out.scale, 1.0);
    }

    #[test]
    fn taller_frame_contributes_bottom_slice() {
        // Frame is 1200 rows but owes only 1000: top 200 rows are cropped
        let frames = vec![CapturedFrame {
            data: indexed_frame(100, 1200, 0),
            measured_height_px: None,
        }];
        let steps = steps_of(&[1000.0]);
        let out = stitch(&frames, &steps, &metrics(100.0, 1000.0), StitchMode::Full, 1000.0, 0.0)
            .unwrap();
        assert_eq!(out.height_px(), 1000);
        assert_eq!(row_index(&out.image, 0), 200);
        assert_eq!(row_index(&out.image, 999), 1199);
    }

    #[test]
    fn selection_single_step_reads_from_top() {
        let frames = vec![CapturedFrame {
            data: indexed_frame(100, 1000, 0),
            measured_height_px: None,
        }];
        let steps = steps_of(&[1000.0]);
        let out = stitch(
            &frames,
            &steps,
            &metrics(100.0, 1000.0),
            StitchMode::Selection,
            500.0,
            250.0,
        )
        .unwrap();
        assert_eq!(out.height_px(), 500);
        assert_eq!(row_index(&out.image, 0), 0);
        assert_eq!(out.start_offset_css, 250.0);
    }

    #[test]
    fn wide_composite_downscales_uniformly_keeping_all_frames() {
        let frames: Vec<CapturedFrame> = (0..3)
            .map(|i| CapturedFrame {
                data: indexed_frame(40_000, 10, i * 10),
                measured_height_px: Some(10),
            })
            .collect();
        let steps = steps_of(&[10.0, 10.0, 10.0]);
        let out = stitch(&frames, &steps, &metrics(40_000.0, 10.0), StitchMode::Full, 30.0, 0.0)
            .unwrap();
        assert_eq!(out.width_px(), MAX_CANVAS_DIM);
        // scale_out = 32760/40000 = 0.819; each 10px band becomes 8px
        assert_eq!(out.height_px(), 24);
    }

    #[test]
    fn undecodable_frame_is_skipped() {
        let frames = vec![
            CapturedFrame { data: vec![0, 1, 2, 3], measured_height_px: None },
            CapturedFrame { data: indexed_frame(100, 500, 0), measured_height_px: Some(500) },
        ];
        let steps = steps_of(&[500.0, 500.0]);
        let out = stitch(&frames, &steps, &metrics(100.0, 500.0), StitchMode::Full, 1000.0, 0.0)
            .unwrap();
        assert_eq!(out.height_px(), 500);
    }

    #[test]
    fn nothing_decodable_is_an_error() {
        let frames = vec![CapturedFrame { data: vec![9, 9, 9], measured_height_px: None }];
        let steps = steps_of(&[500.0]);
        let err = stitch(&frames, &steps, &metrics(100.0, 500.0), StitchMode::Full, 500.0, 0.0)
            .unwrap_err();
        assert!(matches!(err, Error::NoFramesCaptured));
    }

    #[test]
    fn last_band_clamps_to_coverage() {
        // Measured heights overshoot the planned coverage; the final band is
        // clipped so the composite exactly matches the plan
        let frames: Vec<CapturedFrame> = (0..2)
            .map(|i| CapturedFrame {
                data: indexed_frame(100, 1000, i * 1000),
                measured_height_px: Some(1000),
            })
            .collect();
        let steps = steps_of(&[1000.0, 800.0]);
        let out = stitch(&frames, &steps, &metrics(100.0, 1000.0), StitchMode::Full, 1800.0, 0.0)
            .unwrap();
        assert_eq!(out.height_px(), 1800);
        // Remaining 800 rows come from the bottom of the second frame
        assert_eq!(row_index(&out.image, 1000), 1200);
        assert_eq!(row_index(&out.image, 1799), 1999);
    }
}
