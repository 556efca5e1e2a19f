//! Label collection and export.
//!
//! Labels are harvested at every settled step and accumulated raw; duplicates
//! across overlapping step boundaries are expected and resolved once, at
//! export time, by position-keyed dedup in reading order.

use std::collections::HashSet;

use log::debug;

use crate::bridge::{AnnotateOptions, Label, PageBridge};
use crate::geometry::{CoordinateMap, Css, Point, Rect};

/// Step-level waits and timeouts, milliseconds
const STEP_PAINT_WAIT_MS: u64 = 160;
const STEP_ANNOTATE_TIMEOUT_MS: u64 = 1200;
const STEP_COLLECT_TIMEOUT_MS: u64 = 1000;

/// Final-pass budget: broad (multi-frame) passes get more time, and broad
/// passes are only attempted on short runs to bound cost on long pages
const FINAL_BROAD_MAX_STEPS: usize = 10;
const FINAL_PAINT_WAIT_MS: u64 = 180;
const FINAL_ANNOTATE_TIMEOUT_BROAD_MS: u64 = 2000;
const FINAL_ANNOTATE_TIMEOUT_TOP_MS: u64 = 900;
const FINAL_COLLECT_TIMEOUT_BROAD_MS: u64 = 1500;
const FINAL_COLLECT_TIMEOUT_TOP_MS: u64 = 800;

/// Accumulates labels over a run and produces the deduplicated export
#[derive(Debug, Default)]
pub struct LabelCollector {
    labels: Vec<Label>,
}

/// One exported label, coordinates re-expressed relative to the final image
/// in CSS units
#[derive(Debug, Clone, PartialEq)]
pub struct LabelRecord {
    pub url: String,
    pub kind: String,
    pub x: i64,
    pub y: i64,
    pub w: i64,
    pub h: i64,
}

impl LabelCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn labels(&self) -> &[Label] {
        &self.labels
    }

    pub fn extend(&mut self, batch: Vec<Label>) {
        self.labels.extend(batch);
    }

    /// Re-annotate the currently visible region at a settled step. Previous
    /// overlays are cleared first so stale positions are not re-collected.
    pub fn annotate_step<B: PageBridge>(&mut self, bridge: &mut B) {
        let _ = bridge.remove_annotations();
        let _ = bridge.annotate_and_flush(&AnnotateOptions::step(), false, STEP_ANNOTATE_TIMEOUT_MS);
        bridge.sleep(STEP_PAINT_WAIT_MS);
    }

    /// Harvest currently painted labels. Called right after overlay paint and
    /// again after the step's capture; lazy-loading content often reports on
    /// the second read.
    pub fn collect_step<B: PageBridge>(&mut self, bridge: &mut B) {
        let batch = bridge
            .collect_labels(false, STEP_COLLECT_TIMEOUT_MS)
            .unwrap_or_default();
        debug!("collected {} labels (total {})", batch.len(), self.labels.len() + batch.len());
        self.labels.extend(batch);
    }

    /// One additional annotation pass after the main loop to rescue labels
    /// missed to lazy-loading timing. Broad (multi-frame) only when the run
    /// was short; bounded waits, partial results accepted.
    pub fn final_pass<B: PageBridge>(&mut self, bridge: &mut B, steps_taken: usize) {
        let broad = steps_taken <= FINAL_BROAD_MAX_STEPS;
        let annotate_timeout = if broad {
            FINAL_ANNOTATE_TIMEOUT_BROAD_MS
        } else {
            FINAL_ANNOTATE_TIMEOUT_TOP_MS
        };
        let collect_timeout = if broad {
            FINAL_COLLECT_TIMEOUT_BROAD_MS
        } else {
            FINAL_COLLECT_TIMEOUT_TOP_MS
        };
        let _ = bridge.annotate_and_flush(&AnnotateOptions::final_pass(), broad, annotate_timeout);
        bridge.sleep(FINAL_PAINT_WAIT_MS);
        let batch = bridge.collect_labels(broad, collect_timeout).unwrap_or_default();
        debug!("final pass recovered {} labels (broad={})", batch.len(), broad);
        self.labels.extend(batch);
    }

    /// Sort into reading order, resolve URLs, dedupe by rounded position,
    /// and re-express coordinates relative to the final image.
    ///
    /// When `selection` is set, labels not intersecting it (page space) are
    /// dropped. First occurrence of a `(url, y, x)` key wins.
    pub fn export(
        &self,
        map: &CoordinateMap,
        selection: Option<&Rect<Css>>,
    ) -> Vec<LabelRecord> {
        let mut sorted: Vec<&Label> = self.labels.iter().collect();
        sorted.sort_by(|a, b| {
            (a.page_top, a.page_left)
                .partial_cmp(&(b.page_top, b.page_left))
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let mut seen: HashSet<(String, i64, i64)> = HashSet::new();
        let mut records = Vec::new();
        for label in sorted {
            if let Some(sel) = selection {
                if !label.rect().intersects(sel) {
                    continue;
                }
            }
            let url = match pick_url(&label.text) {
                Some(u) => u,
                None => continue,
            };
            let pos = map.to_composite_css(Point::new(label.page_left, label.page_top));
            let (x, y) = (pos.x.round() as i64, pos.y.round() as i64);
            if !seen.insert((url.clone(), y, x)) {
                continue;
            }
            records.push(LabelRecord {
                url,
                kind: infer_kind(label),
                x,
                y,
                w: label.width.max(0.0).round() as i64,
                h: label.height.max(0.0).round() as i64,
            });
        }
        records
    }
}

/// Render exported records as report lines. With positions each line carries
/// the coordinates plus the page dimensions and scale needed to map them into
/// raster pixels; without, it is the bare URL.
pub fn render_lines(
    records: &[LabelRecord],
    include_positions: bool,
    page_w_px: u32,
    page_h_px: u32,
    scale: f64,
) -> Vec<String> {
    records
        .iter()
        .map(|r| {
            if include_positions {
                format!(
                    "{} | kind={} | x={} | y={} | w={} | h={} | pageW={} | pageH={} | scale={}",
                    r.url, r.kind, r.x, r.y, r.w, r.h, page_w_px, page_h_px, scale
                )
            } else {
                r.url.clone()
            }
        })
        .collect()
}

/// Extract the first http(s) URL from label text, trimming trailing
/// punctuation the annotator may have carried over
pub fn pick_url(text: &str) -> Option<String> {
    let lower = text.to_ascii_lowercase();
    let start = lower.find("http://").or_else(|| lower.find("https://"))?;
    let tail = &text[start..];
    let end = tail.find(char::is_whitespace).unwrap_or(tail.len());
    let url = tail[..end].trim_end_matches([')', ',', '.', ';', ':', '!', '?']);
    if url.is_empty() {
        None
    } else {
        Some(url.to_string())
    }
}

/// Use the annotator-reported kind when present, else parse a leading
/// "[KIND]" prefix from the text; "IMG" as the last resort
fn infer_kind(label: &Label) -> String {
    if !label.kind.is_empty() {
        return label.kind.clone();
    }
    let t = label.text.trim_start();
    if let Some(rest) = t.strip_prefix('[') {
        if let Some(close) = rest.find(']') {
            let kind = rest[..close].to_ascii_uppercase();
            if !kind.is_empty() {
                return kind;
            }
        }
    }
    "IMG".to_string()
}
