//! End-to-end pipeline runs against the deterministic in-memory page.
//!
//! Fake frames encode each row's absolute device-row index in the red/green
//! channels, so these tests can assert exactly which slice of the page ended
//! up at which row of the final composite.

use pagestitch::fake::FakePage;
use pagestitch::geometry::{Css, Rect};
use pagestitch::run::{capture_viewport_only, run_capture, CaptureOutput};
use pagestitch::{CaptureOptions, Error, Label, PageBridge, RunContext, Selection};

fn bare_options() -> CaptureOptions {
    CaptureOptions {
        collect_labels: false,
        target_width_px: None,
        trim_whitespace: false,
        ..CaptureOptions::default()
    }
}

fn composite(output: &CaptureOutput) -> &image::RgbaImage {
    match output {
        CaptureOutput::Composite(img) => img,
        CaptureOutput::Parts(_) => panic!("expected a stitched composite"),
    }
}

/// Absolute device-row index encoded at `(x, y)` by the fake page
fn row_index(img: &image::RgbaImage, x: u32, y: u32) -> u32 {
    let p = img.get_pixel(x, y);
    ((p[0] as u32) << 8) | p[1] as u32
}

#[test]
fn full_page_composite_covers_planned_span() {
    let mut page = FakePage::new(500.0, 500.0, 1000.0, 1.0);
    let ctx = RunContext::new();

    let capture = run_capture(&mut page, &ctx, &bare_options())
        .expect("run failed")
        .expect("run produced no capture");

    // 1000 css of page plus the 100 css safety tail, three steps
    assert_eq!(capture.steps_taken, 3);
    let img = composite(&capture.output);
    assert_eq!(img.dimensions(), (500, 1100));

    // Bands land where the plan put them
    assert_eq!(row_index(img, 0, 0), 0);
    assert_eq!(row_index(img, 250, 700), 700);
    // The tail band is a bottom-aligned slice of the last reachable frame
    assert_eq!(row_index(img, 0, 1050), 950);

    assert_eq!(capture.map.start_y_css, 0.0);
    assert_eq!(capture.map.scale, 1.0);
    assert!(!capture.cancelled);
}

#[test]
fn device_pixel_ratio_scales_composite() {
    let mut page = FakePage::new(1000.0, 1000.0, 3000.0, 2.0);
    let ctx = RunContext::new();

    let capture = run_capture(&mut page, &ctx, &bare_options())
        .expect("run failed")
        .expect("run produced no capture");

    let img = composite(&capture.output);
    // 3200 css coverage at the scale derived from the frame width
    assert_eq!(img.dimensions(), (2000, 6400));
    assert_eq!(capture.map.scale, 2.0);
    assert_eq!(row_index(img, 100, 0), 0);
    assert_eq!(row_index(img, 100, 2500), 2500);
}

#[test]
fn target_width_downscale_folds_into_scale() {
    let mut page = FakePage::new(1000.0, 1000.0, 2000.0, 2.0);
    let ctx = RunContext::new();
    let options = CaptureOptions {
        target_width_px: Some(1000),
        ..bare_options()
    };

    let capture = run_capture(&mut page, &ctx, &options)
        .expect("run failed")
        .expect("run produced no capture");

    let img = composite(&capture.output);
    assert_eq!(img.dimensions(), (1000, 2200));
    // 2x capture scale halved by the output downscale
    assert!((capture.map.scale - 1.0).abs() < 1e-9);
}

#[test]
fn cancellation_mid_run_keeps_partial_composite() {
    let mut page = FakePage::new(500.0, 500.0, 3000.0, 1.0);
    let ctx = RunContext::new();
    page.cancel_after_captures(2, ctx.cancel_handle());

    let capture = run_capture(&mut page, &ctx, &bare_options())
        .expect("run failed")
        .expect("partial run should still produce a capture");

    assert!(capture.cancelled);
    assert_eq!(capture.steps_taken, 2);
    let img = composite(&capture.output);
    assert_eq!(img.dimensions(), (500, 1000));

    // Cleanup still runs on the cancel path
    assert_eq!(page.scroll_y(), 0.0);
    assert!(page.behavior_restored());
}

#[test]
fn labels_deduplicate_and_map_to_composite_coordinates() {
    let mut page = FakePage::new(500.0, 500.0, 1000.0, 1.0);
    page.set_labels(vec![
        Label {
            text: "[IMG] https://example.com/a.png".to_string(),
            page_left: 100.0,
            page_top: 700.0,
            width: 50.0,
            height: 40.0,
            kind: "IMG".to_string(),
        },
        Label {
            text: "decorative border".to_string(),
            page_left: 0.0,
            page_top: 0.0,
            width: 500.0,
            height: 10.0,
            kind: String::new(),
        },
    ]);
    let ctx = RunContext::new();
    let options = CaptureOptions {
        collect_labels: true,
        ..bare_options()
    };

    let capture = run_capture(&mut page, &ctx, &options)
        .expect("run failed")
        .expect("run produced no capture");

    // The image label is harvested at several steps and in the final pass
    // but exports exactly once; the URL-less label is dropped
    assert_eq!(capture.labels.len(), 1);
    assert_eq!(capture.labels[0].url, "https://example.com/a.png");
    assert_eq!((capture.labels[0].x, capture.labels[0].y), (100, 700));

    assert_eq!(capture.label_lines.len(), 1);
    assert_eq!(
        capture.label_lines[0],
        "https://example.com/a.png | kind=IMG | x=100 | y=700 | w=50 | h=40 | pageW=500 | pageH=1100 | scale=1"
    );
}

#[test]
fn selection_capture_crops_to_rect() {
    let mut page = FakePage::new(500.0, 500.0, 2000.0, 1.0);
    page.set_labels(vec![Label {
        text: "[IMG] https://example.com/sel.png".to_string(),
        page_left: 150.0,
        page_top: 650.0,
        width: 60.0,
        height: 30.0,
        kind: "IMG".to_string(),
    }]);
    let ctx = RunContext::new();
    let options = CaptureOptions {
        collect_labels: true,
        selection: Some(Rect::<Css>::new(100.0, 600.0, 300.0, 400.0)),
        ..bare_options()
    };

    let capture = run_capture(&mut page, &ctx, &options)
        .expect("run failed")
        .expect("run produced no capture");

    // One step pinned to the selection span, cropped to the rectangle
    assert_eq!(capture.steps_taken, 1);
    let img = composite(&capture.output);
    assert_eq!(img.dimensions(), (300, 400));
    assert_eq!(row_index(img, 0, 0), 600);
    assert_eq!(capture.map.start_y_css, 600.0);
    assert_eq!(capture.map.crop_left_css, 100.0);

    // Label coordinates are relative to the cropped output
    assert_eq!(capture.labels.len(), 1);
    assert_eq!((capture.labels[0].x, capture.labels[0].y), (50, 50));
}

#[test]
fn stubborn_page_still_produces_full_height() {
    // Scroll commands are ignored until a wheel gesture lands
    let mut page = FakePage::new(400.0, 400.0, 800.0, 1.0);
    page.require_gesture();
    let ctx = RunContext::new();

    let capture = run_capture(&mut page, &ctx, &bare_options())
        .expect("run failed")
        .expect("run produced no capture");

    assert!(page.gesture_dispatched());
    let img = composite(&capture.output);
    // 800 css page plus the clamped 80 css tail
    assert_eq!(img.dimensions(), (400, 880));
    assert_eq!(row_index(img, 0, 500), 500);
}

#[test]
fn quota_rejections_back_off_and_recover() {
    let mut page = FakePage::new(400.0, 400.0, 400.0, 1.0);
    page.fail_captures_with_quota(1);
    let ctx = RunContext::new();

    let capture = run_capture(&mut page, &ctx, &bare_options())
        .expect("run failed")
        .expect("run produced no capture");

    assert!(!capture.cancelled);
    // First attempt was rejected, the retry after the quota backoff succeeded
    assert!(page.sleeps().contains(&700));
    assert!(page.capture_attempts() >= 2);
}

#[test]
fn late_growth_is_covered_by_the_remeasure() {
    // The document grows by 500 css between the metrics snapshot and the
    // height re-measurement taken at plan time
    let mut page = FakePage::new(500.0, 500.0, 1000.0, 1.0);
    page.grow_after_start(500.0);
    let ctx = RunContext::new();

    let capture = run_capture(&mut page, &ctx, &bare_options())
        .expect("run failed")
        .expect("run produced no capture");

    // 1500 css of page plus the 100 css tail, four steps
    assert_eq!(capture.steps_taken, 4);
    let img = composite(&capture.output);
    assert_eq!(img.dimensions(), (500, 1600));
    assert_eq!(row_index(img, 0, 1100), 1100);
}

#[test]
fn dead_page_yields_no_frames_error() {
    let mut page = FakePage::new(500.0, 500.0, 1000.0, 1.0);
    page.kill();
    let ctx = RunContext::new();

    let err = run_capture(&mut page, &ctx, &bare_options()).unwrap_err();
    assert!(matches!(err, Error::NoFramesCaptured));
    assert_eq!(page.capture_attempts(), 0);
}

#[test]
fn scrollbar_strip_is_cut_from_the_right() {
    let mut page = FakePage::new(500.0, 500.0, 1000.0, 1.0);
    page.set_scrollbar_css(17.0);
    let ctx = RunContext::new();

    let capture = run_capture(&mut page, &ctx, &bare_options())
        .expect("run failed")
        .expect("run produced no capture");

    let img = composite(&capture.output);
    // ceil(17) + 1 pixels removed from the right edge only
    assert_eq!(img.dimensions(), (482, 1100));
    assert_eq!(capture.map.crop_left_css, 0.0);
}

#[test]
fn annotation_cadence_over_a_run() {
    let mut page = FakePage::new(500.0, 500.0, 1000.0, 1.0);
    let ctx = RunContext::new();
    let options = CaptureOptions {
        collect_labels: true,
        ..bare_options()
    };

    run_capture(&mut page, &ctx, &options)
        .expect("run failed")
        .expect("run produced no capture");

    // One annotate per step plus the broad final pass; overlays are cleared
    // before each step and once more at cleanup
    assert_eq!(page.annotate_calls(), 4);
    assert_eq!(page.broad_annotate_calls(), 1);
    assert_eq!(page.remove_calls(), 4);
    assert_eq!(
        page.progress_messages(),
        ["Capturing 1/3", "Capturing 2/3", "Capturing 3/3"]
    );
}

#[test]
fn picked_rectangle_drives_a_viewport_crop() {
    let mut page = FakePage::new(400.0, 300.0, 2000.0, 1.0);
    page.set_selection(Selection {
        viewport: Rect::<Css>::new(50.0, 40.0, 100.0, 80.0),
        page: Rect::<Css>::new(50.0, 640.0, 100.0, 80.0),
        device_pixel_ratio: 1.0,
    });
    let ctx = RunContext::new();

    let sel = page
        .select_area_once()
        .expect("picker failed")
        .expect("picker returned no rectangle");
    let capture = capture_viewport_only(&mut page, &ctx, Some(&sel), &bare_options())
        .expect("capture failed");

    let img = composite(&capture.output);
    assert_eq!(img.dimensions(), (100, 80));
    // The crop starts at viewport row 40
    assert_eq!(row_index(img, 0, 0), 40);
    assert_eq!(capture.map.crop_left_css, 50.0);
    assert_eq!(capture.map.crop_top_css, 640.0);
}
