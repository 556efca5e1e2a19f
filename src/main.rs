use clap::Parser;

/// Full-page capture and stitch engine: walks a page viewport by viewport,
/// stitches the frames into one composite, and exports discovered media
/// labels alongside it.
#[derive(Parser, Debug)]
#[command(name = "pagestitch", version, about)]
struct Args {
    /// Page to capture
    url: String,

    /// Output image path (JPEG)
    #[arg(short, long, default_value = "capture.jpg")]
    out: std::path::PathBuf,

    /// Write label lines to this file instead of deriving it from --out
    #[arg(long)]
    labels: Option<std::path::PathBuf>,

    /// Capture only the visible viewport, no scrolling
    #[arg(long)]
    viewport: bool,

    /// Skip label collection entirely
    #[arg(long)]
    no_labels: bool,

    /// Emit raw per-step frames instead of a stitched composite
    #[arg(long)]
    skip_stitch: bool,

    /// Start the walk from the current scroll position
    #[arg(long)]
    from_current: bool,

    /// Downscale the composite to this width; 0 keeps full resolution
    #[arg(long, default_value_t = 1000)]
    width: u32,

    /// Keep whitespace margins instead of trimming them
    #[arg(long)]
    no_trim: bool,

    /// Crop horizontally to the span of discovered media
    #[arg(long)]
    crop_media: bool,

    /// JPEG quality for the saved composite
    #[arg(long, default_value_t = 92)]
    quality: u8,
}

#[cfg(feature = "cdp")]
fn run(args: Args) -> anyhow::Result<()> {
    use log::info;
    use pagestitch::run::{encode_jpeg, CaptureOutput};
    use pagestitch::{capture_viewport_only, cdp::CdpBridge, run_capture};
    use pagestitch::{CaptureOptions, RunContext};

    let options = CaptureOptions {
        collect_labels: !args.no_labels,
        skip_stitch: args.skip_stitch,
        start_from_current: args.from_current,
        target_width_px: (args.width > 0).then_some(args.width),
        trim_whitespace: !args.no_trim,
        crop_to_media_span: args.crop_media,
        ..CaptureOptions::default()
    };

    let mut bridge = CdpBridge::launch(&args.url)?;
    let ctx = RunContext::new();
    ctx.reset();

    let capture = if args.viewport {
        Some(capture_viewport_only(&mut bridge, &ctx, None, &options)?)
    } else {
        run_capture(&mut bridge, &ctx, &options)?
    };
    let close_result = bridge.close();

    let Some(capture) = capture else {
        info!("run cancelled before any frame was captured");
        return Ok(());
    };

    match &capture.output {
        CaptureOutput::Composite(image) => {
            std::fs::write(&args.out, encode_jpeg(image, args.quality)?)?;
            info!(
                "saved {}x{} composite to {} ({} steps{})",
                capture.page_width_px,
                capture.page_height_px,
                args.out.display(),
                capture.steps_taken,
                if capture.cancelled { ", cancelled early" } else { "" }
            );
        }
        CaptureOutput::Parts(parts) => {
            let stem = args.out.with_extension("");
            for (i, part) in parts.iter().enumerate() {
                let path = format!("{}_{:03}.png", stem.display(), i);
                std::fs::write(&path, &part.data)?;
            }
            info!("saved {} raw frames next to {}", parts.len(), args.out.display());
        }
    }

    if !capture.label_lines.is_empty() {
        let path = args
            .labels
            .unwrap_or_else(|| args.out.with_extension("txt"));
        std::fs::write(&path, capture.label_lines.join("\n"))?;
        info!("saved {} label lines to {}", capture.label_lines.len(), path.display());
    }

    close_result?;
    Ok(())
}

#[cfg(not(feature = "cdp"))]
fn run(_args: Args) -> anyhow::Result<()> {
    eprintln!("pagestitch was built without the `cdp` feature; rebuild with --features cdp to capture live pages");
    Ok(())
}

fn main() {
    env_logger::init();
    let args = Args::parse();
    if let Err(e) = run(args) {
        eprintln!("capture failed: {e:#}");
        std::process::exit(1);
    }
}
