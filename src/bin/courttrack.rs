use anyhow::{Context, Result};
use clap::Parser;
use courttrack::replay::DetectionLog;
use courttrack::{
    CancellationToken, ObjectClass, PipelineConfig, ProgressReporter, TrackingPipeline,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;

#[derive(Parser, Debug)]
#[command(author, version, about = "Turns recorded detections into court tracking data", long_about = None)]
struct Args {
    /// Detection dump, one `<timestamp_ms>:<json>` line per frame
    #[arg(short, long)]
    detections: PathBuf,

    /// Frame width in pixels
    #[arg(long, default_value_t = 1920)]
    width: u32,

    /// Frame height in pixels
    #[arg(long, default_value_t = 1080)]
    height: u32,

    /// Where to write the tracking data JSON
    #[arg(short, long, default_value = "tracking.json")]
    output: PathBuf,

    /// Pipeline configuration (JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    let config = match &args.config {
        Some(path) => PipelineConfig::load(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => PipelineConfig::default(),
    };

    let dump = Arc::new(
        DetectionLog::load(&args.detections, (args.width, args.height))
            .with_context(|| format!("failed to read {}", args.detections.display()))?,
    );
    log::info!("{} frames of detections", dump.len());

    let court = config.court;
    let pipeline = TrackingPipeline::new(
        config,
        Arc::new(dump.detector(ObjectClass::Person)),
        Arc::new(dump.detector(ObjectClass::Ball)),
        dump.clone(),
    )?;

    let (progress, events) = ProgressReporter::channel();
    let watcher = thread::spawn(move || {
        let mut next = 0.1;
        for event in events.iter() {
            if event.fraction >= next {
                log::info!("{:?}: {:.0}%", event.state, event.fraction * 100.0);
                while next <= event.fraction {
                    next += 0.1;
                }
            }
        }
    });

    let video = args.detections.to_string_lossy();
    let result = pipeline.process_video(&video, &progress, &CancellationToken::new());

    drop(progress);
    let _ = watcher.join();

    let tracking = result.context("tracking failed")?;

    tracking
        .tracking_data(court)
        .save(&args.output)
        .with_context(|| format!("failed to write {}", args.output.display()))?;

    log::info!(
        "wrote {} frames to {}",
        tracking.timeline.len(),
        args.output.display()
    );

    Ok(())
}
