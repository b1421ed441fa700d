use std::fs::{self, File};

use anyhow::{Context, Result};
use chrono::Local;
use tracing::{info, span, trace, Level};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use bevdet3d::{
    config::DetectorConfig,
    io::{bev::bev_to_tensor, labels::save_detections},
    ObjectDetector,
};

fn main() -> Result<()> {
    init_logging("log")?;

    let span = span!(Level::TRACE, "main");
    let _enter = span.enter();

    trace!("Loading detector configuration...");
    let config = DetectorConfig::from_file("config/detect.toml")
        .context("Failed to load detector config")?;

    trace!("Constructing object detector...");
    let detector = ObjectDetector::from_config(&config).context("Failed to construct detector")?;

    trace!("Reading BEV map...");
    let input =
        bev_to_tensor(&config.source.bev_path, &config.bev).context("Failed to read BEV map")?;

    trace!("Running detection...");
    let objects = detector
        .detect(input.view())
        .context("Failed to run detection")?;
    info!("Detected {} objects.", objects.len());

    println!("Detections: {:#?}", objects);

    save_detections(&objects, &config.source.output_path)
        .context("Failed to save detections")?;

    Ok(())
}

fn init_logging(log_dir: &str) -> Result<()> {
    if !fs::exists(log_dir)? {
        fs::create_dir_all(log_dir).context("Failed to create directory")?;
    }

    let file_name = format!(
        "{}/bevdet3d_{}.log",
        log_dir,
        Local::now().format("%Y-%m-%d_%H-%M-%S")
    );

    let file = File::create(&file_name).context("Failed to create file")?;
    let file_appender = fmt::layer().with_writer(file).with_ansi(false);
    let file_filter = EnvFilter::new("trace");

    let console_appender = fmt::layer().with_writer(std::io::stdout).with_ansi(true);
    let console_filter = EnvFilter::new("info");

    tracing_subscriber::registry()
        .with(console_appender.with_filter(console_filter))
        .with(file_appender.with_filter(file_filter))
        .try_init()
        .context("Failed to initialize tracing subscriber")?;

    Ok(())
}
