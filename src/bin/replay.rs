use std::fs::{self, File};
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use clap::Parser;
use flate2::read::GzDecoder;
use hybrid_locator::engine::{LocationEngine, Topic};
use hybrid_locator::error::SensorKind;
use hybrid_locator::geo_match::Catalog;
use hybrid_locator::sensor_fusion::{FusionConfig, FusionEvent};
use hybrid_locator::sensors::{ManualSensors, SensorMessage};

/// Replay a recorded sensor session through the location engine and print
/// every emitted event as one JSON object per line.
#[derive(Parser, Debug)]
#[command(name = "locator_replay")]
struct Args {
    /// Location catalog (JSON array of records)
    #[arg(long)]
    catalog: PathBuf,

    /// Recorded session (JSON array of sensor messages, optionally .gz)
    #[arg(long)]
    session: PathBuf,

    /// Fusion config overrides (JSON, missing fields keep defaults)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Write the final status snapshot here
    #[arg(long)]
    status_out: Option<PathBuf>,

    /// Pretend accelerometer and magnetometer are missing
    #[arg(long, default_value_t = false)]
    no_motion_sensors: bool,
}

fn load_session(path: &Path) -> anyhow::Result<Vec<SensorMessage>> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    if path.extension().map(|e| e == "gz").unwrap_or(false) {
        let gz = GzDecoder::new(file);
        let reader = BufReader::new(gz);
        Ok(serde_json::from_reader(reader)?)
    } else {
        let reader = BufReader::new(file);
        Ok(serde_json::from_reader(reader)?)
    }
}

fn load_catalog(path: &Path) -> anyhow::Result<Catalog> {
    let json = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let catalog = Catalog::from_json_str(&json)?;
    for rejected in catalog.rejected() {
        log::warn!("[replay] skipped catalog entry {}: {}", rejected.id, rejected.reason);
    }
    Ok(catalog)
}

fn ts_now_clock() -> String {
    Utc::now().format("%H:%M:%S").to_string()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => FusionConfig::load(path)?,
        None => FusionConfig::default(),
    };
    let catalog = Arc::new(load_catalog(&args.catalog)?);
    let session = load_session(&args.session)?;
    log::info!(
        "[{}] replaying {} samples against {} locations",
        ts_now_clock(),
        session.len(),
        catalog.len()
    );

    let provider = if args.no_motion_sensors {
        ManualSensors::new()
            .without(SensorKind::Accelerometer)
            .without(SensorKind::Magnetometer)
    } else {
        ManualSensors::new()
    };

    let handle = LocationEngine::start(config, catalog, provider)?;
    for e in handle.startup_errors() {
        log::warn!("[replay] startup: {}", e);
    }

    let mut subscription = handle.subscribe(Topic::All)?;
    for message in session {
        handle.feed(message)?;
    }
    let status = handle.stop().await?;

    let mut entered = 0usize;
    while let Some(event) = subscription.recv().await {
        if matches!(event, FusionEvent::LocationEntered { .. }) {
            entered += 1;
        }
        println!("{}", serde_json::to_string(&event)?);
    }

    log::info!(
        "[{}] done: {} events, {} locations entered, {} steps, final mode {:?}",
        ts_now_clock(),
        status.events_emitted,
        entered,
        status.step_count,
        status.mode
    );

    if let Some(path) = &args.status_out {
        status.save(path).with_context(|| format!("writing {}", path.display()))?;
        log::info!("[replay] status written to {}", path.display());
    }

    Ok(())
}
