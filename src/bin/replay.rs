use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::FixedOffset;
use clap::Parser;
use flate2::read::GzDecoder;
use serde::Serialize;
use step_tracker_rs::sample::SampleLog;
use step_tracker_rs::{
    DailyAggregateStore, DetectorConfig, FileStore, MotionStepDetector, StepTracker,
};

#[derive(Parser, Debug)]
struct Args {
    /// Path to a recorded sample log (.json or .json.gz)
    #[arg(long)]
    log: PathBuf,

    /// Step threshold override
    #[arg(long)]
    threshold: Option<f64>,

    /// Debounce window override (ms)
    #[arg(long)]
    debounce_ms: Option<i64>,

    /// Persist the result for this user (requires --data-dir)
    #[arg(long, requires = "data_dir")]
    user: Option<String>,

    /// Data directory for persisted totals
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Day boundary offset from UTC in minutes
    #[arg(long, default_value = "0", allow_hyphen_values = true)]
    utc_offset_minutes: i32,
}

#[derive(Serialize)]
struct ReplaySummary {
    log: String,
    samples: usize,
    steps: u64,
    active_seconds: u64,
    first_step: Option<i64>,
    last_step: Option<i64>,
    steps_per_minute: Option<f64>,
}

fn load_log(path: &Path) -> anyhow::Result<SampleLog> {
    let file = File::open(path)?;
    if path.extension().map(|e| e == "gz").unwrap_or(false) {
        let reader = BufReader::new(GzDecoder::new(file));
        Ok(serde_json::from_reader(reader)?)
    } else {
        let reader = BufReader::new(file);
        Ok(serde_json::from_reader(reader)?)
    }
}

fn replay(log: &SampleLog, config: DetectorConfig) -> (MotionStepDetector, Option<i64>) {
    let mut detector = MotionStepDetector::new(config);
    let mut first_step = None;
    for sample in &log.samples {
        if let Some(event) = detector.on_sample(sample) {
            first_step.get_or_insert(event.timestamp);
        }
    }
    (detector, first_step)
}

fn persist(args: &Args, user: &str, log: &SampleLog, config: DetectorConfig) -> anyhow::Result<()> {
    let Some(dir) = &args.data_dir else {
        return Ok(());
    };
    let Some(first) = log.samples.first() else {
        return Ok(());
    };

    let offset = FixedOffset::east_opt(args.utc_offset_minutes * 60)
        .ok_or_else(|| anyhow::anyhow!("utc offset out of range"))?;
    let store = DailyAggregateStore::new(Arc::new(FileStore::open(dir)?));
    let tracker = StepTracker::new(user, config, offset, store)?;

    tracker.start_at(first.timestamp)?;
    for sample in &log.samples {
        tracker.on_sample(sample)?;
    }
    tracker.stop()?;
    println!("Persisted totals for {} under {}", user, dir.display());
    Ok(())
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args = Args::parse();

    let mut config = DetectorConfig::default();
    if let Some(threshold) = args.threshold {
        config.threshold = threshold;
    }
    if let Some(ms) = args.debounce_ms {
        config.step_debounce_ms = ms;
    }

    let log = load_log(&args.log)?;
    let (detector, first_step) = replay(&log, config.clone());
    let state = detector.state();

    let steps_per_minute = match (first_step, state.last_step_timestamp) {
        (Some(first), Some(last)) if last > first => {
            Some(state.step_count.saturating_sub(1) as f64 * 60_000.0 / (last - first) as f64)
        }
        _ => None,
    };

    let summary = ReplaySummary {
        log: args.log.display().to_string(),
        samples: log.samples.len(),
        steps: state.step_count,
        active_seconds: state.active_duration_seconds,
        first_step,
        last_step: state.last_step_timestamp,
        steps_per_minute,
    };
    println!("{}", serde_json::to_string_pretty(&summary)?);

    if let Some(user) = &args.user {
        persist(&args, user, &log, config)?;
    }
    Ok(())
}
