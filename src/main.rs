use anyhow::{Context, Result};
use chrono::{Local, Utc};
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{interval, sleep_until, Duration, Instant};

use step_tracker_rs::live_status::{LiveStatus, LIVE_STATUS_FILE};
use step_tracker_rs::sensors::{self, SyntheticWalk, TermuxAccelerometer};
use step_tracker_rs::{
    DailyAggregateStore, FileStore, MotionSample, PeriodicFlush, StepTracker, TrackerConfig,
};

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Source {
    /// Accelerometer via Termux:API
    Termux,
    /// Generated walking signal
    Synthetic,
}

#[derive(Parser, Debug)]
#[command(name = "step_tracker")]
#[command(about = "Accelerometer step counter with per-day persisted totals", long_about = None)]
struct Args {
    /// Duration in seconds (0 = until Ctrl-C)
    #[arg(value_name = "SECONDS", default_value = "0")]
    duration: u64,

    /// User the daily totals belong to
    #[arg(long, default_value = "local")]
    user: String,

    /// Sensor source
    #[arg(long, value_enum, default_value = "termux")]
    source: Source,

    /// Steps per minute for the synthetic source
    #[arg(long, default_value = "110")]
    cadence: u32,

    /// JSON config file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Data directory (overrides config)
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Sensor polling interval in ms (overrides config)
    #[arg(long)]
    sample_interval_ms: Option<u64>,

    /// Persistence interval in ms (overrides config)
    #[arg(long)]
    flush_interval_ms: Option<u64>,

    /// Day boundary offset from UTC in minutes (defaults to the local zone)
    #[arg(long, allow_hyphen_values = true)]
    utc_offset_minutes: Option<i32>,
}

fn load_config(args: &Args) -> Result<TrackerConfig> {
    let mut config = match &args.config {
        Some(path) => TrackerConfig::from_file(path)?,
        None => TrackerConfig {
            utc_offset_minutes: Local::now().offset().local_minus_utc() / 60,
            ..TrackerConfig::default()
        },
    };

    if let Some(dir) = &args.data_dir {
        config.data_dir = dir.clone();
    }
    if let Some(ms) = args.sample_interval_ms {
        config.sample_interval_ms = ms;
    }
    if let Some(ms) = args.flush_interval_ms {
        config.flush_interval_ms = ms;
    }
    if let Some(minutes) = args.utc_offset_minutes {
        config.utc_offset_minutes = minutes;
    }
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let config = load_config(&args)?;

    println!("[{}] Step Tracker Starting", ts_now());
    println!("  User: {}", args.user);
    println!("  Duration: {} seconds (0=continuous)", args.duration);
    println!("  Source: {:?}", args.source);
    println!("  Data Dir: {}", config.data_dir.display());

    let backend = Arc::new(
        FileStore::open(&config.data_dir)
            .with_context(|| format!("opening {}", config.data_dir.display()))?,
    );
    let tracker = Arc::new(StepTracker::new(
        &args.user,
        config.detector.clone(),
        config.utc_offset()?,
        DailyAggregateStore::new(backend),
    )?);

    let (tx, rx) = mpsc::channel::<MotionSample>(256);
    let subscribed = match args.source {
        Source::Termux => sensors::subscribe(TermuxAccelerometer, config.sample_interval(), tx),
        Source::Synthetic => sensors::subscribe(
            SyntheticWalk::new(args.cadence, config.sample_interval_ms, sensors::now_ms()),
            config.sample_interval(),
            tx,
        ),
    };
    let subscription = match subscribed {
        Ok(subscription) => subscription,
        Err(e) => {
            // Tracking simply does not start
            match e.user_message() {
                Some(message) => eprintln!("{}", message),
                None => eprintln!("Step tracking could not start: {}", e),
            }
            log::warn!("[main] sensor subscription failed: {}", e);
            return Ok(());
        }
    };

    tracker.start()?;
    let flush = PeriodicFlush::start(Arc::clone(&tracker), config.flush_interval())?;

    let result = run(&args, &config, &tracker, &flush, subscription.source(), rx).await;

    // Teardown runs on every exit from the loop, including errors
    let source = subscription.source();
    subscription.unsubscribe().await;
    flush.stop();
    if let Err(e) = tracker.stop() {
        log::warn!("[main] stop: {}", e);
    }

    if let Ok(snapshot) = tracker.snapshot() {
        let mut status = LiveStatus::from_snapshot(&snapshot);
        status.source = source.to_string();
        status.samples_processed = tracker.samples_processed().unwrap_or(0);
        status.save_logged(config.data_dir.join("live_status_final.json"));

        println!("\n=== Final Stats ===");
        println!("Date: {}", snapshot.date);
        println!("Steps: {}", snapshot.steps);
        println!("Active seconds: {}", snapshot.duration);
    }

    result
}

async fn run(
    args: &Args,
    config: &TrackerConfig,
    tracker: &StepTracker,
    flush: &PeriodicFlush,
    source: &str,
    mut rx: mpsc::Receiver<MotionSample>,
) -> Result<()> {
    let started = Instant::now();
    let deadline = (args.duration > 0).then(|| started + Duration::from_secs(args.duration));
    let until_deadline = async move {
        match deadline {
            Some(at) => sleep_until(at).await,
            None => std::future::pending::<()>().await,
        }
    };
    tokio::pin!(until_deadline);

    let mut status_ticker = interval(config.status_interval());
    let status_path = config.data_dir.join(LIVE_STATUS_FILE);

    println!("[{}] Counting steps...", ts_now());

    loop {
        tokio::select! {
            maybe_sample = rx.recv() => {
                let Some(sample) = maybe_sample else {
                    log::warn!("[main] sensor stream ended");
                    break;
                };
                if let Some(event) = tracker.on_sample(&sample)? {
                    if event.total_steps % 100 == 0 {
                        println!("[{}] {} steps, {}s active", ts_now(), event.total_steps, event.total_active_seconds);
                    }
                }
            }
            _ = status_ticker.tick() => {
                let mut status = LiveStatus::from_snapshot(&tracker.snapshot()?);
                status.source = source.to_string();
                status.samples_processed = tracker.samples_processed()?;
                status.uptime_seconds = started.elapsed().as_secs();
                status.last_flush_ok = flush.last_flush_ok();
                status.save_logged(&status_path);
            }
            _ = &mut until_deadline => {
                println!("[{}] Duration reached, stopping...", ts_now());
                break;
            }
            _ = tokio::signal::ctrl_c() => {
                println!("[{}] Interrupted, stopping...", ts_now());
                break;
            }
        }
    }

    Ok(())
}

fn ts_now() -> String {
    Utc::now().format("%H:%M:%S").to_string()
}
