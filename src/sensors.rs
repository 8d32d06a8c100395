use crate::error::{Result, TrackerError};
use crate::sample::MotionSample;
use std::process::Command;
use tokio::sync::mpsc::{error::TrySendError, Sender};
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};

/// Platform accelerometer.
///
/// `check_access` is the permission / hardware gate; it runs once before
/// any polling starts.
pub trait AccelSource: Send + 'static {
    fn name(&self) -> &'static str;
    fn check_access(&mut self) -> Result<()>;
    fn read(&mut self) -> Option<MotionSample>;
}

/// Reads the accelerometer through Termux:API (`termux-sensor`)
pub struct TermuxAccelerometer;

impl AccelSource for TermuxAccelerometer {
    fn name(&self) -> &'static str {
        "termux"
    }

    fn check_access(&mut self) -> Result<()> {
        let output = Command::new("termux-sensor")
            .arg("-l")
            .output()
            .map_err(|e| TrackerError::SensorUnavailable(format!("termux-sensor: {}", e)))?;

        let text = String::from_utf8_lossy(&output.stdout).to_lowercase();
        let err = String::from_utf8_lossy(&output.stderr).to_lowercase();
        if err.contains("permission") {
            return Err(TrackerError::PermissionDenied(err.trim().to_string()));
        }
        if !text.contains("accelerometer") {
            return Err(TrackerError::SensorUnavailable(
                "no accelerometer listed by termux-sensor".into(),
            ));
        }
        Ok(())
    }

    fn read(&mut self) -> Option<MotionSample> {
        let output = Command::new("termux-sensor")
            .args(["-n", "1", "-s", "accelerometer"])
            .output()
            .ok()?;
        parse_termux_output(&String::from_utf8_lossy(&output.stdout), now_ms())
    }
}

/// Parse one termux-sensor reading: `{"<sensor name>": {"values": [x, y, z]}}`
pub fn parse_termux_output(output: &str, timestamp: i64) -> Option<MotionSample> {
    let reading: serde_json::Value = serde_json::from_str(output.trim()).ok()?;
    let values = reading
        .as_object()?
        .values()
        .find_map(|sensor| sensor.get("values")?.as_array())?;

    let axes: Vec<f64> = values.iter().map(|v| v.as_f64()).collect::<Option<_>>()?;
    match axes.as_slice() {
        [x, y, z, ..] => Some(MotionSample::new(*x, *y, *z, timestamp)),
        _ => None,
    }
}

/// Deterministic walking signal: gravity on z with a heel strike at a fixed cadence.
pub struct SyntheticWalk {
    step_period_ms: i64,
    sample_period_ms: i64,
    clock_ms: i64,
}

impl SyntheticWalk {
    pub fn new(steps_per_minute: u32, sample_period_ms: u64, start_ms: i64) -> Self {
        let sample_period_ms = i64::try_from(sample_period_ms.max(1)).unwrap_or(i64::MAX / 2);
        // A spike needs a baseline sample between strikes
        let step_period_ms =
            (60_000 / i64::from(steps_per_minute.max(1))).max(2 * sample_period_ms);
        Self {
            step_period_ms,
            sample_period_ms,
            clock_ms: start_ms,
        }
    }
}

impl AccelSource for SyntheticWalk {
    fn name(&self) -> &'static str {
        "synthetic"
    }

    fn check_access(&mut self) -> Result<()> {
        Ok(())
    }

    fn read(&mut self) -> Option<MotionSample> {
        let t = self.clock_ms;
        self.clock_ms += self.sample_period_ms;

        let phase = t.rem_euclid(self.step_period_ms);
        let z = if phase < self.sample_period_ms { 11.6 } else { 9.8 };
        let sway = ((t as f64) / 700.0).sin() * 0.2;
        Some(MotionSample::new(sway, 0.0, z, t))
    }
}

/// Live sensor subscription; unsubscribing (or dropping) stops polling.
pub struct SensorSubscription {
    source: &'static str,
    handle: Option<JoinHandle<()>>,
}

impl SensorSubscription {
    pub fn source(&self) -> &'static str {
        self.source
    }

    /// Stop polling and wait for the poll task to wind down
    pub async fn unsubscribe(mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
            let _ = handle.await;
        }
        log::info!("[{}] unsubscribed", self.source);
    }
}

impl Drop for SensorSubscription {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

/// Check access, then poll `source` every `sample_interval` and forward samples.
///
/// Fails without spawning anything when the sensor is refused or missing.
/// Samples are dropped when the channel is full.
pub fn subscribe<S: AccelSource>(
    mut source: S,
    sample_interval: Duration,
    tx: Sender<MotionSample>,
) -> Result<SensorSubscription> {
    if sample_interval.is_zero() {
        return Err(TrackerError::InvalidParameters(
            "sample interval must be non-zero".into(),
        ));
    }
    source.check_access()?;
    let name = source.name();

    let handle = tokio::spawn(async move {
        let mut ticker = interval(sample_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut forwarded = 0u64;

        loop {
            ticker.tick().await;
            let Some(sample) = source.read() else {
                continue;
            };

            match tx.try_send(sample) {
                Ok(()) => {
                    forwarded += 1;
                    if forwarded % 600 == 0 {
                        log::debug!("[{}] {} samples", name, forwarded);
                    }
                }
                Err(TrySendError::Closed(_)) => {
                    log::info!("[{}] channel closed after {} samples", name, forwarded);
                    break;
                }
                Err(TrySendError::Full(_)) => {}
            }
        }
    });

    log::info!(
        "[{}] subscribed at {}ms interval",
        name,
        sample_interval.as_millis()
    );
    Ok(SensorSubscription {
        source: name,
        handle: Some(handle),
    })
}

pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::MotionStepDetector;
    use tokio::sync::mpsc;

    struct DeniedSensor;

    impl AccelSource for DeniedSensor {
        fn name(&self) -> &'static str {
            "denied"
        }
        fn check_access(&mut self) -> Result<()> {
            Err(TrackerError::PermissionDenied("user refused".into()))
        }
        fn read(&mut self) -> Option<MotionSample> {
            None
        }
    }

    #[test]
    fn test_parse_termux_output() {
        let output = r#"{
  "lsm6dso Accelerometer": {
    "values": [
      0.125,
      -0.5,
      9.81
    ]
  }
}"#;
        let sample = parse_termux_output(output, 42).unwrap();
        assert_eq!(sample, MotionSample::new(0.125, -0.5, 9.81, 42));

        assert!(parse_termux_output("{}", 0).is_none());
        assert!(parse_termux_output(r#"{"acc": {"values": [1.0, "x", 2.0]}}"#, 0).is_none());
        assert!(parse_termux_output(r#"{"acc": {"values": [1.0, 2.0]}}"#, 0).is_none());
    }

    #[test]
    fn test_synthetic_walk_cadence() {
        // 120 spm at 100ms sampling: one spike every 500ms
        let mut walk = SyntheticWalk::new(120, 100, 0);
        let mut detector = MotionStepDetector::default();
        for _ in 0..100 {
            let sample = walk.read().unwrap();
            detector.on_sample(&sample);
        }
        // 10 seconds of samples, first spike at t=0 only primes the baseline
        assert_eq!(detector.state().step_count, 19);
    }

    #[test]
    fn test_synthetic_walk_extreme_cadence() {
        let mut walk = SyntheticWalk::new(u32::MAX, 100, 0);
        let mut detector = MotionStepDetector::default();
        for _ in 0..100 {
            let sample = walk.read().unwrap();
            detector.on_sample(&sample);
        }
        // Strikes every other sample, thinned by the 350ms debounce
        assert!(detector.state().step_count > 0);
        assert!(detector.state().step_count <= 25);
    }

    #[tokio::test]
    async fn test_denied_sensor_does_not_subscribe() {
        let (tx, _rx) = mpsc::channel(8);
        let result = subscribe(DeniedSensor, Duration::from_millis(10), tx);
        assert!(matches!(result, Err(TrackerError::PermissionDenied(_))));
    }

    #[tokio::test]
    async fn test_subscription_forwards_samples() {
        let (tx, mut rx) = mpsc::channel(64);
        let walk = SyntheticWalk::new(100, 10, 0);
        let subscription = subscribe(walk, Duration::from_millis(5), tx).unwrap();
        assert_eq!(subscription.source(), "synthetic");

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(second.timestamp - first.timestamp, 10);

        subscription.unsubscribe().await;
    }
}
