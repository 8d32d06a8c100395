use crate::record::DailyAggregateRecord;
use crate::sample::MotionSample;
use serde::{Deserialize, Serialize};

/// Tuning for the amplitude-threshold step detector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Minimum rise in magnitude between consecutive samples to count as a step
    pub threshold: f64,
    /// Minimum gap after a registered step before another may register (ms)
    pub step_debounce_ms: i64,
    /// Gap after which a step starts a new active burst (ms)
    pub active_window_ms: i64,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            threshold: 1.15,
            step_debounce_ms: 350,
            active_window_ms: 1000,
        }
    }
}

/// Mutable counters owned by a detector instance.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DetectorState {
    /// `None` until the first sample primes the baseline
    pub last_magnitude: Option<f64>,
    pub last_step_timestamp: Option<i64>,
    pub step_count: u64,
    pub active_duration_seconds: u64,
}

/// Debounce state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DetectorPhase {
    /// No step within the debounce window
    Idle,
    /// Within `step_debounce_ms` of the last registered step
    Debounced,
}

/// Emitted for every registered step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepEvent {
    pub total_steps: u64,
    pub total_active_seconds: u64,
    pub timestamp: i64,
}

/// Peak detector over the acceleration magnitude with a debounce window.
///
/// Single-threaded and O(1) per sample. Callers that share a detector across
/// threads wrap it in a lock (see [`crate::tracker::StepTracker`]).
#[derive(Debug, Clone)]
pub struct MotionStepDetector {
    config: DetectorConfig,
    state: DetectorState,
}

impl MotionStepDetector {
    pub fn new(config: DetectorConfig) -> Self {
        Self {
            config,
            state: DetectorState::default(),
        }
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    pub fn state(&self) -> &DetectorState {
        &self.state
    }

    /// Phase at `timestamp`, evaluated lazily from the last registered step.
    ///
    /// Timestamps earlier than the last step count as debounced.
    pub fn phase_at(&self, timestamp: i64) -> DetectorPhase {
        match self.state.last_step_timestamp {
            Some(last) if timestamp.saturating_sub(last) <= self.config.step_debounce_ms => {
                DetectorPhase::Debounced
            }
            _ => DetectorPhase::Idle,
        }
    }

    /// Feed one sample. Returns an event when a step registers.
    pub fn on_sample(&mut self, sample: &MotionSample) -> Option<StepEvent> {
        let magnitude = sample.magnitude();
        let previous = self.state.last_magnitude.replace(magnitude)?;

        // NaN never registers
        let delta = magnitude - previous;
        if delta.is_nan() || delta <= self.config.threshold {
            return None;
        }
        if self.phase_at(sample.timestamp) == DetectorPhase::Debounced {
            return None;
        }

        let new_burst = match self.state.last_step_timestamp {
            None => true,
            Some(last) => sample.timestamp.saturating_sub(last) > self.config.active_window_ms,
        };

        self.state.step_count += 1;
        if new_burst {
            self.state.active_duration_seconds += 1;
        }
        self.state.last_step_timestamp = Some(sample.timestamp);

        log::debug!(
            "step {} at {} (delta {:.3}, active {}s)",
            self.state.step_count,
            sample.timestamp,
            delta,
            self.state.active_duration_seconds
        );

        Some(StepEvent {
            total_steps: self.state.step_count,
            total_active_seconds: self.state.active_duration_seconds,
            timestamp: sample.timestamp,
        })
    }

    /// Restore counters from a persisted daily record
    pub fn seed(&mut self, record: &DailyAggregateRecord) {
        self.state.step_count = record.step_count;
        self.state.active_duration_seconds = record.active_duration_seconds;
        self.state.last_step_timestamp = record.last_step_timestamp;
    }

    /// Zero the counters for a new calendar day, keeping the magnitude baseline.
    pub fn reset_for_new_day(&mut self) {
        self.state.step_count = 0;
        self.state.active_duration_seconds = 0;
        self.state.last_step_timestamp = None;
    }
}

impl Default for MotionStepDetector {
    fn default() -> Self {
        Self::new(DetectorConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn upright(z: f64, t: i64) -> MotionSample {
        MotionSample::new(0.0, 0.0, z, t)
    }

    fn feed(detector: &mut MotionStepDetector, samples: &[MotionSample]) -> Vec<StepEvent> {
        samples.iter().filter_map(|s| detector.on_sample(s)).collect()
    }

    #[test]
    fn test_walking_scenario() {
        let mut detector = MotionStepDetector::default();
        let events = feed(
            &mut detector,
            &[
                upright(9.8, 0),
                upright(11.5, 100),
                upright(9.8, 200),
                upright(11.6, 600),
            ],
        );

        assert_eq!(detector.state().step_count, 2);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].timestamp, 100);
        assert_eq!(events[1].timestamp, 600);
        assert_eq!(events[1].total_steps, 2);
        // 600 - 100 is inside the active window, so still one burst
        assert_eq!(detector.state().active_duration_seconds, 1);
    }

    #[test]
    fn test_below_threshold_never_steps() {
        let mut detector = MotionStepDetector::default();
        let mut z = 9.8;
        let mut samples = Vec::new();
        for i in 0..200 {
            // rises of 1.1 are always under the 1.15 threshold
            z += if i % 2 == 0 { 1.1 } else { -1.1 };
            samples.push(upright(z, i * 100));
        }

        assert!(feed(&mut detector, &samples).is_empty());
        assert_eq!(detector.state().step_count, 0);
    }

    #[test]
    fn test_first_sample_only_primes_baseline() {
        let mut detector = MotionStepDetector::default();
        assert!(detector.on_sample(&upright(9.8, 0)).is_none());
        assert_eq!(detector.state().last_magnitude, Some(9.8));
        assert_eq!(detector.state().step_count, 0);
    }

    #[test]
    fn test_debounce_suppresses_second_step() {
        let mut detector = MotionStepDetector::default();
        feed(
            &mut detector,
            &[
                upright(9.8, 0),
                upright(11.5, 1000),
                upright(9.8, 1100),
                upright(11.5, 1350),
            ],
        );
        assert_eq!(detector.state().step_count, 1);
    }

    #[test]
    fn test_debounce_boundary() {
        let mut detector = MotionStepDetector::default();
        feed(
            &mut detector,
            &[
                upright(9.8, 0),
                upright(11.5, 1000),
                upright(9.8, 1100),
                upright(11.5, 1351),
            ],
        );
        assert_eq!(detector.state().step_count, 2);
    }

    #[test]
    fn test_phase_transitions() {
        let mut detector = MotionStepDetector::default();
        assert_eq!(detector.phase_at(0), DetectorPhase::Idle);

        feed(&mut detector, &[upright(9.8, 0), upright(11.5, 500)]);
        assert_eq!(detector.phase_at(500), DetectorPhase::Debounced);
        assert_eq!(detector.phase_at(850), DetectorPhase::Debounced);
        assert_eq!(detector.phase_at(851), DetectorPhase::Idle);
        // Earlier than the last step
        assert_eq!(detector.phase_at(100), DetectorPhase::Debounced);
    }

    #[test]
    fn test_active_seconds_credit_per_burst() {
        let mut detector = MotionStepDetector::default();
        feed(
            &mut detector,
            &[
                upright(9.8, 0),
                upright(11.5, 100),
                upright(9.8, 200),
                upright(11.5, 600),
                upright(9.8, 700),
                // 1700 - 600 > 1000 starts a new burst
                upright(11.5, 1700),
            ],
        );
        assert_eq!(detector.state().step_count, 3);
        assert_eq!(detector.state().active_duration_seconds, 2);
    }

    #[test]
    fn test_nan_sample_is_ignored() {
        let mut detector = MotionStepDetector::default();
        feed(
            &mut detector,
            &[
                upright(9.8, 0),
                MotionSample::new(f64::NAN, 0.0, 12.0, 500),
                upright(11.5, 1000),
            ],
        );
        // NaN poisons the next delta too; nothing registers
        assert_eq!(detector.state().step_count, 0);
    }

    #[test]
    fn test_step_count_is_monotonic() {
        let mut detector = MotionStepDetector::default();
        let mut last = 0;
        for i in 0..500i64 {
            let z = 9.8 + ((i * 7919) % 13) as f64 * 0.4 - 2.0;
            let t = i * 37 + ((i * 31) % 5) * 20;
            detector.on_sample(&upright(z, t));
            assert!(detector.state().step_count >= last);
            last = detector.state().step_count;
        }
    }

    #[test]
    fn test_out_of_order_sample_cannot_step() {
        let mut detector = MotionStepDetector::default();
        feed(&mut detector, &[upright(9.8, 0), upright(11.5, 5000), upright(9.8, 5100)]);
        assert!(detector.on_sample(&upright(11.5, 1000)).is_none());
        assert_eq!(detector.state().step_count, 1);
        assert_eq!(detector.state().last_magnitude, Some(11.5));
    }

    #[test]
    fn test_extreme_timestamp_does_not_panic() {
        let mut detector = MotionStepDetector::default();
        let t = 1_700_000_000_000;
        feed(&mut detector, &[upright(9.8, t), upright(11.5, t + 100), upright(9.8, t + 200)]);
        assert_eq!(detector.state().step_count, 1);

        assert_eq!(detector.phase_at(i64::MIN), DetectorPhase::Debounced);
        assert!(detector.on_sample(&upright(11.5, i64::MIN)).is_none());
        assert_eq!(detector.state().step_count, 1);

        detector.on_sample(&upright(9.8, t + 300));
        let event = detector.on_sample(&upright(11.5, i64::MAX)).unwrap();
        assert_eq!(event.total_steps, 2);
        assert_eq!(event.total_active_seconds, 2);
    }

    #[test]
    fn test_seed_and_reset() {
        let mut detector = MotionStepDetector::default();
        let record = DailyAggregateRecord {
            user_id: "u1".into(),
            date: NaiveDate::from_ymd_opt(2024, 5, 1).unwrap(),
            step_count: 40,
            active_duration_seconds: 12,
            last_step_timestamp: Some(10_000),
        };
        detector.seed(&record);
        detector.on_sample(&upright(9.8, 10_100));
        // Seeded last step keeps the debounce window alive
        assert!(detector.on_sample(&upright(11.5, 10_200)).is_none());
        detector.on_sample(&upright(9.8, 10_300));
        let event = detector.on_sample(&upright(11.5, 10_500)).unwrap();
        assert_eq!(event.total_steps, 41);
        assert_eq!(event.total_active_seconds, 12);

        detector.reset_for_new_day();
        assert_eq!(detector.state().step_count, 0);
        assert_eq!(detector.state().last_step_timestamp, None);
        assert_eq!(detector.state().last_magnitude, Some(11.5));
    }
}
