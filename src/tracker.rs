use crate::detector::{DetectorConfig, MotionStepDetector, StepEvent};
use crate::error::{Result, TrackerError};
use crate::record::DailyAggregateRecord;
use crate::sample::MotionSample;
use crate::store::DailyAggregateStore;
use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, MutexGuard};

/// Tracking lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrackerState {
    /// Not subscribed, samples are ignored
    Idle,
    /// Today's record loaded and counting
    Tracking,
}

/// Read model handed to the UI layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepSnapshot {
    pub user_id: String,
    pub date: NaiveDate,
    pub steps: u64,
    pub duration: u64,
    /// False until today's stored totals have been restored
    pub is_ready: bool,
}

struct TrackerInner {
    state: TrackerState,
    ready: bool,
    date: NaiveDate,
    detector: MotionStepDetector,
    samples_processed: u64,
}

/// Step counting session for one user.
///
/// The sensor callback mutates the detector while the flush thread reads it,
/// so all state sits behind one lock and every read sees a consistent
/// `(steps, duration)` pair. Store writes happen outside that lock, serialized
/// by `write_lock`, and each writer snapshots only after taking `write_lock`, so
/// an older snapshot never lands after a newer one. Lock order: `write_lock`
/// then `inner`.
pub struct StepTracker {
    user_id: String,
    offset: FixedOffset,
    store: DailyAggregateStore,
    inner: Mutex<TrackerInner>,
    write_lock: Mutex<()>,
}

impl StepTracker {
    pub fn new(
        user_id: &str,
        detector_config: DetectorConfig,
        offset: FixedOffset,
        store: DailyAggregateStore,
    ) -> Result<Self> {
        if user_id.is_empty() {
            return Err(TrackerError::InvalidParameters("user id is empty".into()));
        }

        let date = Utc::now().with_timezone(&offset).date_naive();
        Ok(Self {
            user_id: user_id.to_string(),
            offset,
            store,
            inner: Mutex::new(TrackerInner {
                state: TrackerState::Idle,
                ready: false,
                date,
                detector: MotionStepDetector::new(detector_config),
                samples_processed: 0,
            }),
            write_lock: Mutex::new(()),
        })
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    fn lock(&self) -> Result<MutexGuard<'_, TrackerInner>> {
        self.inner.lock().map_err(|_| TrackerError::lock("tracker"))
    }

    fn lock_writes(&self) -> Result<MutexGuard<'_, ()>> {
        self.write_lock.lock().map_err(|_| TrackerError::lock("tracker write"))
    }

    /// Calendar day a timestamp falls on in the configured offset
    pub fn day_of(&self, timestamp_ms: i64) -> Option<NaiveDate> {
        DateTime::<Utc>::from_timestamp_millis(timestamp_ms)
            .map(|t| t.with_timezone(&self.offset).date_naive())
    }

    /// Start tracking today (Idle → Tracking)
    pub fn start(&self) -> Result<()> {
        self.start_at(Utc::now().timestamp_millis())
    }

    /// Start tracking for the day containing `now_ms`.
    ///
    /// The stored totals are restored before the tracker reports ready, so no
    /// sample is counted against an unseeded detector.
    pub fn start_at(&self, now_ms: i64) -> Result<()> {
        let date = self.day_of(now_ms).ok_or_else(|| {
            TrackerError::InvalidParameters(format!("timestamp out of range: {}", now_ms))
        })?;

        let mut inner = self.lock()?;
        if inner.state == TrackerState::Tracking {
            return Err(TrackerError::AlreadyRunning);
        }

        let record = self.store.load(&self.user_id, date);
        inner.detector.reset_for_new_day();
        inner.detector.seed(&record);
        inner.date = date;
        inner.state = TrackerState::Tracking;
        inner.ready = true;

        log::info!(
            "[tracker] started for {} on {} at {} steps",
            self.user_id,
            date,
            record.step_count
        );
        Ok(())
    }

    /// Feed one sensor sample. Samples arriving before `start` are dropped.
    ///
    /// Never waits on a store write, except to persist the finished day when
    /// the sample crosses midnight.
    pub fn on_sample(&self, sample: &MotionSample) -> Result<Option<StepEvent>> {
        let (event, finished) = {
            let mut inner = self.lock()?;
            if !inner.ready {
                return Ok(None);
            }
            inner.samples_processed += 1;

            let finished = match self.day_of(sample.timestamp) {
                Some(day) if day > inner.date => Some(self.roll_over(&mut inner, day)),
                _ => None,
            };
            (inner.detector.on_sample(sample), finished)
        };

        if let Some(record) = finished {
            let _writes = self.lock_writes()?;
            if let Err(e) = self.store.save(&record) {
                log::warn!("[tracker] could not persist {} after rollover: {}", record.date, e);
            }
        }
        Ok(event)
    }

    /// Switch to `day`, returning the finished day's record for the caller to save
    fn roll_over(&self, inner: &mut TrackerInner, day: NaiveDate) -> DailyAggregateRecord {
        let finished = self.record_of(inner);

        let record = self.store.load(&self.user_id, day);
        inner.detector.reset_for_new_day();
        inner.detector.seed(&record);
        inner.date = day;

        log::info!(
            "[tracker] day rolled over {} -> {} ({} steps carried into history)",
            finished.date,
            day,
            finished.step_count
        );
        finished
    }

    fn record_of(&self, inner: &TrackerInner) -> DailyAggregateRecord {
        let state = inner.detector.state();
        DailyAggregateRecord {
            user_id: self.user_id.clone(),
            date: inner.date,
            step_count: state.step_count,
            active_duration_seconds: state.active_duration_seconds,
            last_step_timestamp: state.last_step_timestamp,
        }
    }

    /// Current day's record
    pub fn record(&self) -> Result<DailyAggregateRecord> {
        let inner = self.lock()?;
        Ok(self.record_of(&inner))
    }

    pub fn snapshot(&self) -> Result<StepSnapshot> {
        let inner = self.lock()?;
        let state = inner.detector.state();
        Ok(StepSnapshot {
            user_id: self.user_id.clone(),
            date: inner.date,
            steps: state.step_count,
            duration: state.active_duration_seconds,
            is_ready: inner.ready,
        })
    }

    pub fn get_state(&self) -> Result<TrackerState> {
        Ok(self.lock()?.state)
    }

    pub fn is_ready(&self) -> Result<bool> {
        Ok(self.lock()?.ready)
    }

    pub fn samples_processed(&self) -> Result<u64> {
        Ok(self.lock()?.samples_processed)
    }

    /// Persist the current record.
    pub fn flush(&self) -> Result<()> {
        let _writes = self.lock_writes()?;
        let record = {
            let inner = self.lock()?;
            if inner.state != TrackerState::Tracking {
                return Err(TrackerError::NotRunning);
            }
            self.record_of(&inner)
        };
        self.store.save(&record)
    }

    /// Final flush, then Tracking → Idle.
    ///
    /// A failed final write is logged; tracking stops regardless.
    pub fn stop(&self) -> Result<()> {
        let _writes = self.lock_writes()?;
        let record = {
            let mut inner = self.lock()?;
            if inner.state != TrackerState::Tracking {
                return Err(TrackerError::NotRunning);
            }
            inner.state = TrackerState::Idle;
            inner.ready = false;
            self.record_of(&inner)
        };

        if let Err(e) = self.store.save(&record) {
            log::warn!("[tracker] final flush for {} failed: {}", record.date, e);
        }

        log::info!(
            "[tracker] stopped for {} with {} steps, {}s active",
            self.user_id,
            record.step_count,
            record.active_duration_seconds
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::{KeyValueStore, MemoryStore};
    use crossbeam::channel::{unbounded, Receiver, Sender};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    // 2024-06-12T10:00:00Z
    const MORNING: i64 = 1_718_186_400_000;
    const DAY_MS: i64 = 24 * 60 * 60 * 1000;

    fn utc() -> FixedOffset {
        FixedOffset::east_opt(0).unwrap()
    }

    fn tracker_with(backend: Arc<MemoryStore>) -> StepTracker {
        StepTracker::new(
            "walker",
            DetectorConfig::default(),
            utc(),
            DailyAggregateStore::new(backend),
        )
        .unwrap()
    }

    fn step_pair(tracker: &StepTracker, t: i64) {
        tracker.on_sample(&MotionSample::new(0.0, 0.0, 9.8, t)).unwrap();
        tracker
            .on_sample(&MotionSample::new(0.0, 0.0, 11.5, t + 100))
            .unwrap();
    }

    #[test]
    fn test_state_transitions() {
        let tracker = tracker_with(Arc::new(MemoryStore::new()));
        assert_eq!(tracker.get_state().unwrap(), TrackerState::Idle);
        assert!(!tracker.is_ready().unwrap());

        tracker.start_at(MORNING).unwrap();
        assert_eq!(tracker.get_state().unwrap(), TrackerState::Tracking);
        assert!(tracker.is_ready().unwrap());
        assert_eq!(tracker.start_at(MORNING), Err(TrackerError::AlreadyRunning));

        tracker.stop().unwrap();
        assert_eq!(tracker.get_state().unwrap(), TrackerState::Idle);
        assert_eq!(tracker.stop(), Err(TrackerError::NotRunning));
        assert_eq!(tracker.flush(), Err(TrackerError::NotRunning));
    }

    #[test]
    fn test_rejects_empty_user() {
        let store = DailyAggregateStore::new(Arc::new(MemoryStore::new()));
        assert!(StepTracker::new("", DetectorConfig::default(), utc(), store).is_err());
    }

    #[test]
    fn test_samples_ignored_until_ready() {
        let tracker = tracker_with(Arc::new(MemoryStore::new()));
        step_pair(&tracker, MORNING);
        assert_eq!(tracker.samples_processed().unwrap(), 0);
        assert_eq!(tracker.snapshot().unwrap().steps, 0);

        tracker.start_at(MORNING).unwrap();
        step_pair(&tracker, MORNING + 1000);
        let snapshot = tracker.snapshot().unwrap();
        assert!(snapshot.is_ready);
        assert_eq!(snapshot.steps, 1);
        assert_eq!(snapshot.duration, 1);
        assert_eq!(tracker.samples_processed().unwrap(), 2);
    }

    #[test]
    fn test_restores_stored_day() {
        let backend = Arc::new(MemoryStore::new());
        let tracker = tracker_with(backend.clone());
        tracker.start_at(MORNING).unwrap();
        step_pair(&tracker, MORNING);
        step_pair(&tracker, MORNING + 2000);
        tracker.stop().unwrap();

        let resumed = tracker_with(backend);
        resumed.start_at(MORNING + 60_000).unwrap();
        let snapshot = resumed.snapshot().unwrap();
        assert_eq!(snapshot.steps, 2);
        assert_eq!(snapshot.duration, 2);
        assert_eq!(
            resumed.record().unwrap().last_step_timestamp,
            Some(MORNING + 2100)
        );
    }

    #[test]
    fn test_day_rollover_resets_and_persists() {
        let backend = Arc::new(MemoryStore::new());
        let tracker = tracker_with(backend.clone());
        tracker.start_at(MORNING).unwrap();
        step_pair(&tracker, MORNING);
        step_pair(&tracker, MORNING + 2000);
        let today = tracker.snapshot().unwrap().date;

        step_pair(&tracker, MORNING + DAY_MS);
        let snapshot = tracker.snapshot().unwrap();
        assert_eq!(snapshot.date, today.succ_opt().unwrap());
        assert_eq!(snapshot.steps, 1);

        let store = DailyAggregateStore::new(backend);
        assert_eq!(store.load("walker", today).step_count, 2);
    }

    #[test]
    fn test_flush_writes_current_record() {
        let backend = Arc::new(MemoryStore::new());
        let tracker = tracker_with(backend.clone());
        tracker.start_at(MORNING).unwrap();
        step_pair(&tracker, MORNING);
        tracker.flush().unwrap();

        let raw = backend.get("stepcounter_walker_2024-06-12").unwrap().unwrap();
        assert!(raw.contains("\"steps\":1"));
    }

    #[test]
    fn test_extreme_timestamp_keeps_tracker_usable() {
        let backend = Arc::new(MemoryStore::new());
        let tracker = tracker_with(backend);
        tracker.start_at(MORNING).unwrap();
        step_pair(&tracker, MORNING);

        for t in [i64::MIN, i64::MAX] {
            tracker.on_sample(&MotionSample::new(0.0, 0.0, 9.8, t)).unwrap();
            tracker.on_sample(&MotionSample::new(0.0, 0.0, 11.5, t)).unwrap();
        }

        assert_eq!(tracker.flush(), Ok(()));
        let snapshot = tracker.snapshot().unwrap();
        assert_eq!(snapshot.date.to_string(), "2024-06-12");
        tracker.stop().unwrap();
    }

    /// Blocks every write until the test releases it
    struct GatedStore {
        inner: MemoryStore,
        entered: Sender<()>,
        release: Receiver<()>,
    }

    impl KeyValueStore for GatedStore {
        fn get(&self, key: &str) -> crate::error::Result<Option<String>> {
            self.inner.get(key)
        }

        fn set(&self, key: &str, value: &str) -> crate::error::Result<()> {
            let _ = self.entered.send(());
            let _ = self.release.recv();
            self.inner.set(key, value)
        }
    }

    #[test]
    fn test_samples_flow_during_slow_write() {
        let (entered_tx, entered_rx) = unbounded();
        let (release_tx, release_rx) = unbounded();
        let store = DailyAggregateStore::new(Arc::new(GatedStore {
            inner: MemoryStore::new(),
            entered: entered_tx,
            release: release_rx,
        }));
        let tracker = Arc::new(
            StepTracker::new("walker", DetectorConfig::default(), utc(), store).unwrap(),
        );
        tracker.start_at(MORNING).unwrap();

        let flusher = {
            let tracker = Arc::clone(&tracker);
            thread::spawn(move || tracker.flush())
        };
        entered_rx.recv_timeout(Duration::from_secs(2)).unwrap();

        let (done_tx, done_rx) = unbounded();
        let sampler = {
            let tracker = Arc::clone(&tracker);
            thread::spawn(move || {
                step_pair(&tracker, MORNING + 1000);
                let _ = done_tx.send(tracker.snapshot().map(|s| s.steps));
            })
        };
        let steps = done_rx.recv_timeout(Duration::from_secs(2));

        release_tx.send(()).unwrap();
        flusher.join().unwrap().unwrap();
        sampler.join().unwrap();
        assert_eq!(steps, Ok(Ok(1)));
    }

    #[test]
    fn test_snapshot_json_shape() {
        let tracker = tracker_with(Arc::new(MemoryStore::new()));
        tracker.start_at(MORNING).unwrap();
        let value = serde_json::to_value(tracker.snapshot().unwrap()).unwrap();
        assert_eq!(value["isReady"], true);
        assert_eq!(value["steps"], 0);
        assert_eq!(value["userId"], "walker");
    }
}
