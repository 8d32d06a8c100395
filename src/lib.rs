//! Accelerometer step counting with per-user daily totals.
//!
//! Samples flow `sensors` → [`tracker::StepTracker`] (wrapping
//! [`detector::MotionStepDetector`]) → [`store::DailyAggregateStore`], with
//! [`flush::PeriodicFlush`] persisting the running totals on a timer.

pub mod config;
pub mod dashboard;
pub mod detector;
pub mod error;
pub mod flush;
pub mod kv;
pub mod live_status;
pub mod record;
pub mod sample;
pub mod sensors;
pub mod store;
pub mod tracker;

pub use config::TrackerConfig;
pub use detector::{DetectorConfig, DetectorPhase, DetectorState, MotionStepDetector, StepEvent};
pub use error::{Result, TrackerError};
pub use flush::PeriodicFlush;
pub use kv::{FileStore, KeyValueStore, MemoryStore};
pub use record::{storage_key, DailyAggregateRecord};
pub use sample::MotionSample;
pub use store::DailyAggregateStore;
pub use tracker::{StepSnapshot, StepTracker, TrackerState};
