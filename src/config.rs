use crate::detector::DetectorConfig;
use crate::error::{Result, TrackerError};
use chrono::FixedOffset;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Runtime configuration for a tracking session.
///
/// Every field has a default, so a config file only needs the values it
/// overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    pub data_dir: PathBuf,
    /// Sensor polling interval
    pub sample_interval_ms: u64,
    /// Periodic persistence cadence
    pub flush_interval_ms: u64,
    /// Live status write cadence
    pub status_interval_ms: u64,
    /// Offset used to decide which calendar day a sample belongs to
    pub utc_offset_minutes: i32,
    pub detector: DetectorConfig,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("step_tracker_data"),
            sample_interval_ms: 100,
            flush_interval_ms: 10_000,
            status_interval_ms: 2_000,
            utc_offset_minutes: 0,
            detector: DetectorConfig::default(),
        }
    }
}

impl TrackerConfig {
    /// Load a JSON config file and validate it
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| TrackerError::Config(format!("{}: {}", path.display(), e)))?;
        let config: TrackerConfig = serde_json::from_str(&content)
            .map_err(|e| TrackerError::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.sample_interval_ms == 0 {
            return Err(TrackerError::Config("sample_interval_ms must be > 0".into()));
        }
        if self.flush_interval_ms == 0 {
            return Err(TrackerError::Config("flush_interval_ms must be > 0".into()));
        }
        if self.status_interval_ms == 0 {
            return Err(TrackerError::Config("status_interval_ms must be > 0".into()));
        }
        let threshold = self.detector.threshold;
        if !threshold.is_finite() || threshold <= 0.0 {
            return Err(TrackerError::Config(format!(
                "detector.threshold must be a positive number, got {}",
                threshold
            )));
        }
        if self.detector.step_debounce_ms < 0 || self.detector.active_window_ms < 0 {
            return Err(TrackerError::Config("detector windows must not be negative".into()));
        }
        self.utc_offset()?;
        Ok(())
    }

    pub fn utc_offset(&self) -> Result<FixedOffset> {
        FixedOffset::east_opt(self.utc_offset_minutes * 60).ok_or_else(|| {
            TrackerError::Config(format!(
                "utc_offset_minutes out of range: {}",
                self.utc_offset_minutes
            ))
        })
    }

    pub fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.sample_interval_ms)
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    pub fn status_interval(&self) -> Duration {
        Duration::from_millis(self.status_interval_ms)
    }
}
