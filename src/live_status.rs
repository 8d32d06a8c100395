use crate::tracker::StepSnapshot;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

/// File name the tracker writes and the dashboard serves
pub const LIVE_STATUS_FILE: &str = "live_status.json";

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct LiveStatus {
    pub timestamp: f64,
    pub user_id: String,
    pub date: String,
    pub steps: u64,
    pub duration: u64,
    pub is_ready: bool,
    pub source: String,
    pub samples_processed: u64,
    pub uptime_seconds: u64,
    // Persistence
    pub last_flush_ok: bool,
}

impl LiveStatus {
    pub fn new() -> Self {
        Self {
            timestamp: current_timestamp(),
            user_id: String::new(),
            date: String::new(),
            steps: 0,
            duration: 0,
            is_ready: false,
            source: String::new(),
            samples_processed: 0,
            uptime_seconds: 0,
            last_flush_ok: true,
        }
    }

    pub fn from_snapshot(snapshot: &StepSnapshot) -> Self {
        Self {
            user_id: snapshot.user_id.clone(),
            date: snapshot.date.format("%Y-%m-%d").to_string(),
            steps: snapshot.steps,
            duration: snapshot.duration,
            is_ready: snapshot.is_ready,
            ..Self::new()
        }
    }

    pub fn save(&self, path: impl AsRef<Path>) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    /// Save, logging a failure instead of returning it. Returns whether the write landed.
    pub fn save_logged(&self, path: impl AsRef<Path>) -> bool {
        let path = path.as_ref();
        match self.save(path) {
            Ok(()) => true,
            Err(e) => {
                log::warn!("[status] could not write {}: {}", path.display(), e);
                false
            }
        }
    }

    pub fn load(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }
}

impl Default for LiveStatus {
    fn default() -> Self {
        Self::new()
    }
}

pub fn current_timestamp() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}
