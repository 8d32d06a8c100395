use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Prefix shared by every persisted daily aggregate key.
pub const KEY_PREFIX: &str = "stepcounter";

/// Per-user, per-day step totals.
///
/// Field names on disk follow the format already written by the mobile app,
/// so existing records keep loading.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyAggregateRecord {
    #[serde(rename = "userId")]
    pub user_id: String,
    pub date: NaiveDate,
    #[serde(rename = "steps")]
    pub step_count: u64,
    #[serde(rename = "duration")]
    pub active_duration_seconds: u64,
    #[serde(rename = "lastStepTime")]
    pub last_step_timestamp: Option<i64>,
}

impl DailyAggregateRecord {
    /// Empty record for a day with no stored progress
    pub fn zeroed(user_id: &str, date: NaiveDate) -> Self {
        Self {
            user_id: user_id.to_string(),
            date,
            step_count: 0,
            active_duration_seconds: 0,
            last_step_timestamp: None,
        }
    }

    pub fn key(&self) -> String {
        storage_key(&self.user_id, self.date)
    }
}

/// Storage key of the form `stepcounter_{userId}_{YYYY}-{MM}-{DD}`
pub fn storage_key(user_id: &str, date: NaiveDate) -> String {
    format!("{}_{}_{}", KEY_PREFIX, user_id, date.format("%Y-%m-%d"))
}
