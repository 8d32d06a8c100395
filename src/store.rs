use crate::error::Result;
use crate::kv::KeyValueStore;
use crate::record::{storage_key, DailyAggregateRecord};
use chrono::NaiveDate;
use std::sync::Arc;

/// Persists daily aggregates on top of a key-value backend.
///
/// Loading is best-effort: a missing key, a failed read or a record that does
/// not parse all yield the zeroed record for that day.
#[derive(Clone)]
pub struct DailyAggregateStore {
    backend: Arc<dyn KeyValueStore>,
}

impl DailyAggregateStore {
    pub fn new(backend: Arc<dyn KeyValueStore>) -> Self {
        Self { backend }
    }

    pub fn load(&self, user_id: &str, date: NaiveDate) -> DailyAggregateRecord {
        let key = storage_key(user_id, date);
        let raw = match self.backend.get(&key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return DailyAggregateRecord::zeroed(user_id, date),
            Err(e) => {
                log::warn!("[store] read of {} failed, starting from zero: {}", key, e);
                return DailyAggregateRecord::zeroed(user_id, date);
            }
        };

        match serde_json::from_str::<DailyAggregateRecord>(&raw) {
            Ok(record) if record.user_id == user_id && record.date == date => record,
            Ok(record) => {
                log::warn!(
                    "[store] {} holds a record for {}/{}, ignoring",
                    key,
                    record.user_id,
                    record.date
                );
                DailyAggregateRecord::zeroed(user_id, date)
            }
            Err(e) => {
                log::warn!("[store] {} is not a valid record, starting from zero: {}", key, e);
                DailyAggregateRecord::zeroed(user_id, date)
            }
        }
    }

    /// Overwrite the stored record for `(record.user_id, record.date)`.
    ///
    /// Callers on the sensor path may drop the error; the next flush resubmits
    /// the latest state.
    pub fn save(&self, record: &DailyAggregateRecord) -> Result<()> {
        let json = serde_json::to_string(record)?;
        self.backend.set(&record.key(), &json)
    }
}
