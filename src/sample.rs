use serde::{Deserialize, Serialize};

/// Accelerometer sample as delivered by the platform sensor callback.
///
/// `timestamp` is milliseconds since the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MotionSample {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub timestamp: i64,
}

impl MotionSample {
    pub fn new(x: f64, y: f64, z: f64, timestamp: i64) -> Self {
        Self { x, y, z, timestamp }
    }

    pub fn magnitude(&self) -> f64 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }
}

/// Recorded sample log, as consumed by the replay tool.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SampleLog {
    pub samples: Vec<MotionSample>,
}
