use thiserror::Error;

/// Step tracker error types
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TrackerError {
    #[error("Tracking already running")]
    AlreadyRunning,

    #[error("Tracking not running")]
    NotRunning,

    #[error("Motion sensor permission denied: {0}")]
    PermissionDenied(String),

    #[error("Motion sensor unavailable: {0}")]
    SensorUnavailable(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl TrackerError {
    /// Message shown to the user when tracking cannot start.
    ///
    /// Only the sensor access conditions are user-visible; everything else
    /// degrades silently and returns `None`.
    pub fn user_message(&self) -> Option<&'static str> {
        match self {
            TrackerError::PermissionDenied(_) => Some(
                "Step counting needs access to motion sensors. Enable the permission in settings to start tracking.",
            ),
            TrackerError::SensorUnavailable(_) => {
                Some("This device has no usable motion sensor, so steps cannot be counted.")
            }
            _ => None,
        }
    }

    pub(crate) fn lock(what: &str) -> Self {
        TrackerError::Internal(format!("Failed to acquire {} lock", what))
    }
}

impl From<std::io::Error> for TrackerError {
    fn from(err: std::io::Error) -> Self {
        TrackerError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for TrackerError {
    fn from(err: serde_json::Error) -> Self {
        TrackerError::Serialization(err.to_string())
    }
}

/// Result type for tracker operations
pub type Result<T> = std::result::Result<T, TrackerError>;
