use jni::JNIEnv;
use step_tracker_rs::TrackerError;
use thiserror::Error;

/// Errors surfaced across the JNI boundary
#[derive(Error, Debug)]
pub enum BindingError {
    #[error(transparent)]
    Tracker(#[from] TrackerError),

    #[error("JNI error: {0}")]
    Jni(String),
}

impl From<jni::errors::Error> for BindingError {
    fn from(err: jni::errors::Error) -> Self {
        BindingError::Jni(err.to_string())
    }
}

/// Result type for JNI operations
pub type JResult<T> = Result<T, BindingError>;

/// Java exception class each error is raised as
pub fn exception_class(error: &BindingError) -> &'static str {
    match error {
        BindingError::Tracker(TrackerError::AlreadyRunning | TrackerError::NotRunning) => {
            "java/lang/IllegalStateException"
        }
        BindingError::Tracker(TrackerError::InvalidParameters(_) | TrackerError::Config(_)) => {
            "java/lang/IllegalArgumentException"
        }
        BindingError::Tracker(TrackerError::PermissionDenied(_)) => "java/lang/SecurityException",
        BindingError::Tracker(
            TrackerError::SensorUnavailable(_)
            | TrackerError::Storage(_)
            | TrackerError::Serialization(_),
        ) => "java/io/IOException",
        BindingError::Tracker(TrackerError::Internal(_)) | BindingError::Jni(_) => {
            "java/lang/RuntimeException"
        }
    }
}

/// Throw Java exception from Rust error
pub fn throw_java_exception(env: &mut JNIEnv, error: &BindingError) -> JResult<()> {
    env.throw_new(exception_class(error), error.to_string())
        .map_err(|_| BindingError::Jni("Failed to throw exception".to_string()))?;
    Ok(())
}
