use crate::error::{throw_java_exception, BindingError, JResult};
use jni::objects::{JClass, JString};
use jni::sys::{jdouble, jint, jlong, jstring};
use jni::JNIEnv;
use std::sync::{Arc, Mutex, MutexGuard};
use step_tracker_rs::{
    DailyAggregateStore, DetectorConfig, FileStore, KeyValueStore, MemoryStore, MotionSample,
    PeriodicFlush, StepTracker, TrackerConfig, TrackerError,
};

/// Tracker plus its flush timer, alive between startTracking and stopTracking
struct ActiveSession {
    tracker: Arc<StepTracker>,
    flush: PeriodicFlush,
}

// Kotlin holds no handle, so the session lives in one process-wide slot
lazy_static::lazy_static! {
    static ref ACTIVE_SESSION: Mutex<Option<ActiveSession>> = Mutex::new(None);
}

fn session_slot() -> JResult<MutexGuard<'static, Option<ActiveSession>>> {
    ACTIVE_SESSION.lock().map_err(|_| {
        BindingError::Tracker(TrackerError::Internal(
            "Failed to acquire global session lock".to_string(),
        ))
    })
}

fn return_code(env: &mut JNIEnv, result: JResult<jint>) -> jint {
    match result {
        Ok(code) => code,
        Err(e) => {
            let _ = throw_java_exception(env, &e);
            -1
        }
    }
}

fn return_string(env: &mut JNIEnv, result: JResult<String>) -> jstring {
    let created = result.and_then(|s| env.new_string(s).map_err(BindingError::from));
    match created {
        Ok(jstr) => jstr.into_raw(),
        Err(e) => {
            let _ = throw_java_exception(env, &e);
            std::ptr::null_mut()
        }
    }
}

/// JNI: Restore today's totals and start counting
/// Parameters: userId, dataDir ("" keeps totals in memory), utcOffsetMinutes, flushIntervalMs (<= 0 uses default)
/// Returns: 0 on success, -1 on error (throws Java exception)
#[no_mangle]
pub extern "C" fn Java_com_example_steptracker_JniBinding_startTracking(
    mut env: JNIEnv,
    _class: JClass,
    user_id: JString,
    data_dir: JString,
    utc_offset_minutes: jint,
    flush_interval_ms: jlong,
) -> jint {
    let result = start_tracking_jni(
        &mut env,
        &user_id,
        &data_dir,
        utc_offset_minutes,
        flush_interval_ms,
    );
    return_code(&mut env, result.map(|_| 0))
}

fn start_tracking_jni(
    env: &mut JNIEnv,
    user_id: &JString,
    data_dir: &JString,
    utc_offset_minutes: i32,
    flush_interval_ms: i64,
) -> JResult<()> {
    let user = read_string(env, user_id)?;
    let dir = read_string(env, data_dir)?;
    start_tracking_impl(&user, &dir, utc_offset_minutes, flush_interval_ms)
}

fn read_string(env: &mut JNIEnv, value: &JString) -> JResult<String> {
    Ok(env.get_string(value)?.into())
}

pub fn start_tracking_impl(
    user_id: &str,
    data_dir: &str,
    utc_offset_minutes: i32,
    flush_interval_ms: i64,
) -> JResult<()> {
    let mut slot = session_slot()?;
    if slot.is_some() {
        return Err(TrackerError::AlreadyRunning.into());
    }

    let defaults = TrackerConfig::default();
    let config = TrackerConfig {
        utc_offset_minutes,
        flush_interval_ms: u64::try_from(flush_interval_ms)
            .ok()
            .filter(|ms| *ms > 0)
            .unwrap_or(defaults.flush_interval_ms),
        ..defaults
    };
    config.validate()?;

    let backend: Arc<dyn KeyValueStore> = if data_dir.is_empty() {
        Arc::new(MemoryStore::new())
    } else {
        Arc::new(FileStore::open(data_dir)?)
    };

    let tracker = Arc::new(StepTracker::new(
        user_id,
        DetectorConfig::default(),
        config.utc_offset()?,
        DailyAggregateStore::new(backend),
    )?);
    tracker.start()?;
    let flush = PeriodicFlush::start(Arc::clone(&tracker), config.flush_interval())?;

    log::info!("[StepTracker] tracking started for {}", user_id);
    *slot = Some(ActiveSession { tracker, flush });
    Ok(())
}

/// JNI: Push accelerometer sample
/// Parameters: x, y, z (m/s²), timestamp (ms since epoch)
/// Returns: 1 when a step registered, 0 otherwise, -1 on error (throws Java exception)
#[no_mangle]
pub extern "C" fn Java_com_example_steptracker_JniBinding_pushAccelSample(
    mut env: JNIEnv,
    _class: JClass,
    x: jdouble,
    y: jdouble,
    z: jdouble,
    timestamp: jlong,
) -> jint {
    let result = push_accel_sample_impl(x, y, z, timestamp).map(jint::from);
    return_code(&mut env, result)
}

/// Samples that arrive before tracking starts (or after it stops) are ignored
pub fn push_accel_sample_impl(x: f64, y: f64, z: f64, timestamp: i64) -> JResult<bool> {
    let slot = session_slot()?;
    let Some(session) = slot.as_ref() else {
        return Ok(false);
    };
    let event = session
        .tracker
        .on_sample(&MotionSample::new(x, y, z, timestamp))?;
    Ok(event.is_some())
}

/// JNI: Current totals as JSON `{steps, duration, isReady, userId, date}`
#[no_mangle]
pub extern "C" fn Java_com_example_steptracker_JniBinding_getSnapshotJson(
    mut env: JNIEnv,
    _class: JClass,
) -> jstring {
    let result = snapshot_json_impl();
    return_string(&mut env, result)
}

pub fn snapshot_json_impl() -> JResult<String> {
    let slot = session_slot()?;
    match slot.as_ref() {
        Some(session) => {
            let snapshot = session.tracker.snapshot()?;
            serde_json::to_string(&snapshot)
                .map_err(|e| BindingError::Tracker(TrackerError::Serialization(e.to_string())))
        }
        None => Ok(r#"{"steps":0,"duration":0,"isReady":false}"#.to_string()),
    }
}

/// JNI: Persist now (e.g. when the app is backgrounded)
/// Returns: 0 on success, -1 on error (throws Java exception)
#[no_mangle]
pub extern "C" fn Java_com_example_steptracker_JniBinding_flush(
    mut env: JNIEnv,
    _class: JClass,
) -> jint {
    let result = flush_impl().map(|_| 0);
    return_code(&mut env, result)
}

pub fn flush_impl() -> JResult<()> {
    let slot = session_slot()?;
    let session = slot.as_ref().ok_or(TrackerError::NotRunning)?;
    session.tracker.flush()?;
    Ok(())
}

/// JNI: Stop the timer, write the final record and end tracking
/// Returns: 0 on success, -1 on error (throws Java exception)
#[no_mangle]
pub extern "C" fn Java_com_example_steptracker_JniBinding_stopTracking(
    mut env: JNIEnv,
    _class: JClass,
) -> jint {
    let result = stop_tracking_impl().map(|_| 0);
    return_code(&mut env, result)
}

pub fn stop_tracking_impl() -> JResult<()> {
    let session = session_slot()?.take().ok_or(TrackerError::NotRunning)?;
    session.flush.stop();
    session.tracker.stop()?;
    log::info!("[StepTracker] tracking stopped for {}", session.tracker.user_id());
    Ok(())
}

/// JNI: Message to show when the sensor could not be used
/// Parameters: code (0 = permission denied, anything else = sensor unavailable)
#[no_mangle]
pub extern "C" fn Java_com_example_steptracker_JniBinding_sensorErrorMessage(
    mut env: JNIEnv,
    _class: JClass,
    code: jint,
) -> jstring {
    let result = Ok(sensor_error_message(code).to_string());
    return_string(&mut env, result)
}

pub fn sensor_error_message(code: i32) -> &'static str {
    let error = if code == 0 {
        TrackerError::PermissionDenied("refused by platform".to_string())
    } else {
        TrackerError::SensorUnavailable("reported by platform".to_string())
    };
    log::warn!("[StepTracker] tracking not started: {}", error);
    error.user_message().unwrap_or("Step counting is unavailable.")
}

#[cfg(test)]
mod tests {
    use super::*;

    // The session slot is process-global, so the whole lifecycle runs in one test
    #[test]
    fn test_session_lifecycle() {
        assert!(!push_accel_sample_impl(0.0, 0.0, 11.5, 0).unwrap());
        assert!(snapshot_json_impl().unwrap().contains("\"isReady\":false"));
        assert!(matches!(
            stop_tracking_impl(),
            Err(BindingError::Tracker(TrackerError::NotRunning))
        ));

        start_tracking_impl("kotlin-user", "", 0, 0).unwrap();
        assert!(matches!(
            start_tracking_impl("kotlin-user", "", 0, 0),
            Err(BindingError::Tracker(TrackerError::AlreadyRunning))
        ));

        let now = now_ms();
        assert!(!push_accel_sample_impl(0.0, 0.0, 9.8, now).unwrap());
        assert!(push_accel_sample_impl(0.0, 0.0, 11.5, now + 100).unwrap());
        assert!(!push_accel_sample_impl(0.0, 0.0, 9.8, now + 200).unwrap());

        let json = snapshot_json_impl().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["steps"], 1);
        assert_eq!(value["isReady"], true);

        flush_impl().unwrap();
        stop_tracking_impl().unwrap();
        assert!(matches!(
            flush_impl(),
            Err(BindingError::Tracker(TrackerError::NotRunning))
        ));
    }

    #[test]
    fn test_sensor_error_messages_differ() {
        assert_ne!(sensor_error_message(0), sensor_error_message(1));
        assert!(sensor_error_message(0).contains("permission"));
    }

    fn now_ms() -> i64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0)
    }
}
