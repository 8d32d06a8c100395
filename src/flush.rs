use crate::error::{Result, TrackerError};
use crate::tracker::StepTracker;
use crossbeam::channel::{bounded, select, tick, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Periodic persistence of a tracker's current record.
///
/// Runs on its own thread so it works with or without an async runtime.
/// Stopping, or dropping the handle, joins the thread and performs one last
/// flush.
pub struct PeriodicFlush {
    tracker: Arc<StepTracker>,
    last_ok: Arc<AtomicBool>,
    stop_tx: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl PeriodicFlush {
    pub fn start(tracker: Arc<StepTracker>, interval: Duration) -> Result<Self> {
        if interval.is_zero() {
            return Err(TrackerError::InvalidParameters(
                "flush interval must be non-zero".into(),
            ));
        }

        let (stop_tx, stop_rx) = bounded::<()>(1);
        let ticker = tick(interval);
        let worker = Arc::clone(&tracker);
        let last_ok = Arc::new(AtomicBool::new(true));
        let worker_ok = Arc::clone(&last_ok);

        let handle = thread::Builder::new()
            .name("step-flush".to_string())
            .spawn(move || loop {
                select! {
                    recv(ticker) -> _ => worker_ok.store(flush_logged(&worker), Ordering::Relaxed),
                    recv(stop_rx) -> _ => break,
                }
            })?;

        log::info!(
            "[flush] persisting every {:.1}s for {}",
            interval.as_secs_f64(),
            tracker.user_id()
        );

        Ok(Self {
            tracker,
            last_ok,
            stop_tx: Some(stop_tx),
            handle: Some(handle),
        })
    }

    /// Whether the most recent periodic write succeeded
    pub fn last_flush_ok(&self) -> bool {
        self.last_ok.load(Ordering::Relaxed)
    }

    /// Stop the timer and write the final record
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        // Disconnecting the channel wakes the worker
        drop(self.stop_tx.take());
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::warn!("[flush] worker thread panicked");
            }
            let ok = flush_logged(&self.tracker);
            self.last_ok.store(ok, Ordering::Relaxed);
        }
    }
}

impl Drop for PeriodicFlush {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn flush_logged(tracker: &StepTracker) -> bool {
    match tracker.flush() {
        Ok(()) => {
            log::debug!("[flush] saved record for {}", tracker.user_id());
            true
        }
        Err(TrackerError::NotRunning) => true,
        Err(e) => {
            log::warn!("[flush] save failed, will retry next tick: {}", e);
            false
        }
    }
}
