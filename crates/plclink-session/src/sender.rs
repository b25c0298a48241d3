use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::error::{Result, SessionError};

/// Default tick interval (50 Hz).
pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(20);

/// Shortest accepted tick interval.
pub const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Longest accepted tick interval.
pub const MAX_INTERVAL: Duration = Duration::from_millis(10_000);

/// Check a tick interval against the accepted range.
pub fn validate_interval(interval: Duration) -> Result<Duration> {
    if interval < MIN_INTERVAL || interval > MAX_INTERVAL {
        return Err(SessionError::InvalidInterval(interval.as_millis() as u64));
    }
    Ok(interval)
}

/// Calls a tick closure at a fixed rate on its own thread.
///
/// Ticks are scheduled against absolute deadlines so a slow tick does not
/// shift every later one. If a tick overruns a whole period the missed
/// deadlines are skipped rather than fired back to back.
///
/// The closure returns `Err` to report a failed tick; the failure is
/// logged and the next tick runs normally.
pub struct PeriodicSender {
    interval: Duration,
    stop_tx: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl PeriodicSender {
    /// Start ticking every `interval`. The first tick fires immediately.
    pub fn start<F, E>(interval: Duration, mut tick: F) -> Result<Self>
    where
        F: FnMut() -> std::result::Result<(), E> + Send + 'static,
        E: std::fmt::Display,
    {
        let interval = validate_interval(interval)?;
        let (stop_tx, stop_rx) = mpsc::channel::<()>();

        let handle = std::thread::Builder::new()
            .name("plclink-sender".to_string())
            .spawn(move || {
                let mut next = Instant::now();
                let mut failures = 0u64;
                loop {
                    if let Err(err) = tick() {
                        failures += 1;
                        warn!(error = %err, failures, "tick failed; skipped");
                    }

                    next += interval;
                    let now = Instant::now();
                    if next < now {
                        let behind = now.duration_since(next);
                        let skipped = behind.as_nanos() / interval.as_nanos();
                        next += interval * (skipped as u32 + 1);
                    }

                    match stop_rx.recv_timeout(next.saturating_duration_since(Instant::now())) {
                        Err(RecvTimeoutError::Timeout) => continue,
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                debug!("periodic sender stopped");
            })
            .map_err(SessionError::Spawn)?;

        debug!(interval_ms = interval.as_millis() as u64, "periodic sender started");

        Ok(Self {
            interval,
            stop_tx: Some(stop_tx),
            handle: Some(handle),
        })
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn is_running(&self) -> bool {
        self.stop_tx.is_some()
    }

    /// Stop ticking and wait for the thread to exit.
    ///
    /// Wakes the thread immediately if it is waiting for the next deadline.
    /// Calling `stop` again is a no-op. Must not be called from inside the
    /// tick closure.
    pub fn stop(&mut self) {
        let Some(stop_tx) = self.stop_tx.take() else {
            return;
        };
        let _ = stop_tx.send(());
        if let Some(handle) = self.handle.take() {
            if handle.thread().id() == std::thread::current().id() {
                return;
            }
            let _ = handle.join();
        }
    }
}

impl Drop for PeriodicSender {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for PeriodicSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeriodicSender")
            .field("interval", &self.interval)
            .field("running", &self.is_running())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use super::*;

    #[test]
    fn ticks_repeatedly() {
        let count = Arc::new(AtomicU32::new(0));
        let ticks = Arc::clone(&count);
        let mut sender = PeriodicSender::start(Duration::from_millis(5), move || {
            ticks.fetch_add(1, Ordering::SeqCst);
            Ok::<(), String>(())
        })
        .expect("sender should start");

        std::thread::sleep(Duration::from_millis(100));
        sender.stop();
        assert!(count.load(Ordering::SeqCst) >= 5);
    }

    #[test]
    fn stop_is_immediate_and_idempotent() {
        let count = Arc::new(AtomicU32::new(0));
        let ticks = Arc::clone(&count);
        let mut sender = PeriodicSender::start(Duration::from_secs(10), move || {
            ticks.fetch_add(1, Ordering::SeqCst);
            Ok::<(), String>(())
        })
        .expect("sender should start");

        std::thread::sleep(Duration::from_millis(20));
        let started = Instant::now();
        sender.stop();
        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(!sender.is_running());
        assert_eq!(count.load(Ordering::SeqCst), 1);

        sender.stop();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn failed_tick_does_not_stop_the_loop() {
        let count = Arc::new(AtomicU32::new(0));
        let ticks = Arc::clone(&count);
        let mut sender = PeriodicSender::start(Duration::from_millis(2), move || {
            let n = ticks.fetch_add(1, Ordering::SeqCst);
            if n % 2 == 0 {
                Err("link down")
            } else {
                Ok(())
            }
        })
        .expect("sender should start");

        std::thread::sleep(Duration::from_millis(60));
        sender.stop();
        assert!(count.load(Ordering::SeqCst) >= 4);
    }

    #[test]
    fn drop_stops_sender() {
        let count = Arc::new(AtomicU32::new(0));
        let ticks = Arc::clone(&count);
        let sender = PeriodicSender::start(Duration::from_millis(2), move || {
            ticks.fetch_add(1, Ordering::SeqCst);
            Ok::<(), String>(())
        })
        .expect("sender should start");

        std::thread::sleep(Duration::from_millis(20));
        drop(sender);
        let after_drop = count.load(Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(count.load(Ordering::SeqCst), after_drop);
    }

    #[test]
    fn interval_bounds() {
        assert!(validate_interval(Duration::from_millis(1)).is_ok());
        assert!(validate_interval(Duration::from_millis(10_000)).is_ok());
        assert!(matches!(
            validate_interval(Duration::ZERO),
            Err(SessionError::InvalidInterval(0))
        ));
        assert!(matches!(
            validate_interval(Duration::from_millis(10_001)),
            Err(SessionError::InvalidInterval(10_001))
        ));
    }
}
