//! Cancellable background loops (calibration sampler, monitor, recorder,
//! playback).
//!
//! Each `Worker` owns exactly one thread. Stopping sets an atomic flag the
//! loop polls between bus exchanges and inside its sleeps, then waits a
//! bounded time for the thread to finish. A worker that overruns the
//! timeout is detached and logged rather than blocking the caller.
use crossbeam_channel as xch;
use servohand_traits::Clock;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

/// Longest single sleep between stop-flag checks.
const SLEEP_SLICE: Duration = Duration::from_millis(10);
/// Join bound used when a worker is dropped without an explicit stop.
const DROP_JOIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Cooperative cancellation flag handed to the loop body.
#[derive(Debug, Clone, Default)]
pub struct StopToken {
    flag: Arc<AtomicBool>,
}

impl StopToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_stopped(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }

    pub fn stop(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    /// Sleep for `d` in short slices; returns false if stopped meanwhile.
    pub fn sleep(&self, clock: &dyn Clock, d: Duration) -> bool {
        let deadline = clock.now() + d;
        loop {
            if self.is_stopped() {
                return false;
            }
            let remaining = deadline.saturating_duration_since(clock.now());
            if remaining.is_zero() {
                return true;
            }
            clock.sleep(remaining.min(SLEEP_SLICE));
        }
    }
}

pub struct Worker {
    name: &'static str,
    stop: StopToken,
    /// Disconnects when the thread exits (normally or by panic).
    done: xch::Receiver<()>,
    join_handle: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("name", &self.name)
            .field("running", &self.is_running())
            .finish()
    }
}

impl Worker {
    pub fn spawn<F>(name: &'static str, body: F) -> std::io::Result<Self>
    where
        F: FnOnce(StopToken) + Send + 'static,
    {
        let stop = StopToken::new();
        let token = stop.clone();
        let (done_tx, done) = xch::bounded::<()>(1);
        let join_handle = std::thread::Builder::new()
            .name(format!("servohand-{name}"))
            .spawn(move || {
                let _done = done_tx;
                body(token);
                tracing::trace!(worker = name, "worker thread exiting cleanly");
            })?;
        tracing::debug!(worker = name, "worker started");
        Ok(Self {
            name,
            stop,
            done,
            join_handle: Some(join_handle),
        })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// True until the loop body returns.
    pub fn is_running(&self) -> bool {
        self.join_handle.is_some()
            && matches!(self.done.try_recv(), Err(xch::TryRecvError::Empty))
    }

    /// Receiver that disconnects once the loop body has returned.
    pub fn exit_signal(&self) -> xch::Receiver<()> {
        self.done.clone()
    }

    pub fn request_stop(&self) {
        self.stop.stop();
    }

    /// Signal the loop and wait up to `timeout` for it; true if it joined.
    pub fn stop(mut self, timeout: Duration) -> bool {
        self.shutdown(timeout)
    }

    fn shutdown(&mut self, timeout: Duration) -> bool {
        self.stop.stop();
        let Some(handle) = self.join_handle.take() else {
            return true;
        };
        match self.done.recv_timeout(timeout) {
            Ok(()) | Err(xch::RecvTimeoutError::Disconnected) => match handle.join() {
                Ok(()) => {
                    tracing::trace!(worker = self.name, "worker joined");
                    true
                }
                Err(e) => {
                    tracing::warn!(worker = self.name, ?e, "worker thread panicked");
                    true
                }
            },
            Err(xch::RecvTimeoutError::Timeout) => {
                tracing::warn!(
                    worker = self.name,
                    timeout_ms = timeout.as_millis() as u64,
                    "worker did not stop in time; detaching"
                );
                false
            }
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        if self.join_handle.is_some() {
            self.shutdown(DROP_JOIN_TIMEOUT);
        }
    }
}
