//! [`MonitorHandle`] – one dedicated OS thread per concurrent monitor.
//!
//! A monitor is a plain loop body that runs until its [`StopSignal`] is set.
//! The handle owns the thread and exposes `stop()` / `join(timeout)`; every
//! thread exit (normal return, error, or panic) is reported exactly once as
//! a [`MonitorExit`] on the shared exit channel so a supervising context can
//! react to failures without unwinding across threads.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use radwatch_types::RadError;
use tracing::{debug, error};

/// Smallest wait accepted by socket read timeouts.
const MIN_WAIT: Duration = Duration::from_millis(1);

/// Convert a configured wait in seconds into a socket timeout.
///
/// Negative values mean "wait indefinitely" and map to `None`, as do values
/// too large to represent. Zero is clamped to one millisecond because sockets
/// reject a zero timeout.
pub fn wait_from_secs(secs: f64) -> Option<Duration> {
    if secs < 0.0 {
        return None;
    }
    Duration::try_from_secs_f64(secs)
        .ok()
        .map(|wait| wait.max(MIN_WAIT))
}

/// Cooperative cancellation flag observed at loop boundaries.
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Reported once per monitor thread when it finishes.
#[derive(Debug, Clone)]
pub struct MonitorExit {
    pub monitor: String,
    pub outcome: Result<(), RadError>,
}

/// Owning handle for a running monitor thread.
pub struct MonitorHandle {
    name: String,
    stop: StopSignal,
    done: Receiver<()>,
    thread: Option<JoinHandle<()>>,
}

impl MonitorHandle {
    /// Spawn `body` on a named thread. `body` receives the handle's
    /// [`StopSignal`] and should return once it observes it.
    ///
    /// # Errors
    ///
    /// Returns [`RadError::MonitorFailed`] if the OS refuses to create the
    /// thread.
    pub fn spawn<F>(
        name: impl Into<String>,
        exits: Sender<MonitorExit>,
        body: F,
    ) -> Result<Self, RadError>
    where
        F: FnOnce(StopSignal) -> Result<(), RadError> + Send + 'static,
    {
        let name = name.into();
        let stop = StopSignal::new();
        let (done_tx, done_rx) = channel::bounded::<()>(1);

        let thread_stop = stop.clone();
        let thread_name = name.clone();
        let thread = thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                // Dropped last, after the exit has been reported.
                let _done = done_tx;
                let outcome = match panic::catch_unwind(AssertUnwindSafe(|| body(thread_stop))) {
                    Ok(result) => result,
                    Err(payload) => Err(RadError::MonitorFailed {
                        monitor: thread_name.clone(),
                        details: format!("panicked: {}", panic_message(payload.as_ref())),
                    }),
                };
                match &outcome {
                    Ok(()) => debug!(monitor = %thread_name, "Monitor thread is stopping."),
                    Err(e) => error!(monitor = %thread_name, error = %e, "Monitor thread terminated"),
                }
                let _ = exits.send(MonitorExit {
                    monitor: thread_name,
                    outcome,
                });
            })
            .map_err(|e| RadError::MonitorFailed {
                monitor: name.clone(),
                details: format!("could not spawn thread: {e}"),
            })?;

        Ok(Self {
            name,
            stop,
            done: done_rx,
            thread: Some(thread),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Ask the monitor to stop. Does not block.
    pub fn stop(&self) {
        self.stop.set();
    }

    /// `true` once the thread has returned (or was already joined).
    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().is_none_or(|t| t.is_finished())
    }

    /// Wait up to `timeout` for the thread to finish.
    ///
    /// # Errors
    ///
    /// Returns [`RadError::JoinTimeout`] if the thread is still running when
    /// the timeout expires; the handle stays joinable for a later attempt.
    pub fn join(&mut self, timeout: Duration) -> Result<(), RadError> {
        let Some(thread) = self.thread.take() else {
            return Ok(());
        };
        match self.done.recv_timeout(timeout) {
            Err(RecvTimeoutError::Timeout) => {
                self.thread = Some(thread);
                Err(RadError::JoinTimeout {
                    monitor: self.name.clone(),
                    timeout_ms: timeout.as_millis(),
                })
            }
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                thread.join().map_err(|payload| RadError::MonitorFailed {
                    monitor: self.name.clone(),
                    details: format!("panicked: {}", panic_message(payload.as_ref())),
                })
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
