//! [`HeartbeatWatchdog`] – fail-closed beam interlock driven by DUT liveness.
//!
//! The DUT sends a small datagram carrying the heartbeat marker at a regular
//! interval. The watchdog runs monitoring *sessions*:
//!
//! ```text
//!  AwaitingFirstBeat ──first beat──▶ Monitoring
//!        │                               │
//!        │ stop                          │ timeout / wrong message / stop
//!        ▼                               ▼
//!    session ends ◀──────────────────────┘
//!        │
//!        ├─ beam force-closed, reason logged
//!        └─ new session, or Stopped if a global stop was requested
//! ```
//!
//! While awaiting the first beat, an expired wait simply waits again and
//! stray datagrams are ignored with a warning. Once monitoring, any expired
//! wait or any non-heartbeat datagram ends the session. Whatever ends a
//! session, the beam is closed before the reason is logged.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam::channel::Sender;
use radwatch_hal::BeamActuator;
use radwatch_types::{HEARTBEAT_MARKER, RadError, contains_marker};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::datagram::DatagramChannel;
use crate::monitor::{MonitorExit, MonitorHandle, StopSignal, wait_from_secs};

/// Pause after a socket error before the next session starts.
const RECEIVE_ERROR_BACKOFF: Duration = Duration::from_millis(100);

// ────────────────────────────────────────────────────────────────────────────
// Settings
// ────────────────────────────────────────────────────────────────────────────

/// Heartbeat channel configuration (`[heartbeat]` section).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatSettings {
    pub ip: String,
    pub port: u16,
    /// Seconds to wait for each beat. Negative waits indefinitely.
    pub timeout_secs: f64,
    /// Emit a liveness line every this many beats (0 disables it).
    pub log_every: u64,
    /// Open the beam as soon as the first heartbeat of a session arrives.
    pub open_on_first_beat: bool,
}

impl Default for HeartbeatSettings {
    fn default() -> Self {
        Self {
            ip: "127.0.0.1".to_string(),
            port: 1234,
            timeout_secs: 2.0,
            log_every: 10,
            open_on_first_beat: false,
        }
    }
}

impl HeartbeatSettings {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Session state
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchdogPhase {
    AwaitingFirstBeat,
    Monitoring,
    Stopped,
}

/// Why a monitoring session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEnd {
    StoppedWhileWaitingFirstBeat,
    Timeout,
    WrongMessage(String),
    StopRequested,
    ReceiveError(String),
}

impl fmt::Display for SessionEnd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionEnd::StoppedWhileWaitingFirstBeat => write!(f, "stopped while waiting for first beat"),
            SessionEnd::Timeout => write!(f, "timeout"),
            SessionEnd::WrongMessage(payload) => write!(f, "wrong message: {payload:?}"),
            SessionEnd::StopRequested => write!(f, "stop requested"),
            SessionEnd::ReceiveError(e) => write!(f, "receive error: {e}"),
        }
    }
}

/// Transient per-attempt state.
#[derive(Debug)]
struct WatchdogSession {
    id: Uuid,
    phase: WatchdogPhase,
    last_heartbeat: Option<Instant>,
    beat_count: u64,
}

impl WatchdogSession {
    fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            phase: WatchdogPhase::AwaitingFirstBeat,
            last_heartbeat: None,
            beat_count: 0,
        }
    }
}

enum Received {
    Nothing,
    Heartbeat,
    Other(String),
    Failed(String),
}

/// Closes the beam when dropped, including during unwinding.
struct CloseOnExit(Arc<BeamActuator>);

impl Drop for CloseOnExit {
    fn drop(&mut self) {
        self.0.close();
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Watchdog
// ────────────────────────────────────────────────────────────────────────────

/// Waits for heartbeats and keeps the beam closed whenever they are not
/// current.
pub struct HeartbeatWatchdog {
    channel: DatagramChannel,
    beam: Arc<BeamActuator>,
    log_every: u64,
    open_on_first_beat: bool,
    phase: WatchdogPhase,
}

impl HeartbeatWatchdog {
    /// Bind the heartbeat address.
    ///
    /// # Errors
    ///
    /// Returns [`RadError::Bind`] if the address is unavailable.
    pub fn bind(settings: &HeartbeatSettings, beam: Arc<BeamActuator>) -> Result<Self, RadError> {
        let channel = DatagramChannel::bind(
            "heartbeat watchdog",
            &settings.addr(),
            wait_from_secs(settings.timeout_secs),
        )?;
        Ok(Self {
            channel,
            beam,
            log_every: settings.log_every,
            open_on_first_beat: settings.open_on_first_beat,
            phase: WatchdogPhase::AwaitingFirstBeat,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, RadError> {
        self.channel.local_addr()
    }

    pub fn phase(&self) -> WatchdogPhase {
        self.phase
    }

    /// Move the watchdog onto its own thread.
    pub fn spawn(mut self, exits: Sender<MonitorExit>) -> Result<MonitorHandle, RadError> {
        MonitorHandle::spawn("heartbeat-watchdog", exits, move |stop| self.run(&stop))
    }

    /// Run sessions back to back until `stop` is set.
    pub fn run(&mut self, stop: &StopSignal) -> Result<(), RadError> {
        while !stop.is_set() {
            let end = {
                let _closer = CloseOnExit(Arc::clone(&self.beam));
                self.run_session(stop)
            };
            warn!(reason = %end, "Stopped monitoring heartbeat. Reason: {end}");
            if let SessionEnd::ReceiveError(_) = end {
                thread::sleep(RECEIVE_ERROR_BACKOFF);
            }
            if !stop.is_set() {
                debug!("Restarted the heartbeat monitor.");
            }
        }
        self.phase = WatchdogPhase::Stopped;
        info!("Heartbeat monitor thread is stopping.");
        Ok(())
    }

    /// Run one monitoring session and report why it ended.
    ///
    /// The caller is responsible for closing the beam afterwards; [`run`]
    /// does so on every exit.
    ///
    /// [`run`]: Self::run
    pub fn run_session(&mut self, stop: &StopSignal) -> SessionEnd {
        let mut session = WatchdogSession::new();
        self.phase = session.phase;
        debug!(session = %session.id, "Waiting for first heartbeat.");

        loop {
            if stop.is_set() {
                return SessionEnd::StoppedWhileWaitingFirstBeat;
            }
            match self.receive() {
                Received::Nothing => continue,
                Received::Heartbeat => break,
                Received::Other(payload) => {
                    warn!(session = %session.id, payload = %payload, "Heartbeat monitor got a message other than a heartbeat");
                }
                Received::Failed(e) => return SessionEnd::ReceiveError(e),
            }
        }

        session.phase = WatchdogPhase::Monitoring;
        session.last_heartbeat = Some(Instant::now());
        self.phase = session.phase;
        debug!(session = %session.id, "Got first heartbeat. Entering monitoring stage.");
        if self.open_on_first_beat {
            self.beam.open();
        }

        loop {
            if stop.is_set() {
                return SessionEnd::StopRequested;
            }
            match self.receive() {
                Received::Nothing => return SessionEnd::Timeout,
                Received::Other(payload) => {
                    warn!(session = %session.id, payload = %payload, "Heartbeat monitor got a message other than a heartbeat");
                    return SessionEnd::WrongMessage(payload);
                }
                Received::Failed(e) => return SessionEnd::ReceiveError(e),
                Received::Heartbeat => {
                    let now = Instant::now();
                    if let (Some(wait), Some(last)) = (self.channel.wait(), session.last_heartbeat)
                        && now.duration_since(last) > wait
                    {
                        warn!(session = %session.id, "Got a heartbeat but it arrived after the timeout");
                        return SessionEnd::Timeout;
                    }
                    session.beat_count += 1;
                    if self.log_every > 0 && session.beat_count % self.log_every == 0 {
                        debug!(session = %session.id, beats = session.beat_count, "Heartbeat still alive after {} beats.", session.beat_count);
                    }
                    session.last_heartbeat = Some(now);
                }
            }
        }
    }

    fn receive(&self) -> Received {
        match self.channel.recv() {
            Ok(None) => Received::Nothing,
            Ok(Some(data)) if contains_marker(&data, HEARTBEAT_MARKER) => Received::Heartbeat,
            Ok(Some(data)) => Received::Other(String::from_utf8_lossy(&data).into_owned()),
            Err(e) => Received::Failed(e.to_string()),
        }
    }
}
