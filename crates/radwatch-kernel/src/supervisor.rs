//! [`Supervisor`] – composes the beam, the heartbeat watchdog, the command
//! listener and the file receiver into one unit with coordinated start and
//! timeout-bounded stop.
//!
//! Every socket is bound before any thread starts, so an address conflict
//! fails construction without leaving half the monitors running.
//! [`Supervisor::stop`] signals every monitor first and only then joins
//! each with a bounded timeout; a monitor that does not finish in time is
//! logged and reported, never allowed to block the others.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use crossbeam::channel::Sender;
use radwatch_hal::{BeamActuator, PowerSwitch};
use radwatch_types::{RadError, SwitchStatus, SwitchTarget};
use tracing::{error, info};

use crate::command::{BoardShutdown, CommandListener, CommandSettings};
use crate::file_receiver::{FileReceiver, TransferSettings};
use crate::monitor::{MonitorExit, MonitorHandle};
use crate::watchdog::{HeartbeatSettings, HeartbeatWatchdog};

/// Everything the supervisor needs to start its monitors.
#[derive(Debug, Clone)]
pub struct SupervisorSettings {
    pub heartbeat: HeartbeatSettings,
    pub command: CommandSettings,
    pub transfer: TransferSettings,
    pub switch_target: SwitchTarget,
    pub join_timeout: Duration,
}

// ────────────────────────────────────────────────────────────────────────────
// Board power cutter
// ────────────────────────────────────────────────────────────────────────────

/// Powers the DUT off through the network switch.
pub struct BoardPowerCutter {
    switch: Arc<dyn PowerSwitch>,
    target: SwitchTarget,
}

impl BoardPowerCutter {
    pub fn new(switch: Arc<dyn PowerSwitch>, target: SwitchTarget) -> Self {
        Self { switch, target }
    }
}

impl BoardShutdown for BoardPowerCutter {
    fn shutdown_board(&self) -> Result<String, RadError> {
        error!(
            switch_ip = %self.target.ip,
            switch_port = self.target.port,
            "Received command to shutdown board due to critical measurement."
        );
        let result = self.switch.set_outlet(SwitchStatus::Off, &self.target);
        match &result {
            Ok(out) => error!(result = %out, "Sent command for switch to turn off."),
            Err(e) => error!(error = %e, "Switch did not accept the power-off command."),
        }
        result
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Supervisor
// ────────────────────────────────────────────────────────────────────────────

/// Owns the beam-side monitors.
pub struct Supervisor {
    beam: Arc<BeamActuator>,
    board: Arc<BoardPowerCutter>,
    monitors: Vec<MonitorHandle>,
    join_timeout: Duration,
    heartbeat_addr: SocketAddr,
    command_addr: SocketAddr,
    transfer_addr: Option<SocketAddr>,
}

impl Supervisor {
    /// Bind every channel, then start the watchdog, the command listener and
    /// (if enabled) the file receiver. Thread exits are reported on `exits`.
    ///
    /// # Errors
    ///
    /// Returns [`RadError::Bind`] if any address is unavailable, or the
    /// spawn error if a thread cannot be created; monitors already started
    /// are stopped before the error is returned.
    pub fn start(
        settings: SupervisorSettings,
        beam: Arc<BeamActuator>,
        switch: Arc<dyn PowerSwitch>,
        exits: Sender<MonitorExit>,
    ) -> Result<Self, RadError> {
        let board = Arc::new(BoardPowerCutter::new(switch, settings.switch_target.clone()));

        let watchdog = HeartbeatWatchdog::bind(&settings.heartbeat, Arc::clone(&beam))?;
        let listener = CommandListener::bind(
            &settings.command,
            Arc::clone(&beam),
            Arc::clone(&board) as Arc<dyn BoardShutdown>,
        )?;
        let receiver = if settings.transfer.enabled {
            Some(FileReceiver::bind(&settings.transfer)?)
        } else {
            None
        };

        let mut supervisor = Self {
            heartbeat_addr: watchdog.local_addr()?,
            command_addr: listener.local_addr()?,
            transfer_addr: receiver.as_ref().map(FileReceiver::local_addr).transpose()?,
            beam,
            board,
            monitors: Vec::with_capacity(3),
            join_timeout: settings.join_timeout,
        };

        let spawned = (|| {
            supervisor.monitors.push(watchdog.spawn(exits.clone())?);
            supervisor.monitors.push(listener.spawn(exits.clone())?);
            if let Some(receiver) = receiver {
                supervisor.monitors.push(receiver.spawn(exits)?);
            }
            Ok::<(), RadError>(())
        })();
        if let Err(e) = spawned {
            supervisor.stop();
            return Err(e);
        }

        info!(
            heartbeat = %supervisor.heartbeat_addr,
            command = %supervisor.command_addr,
            monitors = supervisor.monitors.len(),
            "Supervisor started"
        );
        Ok(supervisor)
    }

    pub fn beam(&self) -> &Arc<BeamActuator> {
        &self.beam
    }

    pub fn heartbeat_addr(&self) -> SocketAddr {
        self.heartbeat_addr
    }

    pub fn command_addr(&self) -> SocketAddr {
        self.command_addr
    }

    pub fn transfer_addr(&self) -> Option<SocketAddr> {
        self.transfer_addr
    }

    /// Cut mains power to the DUT through the network switch.
    pub fn shutdown_board(&self) -> Result<String, RadError> {
        self.board.shutdown_board()
    }

    /// Signal every monitor, then join each with the configured timeout.
    ///
    /// Join failures are logged and returned, never raised. Calling `stop`
    /// again after it has run is a no-op.
    pub fn stop(&mut self) -> Vec<RadError> {
        if self.monitors.is_empty() {
            return Vec::new();
        }
        info!("Supervisor received signal to stop monitors.");
        for monitor in &self.monitors {
            monitor.stop();
        }

        let mut failures = Vec::new();
        for mut monitor in self.monitors.drain(..) {
            if let Err(e) = monitor.join(self.join_timeout) {
                error!(monitor = monitor.name(), error = %e, "Error while joining monitor");
                failures.push(e);
            }
        }
        self.beam.close();
        info!(failures = failures.len(), "Supervisor finished joining monitors.");
        failures
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam::channel;
    use radwatch_hal::sim::{SimRelay, SimSwitch};
    use std::thread;
    use std::time::Instant;

    fn settings(transfer_dir: &std::path::Path) -> SupervisorSettings {
        SupervisorSettings {
            heartbeat: HeartbeatSettings {
                port: 0,
                timeout_secs: 0.05,
                ..HeartbeatSettings::default()
            },
            command: CommandSettings {
                port: 0,
                timeout_secs: 0.05,
                ..CommandSettings::default()
            },
            transfer: TransferSettings {
                port: 0,
                timeout_secs: 0.05,
                download_path: transfer_dir.to_path_buf(),
                ..TransferSettings::default()
            },
            switch_target: SwitchTarget {
                model: "default".into(),
                ip: "192.168.1.100".into(),
                port: 1,
            },
            join_timeout: Duration::from_millis(200),
        }
    }

    fn start() -> (Supervisor, SimSwitch, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let switch = SimSwitch::new();
        let beam = Arc::new(BeamActuator::new(SimRelay::new("beam")));
        let (tx, _rx) = channel::unbounded();
        let sup = Supervisor::start(settings(dir.path()), beam, Arc::new(switch.clone()), tx).unwrap();
        (sup, switch, dir)
    }

    #[test]
    fn starts_all_monitors_and_stops_cleanly() {
        let (mut sup, _switch, _dir) = start();
        assert_eq!(sup.monitors.len(), 3);
        assert!(sup.transfer_addr().is_some());
        assert!(sup.stop().is_empty());
        assert!(sup.monitors.is_empty());
        // Idempotent.
        assert!(sup.stop().is_empty());
    }

    #[test]
    fn shutdown_board_turns_outlet_off() {
        let (sup, switch, _dir) = start();
        sup.shutdown_board().unwrap();
        let calls = switch.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, SwitchStatus::Off);
        assert_eq!(calls[0].1.ip, "192.168.1.100");
    }

    #[test]
    fn bind_conflict_fails_fast() {
        let (sup, _switch, dir) = start();
        let mut clash = settings(dir.path());
        clash.command.port = sup.command_addr().port();
        let beam = Arc::new(BeamActuator::new(SimRelay::new("beam")));
        let (tx, _rx) = channel::unbounded();
        let err = Supervisor::start(clash, beam, Arc::new(SimSwitch::new()), tx)
            .err()
            .unwrap();
        assert!(err.is_configuration());
    }

    #[test]
    fn hung_monitor_does_not_block_the_others() {
        let (mut sup, _switch, _dir) = start();
        let (tx, _rx) = channel::unbounded();
        let hung = MonitorHandle::spawn("hung", tx, |_stop| {
            thread::sleep(Duration::from_secs(2));
            Ok(())
        })
        .unwrap();
        sup.monitors.insert(0, hung);

        let started = Instant::now();
        let failures = sup.stop();
        assert!(started.elapsed() < Duration::from_millis(1500));
        assert_eq!(failures.len(), 1);
        assert!(matches!(
            &failures[0],
            RadError::JoinTimeout { monitor, .. } if monitor == "hung"
        ));
        assert!(sup.monitors.is_empty());
        assert!(!sup.beam().is_open());
    }
}
