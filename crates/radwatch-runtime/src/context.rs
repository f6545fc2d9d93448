//! [`SupervisionContext`] – the one object that owns every running monitor.
//!
//! Interrupt handlers and the main thread never reach for global state. The
//! main thread calls [`SupervisionContext::run`] and blocks until either an
//! operator interrupt arrives or any monitor thread exits on its own. Both
//! lead to the same [`SupervisionContext::teardown`]:
//!
//! 1. signal the power monitor,
//! 2. stop and join the beam-side monitors (the beam ends closed),
//! 3. join the power monitor,
//! 4. release the power supply.
//!
//! Teardown is idempotent and also runs on drop, so a panic in the main
//! thread still walks the same path.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crossbeam::channel::{self, Receiver};
use radwatch_hal::{BeamActuator, PowerSwitch};
use radwatch_kernel::{MonitorExit, Supervisor, SupervisorSettings};
use radwatch_psu::PowerSupervisor;
use radwatch_types::RadError;
use tracing::{error, info};

/// Exit code for an operator interrupt (128 + SIGINT).
pub const EXIT_INTERRUPTED: i32 = 130;
/// Exit code for a monitor failure (`ECHILD`).
pub const EXIT_MONITOR_FAILED: i32 = 10;

/// Why [`SupervisionContext::run`] returned.
#[derive(Debug, Clone, PartialEq)]
pub enum ExitReason {
    Interrupted,
    MonitorFailed { monitor: String, error: RadError },
}

impl ExitReason {
    pub fn exit_code(&self) -> i32 {
        match self {
            ExitReason::Interrupted => EXIT_INTERRUPTED,
            ExitReason::MonitorFailed { .. } => EXIT_MONITOR_FAILED,
        }
    }
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitReason::Interrupted => f.write_str("interrupted by operator"),
            ExitReason::MonitorFailed { monitor, error } => {
                write!(f, "monitor {monitor} failed: {error}")
            }
        }
    }
}

pub struct SupervisionContext {
    supervisor: Supervisor,
    power: Option<PowerSupervisor>,
    exits: Receiver<MonitorExit>,
    join_timeout: Duration,
    shutdown_board_on_fatal: bool,
    torn_down: bool,
}

impl SupervisionContext {
    /// Start the power monitor (if a supply is attached) and every beam-side
    /// monitor.
    ///
    /// # Errors
    ///
    /// Any start-up error. Whatever was already running is torn down and the
    /// power supply is released before this returns.
    pub fn start(
        settings: SupervisorSettings,
        beam: Arc<BeamActuator>,
        switch: Arc<dyn PowerSwitch>,
        mut power: Option<PowerSupervisor>,
        shutdown_board_on_fatal: bool,
    ) -> Result<Self, RadError> {
        let (exits_tx, exits) = channel::unbounded();
        let join_timeout = settings.join_timeout;

        let started = match power.as_mut() {
            Some(power) => power.start_monitor(exits_tx.clone()),
            None => Ok(()),
        }
        .and_then(|()| Supervisor::start(settings, beam, switch, exits_tx));

        let supervisor = match started {
            Ok(supervisor) => supervisor,
            Err(e) => {
                error!(error = %e, "Supervisor start-up failed");
                if let Some(power) = power.as_mut() {
                    power.stop_monitor();
                    if let Err(join_err) = power.join_monitor(join_timeout) {
                        error!(error = %join_err, "Error while joining power monitor");
                    }
                    power.shutdown(Some(&e.to_string()));
                }
                return Err(e);
            }
        };

        Ok(Self {
            supervisor,
            power,
            exits,
            join_timeout,
            shutdown_board_on_fatal,
            torn_down: false,
        })
    }

    pub fn supervisor(&self) -> &Supervisor {
        &self.supervisor
    }

    /// Block until `interrupts` fires or a monitor exits, then tear down.
    ///
    /// Any monitor exit before teardown counts as a failure, including a
    /// clean one: monitors only return once they are asked to stop.
    pub fn run(&mut self, interrupts: &Receiver<()>) -> ExitReason {
        let reason = crossbeam::select! {
            recv(interrupts) -> _ => {
                error!("Interrupt detected, exiting gracefully.");
                ExitReason::Interrupted
            }
            recv(self.exits) -> exit => match exit {
                Ok(MonitorExit { monitor, outcome }) => {
                    let error = outcome.err().unwrap_or_else(|| RadError::MonitorFailed {
                        monitor: monitor.clone(),
                        details: "exited without being asked to stop".to_string(),
                    });
                    error!(monitor = %monitor, error = %error, "Error at monitor thread");
                    ExitReason::MonitorFailed { monitor, error }
                }
                Err(_) => ExitReason::MonitorFailed {
                    monitor: "supervisor".to_string(),
                    error: RadError::MonitorFailed {
                        monitor: "supervisor".to_string(),
                        details: "monitor exit channel closed".to_string(),
                    },
                },
            },
        };

        self.teardown(Some(&reason.to_string()));

        if self.shutdown_board_on_fatal
            && matches!(reason, ExitReason::MonitorFailed { .. })
            && let Err(e) = self.supervisor.shutdown_board()
        {
            error!(error = %e, "Board shutdown after monitor failure did not succeed");
        }
        reason
    }

    /// Stop and join every monitor and release the power supply. Only the
    /// first call has any effect; later calls return no failures.
    pub fn teardown(&mut self, cause: Option<&str>) -> Vec<RadError> {
        if self.torn_down {
            return Vec::new();
        }
        self.torn_down = true;
        info!("Stopping all threads");

        if let Some(power) = &self.power {
            power.stop_monitor();
        }
        let mut failures = self.supervisor.stop();
        if let Some(power) = self.power.as_mut() {
            if let Err(e) = power.join_monitor(self.join_timeout) {
                error!(error = %e, "Error while joining power monitor");
                failures.push(e);
            }
            power.shutdown(cause);
        }
        info!(failures = failures.len(), "All threads stopped");
        failures
    }
}

impl Drop for SupervisionContext {
    fn drop(&mut self) {
        self.teardown(None);
    }
}
