//! [`PowerSupervisor`] – owns the supply connection from the remote-control
//! handshake to the final release.
//!
//! Construction runs [`PowerSupervisor::initialize`] and builds the safety
//! monitor; if either fails the supply is shut down before the error is
//! returned. [`PowerSupervisor::shutdown`] is idempotent and also runs on
//! drop, so every exit path leaves the supply out of remote mode with its
//! connection closed.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crossbeam::channel::Sender;
use radwatch_hal::PowerSupply;
use radwatch_kernel::{MonitorExit, MonitorHandle};
use radwatch_types::RadError;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::monitor::{PowerSafetyMonitor, SafetyThresholds};
use crate::{SharedPowerSupply, lock_device};

/// Power-supply configuration (`[power_supply]` section).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PowerSupplySettings {
    /// Device driver name. Only `"sim"` is built in.
    pub driver: String,
    pub update_initial_state: bool,
    pub initial_open: Option<bool>,
    pub initial_voltage: Option<f64>,
    pub initial_current: Option<f64>,
    pub max_voltage: Option<f64>,
    pub max_current: Option<f64>,
    /// Seconds between polls. Fractional values are allowed.
    pub polling_secs: f64,
    pub log_file: Option<PathBuf>,
    /// Emit a debug line every this many polls; `0` disables it.
    pub log_every: u64,
}

impl Default for PowerSupplySettings {
    fn default() -> Self {
        Self {
            driver: "sim".to_string(),
            update_initial_state: false,
            initial_open: None,
            initial_voltage: None,
            initial_current: None,
            max_voltage: None,
            max_current: None,
            polling_secs: 0.02,
            log_file: None,
            log_every: 0,
        }
    }
}

impl PowerSupplySettings {
    pub fn thresholds(&self) -> SafetyThresholds {
        SafetyThresholds {
            max_voltage: self.max_voltage,
            max_current: self.max_current,
        }
    }

    /// The polling interval as a [`Duration`].
    ///
    /// # Errors
    ///
    /// [`RadError::Config`] unless `polling_secs` is a positive number small
    /// enough to represent.
    pub fn polling_time(&self) -> Result<Duration, RadError> {
        match Duration::try_from_secs_f64(self.polling_secs) {
            Ok(interval) if !interval.is_zero() => Ok(interval),
            _ => Err(RadError::Config {
                details: format!(
                    "power_supply.polling_secs must be a positive number of seconds, got {}",
                    self.polling_secs
                ),
            }),
        }
    }
}

fn missing(field: &str) -> RadError {
    RadError::MissingInitialState {
        field: field.to_string(),
    }
}

pub struct PowerSupervisor {
    device: SharedPowerSupply,
    /// Built at construction, moved onto its thread by `start_monitor`.
    monitor: Option<PowerSafetyMonitor>,
    handle: Option<MonitorHandle>,
    shut_down: bool,
}

impl PowerSupervisor {
    /// Take ownership of `device`, bring it to the configured initial state
    /// and prepare the safety monitor (not started yet).
    ///
    /// # Errors
    ///
    /// Any initialization or measurement-log error; the device has already
    /// been shut down when this returns `Err`.
    pub fn new(device: Box<dyn PowerSupply>, settings: &PowerSupplySettings) -> Result<Self, RadError> {
        let mut supervisor = Self {
            device: Arc::new(Mutex::new(device)),
            monitor: None,
            handle: None,
            shut_down: false,
        };

        let built = supervisor
            .initialize(
                settings.update_initial_state,
                settings.initial_open,
                settings.initial_voltage,
                settings.initial_current,
            )
            .and_then(|()| settings.polling_time())
            .and_then(|polling_time| {
                PowerSafetyMonitor::new(
                    Arc::clone(&supervisor.device),
                    settings.thresholds(),
                    polling_time,
                    settings.log_file.as_deref(),
                    settings.log_every,
                )
            });

        match built {
            Ok(monitor) => {
                supervisor.monitor = Some(monitor);
                Ok(supervisor)
            }
            Err(e) => {
                error!(error = %e, "Power supervisor construction failed");
                supervisor.shutdown(Some(&e.to_string()));
                Err(e)
            }
        }
    }

    /// Enter remote mode and, when `update` is set, bring the output to
    /// `initial_open` at the given set-points.
    ///
    /// Voltage and current are programmed before the output is switched,
    /// and only if the output state actually has to change.
    pub fn initialize(
        &self,
        update: bool,
        initial_open: Option<bool>,
        initial_voltage: Option<f64>,
        initial_current: Option<f64>,
    ) -> Result<(), RadError> {
        let mut device = lock_device(&self.device);
        device.set_remote(true)?;
        let current_state = device.output_on()?;
        if !update {
            return Ok(());
        }

        let open = initial_open.ok_or_else(|| missing("initial_open"))?;
        let voltage = initial_voltage.ok_or_else(|| missing("initial_voltage"))?;
        let current = initial_current.ok_or_else(|| missing("initial_current"))?;

        if current_state != open {
            info!(
                output = open,
                voltage, current, "Applying initial power-supply state"
            );
            device.set_voltage(voltage)?;
            device.set_current(current)?;
            device.set_output_on(open)?;
        }
        Ok(())
    }

    pub fn power_on(&self) -> Result<(), RadError> {
        lock_device(&self.device).set_output_on(true)
    }

    pub fn power_off(&self) -> Result<(), RadError> {
        lock_device(&self.device).set_output_off()
    }

    pub fn is_monitor_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Start the safety monitor. A second call is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`RadError::Device`] after [`shutdown`](Self::shutdown), or
    /// the spawn error.
    pub fn start_monitor(&mut self, exits: Sender<MonitorExit>) -> Result<(), RadError> {
        if self.handle.is_some() {
            return Ok(());
        }
        let Some(monitor) = self.monitor.take() else {
            return Err(RadError::Device {
                details: "power supply has been shut down".to_string(),
            });
        };
        self.handle = Some(monitor.spawn(exits)?);
        Ok(())
    }

    /// Signal the safety monitor to stop. Does not block.
    pub fn stop_monitor(&self) {
        if let Some(handle) = &self.handle {
            info!("Power monitor received signal to stop.");
            handle.stop();
        }
    }

    /// Wait up to `timeout` for the safety monitor thread to finish.
    pub fn join_monitor(&mut self, timeout: Duration) -> Result<(), RadError> {
        match &mut self.handle {
            Some(handle) => handle.join(timeout),
            None => Ok(()),
        }
    }

    /// Leave remote mode and release the connection. Safe to call any number
    /// of times; only the first call touches the device.
    pub fn shutdown(&mut self, cause: Option<&str>) {
        if self.shut_down {
            return;
        }
        self.shut_down = true;
        self.stop_monitor();
        self.monitor = None;

        match cause {
            Some(cause) => warn!(cause, "Shutting down power supply"),
            None => info!("Shutting down power supply"),
        }
        let mut device = lock_device(&self.device);
        if let Err(e) = device.set_remote(false) {
            error!(error = %e, "Could not release remote control of the power supply");
        }
        if let Err(e) = device.close() {
            error!(error = %e, "Could not close the power-supply connection");
        }
    }
}

impl Drop for PowerSupervisor {
    fn drop(&mut self) {
        self.shutdown(None);
    }
}
