//! [`PowerSafetyMonitor`] – threshold enforcement on the bench supply.
//!
//! Each iteration reads one [`PowerStats`], checks voltage and then current
//! against their ceilings, appends the reading to the measurement log (if
//! any) and sleeps for the polling interval. The sleep is the only place the
//! loop waits, so a stop request is seen within one interval.
//!
//! A threshold trip puts the supply into remote mode and switches its output
//! off. The monitor keeps running afterwards; a sustained violation trips on
//! every iteration. A lost device connection ends the loop with an error.

use std::path::Path;
use std::thread;
use std::time::Duration;

use crossbeam::channel::Sender;
use radwatch_kernel::{MonitorExit, MonitorHandle, StopSignal};
use radwatch_types::{PowerStats, RadError};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::measurement_log::MeasurementLog;
use crate::{SharedPowerSupply, lock_device};

/// Voltage and current ceilings. `None` disables that check.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SafetyThresholds {
    pub max_voltage: Option<f64>,
    pub max_current: Option<f64>,
}

impl SafetyThresholds {
    fn voltage_exceeded(&self, stats: &PowerStats) -> Option<f64> {
        self.max_voltage.filter(|max| stats.voltage > *max)
    }

    fn current_exceeded(&self, stats: &PowerStats) -> Option<f64> {
        self.max_current.filter(|max| stats.current > *max)
    }
}

pub struct PowerSafetyMonitor {
    device: SharedPowerSupply,
    thresholds: SafetyThresholds,
    polling_time: Duration,
    log: Option<MeasurementLog>,
    log_every: u64,
    iterations: u64,
}

impl PowerSafetyMonitor {
    /// Build a monitor. The measurement log, if any, is opened here.
    ///
    /// # Errors
    ///
    /// Returns [`RadError::MeasurementLog`] if `log_file` cannot be opened.
    pub fn new(
        device: SharedPowerSupply,
        thresholds: SafetyThresholds,
        polling_time: Duration,
        log_file: Option<&Path>,
        log_every: u64,
    ) -> Result<Self, RadError> {
        let log = log_file.map(MeasurementLog::open).transpose()?;
        if let Some(log) = &log {
            info!(path = %log.path().display(), "Successfully opened power measurement file");
        }
        Ok(Self {
            device,
            thresholds,
            polling_time,
            log,
            log_every,
            iterations: 0,
        })
    }

    pub fn thresholds(&self) -> SafetyThresholds {
        self.thresholds
    }

    /// Move the monitor onto its own thread.
    pub fn spawn(self, exits: Sender<MonitorExit>) -> Result<MonitorHandle, RadError> {
        MonitorHandle::spawn("power-monitor", exits, move |stop| self.run(&stop))
    }

    /// Poll until `stop` is set. The measurement log is closed when this
    /// returns.
    pub fn run(mut self, stop: &StopSignal) -> Result<(), RadError> {
        if self.log.is_some() {
            debug!("Starting power monitor with logging enabled");
        } else {
            debug!("Starting power monitor without logging");
        }
        while !stop.is_set() {
            self.poll_once()?;
            thread::sleep(self.polling_time);
        }
        info!("Stopping power monitor");
        Ok(())
    }

    /// One iteration without the trailing sleep.
    pub fn poll_once(&mut self) -> Result<PowerStats, RadError> {
        let stats = lock_device(&self.device).current_stats()?;

        if let Some(max) = self.thresholds.voltage_exceeded(&stats) {
            self.shutoff_device()?;
            warn!(
                voltage = stats.voltage,
                max_voltage = max,
                "Turning off power supply: voltage is {}V (monitor is configured with a maximum of {}V)",
                stats.voltage,
                max
            );
        }
        if let Some(max) = self.thresholds.current_exceeded(&stats) {
            self.shutoff_device()?;
            warn!(
                current = stats.current,
                max_current = max,
                "Turning off power supply: current is {}A (monitor is configured with a maximum of {}A)",
                stats.current,
                max
            );
        }

        if let Some(log) = &mut self.log {
            log.record(&stats)?;
        }

        self.iterations += 1;
        if self.log_every > 0 && self.iterations % self.log_every == 0 {
            debug!(iteration = self.iterations, %stats, "Iteration done");
        }
        Ok(stats)
    }

    fn shutoff_device(&self) -> Result<(), RadError> {
        let mut device = lock_device(&self.device);
        device.set_remote(true)?;
        device.set_output_off()
    }
}
