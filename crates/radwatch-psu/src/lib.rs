//! `radwatch-psu` – Power-supply supervision
//!
//! Guards the bench supply feeding the DUT independently of the beam.
//!
//! - [`measurement_log`] – append-only telemetry file.
//! - [`monitor`] – [`PowerSafetyMonitor`]: polls the supply and cuts its
//!   output when a voltage or current ceiling is exceeded.
//! - [`supervisor`] – [`PowerSupervisor`]: remote-control handshake, initial
//!   state, monitor lifecycle and the always-reached shutdown.

pub mod measurement_log;
pub mod monitor;
pub mod supervisor;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use radwatch_hal::PowerSupply;

pub use measurement_log::MeasurementLog;
pub use monitor::{PowerSafetyMonitor, SafetyThresholds};
pub use supervisor::{PowerSupervisor, PowerSupplySettings};

/// The device handle shared by a [`PowerSupervisor`] and its monitor. Every
/// call takes the lock for exactly one device operation.
pub type SharedPowerSupply = Arc<Mutex<Box<dyn PowerSupply>>>;

pub(crate) fn lock_device(device: &SharedPowerSupply) -> MutexGuard<'_, Box<dyn PowerSupply>> {
    device.lock().unwrap_or_else(PoisonError::into_inner)
}
