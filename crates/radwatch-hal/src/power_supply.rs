//! `PowerSupply` trait – the capability interface of the programmable bench
//! supply that feeds the DUT.
//!
//! The serial protocol itself lives in the driver; the supervisor only ever
//! talks to this trait.

use radwatch_types::{PowerStats, RadError};

/// A remotely controllable DC power supply.
///
/// Every method may fail with [`RadError::Device`] when the connection to
/// the instrument is lost.
pub trait PowerSupply: Send {
    /// Enter (`true`) or leave (`false`) remote-control mode.
    fn set_remote(&mut self, remote: bool) -> Result<(), RadError>;

    /// Whether the output stage is currently on.
    fn output_on(&mut self) -> Result<bool, RadError>;

    /// Switch the output stage on or off.
    fn set_output_on(&mut self, on: bool) -> Result<(), RadError>;

    fn set_output_off(&mut self) -> Result<(), RadError> {
        self.set_output_on(false)
    }

    /// Program the voltage set-point in volts.
    fn set_voltage(&mut self, volts: f64) -> Result<(), RadError>;

    /// Program the current limit in amperes.
    fn set_current(&mut self, amps: f64) -> Result<(), RadError>;

    /// Read one telemetry snapshot.
    fn current_stats(&mut self) -> Result<PowerStats, RadError>;

    /// Release the connection to the instrument.
    fn close(&mut self) -> Result<(), RadError>;
}
