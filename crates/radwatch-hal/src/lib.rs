//! `radwatch-hal` – Hardware capabilities
//!
//! The supervisor never touches hardware directly; it goes through the
//! traits defined here so that drivers can be swapped for the simulated
//! ones in tests and on bench setups without a beam gate.
//!
//! # Modules
//!
//! - [`relay`] – [`Relay`][relay::Relay]: discrete on/off output, plus the
//!   sysfs GPIO driver.
//! - [`beam`] – [`BeamActuator`][beam::BeamActuator]: the mutex-guarded beam
//!   gate shared by the watchdog and the command listener.
//! - [`power_supply`] – [`PowerSupply`][power_supply::PowerSupply]: bench
//!   supply capability interface.
//! - [`switch`] – [`PowerSwitch`][switch::PowerSwitch]: network switch that
//!   feeds mains power to the DUT.
//! - [`sim`] – recording simulation drivers.

pub mod beam;
pub mod power_supply;
pub mod relay;
pub mod sim;
pub mod switch;

pub use beam::BeamActuator;
pub use power_supply::PowerSupply;
pub use relay::{Relay, SysfsRelay};
pub use switch::{CommandSwitch, PowerSwitch};
