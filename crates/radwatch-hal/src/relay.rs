//! Generic `Relay` trait for the discrete on/off output that gates the beam,
//! plus a sysfs GPIO driver for Linux boards.

use std::fs;
use std::path::{Path, PathBuf};

use radwatch_types::RadError;

/// A discrete on/off hardware output.
pub trait Relay: Send {
    /// Stable identifier for this relay, e.g. `"beam_gate"`.
    fn id(&self) -> &str;

    /// Drive the output to `active` (`true` = energised / on,
    /// `false` = de-energised / off).
    ///
    /// # Errors
    ///
    /// Returns [`RadError::Io`] if the output cannot be driven.
    fn set_state(&mut self, active: bool) -> Result<(), RadError>;

    /// Return the last state successfully applied.
    fn state(&self) -> bool;
}

/// Relay driven through the Linux sysfs GPIO interface
/// (`/sys/class/gpio/gpioN/value`).
pub struct SysfsRelay {
    id: String,
    value_path: PathBuf,
    state: bool,
}

impl SysfsRelay {
    /// Export `pin` under `/sys/class/gpio`, configure it as an output and
    /// drive it low.
    pub fn new(pin: u32) -> Result<Self, RadError> {
        Self::with_root("/sys/class/gpio", pin)
    }

    /// Same as [`SysfsRelay::new`] with a custom sysfs root.
    pub fn with_root(root: impl AsRef<Path>, pin: u32) -> Result<Self, RadError> {
        let root = root.as_ref();
        let pin_dir = root.join(format!("gpio{pin}"));
        if !pin_dir.exists() {
            fs::write(root.join("export"), pin.to_string())?;
        }
        // "low" sets the direction and the initial level in one write.
        fs::write(pin_dir.join("direction"), "low")?;

        let mut relay = Self {
            id: format!("gpio{pin}"),
            value_path: pin_dir.join("value"),
            state: true,
        };
        relay.set_state(false)?;
        Ok(relay)
    }
}

impl Relay for SysfsRelay {
    fn id(&self) -> &str {
        &self.id
    }

    fn set_state(&mut self, active: bool) -> Result<(), RadError> {
        fs::write(&self.value_path, if active { "1" } else { "0" }).map_err(|e| RadError::Io {
            details: format!("{}: {e}", self.value_path.display()),
        })?;
        self.state = active;
        Ok(())
    }

    fn state(&self) -> bool {
        self.state
    }
}
