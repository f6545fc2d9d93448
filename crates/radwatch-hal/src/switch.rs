//! `PowerSwitch` trait – the managed network switch (PoE / smart PDU) that
//! feeds mains power to the DUT.

use std::path::PathBuf;
use std::process::Command;

use radwatch_types::{RadError, SwitchStatus, SwitchTarget};
use tracing::debug;

/// Turns a switch outlet on or off.
pub trait PowerSwitch: Send + Sync {
    /// Drive the outlet described by `target` to `status` and return the
    /// switch's textual result.
    ///
    /// # Errors
    ///
    /// Returns [`RadError::Switch`] when the switch cannot be reached or
    /// rejects the command.
    fn set_outlet(&self, status: SwitchStatus, target: &SwitchTarget) -> Result<String, RadError>;
}

/// Delegates vendor-specific switch handling to an external program invoked
/// as `program <ON|OFF> <model> <ip> <port>`.
#[derive(Debug, Clone)]
pub struct CommandSwitch {
    program: PathBuf,
}

impl CommandSwitch {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl PowerSwitch for CommandSwitch {
    fn set_outlet(&self, status: SwitchStatus, target: &SwitchTarget) -> Result<String, RadError> {
        debug!(program = %self.program.display(), %status, ip = %target.ip, port = target.port, "Invoking switch command");
        let output = Command::new(&self.program)
            .arg(status.to_string())
            .arg(&target.model)
            .arg(&target.ip)
            .arg(target.port.to_string())
            .output()
            .map_err(|e| RadError::Switch {
                details: format!("{}: {e}", self.program.display()),
            })?;

        if !output.status.success() {
            return Err(RadError::Switch {
                details: format!(
                    "{} exited with {}: {}",
                    self.program.display(),
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target() -> SwitchTarget {
        SwitchTarget {
            model: "default".into(),
            ip: "192.168.1.100".into(),
            port: 1,
        }
    }

    #[cfg(unix)]
    #[test]
    fn command_switch_passes_arguments_in_order() {
        let switch = CommandSwitch::new("echo");
        let out = switch.set_outlet(SwitchStatus::Off, &target()).unwrap();
        assert_eq!(out, "OFF default 192.168.1.100 1");
    }

    #[cfg(unix)]
    #[test]
    fn command_switch_reports_non_zero_exit() {
        let switch = CommandSwitch::new("false");
        let err = switch.set_outlet(SwitchStatus::Off, &target()).unwrap_err();
        assert!(matches!(err, RadError::Switch { .. }));
    }

    #[test]
    fn command_switch_reports_missing_program() {
        let switch = CommandSwitch::new("/nonexistent/radwatch-switch-tool");
        let err = switch.set_outlet(SwitchStatus::On, &target()).unwrap_err();
        assert!(err.to_string().contains("radwatch-switch-tool"));
    }
}
