use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Marker carried by every liveness datagram sent by the DUT.
pub const HEARTBEAT_MARKER: &[u8] = b"HEARTBEAT";
/// Marker asking the supervisor to open the beam.
pub const OPEN_BEAM_MARKER: &[u8] = b"OPEN_BEAM";
/// Marker asking the supervisor to close the beam.
pub const CLOSE_BEAM_MARKER: &[u8] = b"CLOSE_BEAM";
/// Marker asking the supervisor to cut mains power to the DUT.
pub const SHUTDOWN_BOARD_MARKER: &[u8] = b"SHUTDOWN_BOARD";

/// Returns `true` when `marker` occurs anywhere inside `data`.
pub fn contains_marker(data: &[u8], marker: &[u8]) -> bool {
    !marker.is_empty() && data.windows(marker.len()).any(|w| w == marker)
}

/// Discrete control messages understood on the command channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Command {
    Heartbeat,
    OpenBeam,
    CloseBeam,
    ShutdownBoard,
}

impl Command {
    /// Classify a raw datagram by marker containment.
    ///
    /// Markers are checked in a fixed priority order (heartbeat, open, close,
    /// shutdown), so a payload carrying several markers always resolves to
    /// the first one in that order. Returns `None` when no marker matches.
    pub fn classify(data: &[u8]) -> Option<Command> {
        [
            (HEARTBEAT_MARKER, Command::Heartbeat),
            (OPEN_BEAM_MARKER, Command::OpenBeam),
            (CLOSE_BEAM_MARKER, Command::CloseBeam),
            (SHUTDOWN_BOARD_MARKER, Command::ShutdownBoard),
        ]
        .into_iter()
        .find(|(marker, _)| contains_marker(data, marker))
        .map(|(_, cmd)| cmd)
    }

    /// The wire marker for this command.
    pub fn marker(&self) -> &'static [u8] {
        match self {
            Command::Heartbeat => HEARTBEAT_MARKER,
            Command::OpenBeam => OPEN_BEAM_MARKER,
            Command::CloseBeam => CLOSE_BEAM_MARKER,
            Command::ShutdownBoard => SHUTDOWN_BOARD_MARKER,
        }
    }
}

/// Flat telemetry record as reported by the power-supply driver.
///
/// Field names follow the supply's own status keys.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryRecord {
    pub remote: bool,
    pub on: bool,
    #[serde(rename = "CC")]
    pub constant_current: bool,
    #[serde(rename = "OVP")]
    pub over_voltage: bool,
    #[serde(rename = "OCP")]
    pub over_current: bool,
    #[serde(rename = "OPP")]
    pub over_power: bool,
    #[serde(rename = "OTP")]
    pub over_temperature: bool,
    pub v: f64,
    pub i: f64,
}

/// Immutable snapshot of power-supply telemetry, produced once per poll.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PowerStats {
    pub powered: bool,
    pub voltage: f64,
    pub current: f64,
    pub constant_current: bool,
    pub constant_voltage: bool,
    pub voltage_protection: bool,
    pub current_protection: bool,
    pub power_protection: bool,
    pub temperature_protection: bool,
    pub remote_control_active: bool,
}

impl PowerStats {
    /// Decode a [`TelemetryRecord`]. Constant-voltage mode is derived as the
    /// negation of the single constant-current flag.
    pub fn from_record(record: &TelemetryRecord) -> Self {
        Self {
            powered: record.on,
            voltage: record.v,
            current: record.i,
            constant_current: record.constant_current,
            constant_voltage: !record.constant_current,
            voltage_protection: record.over_voltage,
            current_protection: record.over_current,
            power_protection: record.over_power,
            temperature_protection: record.over_temperature,
            remote_control_active: record.remote,
        }
    }
}

impl From<TelemetryRecord> for PowerStats {
    fn from(record: TelemetryRecord) -> Self {
        Self::from_record(&record)
    }
}

impl fmt::Display for PowerStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "powered={} voltage={:.3}V current={:.3}A mode={} ovp={} ocp={} opp={} otp={} remote={}",
            self.powered,
            self.voltage,
            self.current,
            if self.constant_current { "CC" } else { "CV" },
            self.voltage_protection,
            self.current_protection,
            self.power_protection,
            self.temperature_protection,
            self.remote_control_active,
        )
    }
}

/// Requested state of a network-switch outlet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SwitchStatus {
    On,
    Off,
}

impl fmt::Display for SwitchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SwitchStatus::On => write!(f, "ON"),
            SwitchStatus::Off => write!(f, "OFF"),
        }
    }
}

/// The switch outlet that feeds the DUT.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwitchTarget {
    pub model: String,
    pub ip: String,
    pub port: u16,
}

/// Error type shared by every radwatch crate.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RadError {
    #[error("Configuration error: initial state update requested but `{field}` is missing")]
    MissingInitialState { field: String },

    #[error("Configuration error: {details}")]
    Config { details: String },

    #[error("Could not bind {component} on {addr}: {details}")]
    Bind {
        component: String,
        addr: String,
        details: String,
    },

    #[error("Power supply fault: {details}")]
    Device { details: String },

    #[error("Could not open measurement log {path}: {details}")]
    MeasurementLog { path: String, details: String },

    #[error("Network switch command failed: {details}")]
    Switch { details: String },

    #[error("File transfer failed: {details}")]
    Transfer { details: String },

    #[error("I/O error: {details}")]
    Io { details: String },

    #[error("Monitor {monitor} failed: {details}")]
    MonitorFailed { monitor: String, details: String },

    #[error("Monitor {monitor} did not finish within {timeout_ms} ms")]
    JoinTimeout { monitor: String, timeout_ms: u128 },
}

impl RadError {
    /// Fatal at construction; never retried.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            RadError::MissingInitialState { .. } | RadError::Config { .. } | RadError::Bind { .. }
        )
    }

    /// Conditions that require a full teardown of the supervisor.
    pub fn is_unrecoverable(&self) -> bool {
        matches!(
            self,
            RadError::Device { .. }
                | RadError::MeasurementLog { .. }
                | RadError::MonitorFailed { .. }
        )
    }
}

impl From<std::io::Error> for RadError {
    fn from(e: std::io::Error) -> Self {
        RadError::Io {
            details: e.to_string(),
        }
    }
}
