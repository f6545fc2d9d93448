//! Supervisor configuration – reads/writes `radwatch.toml`.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use radwatch_kernel::{CommandSettings, HeartbeatSettings, SupervisorSettings, TransferSettings};
use radwatch_psu::PowerSupplySettings;
use radwatch_types::{RadError, SwitchTarget};

/// Used when neither `--config` nor `RADWATCH_CONFIG` is given.
pub const DEFAULT_CONFIG_FILE: &str = "radwatch.toml";

/// Beam output (`[beam]` section).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BeamConfig {
    /// GPIO line driving the beam gate. Without one the relay is simulated.
    pub gpio_pin: Option<u32>,
}

/// Network switch feeding the DUT (`[switch]` section).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SwitchConfig {
    pub model: String,
    pub ip: String,
    pub port: u16,
    /// Program invoked as `command <ON|OFF> <model> <ip> <port>`. Without
    /// one, outlet commands are only logged.
    pub command: Option<PathBuf>,
}

impl Default for SwitchConfig {
    fn default() -> Self {
        Self {
            model: "default".to_string(),
            ip: "192.168.1.100".to_string(),
            port: 1,
            command: None,
        }
    }
}

impl SwitchConfig {
    pub fn target(&self) -> SwitchTarget {
        SwitchTarget {
            model: self.model.clone(),
            ip: self.ip.clone(),
            port: self.port,
        }
    }
}

/// `[supervisor]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    pub join_timeout_secs: f64,
    /// Also power the DUT off after a monitor failure.
    pub shutdown_board_on_fatal: bool,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            join_timeout_secs: 1.0,
            shutdown_board_on_fatal: false,
        }
    }
}

/// Complete file contents. Every section is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub heartbeat: HeartbeatSettings,
    pub command: CommandSettings,
    pub transfer: TransferSettings,
    pub beam: BeamConfig,
    pub switch: SwitchConfig,
    pub supervisor: SupervisorConfig,
    /// Absent means no supply is supervised.
    pub power_supply: Option<PowerSupplySettings>,
}

impl Config {
    /// Reject values that parse but cannot be used.
    pub fn validate(&self) -> Result<(), RadError> {
        check_wait("heartbeat.timeout_secs", self.heartbeat.timeout_secs)?;
        check_wait("command.timeout_secs", self.command.timeout_secs)?;
        check_wait("transfer.timeout_secs", self.transfer.timeout_secs)?;
        join_timeout(self.supervisor.join_timeout_secs)?;
        if let Some(psu) = &self.power_supply {
            if psu.driver != "sim" {
                return Err(config_err(format!(
                    "power_supply.driver {:?} is not available (supported: \"sim\")",
                    psu.driver
                )));
            }
            psu.polling_time()?;
        }
        Ok(())
    }

    /// Assumes [`Config::validate`] passed; an unusable join timeout falls
    /// back to waiting without a bound.
    pub fn supervisor_settings(&self) -> SupervisorSettings {
        SupervisorSettings {
            heartbeat: self.heartbeat.clone(),
            command: self.command.clone(),
            transfer: self.transfer.clone(),
            switch_target: self.switch.target(),
            join_timeout: join_timeout(self.supervisor.join_timeout_secs).unwrap_or(Duration::MAX),
        }
    }
}

/// Socket waits: negative means indefinite, anything else must fit a
/// [`Duration`].
fn check_wait(field: &str, secs: f64) -> Result<(), RadError> {
    if secs < 0.0 || Duration::try_from_secs_f64(secs).is_ok() {
        Ok(())
    } else {
        Err(config_err(format!(
            "{field} must be a number of seconds (negative waits indefinitely), got {secs}"
        )))
    }
}

fn join_timeout(secs: f64) -> Result<Duration, RadError> {
    Duration::try_from_secs_f64(secs).map_err(|_| {
        config_err(format!(
            "supervisor.join_timeout_secs must be a non-negative number of seconds, got {secs}"
        ))
    })
}

fn config_err(details: impl Into<String>) -> RadError {
    RadError::Config {
        details: details.into(),
    }
}

/// Pick the config file: the command-line path, else `RADWATCH_CONFIG`,
/// else `./radwatch.toml`.
pub fn resolve_path(cli: Option<PathBuf>) -> PathBuf {
    resolve_path_with(cli, std::env::var("RADWATCH_CONFIG").ok())
}

/// Extracted for testability without mutating environment variables.
pub(crate) fn resolve_path_with(cli: Option<PathBuf>, env: Option<String>) -> PathBuf {
    cli.or_else(|| env.filter(|v| !v.is_empty()).map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE))
}

/// Load the config from `path`, apply environment overrides and validate.
/// Returns `None` if the file does not exist.
pub fn load_from(path: &Path) -> Result<Option<Config>, RadError> {
    let Some(mut cfg) = read_file(path)? else {
        return Ok(None);
    };
    apply_env_overrides(&mut cfg);
    cfg.validate()?;
    Ok(Some(cfg))
}

/// Parse `path` as-is.
pub(crate) fn read_file(path: &Path) -> Result<Option<Config>, RadError> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| config_err(format!("Failed to read config at {}: {e}", path.display())))?;
    toml::from_str(&raw)
        .map(Some)
        .map_err(|e| config_err(format!("Failed to parse config at {}: {e}", path.display())))
}

/// Apply `RADWATCH_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `RADWATCH_HEARTBEAT_IP` | `heartbeat.ip` |
/// | `RADWATCH_HEARTBEAT_PORT` | `heartbeat.port` |
/// | `RADWATCH_COMMAND_IP` | `command.ip` |
/// | `RADWATCH_COMMAND_PORT` | `command.port` |
/// | `RADWATCH_SWITCH_IP` | `switch.ip` |
///
/// Ports that do not parse are ignored.
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Ok(v) = std::env::var("RADWATCH_HEARTBEAT_IP") {
        cfg.heartbeat.ip = v;
    }
    if let Ok(v) = std::env::var("RADWATCH_HEARTBEAT_PORT")
        && let Ok(port) = v.parse::<u16>()
    {
        cfg.heartbeat.port = port;
    }
    if let Ok(v) = std::env::var("RADWATCH_COMMAND_IP") {
        cfg.command.ip = v;
    }
    if let Ok(v) = std::env::var("RADWATCH_COMMAND_PORT")
        && let Ok(port) = v.parse::<u16>()
    {
        cfg.command.port = port;
    }
    if let Ok(v) = std::env::var("RADWATCH_SWITCH_IP") {
        cfg.switch.ip = v;
    }
}

/// Save the config to `path`, creating parent directories as needed.
pub fn save_to(cfg: &Config, path: &Path) -> Result<(), RadError> {
    // Only directories created here are restricted.
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
        && !parent.exists()
    {
        fs::create_dir_all(parent)
            .map_err(|e| config_err(format!("Failed to create config directory: {e}")))?;
        // Owner only (rwx------) on Unix.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700))
                .map_err(|e| config_err(format!("Failed to set config directory permissions: {e}")))?;
        }
    }
    let raw = toml::to_string_pretty(cfg)
        .map_err(|e| config_err(format!("Failed to serialize config: {e}")))?;
    let write_err = |e: std::io::Error| config_err(format!("Failed to write config at {}: {e}", path.display()));
    // rw------- on Unix.
    #[cfg(unix)]
    {
        use std::io::Write;
        use std::os::unix::fs::OpenOptionsExt;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .and_then(|mut f| f.write_all(raw.as_bytes()))
            .map_err(write_err)?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw).map_err(write_err)?;
    Ok(())
}
