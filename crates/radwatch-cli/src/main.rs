//! `radwatch` – radiation-beam experiment supervisor
//!
//! This binary is the process entry point. It:
//!
//! 1. Loads `radwatch.toml` (or the file named by `--config` /
//!    `RADWATCH_CONFIG`) and applies `RADWATCH_*` overrides.
//! 2. Builds the beam relay, the network-switch driver and, if configured,
//!    the power-supply supervisor.
//! 3. Starts every monitor and blocks until **Ctrl-C** or the first monitor
//!    failure, then tears everything down with the beam closed.
//!
//! Exit codes: `0` after `--help` / `--write-default-config`, `1` when
//! start-up fails, `130` after an interrupt, `10` after a monitor failure.

mod config;

use colored::Colorize;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn};

use radwatch_hal::sim::{SimPowerSupply, SimRelay, SimSwitch};
use radwatch_hal::{BeamActuator, CommandSwitch, PowerSupply, PowerSwitch, Relay, SysfsRelay};
use radwatch_psu::{PowerSupervisor, PowerSupplySettings};
use radwatch_runtime::{SupervisionContext, telemetry};
use radwatch_types::RadError;

const EXIT_STARTUP_FAILED: u8 = 1;

#[derive(Debug, PartialEq)]
enum CliAction {
    Run { config: Option<PathBuf> },
    WriteDefaultConfig(PathBuf),
    Help,
    Version,
}

fn parse_args(mut args: impl Iterator<Item = String>) -> Result<CliAction, String> {
    let mut config = None;
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-c" | "--config" => {
                let path = args.next().ok_or_else(|| format!("{arg} needs a path"))?;
                config = Some(PathBuf::from(path));
            }
            "--write-default-config" => {
                let path = args
                    .next()
                    .ok_or_else(|| "--write-default-config needs a path".to_string())?;
                return Ok(CliAction::WriteDefaultConfig(PathBuf::from(path)));
            }
            "-h" | "--help" => return Ok(CliAction::Help),
            "-V" | "--version" => return Ok(CliAction::Version),
            other => return Err(format!("unexpected argument '{other}'")),
        }
    }
    Ok(CliAction::Run { config })
}

fn main() -> ExitCode {
    // Held until the end of main so pending spans are flushed.
    let _guard = telemetry::init_tracing("radwatch");

    match parse_args(std::env::args().skip(1)) {
        Ok(CliAction::Help) => {
            print_usage();
            ExitCode::SUCCESS
        }
        Ok(CliAction::Version) => {
            println!("radwatch {}", env!("CARGO_PKG_VERSION"));
            ExitCode::SUCCESS
        }
        Ok(CliAction::WriteDefaultConfig(path)) => match config::save_to(&config::Config::default(), &path) {
            Ok(()) => {
                println!(
                    "  {} Default config written to {}",
                    "✓".green().bold(),
                    path.display().to_string().bold()
                );
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("{}: {e}", "Error saving config".red());
                ExitCode::from(EXIT_STARTUP_FAILED)
            }
        },
        Ok(CliAction::Run { config }) => {
            print_banner();
            match supervise(config) {
                Ok(code) => ExitCode::from(code),
                Err(e) => {
                    error!(error = %e, "Start-up failed");
                    eprintln!("{}: {e}", "Start-up failed".red().bold());
                    ExitCode::from(EXIT_STARTUP_FAILED)
                }
            }
        }
        Err(e) => {
            eprintln!("{}: {e}", "error".red().bold());
            print_usage();
            ExitCode::from(EXIT_STARTUP_FAILED)
        }
    }
}

/// Build everything, run until interrupted or failed, and return the exit
/// code.
fn supervise(config_arg: Option<PathBuf>) -> Result<u8, RadError> {
    let explicit = config_arg.is_some() || std::env::var_os("RADWATCH_CONFIG").is_some();
    let path = config::resolve_path(config_arg);
    let cfg = match config::load_from(&path)? {
        Some(cfg) => {
            info!(path = %path.display(), "Config loaded");
            cfg
        }
        None if explicit => {
            return Err(RadError::Config {
                details: format!("config file {} does not exist", path.display()),
            });
        }
        None => {
            warn!(path = %path.display(), "No config file found, using defaults");
            let mut cfg = config::Config::default();
            config::apply_env_overrides(&mut cfg);
            cfg
        }
    };

    let beam = Arc::new(BeamActuator::new(build_relay(cfg.beam.gpio_pin)?));
    let switch = build_switch(&cfg.switch);
    let power = cfg.power_supply.as_ref().map(build_power).transpose()?;

    let (interrupt_tx, interrupts) = crossbeam::channel::bounded::<()>(1);
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – closing the beam and stopping monitors …".yellow().bold());
        let _ = interrupt_tx.try_send(());
    }) {
        warn!(error = %e, "Failed to install Ctrl-C handler; graceful shutdown on Ctrl-C will not be available");
    }

    let mut ctx = SupervisionContext::start(
        cfg.supervisor_settings(),
        beam,
        switch,
        power,
        cfg.supervisor.shutdown_board_on_fatal,
    )?;
    println!(
        "  Heartbeat on {}, commands on {}",
        ctx.supervisor().heartbeat_addr().to_string().bold(),
        ctx.supervisor().command_addr().to_string().bold()
    );
    println!("  {}\n", "Supervising. Press Ctrl-C to stop.".green());

    let reason = ctx.run(&interrupts);
    drop(ctx);
    println!("  {} {reason}", "Stopped:".bold());
    // Exit codes are small positive constants.
    Ok(u8::try_from(reason.exit_code()).unwrap_or(EXIT_STARTUP_FAILED))
}

fn build_relay(gpio_pin: Option<u32>) -> Result<Box<dyn Relay>, RadError> {
    match gpio_pin {
        Some(pin) => Ok(Box::new(SysfsRelay::new(pin)?)),
        None => {
            warn!("No GPIO pin configured; the beam relay is simulated");
            Ok(SimRelay::new("beam"))
        }
    }
}

fn build_switch(cfg: &config::SwitchConfig) -> Arc<dyn PowerSwitch> {
    match &cfg.command {
        Some(program) => Arc::new(CommandSwitch::new(program)),
        None => {
            warn!("No switch command configured; board power commands are only logged");
            Arc::new(SimSwitch::new())
        }
    }
}

fn build_power(settings: &PowerSupplySettings) -> Result<PowerSupervisor, RadError> {
    let device: Box<dyn PowerSupply> = match settings.driver.as_str() {
        "sim" => {
            warn!("Power supply driver is simulated");
            Box::new(SimPowerSupply::new())
        }
        other => {
            return Err(RadError::Config {
                details: format!("unknown power supply driver {other:?}"),
            });
        }
    };
    PowerSupervisor::new(device, settings)
}

// ─────────────────────────────────────────────────────────────────────────────
// Banner
// ─────────────────────────────────────────────────────────────────────────────

fn print_banner() {
    println!();
    println!("{}", r#"   ___          ___      __     __  "#.bold().cyan());
    println!("{}", r#"  / _ \___ ____/ / | /| / /__ _/ /_ "#.bold().cyan());
    println!("{}", r#" / , _/ _ `/ _  /| |/ |/ / _ `/ __/ "#.bold().cyan());
    println!("{}", r#"/_/|_|\_,_/\_,_/ |__/|__/\_,_/\__/  "#.bold().cyan());
    println!();
    println!(
        "  {} {}",
        "radwatch".bold(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("  Beam interlock and power supervision");
    println!();
}

fn print_usage() {
    println!("Usage: radwatch [--config PATH]");
    println!("       radwatch --write-default-config PATH");
    println!();
    println!("  -c, --config PATH               config file (default: $RADWATCH_CONFIG or ./radwatch.toml)");
    println!("      --write-default-config PATH write a default config and exit");
    println!("  -h, --help                      show this help");
    println!("  -V, --version                   show the version");
}
