//! `radwatch-kernel` – Beam-side supervision
//!
//! Everything that decides whether the beam may stay open. It never talks to
//! the relay directly; every transition goes through the shared
//! [`BeamActuator`][radwatch_hal::BeamActuator].
//!
//! # Modules
//!
//! - [`monitor`] – [`MonitorHandle`][monitor::MonitorHandle]: one named
//!   thread per monitor with a stop signal, an exit report on a shared
//!   channel and a timeout-bounded join.
//! - [`datagram`] – UDP receive with a bounded readiness wait.
//! - [`watchdog`] – [`HeartbeatWatchdog`][watchdog::HeartbeatWatchdog]:
//!   closes the beam when the DUT stops sending heartbeats, and whenever the
//!   watchdog itself exits.
//! - [`command`] – [`CommandListener`][command::CommandListener]: open,
//!   close and board-shutdown datagrams.
//! - [`file_receiver`] – [`FileReceiver`][file_receiver::FileReceiver]:
//!   experiment output files pushed by the DUT over TCP.
//! - [`supervisor`] – [`Supervisor`][supervisor::Supervisor]: starts all of
//!   the above and stops them together.

pub mod command;
pub mod datagram;
pub mod file_receiver;
pub mod monitor;
pub mod supervisor;
pub mod watchdog;

pub use command::{BoardShutdown, CommandListener, CommandSettings};
pub use file_receiver::{FileReceiver, TransferSettings};
pub use monitor::{MonitorExit, MonitorHandle, StopSignal};
pub use supervisor::{BoardPowerCutter, Supervisor, SupervisorSettings};
pub use watchdog::{HeartbeatSettings, HeartbeatWatchdog, SessionEnd, WatchdogPhase};
