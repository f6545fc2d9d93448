//! [`CommandListener`] – discrete control datagrams from the DUT or the
//! operator.
//!
//! Payloads are classified by marker containment in a fixed priority order
//! (see [`Command::classify`]). A heartbeat on this channel is logged as a
//! warning and otherwise ignored; open/close go to the [`BeamActuator`];
//! shutdown goes to the supervisor's [`BoardShutdown`] action. Anything else
//! is logged as invalid and dropped.

use std::net::SocketAddr;
use std::sync::Arc;

use crossbeam::channel::Sender;
use radwatch_hal::BeamActuator;
use radwatch_types::{Command, RadError};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::datagram::DatagramChannel;
use crate::monitor::{MonitorExit, MonitorHandle, StopSignal, wait_from_secs};

/// Command channel configuration (`[command]` section).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandSettings {
    pub ip: String,
    pub port: u16,
    /// Seconds per receive wait. Negative waits indefinitely.
    pub timeout_secs: f64,
}

impl Default for CommandSettings {
    fn default() -> Self {
        Self {
            ip: "127.0.0.1".to_string(),
            port: 1236,
            timeout_secs: 2.0,
        }
    }
}

impl CommandSettings {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }
}

/// The most severe action the supervisor can take: cut mains power to the
/// DUT.
pub trait BoardShutdown: Send + Sync {
    /// Power off the DUT and return the switch's result.
    fn shutdown_board(&self) -> Result<String, RadError>;
}

/// Receives and dispatches control datagrams.
pub struct CommandListener {
    channel: DatagramChannel,
    beam: Arc<BeamActuator>,
    board: Arc<dyn BoardShutdown>,
}

impl CommandListener {
    /// Bind the command address.
    ///
    /// # Errors
    ///
    /// Returns [`RadError::Bind`] if the address is unavailable.
    pub fn bind(
        settings: &CommandSettings,
        beam: Arc<BeamActuator>,
        board: Arc<dyn BoardShutdown>,
    ) -> Result<Self, RadError> {
        let channel = DatagramChannel::bind(
            "command listener",
            &settings.addr(),
            wait_from_secs(settings.timeout_secs),
        )?;
        Ok(Self {
            channel,
            beam,
            board,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, RadError> {
        self.channel.local_addr()
    }

    /// Move the listener onto its own thread.
    pub fn spawn(self, exits: Sender<MonitorExit>) -> Result<MonitorHandle, RadError> {
        MonitorHandle::spawn("command-listener", exits, move |stop| self.run(&stop))
    }

    pub fn run(&self, stop: &StopSignal) -> Result<(), RadError> {
        while !stop.is_set() {
            if let Some(cmd) = self.receive() {
                self.dispatch(cmd);
            }
        }
        info!("Command monitor thread is stopping.");
        Ok(())
    }

    /// Wait for one datagram and classify it. Returns `None` on timeout and
    /// for payloads that need no action.
    pub fn receive(&self) -> Option<Command> {
        let data = match self.channel.recv() {
            Ok(Some(data)) => data,
            Ok(None) => return None,
            Err(e) => {
                warn!(error = %e, "Command monitor receive failed");
                return None;
            }
        };
        let payload = String::from_utf8_lossy(&data);
        match Command::classify(&data) {
            Some(Command::Heartbeat) => {
                warn!(payload = %payload, "Command monitor got a heartbeat message");
                None
            }
            Some(cmd) => {
                debug!(command = ?cmd, payload = %payload, "Received command");
                Some(cmd)
            }
            None => {
                warn!(payload = %payload, "Command monitor got an invalid message");
                None
            }
        }
    }

    pub fn dispatch(&self, cmd: Command) {
        match cmd {
            Command::OpenBeam => self.beam.open(),
            Command::CloseBeam => self.beam.close(),
            Command::ShutdownBoard => {
                if let Err(e) = self.board.shutdown_board() {
                    error!(error = %e, "Board shutdown failed");
                }
            }
            Command::Heartbeat => debug!("Ignoring heartbeat on command channel"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use radwatch_hal::sim::SimRelay;
    use std::net::UdpSocket;
    use std::sync::Mutex;

    #[derive(Default)]
    struct CountingShutdown {
        calls: Mutex<u32>,
    }

    impl BoardShutdown for CountingShutdown {
        fn shutdown_board(&self) -> Result<String, RadError> {
            *self.calls.lock().unwrap() += 1;
            Ok("off".into())
        }
    }

    fn listener() -> (CommandListener, Arc<BeamActuator>, Arc<CountingShutdown>, UdpSocket) {
        let beam = Arc::new(BeamActuator::new(SimRelay::new("beam")));
        let board = Arc::new(CountingShutdown::default());
        let settings = CommandSettings {
            ip: "127.0.0.1".into(),
            port: 0,
            timeout_secs: 0.5,
        };
        let listener = CommandListener::bind(&settings, Arc::clone(&beam), board.clone()).unwrap();
        let sender = UdpSocket::bind("127.0.0.1:0").unwrap();
        sender.connect(listener.local_addr().unwrap()).unwrap();
        (listener, beam, board, sender)
    }

    #[test]
    fn open_and_close_drive_the_beam() {
        let (listener, beam, _board, sender) = listener();

        sender.send(b"OPEN_BEAM").unwrap();
        let cmd = listener.receive().unwrap();
        assert_eq!(cmd, Command::OpenBeam);
        listener.dispatch(cmd);
        assert!(beam.is_open());

        sender.send(b"please CLOSE_BEAM now").unwrap();
        let cmd = listener.receive().unwrap();
        assert_eq!(cmd, Command::CloseBeam);
        listener.dispatch(cmd);
        assert!(!beam.is_open());
    }

    #[test]
    fn ambiguous_payload_follows_priority_order() {
        let (listener, beam, _board, sender) = listener();
        sender.send(b"CLOSE_BEAM|OPEN_BEAM").unwrap();
        let cmd = listener.receive().unwrap();
        assert_eq!(cmd, Command::OpenBeam);
        listener.dispatch(cmd);
        assert!(beam.is_open());
    }

    #[test]
    fn heartbeat_and_garbage_are_dropped() {
        let (listener, beam, board, sender) = listener();
        sender.send(b"HEARTBEAT OPEN_BEAM").unwrap();
        assert_eq!(listener.receive(), None);
        sender.send(b"REBOOT").unwrap();
        assert_eq!(listener.receive(), None);
        assert!(!beam.is_open());
        assert_eq!(*board.calls.lock().unwrap(), 0);
    }

    #[test]
    fn timeout_yields_nothing() {
        let (listener, _beam, _board, _sender) = listener();
        assert_eq!(listener.receive(), None);
    }

    #[test]
    fn shutdown_marker_invokes_board_shutdown_once() {
        let (listener, _beam, board, sender) = listener();
        sender.send(b"SHUTDOWN_BOARD").unwrap();
        let cmd = listener.receive().unwrap();
        listener.dispatch(cmd);
        assert_eq!(*board.calls.lock().unwrap(), 1);
    }
}
