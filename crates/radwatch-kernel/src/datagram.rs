//! UDP endpoint with a bounded readiness wait, shared by the heartbeat
//! watchdog and the command listener.

use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::time::Duration;

use radwatch_types::RadError;

/// Largest datagram read in one call.
pub const MAX_DATAGRAM: usize = 1024;

/// A bound UDP socket whose receive blocks for at most `wait`.
pub struct DatagramChannel {
    socket: UdpSocket,
    wait: Option<Duration>,
}

impl DatagramChannel {
    /// Bind `addr` immediately.
    ///
    /// # Errors
    ///
    /// Returns [`RadError::Bind`] naming `component` when the address is
    /// unavailable.
    pub fn bind(component: &str, addr: &str, wait: Option<Duration>) -> Result<Self, RadError> {
        let bind_err = |e: io::Error| RadError::Bind {
            component: component.to_string(),
            addr: addr.to_string(),
            details: e.to_string(),
        };
        let socket = UdpSocket::bind(addr).map_err(bind_err)?;
        socket.set_read_timeout(wait).map_err(bind_err)?;
        Ok(Self { socket, wait })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, RadError> {
        Ok(self.socket.local_addr()?)
    }

    pub fn wait(&self) -> Option<Duration> {
        self.wait
    }

    /// Wait for one datagram. Returns `Ok(None)` when the wait expired
    /// without traffic.
    pub fn recv(&self) -> io::Result<Option<Vec<u8>>> {
        let mut buf = [0u8; MAX_DATAGRAM];
        match self.socket.recv(&mut buf) {
            Ok(n) => Ok(Some(buf[..n].to_vec())),
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}
