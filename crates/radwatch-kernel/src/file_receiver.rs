//! [`FileReceiver`] – pulls experiment output files from the DUT over TCP.
//!
//! One connection is served at a time. Each transfer starts with a header
//! `name<SEP>size<SEP>dir<SEP>` immediately followed by the first bytes of the
//! file; the rest of the stream is raw file content until `size` bytes have
//! arrived. Files land in `download_path/dir/name`; an existing file is
//! overwritten with a warning.

use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::path::{Component, Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam::channel::Sender;
use radwatch_types::RadError;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::monitor::{MonitorExit, MonitorHandle, StopSignal, wait_from_secs};

/// Field separator in the transfer header.
pub const TRANSFER_SEPARATOR: &[u8] = b"<SEPARATOR>";
/// Read size for file content.
pub const DATA_CHUNK_SIZE: usize = 4096;
/// A header larger than this is rejected.
const MAX_HEADER: usize = 64 * 1024;
/// Interval between accept attempts while idle.
const ACCEPT_POLL: Duration = Duration::from_millis(50);

/// File-transfer configuration (`[transfer]` section).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferSettings {
    pub enabled: bool,
    pub ip: String,
    pub port: u16,
    /// Seconds to wait for a connection or for data mid-transfer.
    pub timeout_secs: f64,
    pub download_path: PathBuf,
}

impl Default for TransferSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            ip: "127.0.0.1".to_string(),
            port: 1238,
            timeout_secs: 2.0,
            download_path: PathBuf::from("./experiment_files"),
        }
    }
}

impl TransferSettings {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }
}

/// Parsed transfer header plus whatever file bytes arrived with it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferHeader {
    pub file_name: String,
    pub file_size: u64,
    pub file_dir: String,
    pub initial_data: Vec<u8>,
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn transfer_err(details: impl Into<String>) -> RadError {
    RadError::Transfer {
        details: details.into(),
    }
}

impl TransferHeader {
    /// Parse a buffer holding at least the three header fields.
    ///
    /// Returns `Ok(None)` when the buffer does not contain the full header
    /// yet.
    pub fn parse(buf: &[u8]) -> Result<Option<Self>, RadError> {
        let mut fields = Vec::with_capacity(3);
        let mut rest = buf;
        while fields.len() < 3 {
            let Some(at) = find(rest, TRANSFER_SEPARATOR) else {
                return Ok(None);
            };
            fields.push(&rest[..at]);
            rest = &rest[at + TRANSFER_SEPARATOR.len()..];
        }

        let text = |raw: &[u8], what: &str| {
            std::str::from_utf8(raw)
                .map(str::to_string)
                .map_err(|_| transfer_err(format!("{what} is not valid UTF-8")))
        };
        let file_name = text(fields[0], "file name")?;
        let file_size = text(fields[1], "file size")?
            .trim()
            .parse::<u64>()
            .map_err(|e| transfer_err(format!("invalid file size: {e}")))?;
        let file_dir = text(fields[2], "file directory")?;

        Ok(Some(Self {
            file_name,
            file_size,
            file_dir,
            initial_data: rest.to_vec(),
        }))
    }

    /// Destination under `root`, rejecting anything that would escape it.
    pub fn destination(&self, root: &Path) -> Result<PathBuf, RadError> {
        let name = Path::new(&self.file_name);
        let single_component = matches!(
            name.components().collect::<Vec<_>>().as_slice(),
            [Component::Normal(_)]
        );
        if !single_component {
            return Err(transfer_err(format!("refusing file name {:?}", self.file_name)));
        }
        let dir = Path::new(&self.file_dir);
        if !dir
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
        {
            return Err(transfer_err(format!("refusing directory {:?}", self.file_dir)));
        }
        Ok(root.join(dir).join(name))
    }
}

/// Accepts file uploads from the DUT.
pub struct FileReceiver {
    listener: TcpListener,
    download_path: PathBuf,
    wait: Option<Duration>,
}

impl FileReceiver {
    /// Bind the transfer address and create the download directory.
    ///
    /// # Errors
    ///
    /// Returns [`RadError::Bind`] if the address is unavailable and
    /// [`RadError::Io`] if the download directory cannot be created.
    pub fn bind(settings: &TransferSettings) -> Result<Self, RadError> {
        fs::create_dir_all(&settings.download_path)?;
        let addr = settings.addr();
        let bind_err = |e: io::Error| RadError::Bind {
            component: "file receiver".to_string(),
            addr: addr.clone(),
            details: e.to_string(),
        };
        let listener = TcpListener::bind(&addr).map_err(bind_err)?;
        listener.set_nonblocking(true).map_err(bind_err)?;
        Ok(Self {
            listener,
            download_path: settings.download_path.clone(),
            wait: wait_from_secs(settings.timeout_secs),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, RadError> {
        Ok(self.listener.local_addr()?)
    }

    pub fn spawn(self, exits: Sender<MonitorExit>) -> Result<MonitorHandle, RadError> {
        MonitorHandle::spawn("file-receiver", exits, move |stop| self.run(&stop))
    }

    pub fn run(&self, stop: &StopSignal) -> Result<(), RadError> {
        while !stop.is_set() {
            match self.accept(stop) {
                Ok(Some((stream, peer))) => {
                    debug!(peer = %peer, "Received download request, starting.");
                    match self.receive_file(stream) {
                        Ok(path) => info!(path = %path.display(), "Finished saving file"),
                        Err(e) => warn!(peer = %peer, error = %e, "File transfer aborted"),
                    }
                }
                Ok(None) => {}
                Err(e) => warn!(error = %e, "File receiver accept failed"),
            }
        }
        info!("File receiver thread is stopping.");
        Ok(())
    }

    /// Wait up to the configured timeout for one connection.
    fn accept(&self, stop: &StopSignal) -> io::Result<Option<(TcpStream, SocketAddr)>> {
        let started = Instant::now();
        loop {
            match self.listener.accept() {
                Ok(conn) => return Ok(Some(conn)),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    let expired = self.wait.is_some_and(|w| started.elapsed() >= w);
                    if expired || stop.is_set() {
                        return Ok(None);
                    }
                    thread::sleep(ACCEPT_POLL);
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Receive one file from `stream` and return where it was written.
    pub fn receive_file(&self, mut stream: TcpStream) -> Result<PathBuf, RadError> {
        stream.set_nonblocking(false)?;
        stream.set_read_timeout(self.wait)?;

        let mut buf = Vec::with_capacity(DATA_CHUNK_SIZE);
        let mut chunk = [0u8; DATA_CHUNK_SIZE];
        let header = loop {
            if let Some(header) = TransferHeader::parse(&buf)? {
                break header;
            }
            if buf.len() > MAX_HEADER {
                return Err(transfer_err("header too large"));
            }
            let n = stream.read(&mut chunk)?;
            if n == 0 {
                return Err(transfer_err("connection closed before header"));
            }
            buf.extend_from_slice(&chunk[..n]);
        };

        debug!(file = %header.file_name, size = header.file_size, "Downloading file");
        let path = header.destination(&self.download_path)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        if path.exists() {
            warn!(path = %path.display(), "OVERWRITING FILE: destination already exists");
        }

        let mut file = File::create(&path)?;
        file.write_all(&header.initial_data)?;
        let mut received = header.initial_data.len() as u64;
        while received < header.file_size {
            let n = stream.read(&mut chunk)?;
            if n == 0 {
                return Err(transfer_err(format!(
                    "connection closed after {received} of {} bytes",
                    header.file_size
                )));
            }
            file.write_all(&chunk[..n])?;
            received += n as u64;
        }
        file.flush()?;
        Ok(path)
    }
}
