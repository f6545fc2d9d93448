//! Append-only measurement log: one `[<timestamp>] <stats>` line per poll.

use std::fs::{self, File, OpenOptions};
use std::io::{LineWriter, Write};
use std::path::{Path, PathBuf};

use chrono::Local;
use radwatch_types::{PowerStats, RadError};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

pub struct MeasurementLog {
    path: PathBuf,
    out: LineWriter<File>,
}

impl MeasurementLog {
    /// Create missing parent directories and open `path` for appending.
    ///
    /// # Errors
    ///
    /// Returns [`RadError::MeasurementLog`] if the directory or the file
    /// cannot be created.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, RadError> {
        let path = path.as_ref().to_path_buf();
        let log_err = |e: std::io::Error| RadError::MeasurementLog {
            path: path.display().to_string(),
            details: e.to_string(),
        };
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(log_err)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(log_err)?;
        Ok(Self {
            path,
            out: LineWriter::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one line for `stats`, stamped with the local time.
    pub fn record(&mut self, stats: &PowerStats) -> Result<(), RadError> {
        let now = Local::now().format(TIMESTAMP_FORMAT);
        writeln!(self.out, "[{now}] {stats}").map_err(|e| RadError::MeasurementLog {
            path: self.path.display().to_string(),
            details: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats(voltage: f64) -> PowerStats {
        PowerStats {
            powered: true,
            voltage,
            current: 0.5,
            constant_current: false,
            constant_voltage: true,
            voltage_protection: false,
            current_protection: false,
            power_protection: false,
            temperature_protection: false,
            remote_control_active: true,
        }
    }

    #[test]
    fn creates_parent_directories_and_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("psu.log");

        let mut log = MeasurementLog::open(&path).unwrap();
        log.record(&stats(12.0)).unwrap();
        drop(log);
        let mut log = MeasurementLog::open(&path).unwrap();
        log.record(&stats(12.5)).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with('['));
        assert!(lines[0].ends_with("voltage=12.000V current=0.500A mode=CV ovp=false ocp=false opp=false otp=false remote=true"));
        assert!(lines[1].contains("voltage=12.500V"));
    }

    #[test]
    fn unopenable_path_fails_fast() {
        let dir = tempfile::tempdir().unwrap();
        // A directory cannot be opened as a log file.
        let err = MeasurementLog::open(dir.path()).err().unwrap();
        assert!(matches!(err, RadError::MeasurementLog { .. }));
        assert!(err.is_unrecoverable());
    }
}
