//! `postmaster.pid` descriptor.
//!
//! The engine writes its PID, data directory, start time and port as the
//! first four lines of `postmaster.pid` in the data directory. Later lines
//! (socket directory, listen address, shared memory key, status) are
//! ignored.

use std::path::{Path, PathBuf};

use crate::error::HaError;

/// File name inside the data directory.
pub const PID_FILE_NAME: &str = "postmaster.pid";

/// Parsed `postmaster.pid`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PidFile {
    /// Postmaster process id.
    pub pid: u32,
    /// Data directory the postmaster serves.
    pub data_dir: PathBuf,
    /// Start time as a Unix timestamp.
    pub start_time: i64,
    /// Listening port.
    pub port: u16,
}

impl PidFile {
    /// Parses the file contents.
    ///
    /// # Errors
    ///
    /// Returns [`HaError::Internal`] when fewer than four lines are present or
    /// a numeric field does not parse.
    pub fn parse(contents: &str) -> Result<Self, HaError> {
        let mut lines = contents.lines().map(str::trim);
        let (Some(pid), Some(data_dir), Some(start_time), Some(port)) =
            (lines.next(), lines.next(), lines.next(), lines.next())
        else {
            return Err(HaError::Internal(
                "postmaster.pid has fewer than four lines".to_string(),
            ));
        };

        let pid = pid
            .parse::<u32>()
            .map_err(|e| HaError::Internal(format!("postmaster.pid: bad pid {pid:?}: {e}")))?;
        let start_time = start_time.parse::<i64>().map_err(|e| {
            HaError::Internal(format!("postmaster.pid: bad start time {start_time:?}: {e}"))
        })?;
        let port = port
            .parse::<u16>()
            .map_err(|e| HaError::Internal(format!("postmaster.pid: bad port {port:?}: {e}")))?;

        Ok(Self {
            pid,
            data_dir: PathBuf::from(data_dir),
            start_time,
            port,
        })
    }

    /// Reads and parses `postmaster.pid` from `data_dir`.
    ///
    /// Returns `Ok(None)` when the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`HaError::Io`] for other read failures and parse errors from
    /// [`PidFile::parse`].
    pub async fn read(data_dir: &Path) -> Result<Option<Self>, HaError> {
        match tokio::fs::read_to_string(data_dir.join(PID_FILE_NAME)).await {
            Ok(contents) => Self::parse(&contents).map(Some),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Whether the recorded process is still alive on this host.
    pub async fn is_alive(&self) -> bool {
        tokio::fs::metadata(format!("/proc/{}", self.pid))
            .await
            .is_ok()
    }
}
