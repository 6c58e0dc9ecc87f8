//! Log reader for recovery

use super::LogEntry;
use crate::{Error, Result};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Result of reading a log file
#[derive(Debug, Default)]
pub struct Recovered {
    /// Entries in append order
    pub entries: Vec<LogEntry>,
    /// Length of the well-formed prefix of the file
    pub valid_len: u64,
}

/// Log reader for recovering entries after a restart or crash
pub struct LogReader {
    path: PathBuf,
}

impl LogReader {
    /// Create a new log reader
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Read every intact entry. A missing file is an empty log.
    ///
    /// A torn or corrupted record ends the log: everything from that offset
    /// on is reported as invalid so the writer can truncate it.
    pub fn recover(&self) -> Result<Recovered> {
        let data = match fs::read(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Recovered::default()),
            Err(e) => return Err(e.into()),
        };

        let mut entries = Vec::new();
        let mut offset = 0;

        while offset < data.len() {
            match LogEntry::deserialize_with_checksum(&data[offset..]) {
                Ok((entry, bytes_read)) => {
                    entries.push(entry);
                    offset += bytes_read;
                }
                Err(e @ (Error::ChecksumMismatch { .. } | Error::Corruption(_))) => {
                    warn!(
                        "Corrupt entry at offset {} in {:?}, truncating: {}",
                        offset, self.path, e
                    );
                    break;
                }
                Err(Error::InvalidFormat(_)) => {
                    // Incomplete entry at end (crash during write)
                    warn!("Torn entry at offset {} in {:?}, truncating", offset, self.path);
                    break;
                }
                Err(e) => return Err(e),
            }
        }

        Ok(Recovered {
            entries,
            valid_len: offset as u64,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
