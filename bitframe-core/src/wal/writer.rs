//! Log writer implementation

use super::{LogEntry, Recovered, SyncPolicy};
use crate::Result;
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

/// Append-only log writer
pub struct LogWriter {
    path: PathBuf,
    sync_policy: SyncPolicy,
    inner: Mutex<LogWriterInner>,
}

struct LogWriterInner {
    file: BufWriter<File>,
    entries: usize,
    bytes_written: u64,
    writes_since_sync: usize,
    last_sync: Instant,
}

impl LogWriter {
    /// Open a log for appending, dropping anything past the recovered prefix
    pub fn open(
        path: impl AsRef<Path>,
        sync_policy: SyncPolicy,
        recovered: &Recovered,
    ) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        if file.metadata()?.len() != recovered.valid_len {
            file.set_len(recovered.valid_len)?;
            file.sync_all()?;
        }

        let inner = LogWriterInner {
            file: BufWriter::new(file),
            entries: recovered.entries.len(),
            bytes_written: recovered.valid_len,
            writes_since_sync: 0,
            last_sync: Instant::now(),
        };

        Ok(Self {
            path,
            sync_policy,
            inner: Mutex::new(inner),
        })
    }

    /// Append an entry, returning the number of entries now in the log
    pub fn append(&self, entry: &LogEntry) -> Result<usize> {
        let serialized = entry.serialize_with_checksum();
        let mut inner = self.inner.lock();

        inner.file.write_all(&serialized)?;
        inner.bytes_written += serialized.len() as u64;
        inner.entries += 1;
        inner.writes_since_sync += 1;

        if self.should_sync(&inner) {
            Self::sync_inner(&mut inner)?;
        } else {
            inner.file.flush()?;
        }

        Ok(inner.entries)
    }

    /// Force sync to disk
    pub fn sync(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        Self::sync_inner(&mut inner)
    }

    /// Discard every entry. Called once the owner has written a snapshot.
    pub fn reset(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.file.flush()?;
        inner.file.get_ref().set_len(0)?;
        inner.file.get_ref().sync_all()?;
        inner.entries = 0;
        inner.bytes_written = 0;
        inner.writes_since_sync = 0;
        inner.last_sync = Instant::now();
        Ok(())
    }

    /// Number of entries since the last reset
    pub fn len(&self) -> usize {
        self.inner.lock().entries
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current size of the log file
    pub fn size(&self) -> u64 {
        self.inner.lock().bytes_written
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn sync_inner(inner: &mut LogWriterInner) -> Result<()> {
        inner.file.flush()?;
        inner.file.get_ref().sync_data()?;
        inner.writes_since_sync = 0;
        inner.last_sync = Instant::now();
        Ok(())
    }

    fn should_sync(&self, inner: &LogWriterInner) -> bool {
        match self.sync_policy {
            SyncPolicy::Immediate => true,
            SyncPolicy::EveryN(n) => inner.writes_since_sync >= n,
            SyncPolicy::Interval { millis } => {
                inner.last_sync.elapsed().as_millis() >= millis as u128
            }
            SyncPolicy::None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wal::LogReader;
    use tempfile::TempDir;

    #[test]
    fn test_log_writer() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("frag.log");

        let writer = LogWriter::open(&path, SyncPolicy::Immediate, &Recovered::default()).unwrap();
        assert!(writer.is_empty());
        assert_eq!(writer.append(&LogEntry::set_bit(1, 2)).unwrap(), 1);
        assert_eq!(writer.append(&LogEntry::clear_bit(1, 2)).unwrap(), 2);
        assert_eq!(writer.size(), std::fs::metadata(&path).unwrap().len());
    }

    #[test]
    fn test_reset_empties_log() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("frag.log");

        let writer = LogWriter::open(&path, SyncPolicy::EveryN(4), &Recovered::default()).unwrap();
        for i in 0..5 {
            writer.append(&LogEntry::set_bit(0, i)).unwrap();
        }
        writer.reset().unwrap();
        writer.append(&LogEntry::set_bit(9, 9)).unwrap();
        writer.sync().unwrap();

        let recovered = LogReader::new(&path).recover().unwrap();
        assert_eq!(recovered.entries.len(), 1);
        assert_eq!(recovered.entries[0].bit_position().unwrap(), (9, 9));
    }

    #[test]
    fn test_open_truncates_invalid_tail() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("frag.log");

        let good = LogEntry::set_bit(1, 1).serialize_with_checksum();
        let mut data = good.to_vec();
        data.extend_from_slice(&[0xAB; 7]);
        std::fs::write(&path, &data).unwrap();

        let recovered = LogReader::new(&path).recover().unwrap();
        let writer = LogWriter::open(&path, SyncPolicy::Immediate, &recovered).unwrap();
        writer.append(&LogEntry::set_bit(2, 2)).unwrap();

        let recovered = LogReader::new(&path).recover().unwrap();
        assert_eq!(recovered.entries.len(), 2);
    }
}
