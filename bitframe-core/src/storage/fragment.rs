//! Fragment - the bits of one frame within one slice
//!
//! A fragment owns one bitset per row id. On disk it is a snapshot file
//! plus an operation log next to it (`<slice>` and `<slice>.log`).

use super::file;
use super::StorageConfig;
use crate::bitset::Bitset;
use crate::wal::{LogEntry, LogEntryType, LogReader, LogWriter};
use crate::{config, Error, Result};
use bytes::{Buf, BufMut};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const MAGIC: &[u8; 4] = b"BFFR";

/// Largest decompressed backup image accepted
const MAX_IMAGE_LEN: usize = 1 << 30;

/// Upper bound of the lz4 block compression ratio
const MAX_LZ4_RATIO: usize = 255;

/// Storage for one (frame, slice) pair
pub struct Fragment {
    frame: String,
    slice: u64,
    path: PathBuf,
    rows: RwLock<BTreeMap<u64, Bitset>>,
    log: LogWriter,
    max_op_n: usize,
}

impl Fragment {
    /// Open a fragment, replaying its log on top of the last snapshot
    pub fn open(path: PathBuf, frame: &str, slice: u64, config: &StorageConfig) -> Result<Self> {
        let mut rows = match file::read_optional(&path)? {
            Some(data) => decode_rows(file::decode(MAGIC, &data)?)?,
            None => BTreeMap::new(),
        };

        let log_path = log_path(&path);
        let recovered = LogReader::new(&log_path).recover()?;
        for entry in &recovered.entries {
            apply(&mut rows, entry)?;
        }
        if !recovered.entries.is_empty() {
            debug!(
                "Replayed {} ops into fragment {}/{}",
                recovered.entries.len(),
                frame,
                slice
            );
        }

        let log = LogWriter::open(&log_path, config.sync_policy, &recovered)?;
        let fragment = Self {
            frame: frame.to_string(),
            slice,
            path,
            rows: RwLock::new(rows),
            log,
            max_op_n: config.max_op_n,
        };

        if fragment.log.len() >= fragment.max_op_n {
            fragment.snapshot()?;
        }

        Ok(fragment)
    }

    pub fn frame(&self) -> &str {
        &self.frame
    }

    pub fn slice(&self) -> u64 {
        self.slice
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Set a bit, creating the row on demand. Returns true if the bit changed.
    pub fn set_bit(&self, row: u64, column: u64) -> Result<bool> {
        self.check_column(column)?;

        let mut rows = self.rows.write();
        if rows.get(&row).is_some_and(|b| b.contains(column)) {
            return Ok(false);
        }

        let logged = self.log.append(&LogEntry::set_bit(row, column))?;
        rows.entry(row).or_default().set(column);

        if logged >= self.max_op_n {
            self.snapshot_locked(&rows)?;
        }
        Ok(true)
    }

    /// Clear a bit. Returns true if the bit changed.
    pub fn clear_bit(&self, row: u64, column: u64) -> Result<bool> {
        self.check_column(column)?;

        let mut rows = self.rows.write();
        if !rows.get(&row).is_some_and(|b| b.contains(column)) {
            return Ok(false);
        }

        let logged = self.log.append(&LogEntry::clear_bit(row, column))?;
        if let Some(bits) = rows.get_mut(&row) {
            bits.clear(column);
            if bits.is_empty() {
                rows.remove(&row);
            }
        }

        if logged >= self.max_op_n {
            self.snapshot_locked(&rows)?;
        }
        Ok(true)
    }

    /// Bits of one row; unknown rows are empty
    pub fn row(&self, row: u64) -> Bitset {
        self.rows.read().get(&row).cloned().unwrap_or_default()
    }

    /// Column ids of one row in ascending order
    pub fn bits(&self, row: u64) -> Vec<u64> {
        self.rows
            .read()
            .get(&row)
            .map(Bitset::to_vec)
            .unwrap_or_default()
    }

    /// Row ids holding at least one bit
    pub fn row_ids(&self) -> Vec<u64> {
        self.rows.read().keys().copied().collect()
    }

    /// Total number of set bits
    pub fn count(&self) -> u64 {
        self.rows.read().values().map(Bitset::count).sum()
    }

    /// Write a snapshot and reset the log
    pub fn snapshot(&self) -> Result<()> {
        let rows = self.rows.read();
        self.snapshot_locked(&rows)
    }

    /// Serialize the whole fragment for transfer to another node
    pub fn backup(&self) -> Result<Vec<u8>> {
        let rows = self.rows.read();
        let image = file::encode(MAGIC, &encode_rows(&rows)?);
        Ok(lz4_flex::compress_prepend_size(&image))
    }

    /// Replace the fragment's content with a backup taken elsewhere
    pub fn restore(&self, data: &[u8]) -> Result<()> {
        let image = decompress_backup(data)?;
        let restored = decode_rows(file::decode(MAGIC, &image)?)?;

        for bits in restored.values() {
            if let Some(max) = bits.max() {
                self.check_column(max)?;
            }
            if let Some(min) = bits.iter().next() {
                self.check_column(min)?;
            }
        }

        let mut rows = self.rows.write();
        file::write_atomic(&self.path, &image)?;
        self.log.reset()?;
        *rows = restored;

        info!(
            "Restored fragment {}/{} ({} rows)",
            self.frame,
            self.slice,
            rows.len()
        );
        Ok(())
    }

    fn snapshot_locked(&self, rows: &BTreeMap<u64, Bitset>) -> Result<()> {
        let image = file::encode(MAGIC, &encode_rows(rows)?);
        file::write_atomic(&self.path, &image)?;
        self.log.reset()?;
        debug!(
            "Snapshot fragment {}/{} ({} bytes)",
            self.frame,
            self.slice,
            image.len()
        );
        Ok(())
    }

    fn check_column(&self, column: u64) -> Result<()> {
        if column / config::SLICE_WIDTH != self.slice {
            return Err(Error::ColumnOutOfSlice {
                column,
                slice: self.slice,
            });
        }
        Ok(())
    }
}

/// Decompress a backup image, checking its declared size before allocating
fn decompress_backup(data: &[u8]) -> Result<Vec<u8>> {
    if data.len() < 4 {
        return Err(Error::InvalidFormat("fragment backup too short".into()));
    }
    let declared = (&data[..4]).get_u32_le() as usize;
    let body = &data[4..];
    if declared > MAX_IMAGE_LEN || declared > body.len().saturating_mul(MAX_LZ4_RATIO) {
        return Err(Error::InvalidFormat(format!(
            "fragment backup declares {} bytes from {} compressed",
            declared,
            body.len()
        )));
    }

    lz4_flex::decompress(body, declared)
        .map_err(|e| Error::InvalidFormat(format!("fragment backup: {}", e)))
}

/// Log file that belongs to a fragment snapshot path
pub(crate) fn log_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".log");
    PathBuf::from(name)
}

fn apply(rows: &mut BTreeMap<u64, Bitset>, entry: &LogEntry) -> Result<()> {
    let (row, column) = entry.bit_position()?;
    match entry.entry_type {
        LogEntryType::SetBit => {
            rows.entry(row).or_default().set(column);
        }
        LogEntryType::ClearBit => {
            if let Some(bits) = rows.get_mut(&row) {
                bits.clear(column);
                if bits.is_empty() {
                    rows.remove(&row);
                }
            }
        }
        LogEntryType::SetAttrs => {
            return Err(Error::Corruption("attribute entry in fragment log".into()));
        }
    }
    Ok(())
}

/// Body layout: row count, then per row its id, encoded length and bitset
fn encode_rows(rows: &BTreeMap<u64, Bitset>) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    buf.put_u64_le(rows.len() as u64);
    let mut scratch = Vec::new();
    for (row, bits) in rows {
        scratch.clear();
        bits.encode(&mut scratch)?;
        buf.put_u64_le(*row);
        buf.put_u32_le(scratch.len() as u32);
        buf.put_slice(&scratch);
    }
    Ok(buf)
}

fn decode_rows(mut body: &[u8]) -> Result<BTreeMap<u64, Bitset>> {
    if body.remaining() < 8 {
        return Err(Error::Corruption("fragment snapshot truncated".into()));
    }
    let count = body.get_u64_le();
    let mut rows = BTreeMap::new();
    for _ in 0..count {
        if body.remaining() < 12 {
            return Err(Error::Corruption("fragment row header truncated".into()));
        }
        let row = body.get_u64_le();
        let len = body.get_u32_le() as usize;
        if body.remaining() < len {
            return Err(Error::Corruption(format!("fragment row {} truncated", row)));
        }
        let bits = Bitset::decode(&body[..len])?;
        body.advance(len);
        rows.insert(row, bits);
    }
    Ok(rows)
}
