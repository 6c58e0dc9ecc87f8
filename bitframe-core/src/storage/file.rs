//! Checksummed snapshot files
//!
//! Layout: 4-byte magic, 1-byte format version, body, CRC32 of everything
//! before it. Snapshots are replaced atomically: the new image is written to
//! a temporary sibling, synced, then renamed over the old one.

use crate::{Error, Result};
use bytes::{Buf, BufMut};
use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::Path;

/// Current snapshot format version
pub const FORMAT_VERSION: u8 = 1;

/// Wrap a body in the snapshot envelope
pub fn encode(magic: &[u8; 4], body: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(body.len() + 9);
    buf.put_slice(magic);
    buf.put_u8(FORMAT_VERSION);
    buf.put_slice(body);
    let checksum = crc32fast::hash(&buf);
    buf.put_u32_le(checksum);
    buf
}

/// Validate the envelope and return the body
pub fn decode<'a>(magic: &[u8; 4], data: &'a [u8]) -> Result<&'a [u8]> {
    if data.len() < 9 {
        return Err(Error::InvalidFormat("Snapshot too short".into()));
    }
    if &data[..4] != magic {
        return Err(Error::InvalidFormat(format!(
            "Bad snapshot magic {:?}",
            &data[..4]
        )));
    }
    if data[4] != FORMAT_VERSION {
        return Err(Error::InvalidFormat(format!(
            "Unsupported snapshot version {}",
            data[4]
        )));
    }

    let split = data.len() - 4;
    let expected = (&data[split..]).get_u32_le();
    let actual = crc32fast::hash(&data[..split]);
    if expected != actual {
        return Err(Error::ChecksumMismatch { expected, actual });
    }

    Ok(&data[5..split])
}

/// Atomically replace `path` with `data`
pub fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let tmp = path.with_extension("tmp");
    {
        let mut file = File::create(&tmp)?;
        file.write_all(data)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)?;

    // Persist the rename itself
    if let Some(parent) = path.parent() {
        if let Ok(dir) = File::open(parent) {
            let _ = dir.sync_all();
        }
    }
    Ok(())
}

/// Read a whole file, `None` if it does not exist
pub fn read_optional(path: &Path) -> Result<Option<Vec<u8>>> {
    match fs::read(path) {
        Ok(data) => Ok(Some(data)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}
