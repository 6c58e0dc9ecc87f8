//! Log entry types and serialization

use crate::{Error, Result};
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Log entry type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LogEntryType {
    /// Set one bit
    SetBit = 1,
    /// Clear one bit
    ClearBit = 2,
    /// Replace the attribute map of one id
    SetAttrs = 3,
}

impl TryFrom<u8> for LogEntryType {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            1 => Ok(LogEntryType::SetBit),
            2 => Ok(LogEntryType::ClearBit),
            3 => Ok(LogEntryType::SetAttrs),
            _ => Err(Error::InvalidFormat(format!(
                "Invalid log entry type: {}",
                value
            ))),
        }
    }
}

/// A single log entry
#[derive(Debug, Clone, PartialEq)]
pub struct LogEntry {
    /// Entry type
    pub entry_type: LogEntryType,
    /// Entry payload (serialized)
    pub payload: Vec<u8>,
}

impl LogEntry {
    /// Create a set-bit entry
    pub fn set_bit(row: u64, column: u64) -> Self {
        Self::bit(LogEntryType::SetBit, row, column)
    }

    /// Create a clear-bit entry
    pub fn clear_bit(row: u64, column: u64) -> Self {
        Self::bit(LogEntryType::ClearBit, row, column)
    }

    /// Create an attribute entry from an already encoded record
    pub fn set_attrs(payload: Vec<u8>) -> Self {
        Self {
            entry_type: LogEntryType::SetAttrs,
            payload,
        }
    }

    fn bit(entry_type: LogEntryType, row: u64, column: u64) -> Self {
        let mut payload = Vec::with_capacity(16);
        payload.put_u64_le(row);
        payload.put_u64_le(column);
        Self {
            entry_type,
            payload,
        }
    }

    /// Decode the (row, column) pair of a bit entry
    pub fn bit_position(&self) -> Result<(u64, u64)> {
        if !matches!(self.entry_type, LogEntryType::SetBit | LogEntryType::ClearBit) {
            return Err(Error::InvalidFormat("Not a bit entry".into()));
        }
        if self.payload.len() != 16 {
            return Err(Error::InvalidFormat(format!(
                "Bit entry payload is {} bytes",
                self.payload.len()
            )));
        }
        let mut cursor = &self.payload[..];
        Ok((cursor.get_u64_le(), cursor.get_u64_le()))
    }

    /// Serialize the entry with length prefix and CRC checksum
    ///
    /// Format:
    /// - 4 bytes: entry length (excluding this field)
    /// - 1 byte: entry type
    /// - 4 bytes: payload length
    /// - N bytes: payload
    /// - 4 bytes: CRC32 checksum
    pub fn serialize_with_checksum(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(13 + self.payload.len());

        // Reserve space for length prefix
        buf.put_u32_le(0);

        buf.put_u8(self.entry_type as u8);
        buf.put_u32_le(self.payload.len() as u32);
        buf.put_slice(&self.payload);

        // Checksum covers everything after the length prefix
        let checksum = crc32fast::hash(&buf[4..]);
        buf.put_u32_le(checksum);

        let len = (buf.len() - 4) as u32;
        buf[0..4].copy_from_slice(&len.to_le_bytes());

        buf.freeze()
    }

    /// Deserialize entry from bytes, validating checksum
    pub fn deserialize_with_checksum(data: &[u8]) -> Result<(Self, usize)> {
        if data.len() < 4 {
            return Err(Error::InvalidFormat("Entry too short".into()));
        }

        let len = (&data[..4]).get_u32_le() as usize;
        if len < 9 {
            return Err(Error::Corruption(format!("Entry length {} too small", len)));
        }
        if data.len() < 4 + len {
            return Err(Error::InvalidFormat("Incomplete entry".into()));
        }

        let entry_data = &data[4..4 + len];

        let expected_checksum = (&entry_data[len - 4..]).get_u32_le();
        let actual_checksum = crc32fast::hash(&entry_data[..len - 4]);
        if expected_checksum != actual_checksum {
            return Err(Error::ChecksumMismatch {
                expected: expected_checksum,
                actual: actual_checksum,
            });
        }

        let mut cursor = &entry_data[..len - 4];
        let entry_type = LogEntryType::try_from(cursor.get_u8())?;
        let payload_len = cursor.get_u32_le() as usize;
        if cursor.remaining() != payload_len {
            return Err(Error::Corruption(format!(
                "Payload length {} does not match entry ({} bytes left)",
                payload_len,
                cursor.remaining()
            )));
        }

        let entry = LogEntry {
            entry_type,
            payload: cursor.to_vec(),
        };

        Ok((entry, 4 + len))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_serialization() {
        let entry = LogEntry::set_bit(7, 1_048_577);
        let serialized = entry.serialize_with_checksum();

        let (deserialized, len) = LogEntry::deserialize_with_checksum(&serialized).unwrap();
        assert_eq!(len, serialized.len());
        assert_eq!(deserialized.entry_type, LogEntryType::SetBit);
        assert_eq!(deserialized.bit_position().unwrap(), (7, 1_048_577));
    }

    #[test]
    fn test_checksum_validation() {
        let entry = LogEntry::clear_bit(1, 2);
        let mut serialized = entry.serialize_with_checksum().to_vec();

        // Corrupt the payload
        serialized[10] ^= 0xFF;

        let result = LogEntry::deserialize_with_checksum(&serialized);
        assert!(matches!(result, Err(Error::ChecksumMismatch { .. })));
    }

    #[test]
    fn test_incomplete_entry() {
        let serialized = LogEntry::set_attrs(vec![1, 2, 3]).serialize_with_checksum();
        let result = LogEntry::deserialize_with_checksum(&serialized[..serialized.len() - 1]);
        assert!(matches!(result, Err(Error::InvalidFormat(_))));
    }

    #[test]
    fn test_attrs_entry_is_not_a_bit() {
        assert!(LogEntry::set_attrs(vec![0; 16]).bit_position().is_err());
    }
}
