//! Compressed set of 64-bit integers
//!
//! Thin wrapper over a roaring treemap. Bits always iterate in ascending
//! order and a column can only be present once.

use crate::{Error, Result};
use roaring::RoaringTreemap;
use std::fmt;

/// A set of column ids
#[derive(Clone, Default, PartialEq)]
pub struct Bitset {
    inner: RoaringTreemap,
}

impl Bitset {
    /// Create an empty bitset
    pub fn new() -> Self {
        Self {
            inner: RoaringTreemap::new(),
        }
    }

    /// Set a bit, returning true if it was not already set
    #[inline]
    pub fn set(&mut self, bit: u64) -> bool {
        self.inner.insert(bit)
    }

    /// Clear a bit, returning true if it was set
    #[inline]
    pub fn clear(&mut self, bit: u64) -> bool {
        self.inner.remove(bit)
    }

    #[inline]
    pub fn contains(&self, bit: u64) -> bool {
        self.inner.contains(bit)
    }

    /// Number of set bits
    pub fn count(&self) -> u64 {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Highest set bit
    pub fn max(&self) -> Option<u64> {
        self.inner.max()
    }

    pub fn union(&self, other: &Bitset) -> Bitset {
        Bitset {
            inner: &self.inner | &other.inner,
        }
    }

    pub fn intersect(&self, other: &Bitset) -> Bitset {
        Bitset {
            inner: &self.inner & &other.inner,
        }
    }

    pub fn difference(&self, other: &Bitset) -> Bitset {
        Bitset {
            inner: &self.inner - &other.inner,
        }
    }

    /// Merge another bitset into this one
    pub fn union_with(&mut self, other: &Bitset) {
        self.inner |= &other.inner;
    }

    /// Iterate over set bits in ascending order
    pub fn iter(&self) -> impl Iterator<Item = u64> + '_ {
        self.inner.iter()
    }

    /// Collect set bits in ascending order
    pub fn to_vec(&self) -> Vec<u64> {
        self.inner.iter().collect()
    }

    /// Encoded size in bytes
    pub fn encoded_len(&self) -> usize {
        self.inner.serialized_size()
    }

    /// Encode into the portable roaring format
    pub fn encode(&self, buf: &mut Vec<u8>) -> Result<()> {
        self.inner.serialize_into(buf)?;
        Ok(())
    }

    /// Decode from the portable roaring format
    pub fn decode(data: &[u8]) -> Result<Self> {
        let inner = RoaringTreemap::deserialize_from(data)
            .map_err(|e| Error::InvalidFormat(format!("bitset: {}", e)))?;
        Ok(Self { inner })
    }
}

impl FromIterator<u64> for Bitset {
    fn from_iter<I: IntoIterator<Item = u64>>(iter: I) -> Self {
        Self {
            inner: iter.into_iter().collect(),
        }
    }
}

impl fmt::Debug for Bitset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.inner.iter()).finish()
    }
}
