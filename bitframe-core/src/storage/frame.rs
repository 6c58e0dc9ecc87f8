//! Frame - a named bitmap collection within a database

use super::{AttrStore, Fragment, StorageConfig, ATTR_FILE, META_FILE};
use crate::bitset::Bitset;
use crate::{slice_of, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Frame creation options
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameOptions {}

/// A frame: one fragment per slice plus the row attribute store
pub struct Frame {
    database: String,
    name: String,
    path: PathBuf,
    options: FrameOptions,
    config: StorageConfig,
    fragments: RwLock<BTreeMap<u64, Arc<Fragment>>>,
    row_attrs: AttrStore,
}

impl Frame {
    /// Create a new frame directory and persist its options
    pub fn create(
        database: &str,
        name: &str,
        path: PathBuf,
        options: FrameOptions,
        config: &StorageConfig,
    ) -> Result<Self> {
        fs::create_dir_all(path.join("fragments"))?;
        super::file::write_atomic(&path.join(META_FILE), &serde_json::to_vec(&options)?)?;
        Self::load(database, name, path, options, config)
    }

    /// Open an existing frame directory
    pub fn open(database: &str, name: &str, path: PathBuf, config: &StorageConfig) -> Result<Self> {
        let options = match super::file::read_optional(&path.join(META_FILE))? {
            Some(data) => serde_json::from_slice(&data)?,
            None => FrameOptions::default(),
        };
        Self::load(database, name, path, options, config)
    }

    fn load(
        database: &str,
        name: &str,
        path: PathBuf,
        options: FrameOptions,
        config: &StorageConfig,
    ) -> Result<Self> {
        let fragments_dir = path.join("fragments");
        fs::create_dir_all(&fragments_dir)?;

        let mut fragments = BTreeMap::new();
        for slice in Self::find_slices(&fragments_dir)? {
            let fragment =
                Fragment::open(fragments_dir.join(slice.to_string()), name, slice, config)?;
            fragments.insert(slice, Arc::new(fragment));
        }

        let row_attrs = AttrStore::open(path.join(ATTR_FILE), config)?;

        debug!(
            "Opened frame {}/{} with {} fragments",
            database,
            name,
            fragments.len()
        );

        Ok(Self {
            database: database.to_string(),
            name: name.to_string(),
            path,
            options,
            config: config.clone(),
            fragments: RwLock::new(fragments),
            row_attrs,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn options(&self) -> &FrameOptions {
        &self.options
    }

    /// Row attribute store
    pub fn row_attrs(&self) -> &AttrStore {
        &self.row_attrs
    }

    /// Fragment for a slice, if this frame has one
    pub fn fragment(&self, slice: u64) -> Option<Arc<Fragment>> {
        self.fragments.read().get(&slice).cloned()
    }

    /// Fragment for a slice, created on first use
    pub fn create_fragment_if_not_exists(&self, slice: u64) -> Result<Arc<Fragment>> {
        if let Some(fragment) = self.fragment(slice) {
            return Ok(fragment);
        }

        let mut fragments = self.fragments.write();
        if let Some(fragment) = fragments.get(&slice) {
            return Ok(fragment.clone());
        }

        let path = self.path.join("fragments").join(slice.to_string());
        let fragment = Arc::new(Fragment::open(path, &self.name, slice, &self.config)?);
        fragments.insert(slice, fragment.clone());
        info!("Created fragment {}/{}/{}", self.database, self.name, slice);
        Ok(fragment)
    }

    /// Set a bit in the fragment that owns `column`
    pub fn set_bit(&self, row: u64, column: u64) -> Result<bool> {
        self.create_fragment_if_not_exists(slice_of(column))?
            .set_bit(row, column)
    }

    /// Clear a bit; a missing fragment means the bit was never set
    pub fn clear_bit(&self, row: u64, column: u64) -> Result<bool> {
        match self.fragment(slice_of(column)) {
            Some(fragment) => fragment.clear_bit(row, column),
            None => Ok(false),
        }
    }

    /// Bits of a row within one slice
    pub fn row(&self, row: u64, slice: u64) -> Bitset {
        self.fragment(slice)
            .map(|f| f.row(row))
            .unwrap_or_default()
    }

    /// Slices with a fragment, ascending
    pub fn slices(&self) -> Vec<u64> {
        self.fragments.read().keys().copied().collect()
    }

    /// Highest slice with a fragment
    pub fn max_slice(&self) -> Option<u64> {
        self.fragments.read().keys().next_back().copied()
    }

    /// Snapshot every fragment and the row attributes
    pub fn snapshot(&self) -> Result<()> {
        let fragments: Vec<_> = self.fragments.read().values().cloned().collect();
        for fragment in fragments {
            fragment.snapshot()?;
        }
        self.row_attrs.snapshot()
    }

    /// Slices found on disk, from snapshots or from logs written before
    /// the first snapshot
    fn find_slices(dir: &Path) -> Result<BTreeSet<u64>> {
        let mut slices = BTreeSet::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            let stem = name.strip_suffix(".log").unwrap_or(&name);
            if let Ok(slice) = stem.parse::<u64>() {
                slices.insert(slice);
            }
        }
        Ok(slices)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SLICE_WIDTH;
    use tempfile::TempDir;

    #[test]
    fn test_frame_bits_across_slices() {
        let dir = TempDir::new().unwrap();
        let config = StorageConfig::default();
        let path = dir.path().join("f");
        let frame = Frame::create("d", "f", path, FrameOptions::default(), &config).unwrap();

        assert!(frame.set_bit(1, 100).unwrap());
        assert!(frame.set_bit(1, SLICE_WIDTH + 5).unwrap());
        assert!(frame.set_bit(1, 3 * SLICE_WIDTH).unwrap());
        assert!(!frame.clear_bit(1, 7 * SLICE_WIDTH).unwrap());

        assert_eq!(frame.slices(), vec![0, 1, 3]);
        assert_eq!(frame.max_slice(), Some(3));
        assert_eq!(frame.row(1, 1).to_vec(), vec![SLICE_WIDTH + 5]);
        assert!(frame.row(1, 2).is_empty());
    }

    #[test]
    fn test_reopen_finds_log_only_fragments() {
        let dir = TempDir::new().unwrap();
        let config = StorageConfig::default();
        let path = dir.path().join("f");

        {
            let frame =
                Frame::create("d", "f", path.clone(), FrameOptions::default(), &config).unwrap();
            frame.set_bit(2, 2 * SLICE_WIDTH + 1).unwrap();
        }
        assert!(path.join("fragments").join("2.log").exists());
        assert!(!path.join("fragments").join("2").exists());

        let frame = Frame::open("d", "f", path, &config).unwrap();
        assert_eq!(frame.slices(), vec![2]);
        assert_eq!(frame.row(2, 2).to_vec(), vec![2 * SLICE_WIDTH + 1]);
    }
}
