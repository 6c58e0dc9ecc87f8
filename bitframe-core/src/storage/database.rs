//! Database - manages a single database instance

use super::{validate_name, AttrStore, Frame, FrameOptions, StorageConfig, ATTR_FILE, META_FILE};
use crate::{config, Error, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

/// Database creation options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseOptions {
    /// Argument name that addresses columns in queries
    #[serde(default = "default_column_label")]
    pub column_label: String,
}

fn default_column_label() -> String {
    config::DEFAULT_COLUMN_LABEL.to_string()
}

impl Default for DatabaseOptions {
    fn default() -> Self {
        Self {
            column_label: default_column_label(),
        }
    }
}

/// Arguments whose meaning is fixed in every call
const RESERVED_ARGS: [&str; 2] = ["id", "frame"];

/// A column label must be a query identifier that no call already uses
fn validate_column_label(label: &str) -> Result<()> {
    let mut chars = label.chars();
    let valid = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'));

    if !valid || RESERVED_ARGS.contains(&label) {
        return Err(Error::InvalidName(label.to_string()));
    }
    Ok(())
}

/// A single bitframe database
pub struct Database {
    name: String,
    path: PathBuf,
    options: DatabaseOptions,
    config: StorageConfig,
    frames: RwLock<BTreeMap<String, Arc<Frame>>>,
    column_attrs: AttrStore,
    // Highest slice seen through routing, whether or not it is stored here
    noted_max_slice: AtomicU64,
}

impl Database {
    /// Create a new database directory and persist its options
    pub fn create(
        name: &str,
        path: PathBuf,
        options: DatabaseOptions,
        config: &StorageConfig,
    ) -> Result<Self> {
        validate_name(name)?;
        validate_column_label(&options.column_label)?;
        fs::create_dir_all(&path)?;
        super::file::write_atomic(&path.join(META_FILE), &serde_json::to_vec(&options)?)?;
        Self::load(name, path, options, config)
    }

    /// Open an existing database directory with all of its frames
    pub fn open(name: &str, path: PathBuf, config: &StorageConfig) -> Result<Self> {
        let options = match super::file::read_optional(&path.join(META_FILE))? {
            Some(data) => serde_json::from_slice(&data)?,
            None => DatabaseOptions::default(),
        };
        Self::load(name, path, options, config)
    }

    fn load(
        name: &str,
        path: PathBuf,
        options: DatabaseOptions,
        config: &StorageConfig,
    ) -> Result<Self> {
        let column_attrs = AttrStore::open(path.join(ATTR_FILE), config)?;
        let frames = Self::load_frames(name, &path, config)?;

        Ok(Self {
            name: name.to_string(),
            path,
            options,
            config: config.clone(),
            frames: RwLock::new(frames),
            column_attrs,
            noted_max_slice: AtomicU64::new(0),
        })
    }

    /// Get database name
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn options(&self) -> &DatabaseOptions {
        &self.options
    }

    /// Argument name that addresses columns, `profileID` by default
    pub fn column_label(&self) -> &str {
        &self.options.column_label
    }

    /// Column attribute store
    pub fn column_attrs(&self) -> &AttrStore {
        &self.column_attrs
    }

    /// Create a frame; fails if one with the same name exists
    pub fn create_frame(&self, name: &str, options: FrameOptions) -> Result<Arc<Frame>> {
        validate_name(name)?;

        let mut frames = self.frames.write();
        if frames.contains_key(name) {
            return Err(Error::FrameExists(name.to_string()));
        }

        let frame = Arc::new(Frame::create(
            &self.name,
            name,
            self.path.join(name),
            options,
            &self.config,
        )?);
        frames.insert(name.to_string(), frame.clone());

        info!("Created frame: {}/{}", self.name, name);
        Ok(frame)
    }

    /// Get a frame by name
    pub fn frame(&self, name: &str) -> Option<Arc<Frame>> {
        self.frames.read().get(name).cloned()
    }

    /// Get a frame by name, `FrameNotFound` if missing
    pub fn require_frame(&self, name: &str) -> Result<Arc<Frame>> {
        self.frame(name)
            .ok_or_else(|| Error::FrameNotFound(name.to_string()))
    }

    /// Drop a frame and its data
    pub fn drop_frame(&self, name: &str) -> Result<()> {
        let mut frames = self.frames.write();
        if frames.remove(name).is_none() {
            return Err(Error::FrameNotFound(name.to_string()));
        }

        let path = self.path.join(name);
        if path.exists() {
            fs::remove_dir_all(&path)?;
        }

        info!("Dropped frame: {}/{}", self.name, name);
        Ok(())
    }

    /// Frames in name order
    pub fn frames(&self) -> Vec<Arc<Frame>> {
        self.frames.read().values().cloned().collect()
    }

    /// Highest slice stored locally or noted from routing; 0 when empty
    pub fn max_slice(&self) -> u64 {
        let local = self
            .frames
            .read()
            .values()
            .filter_map(|f| f.max_slice())
            .max()
            .unwrap_or(0);
        local.max(self.noted_max_slice.load(Ordering::Acquire))
    }

    /// Record a slice written through this node, even if another node owns it
    pub fn note_slice(&self, slice: u64) {
        self.noted_max_slice.fetch_max(slice, Ordering::AcqRel);
    }

    /// Snapshot all frames and the column attributes
    pub fn snapshot(&self) -> Result<()> {
        for frame in self.frames() {
            frame.snapshot()?;
        }
        self.column_attrs.snapshot()
    }

    fn load_frames(
        db: &str,
        path: &Path,
        config: &StorageConfig,
    ) -> Result<BTreeMap<String, Arc<Frame>>> {
        let mut frames = BTreeMap::new();

        for entry in fs::read_dir(path)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();

            // Skip hidden directories
            if name.starts_with('.') {
                continue;
            }

            // A frame that cannot be read fails the open; it must not look absent
            let frame = Frame::open(db, &name, entry.path(), config).map_err(|e| {
                warn!("Failed to load frame {}/{}: {}", db, name, e);
                e
            })?;
            frames.insert(name, Arc::new(frame));
        }

        Ok(frames)
    }
}
