//! Storage - databases, frames, fragments and attribute stores
//!
//! Directory layout under `data_dir`:
//!
//! ```text
//! <db>/.meta                      database options (JSON)
//! <db>/.data, .data.log           column attributes
//! <db>/<frame>/.meta              frame options (JSON)
//! <db>/<frame>/.data, .data.log   row attributes
//! <db>/<frame>/fragments/<slice>  fragment snapshot (+ <slice>.log)
//! ```

mod attr;
mod database;
mod engine;
mod file;
mod fragment;
mod frame;

pub use attr::{AttrStore, AttrUpdates};
pub use database::{Database, DatabaseOptions};
pub use engine::{DatabaseInfo, EngineStats, FrameInfo, StorageEngine};
pub use fragment::Fragment;
pub use frame::{Frame, FrameOptions};

use crate::wal::SyncPolicy;
use crate::{Error, Result};
use std::path::PathBuf;
use std::sync::OnceLock;

/// Storage engine configuration
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Data directory
    pub data_dir: PathBuf,
    /// When operation logs are synced to disk
    pub sync_policy: SyncPolicy,
    /// Logged operations before a store rewrites its snapshot
    pub max_op_n: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            sync_policy: SyncPolicy::default(),
            max_op_n: crate::config::MAX_OP_N,
        }
    }
}

/// Database and frame names: lowercase alphanumerics plus `.`, `_`, `-`
pub fn validate_name(name: &str) -> Result<()> {
    static NAME: OnceLock<regex::Regex> = OnceLock::new();
    let re = match NAME.get() {
        Some(re) => re,
        None => {
            let re = regex::Regex::new(r"^[a-z0-9][a-z0-9._-]{0,64}$")
                .map_err(|e| Error::Config(e.to_string()))?;
            NAME.get_or_init(|| re)
        }
    };
    if re.is_match(name) {
        Ok(())
    } else {
        Err(Error::InvalidName(name.to_string()))
    }
}

const META_FILE: &str = ".meta";
const ATTR_FILE: &str = ".data";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_name() {
        for ok in ["d", "x.n", "neg", "my-frame_2", "0abc"] {
            assert!(validate_name(ok).is_ok(), "{}", ok);
        }
        for bad in ["", ".hidden", "Upper", "a b", "-x", &"a".repeat(70)] {
            assert!(matches!(validate_name(bad), Err(Error::InvalidName(_))), "{}", bad);
        }
    }
}
