//! Attribute store - persistent id -> attribute map
//!
//! One store per frame holds row attributes, one per database holds column
//! attributes. Writes merge into the existing map; a `None` value removes the
//! key. Each id has its own mutex so unrelated ids never wait on each other.

use super::file;
use super::StorageConfig;
use crate::wal::{LogEntry, LogEntryType, LogReader, LogWriter};
use crate::{AttrMap, AttrValue, Error, Result};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

const MAGIC: &[u8; 4] = b"BFAT";

/// Attribute changes; `None` deletes the key
pub type AttrUpdates = BTreeMap<String, Option<AttrValue>>;

/// On-disk value, tagged so the numeric kind survives bincode
#[derive(Debug, Serialize, Deserialize)]
enum StoredValue {
    Integer(i64),
    Float(f64),
    Boolean(bool),
    String(String),
}

#[derive(Debug, Serialize, Deserialize)]
struct AttrRecord {
    id: u64,
    attrs: Vec<(String, StoredValue)>,
}

impl AttrRecord {
    fn new(id: u64, attrs: &AttrMap) -> Self {
        let attrs = attrs
            .iter()
            .map(|(k, v)| {
                let stored = match v {
                    AttrValue::Integer(i) => StoredValue::Integer(*i),
                    AttrValue::Float(f) => StoredValue::Float(*f),
                    AttrValue::Boolean(b) => StoredValue::Boolean(*b),
                    AttrValue::String(s) => StoredValue::String(s.clone()),
                };
                (k.clone(), stored)
            })
            .collect();
        Self { id, attrs }
    }

    fn into_attrs(self) -> AttrMap {
        self.attrs
            .into_iter()
            .map(|(k, v)| {
                let value = match v {
                    StoredValue::Integer(i) => AttrValue::Integer(i),
                    StoredValue::Float(f) => AttrValue::Float(f),
                    StoredValue::Boolean(b) => AttrValue::Boolean(b),
                    StoredValue::String(s) => AttrValue::String(s),
                };
                (k, value)
            })
            .collect()
    }
}

/// Persistent attribute store
pub struct AttrStore {
    path: PathBuf,
    entries: RwLock<HashMap<u64, Arc<Mutex<AttrMap>>>>,
    log: LogWriter,
    /// Writers hold it shared, snapshots exclusively
    gate: RwLock<()>,
    max_op_n: usize,
}

impl AttrStore {
    /// Open a store at `path` (snapshot) with its log at `path.log`
    pub fn open(path: PathBuf, config: &StorageConfig) -> Result<Self> {
        let mut maps: HashMap<u64, AttrMap> = HashMap::new();

        if let Some(data) = file::read_optional(&path)? {
            let records: Vec<AttrRecord> = bincode::deserialize(file::decode(MAGIC, &data)?)?;
            for record in records {
                maps.insert(record.id, record.into_attrs());
            }
        }

        let log_path = super::fragment::log_path(&path);
        let recovered = LogReader::new(&log_path).recover()?;
        for entry in &recovered.entries {
            if entry.entry_type != LogEntryType::SetAttrs {
                return Err(Error::Corruption(format!(
                    "unexpected {:?} entry in {:?}",
                    entry.entry_type, log_path
                )));
            }
            let record: AttrRecord = bincode::deserialize(&entry.payload)?;
            let id = record.id;
            let attrs = record.into_attrs();
            if attrs.is_empty() {
                maps.remove(&id);
            } else {
                maps.insert(id, attrs);
            }
        }

        let log = LogWriter::open(&log_path, config.sync_policy, &recovered)?;
        let store = Self {
            path,
            entries: RwLock::new(
                maps.into_iter()
                    .map(|(id, attrs)| (id, Arc::new(Mutex::new(attrs))))
                    .collect(),
            ),
            log,
            gate: RwLock::new(()),
            max_op_n: config.max_op_n,
        };

        if store.log.len() >= store.max_op_n {
            store.snapshot()?;
        }
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Attributes of `id`; empty when nothing was ever set
    pub fn attrs(&self, id: u64) -> AttrMap {
        let slot = self.entries.read().get(&id).cloned();
        slot.map(|m| m.lock().clone()).unwrap_or_default()
    }

    /// Merge `updates` into the attributes of `id`
    pub fn set_attrs(&self, id: u64, updates: &AttrUpdates) -> Result<()> {
        if updates.is_empty() {
            return Ok(());
        }

        let logged = {
            let _gate = self.gate.read();
            let slot = self.slot(id);
            let mut current = slot.lock();

            let mut merged = current.clone();
            for (key, value) in updates {
                match value {
                    Some(v) => {
                        merged.insert(key.clone(), v.clone());
                    }
                    None => {
                        merged.remove(key);
                    }
                }
            }
            if merged == *current {
                return Ok(());
            }

            let payload = bincode::serialize(&AttrRecord::new(id, &merged))?;
            let logged = self.log.append(&LogEntry::set_attrs(payload))?;
            *current = merged;
            logged
        };

        if logged >= self.max_op_n {
            self.snapshot()?;
        }
        Ok(())
    }

    /// Ids with a non-empty attribute map, ascending
    pub fn ids(&self) -> Vec<u64> {
        let entries = self.entries.read();
        let mut ids: Vec<u64> = entries
            .iter()
            .filter(|(_, m)| !m.lock().is_empty())
            .map(|(id, _)| *id)
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Write a snapshot of every map and reset the log
    pub fn snapshot(&self) -> Result<()> {
        let _gate = self.gate.write();

        let mut records: Vec<AttrRecord> = {
            let entries = self.entries.read();
            entries
                .iter()
                .filter_map(|(id, m)| {
                    let attrs = m.lock();
                    (!attrs.is_empty()).then(|| AttrRecord::new(*id, &attrs))
                })
                .collect()
        };
        records.sort_by_key(|r| r.id);

        let image = file::encode(MAGIC, &bincode::serialize(&records)?);
        file::write_atomic(&self.path, &image)?;
        self.log.reset()?;

        debug!("Snapshot attribute store {:?} ({} ids)", self.path, records.len());
        Ok(())
    }

    fn slot(&self, id: u64) -> Arc<Mutex<AttrMap>> {
        if let Some(slot) = self.entries.read().get(&id) {
            return slot.clone();
        }
        self.entries.write().entry(id).or_default().clone()
    }
}
