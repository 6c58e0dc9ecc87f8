//! Storage engine - top-level holder of databases

use super::{validate_name, Database, DatabaseOptions, StorageConfig};
use crate::{Error, Result};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{info, warn};

/// bitframe storage engine
pub struct StorageEngine {
    config: StorageConfig,
    databases: RwLock<HashMap<String, Arc<Database>>>,
}

impl StorageEngine {
    /// Create a storage engine, loading every database under `data_dir`
    pub fn new(config: StorageConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.data_dir)?;

        let engine = Self {
            config,
            databases: RwLock::new(HashMap::new()),
        };

        // Load existing databases
        engine.load_databases()?;

        Ok(engine)
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    /// Create a new database
    pub fn create_database(&self, name: &str, options: DatabaseOptions) -> Result<Arc<Database>> {
        validate_name(name)?;

        let mut databases = self.databases.write();
        if databases.contains_key(name) {
            return Err(Error::DatabaseExists(name.to_string()));
        }

        let db = Arc::new(Database::create(
            name,
            self.config.data_dir.join(name),
            options,
            &self.config,
        )?);
        databases.insert(name.to_string(), db.clone());

        info!("Created database: {}", name);

        Ok(db)
    }

    /// Get a database by name
    pub fn database(&self, name: &str) -> Option<Arc<Database>> {
        self.databases.read().get(name).cloned()
    }

    /// Get a database by name, `DatabaseNotFound` if missing
    pub fn require_database(&self, name: &str) -> Result<Arc<Database>> {
        self.database(name)
            .ok_or_else(|| Error::DatabaseNotFound(name.to_string()))
    }

    /// Drop a database
    pub fn drop_database(&self, name: &str) -> Result<()> {
        let mut databases = self.databases.write();

        if databases.remove(name).is_none() {
            return Err(Error::DatabaseNotFound(name.to_string()));
        }

        // Remove data directory
        let db_path = self.config.data_dir.join(name);
        if db_path.exists() {
            std::fs::remove_dir_all(&db_path)?;
        }

        info!("Dropped database: {}", name);

        Ok(())
    }

    /// List all databases, sorted by name
    pub fn list_databases(&self) -> Vec<String> {
        let mut names: Vec<_> = self.databases.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Databases and their frames, sorted by name
    pub fn schema(&self) -> Vec<DatabaseInfo> {
        let mut databases: Vec<_> = self.databases.read().values().cloned().collect();
        databases.sort_by(|a, b| a.name().cmp(b.name()));

        databases
            .iter()
            .map(|db| DatabaseInfo {
                name: db.name().to_string(),
                column_label: db.column_label().to_string(),
                frames: db
                    .frames()
                    .iter()
                    .map(|f| FrameInfo {
                        name: f.name().to_string(),
                    })
                    .collect(),
            })
            .collect()
    }

    /// Highest known slice of every database
    pub fn max_slices(&self) -> BTreeMap<String, u64> {
        self.databases
            .read()
            .iter()
            .map(|(name, db)| (name.clone(), db.max_slice()))
            .collect()
    }

    /// Snapshot every database
    pub fn snapshot_all(&self) -> Result<()> {
        let databases: Vec<_> = self.databases.read().values().cloned().collect();
        for db in databases {
            db.snapshot()?;
        }
        Ok(())
    }

    /// Get engine statistics
    pub fn stats(&self) -> EngineStats {
        let databases = self.databases.read();
        let mut frame_count = 0;
        let mut fragment_count = 0;
        for db in databases.values() {
            for frame in db.frames() {
                frame_count += 1;
                fragment_count += frame.slices().len();
            }
        }

        EngineStats {
            database_count: databases.len(),
            frame_count,
            fragment_count,
        }
    }

    fn load_databases(&self) -> Result<()> {
        if !self.config.data_dir.exists() {
            return Ok(());
        }

        for entry in std::fs::read_dir(&self.config.data_dir)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                let name = entry.file_name().to_string_lossy().to_string();

                // Skip hidden directories
                if name.starts_with('.') {
                    continue;
                }

                let db = Database::open(&name, entry.path(), &self.config).map_err(|e| {
                    warn!("Failed to load database {}: {}", name, e);
                    e
                })?;
                self.databases.write().insert(name.clone(), Arc::new(db));
                info!("Loaded database: {}", name);
            }
        }

        Ok(())
    }
}

/// Schema entry for one database
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseInfo {
    pub name: String,
    pub column_label: String,
    pub frames: Vec<FrameInfo>,
}

/// Schema entry for one frame
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FrameInfo {
    pub name: String,
}

/// Storage engine statistics
#[derive(Debug, Clone, Serialize)]
pub struct EngineStats {
    pub database_count: usize,
    pub frame_count: usize,
    pub fragment_count: usize,
}
