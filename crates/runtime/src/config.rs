//! Storage configuration read from the environment.

use std::path::PathBuf;
use std::sync::Arc;

use finsync_cloud::CloudConfig;
use finsync_core::model::StorageMode;
use finsync_core::Result;
use finsync_storage_local::{KvStore, MemoryKvStore, SqliteKvStore};

pub const ENV_STORAGE_MODE: &str = "FINSYNC_STORAGE_MODE";
pub const ENV_DATA_DIR: &str = "FINSYNC_DATA_DIR";

pub const DATABASE_FILE_NAME: &str = "finsync.db";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StorageConfig {
    pub mode: StorageMode,
    /// Directory for the on-disk store. `None` keeps everything in memory.
    pub data_dir: Option<PathBuf>,
    /// `None` leaves the cloud backend unconfigured.
    pub cloud: Option<CloudConfig>,
}

impl StorageConfig {
    pub fn from_env() -> Self {
        let mut config = Self::from_lookup(|key| std::env::var(key).ok());
        config.cloud = CloudConfig::from_env();
        config
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mode = lookup(ENV_STORAGE_MODE)
            .map(|v| StorageMode::from_setting(&v))
            .unwrap_or_default();
        let data_dir = lookup(ENV_DATA_DIR)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .map(PathBuf::from);
        Self {
            mode,
            data_dir,
            cloud: None,
        }
    }

    pub fn database_path(&self) -> Option<PathBuf> {
        self.data_dir.as_ref().map(|dir| dir.join(DATABASE_FILE_NAME))
    }

    pub fn open_kv_store(&self) -> Result<Arc<dyn KvStore>> {
        match self.database_path() {
            Some(path) => Ok(Arc::new(SqliteKvStore::open(path)?)),
            None => Ok(Arc::new(MemoryKvStore::new())),
        }
    }
}
