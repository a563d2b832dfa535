//! Async facade over [`DbManager`]: single-flight initialization and blocking
//! SQLite work moved off the caller's task.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use log::{debug, warn};
use tokio::sync::OnceCell;

use crate::config::{StoreConfig, DEFAULT_QUOTA_MB};
use crate::db_manager::DbManager;
use crate::error::StoreError;
use crate::protocol::{AudioRecord, AudioSummary, StorageEstimate};

/// Quota reported when the database cannot be introspected.
pub const FALLBACK_QUOTA_BYTES: u64 = DEFAULT_QUOTA_MB as u64 * 1024 * 1024;

#[derive(Debug, Clone)]
enum StoreLocation {
    File(PathBuf),
    Memory,
}

/// Persistent audio store. Cheap to share behind an `Arc`; one connection
/// serializes all transactions in submission order.
pub struct AudioStore {
    location: StoreLocation,
    quota_bytes: u64,
    db: OnceCell<Arc<Mutex<DbManager>>>,
}

impl AudioStore {
    pub fn open(path: impl Into<PathBuf>, store_config: &StoreConfig) -> Self {
        Self {
            location: StoreLocation::File(path.into()),
            quota_bytes: store_config.quota_bytes(),
            db: OnceCell::new(),
        }
    }

    pub fn in_memory(quota_bytes: u64) -> Self {
        Self {
            location: StoreLocation::Memory,
            quota_bytes,
            db: OnceCell::new(),
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.db.initialized()
    }

    /// Opens the database and creates the schema. Idempotent; concurrent
    /// callers share one initialization.
    pub async fn initialize(&self) -> Result<(), StoreError> {
        self.db
            .get_or_try_init(|| async {
                let location = self.location.clone();
                let quota_bytes = self.quota_bytes;
                let db = tokio::task::spawn_blocking(move || match location {
                    StoreLocation::File(path) => DbManager::open(&path, quota_bytes),
                    StoreLocation::Memory => DbManager::open_in_memory(quota_bytes),
                })
                .await
                .map_err(|err| StoreError::TaskFailed(err.to_string()))??;
                debug!("AudioStore: initialized");
                Ok::<_, StoreError>(Arc::new(Mutex::new(db)))
            })
            .await?;
        Ok(())
    }

    async fn with_db<T, F>(&self, operation: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut DbManager) -> Result<T, StoreError> + Send + 'static,
    {
        let db = Arc::clone(self.db.get().ok_or(StoreError::Uninitialized)?);
        tokio::task::spawn_blocking(move || {
            let mut guard = db.lock().unwrap_or_else(PoisonError::into_inner);
            operation(&mut guard)
        })
        .await
        .map_err(|err| StoreError::TaskFailed(err.to_string()))?
    }

    /// Persists a new record. Fails with `DuplicateKey` rather than
    /// overwriting, and with `QuotaExceeded` before anything is written.
    pub async fn put(&self, record: AudioRecord) -> Result<(), StoreError> {
        let id = record.id.clone();
        self.with_db(move |db| db.insert_audio(&record)).await?;
        debug!("AudioStore: stored {}", id);
        Ok(())
    }

    pub async fn get_all(&self) -> Result<Vec<AudioRecord>, StoreError> {
        self.with_db(|db| db.get_all_audios()).await
    }

    pub async fn get(&self, id: &str) -> Result<Option<AudioRecord>, StoreError> {
        let id = id.to_string();
        self.with_db(move |db| db.get_audio(&id)).await
    }

    pub async fn get_required(&self, id: &str) -> Result<AudioRecord, StoreError> {
        self.get(id)
            .await?
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    pub async fn list_summaries(&self) -> Result<Vec<AudioSummary>, StoreError> {
        self.with_db(|db| db.get_audio_summaries()).await
    }

    pub async fn delete(&self, id: &str) -> Result<(), StoreError> {
        let id = id.to_string();
        self.with_db(move |db| db.delete_audio(&id)).await
    }

    pub async fn clear(&self) -> Result<(), StoreError> {
        self.with_db(|db| db.clear_audios()).await
    }

    /// Usage against the configured quota. Never fails: when introspection is
    /// unavailable the estimate reports zero usage against the fixed
    /// fallback quota.
    pub async fn storage_estimate(&self) -> StorageEstimate {
        let fallback = StorageEstimate::new(0, FALLBACK_QUOTA_BYTES);
        match self
            .with_db(|db| db.storage_estimate().map_err(StoreError::from))
            .await
        {
            Ok(estimate) => estimate,
            Err(err) => {
                warn!("AudioStore: storage estimate unavailable: {}", err);
                fallback
            }
        }
    }
}
