//! Library facade: owns the store and intake, keeps the audio list and store
//! readiness containers in step with what is persisted.

use log::{debug, info, warn};

use crate::audio_store::AudioStore;
use crate::error::StoreError;
use crate::intake::Intake;
use crate::protocol::{AudioSummary, IncomingFile, StorageEstimate};
use crate::state::{
    AudioListState, AudioListStore, StoreStatus, StoreStatusStore,
};

/// A record the store refused during import.
#[derive(Debug)]
pub struct ImportFailure {
    pub file_name: String,
    pub error: StoreError,
}

#[derive(Debug, Default)]
pub struct ImportReport {
    /// Persisted records, in input order.
    pub added: Vec<AudioSummary>,
    pub failed: Vec<ImportFailure>,
    pub excluded: Vec<String>,
    pub degraded: Vec<String>,
    pub dropped: Vec<String>,
}

pub struct Library {
    store: AudioStore,
    intake: Intake,
    audio_list: AudioListStore,
    status: StoreStatusStore,
}

impl Library {
    pub fn new(store: AudioStore, intake: Intake) -> Self {
        Self {
            store,
            intake,
            audio_list: AudioListStore::new(AudioListState::default()),
            status: StoreStatusStore::new(StoreStatus::default()),
        }
    }

    pub fn audio_list(&self) -> &AudioListStore {
        &self.audio_list
    }

    pub fn status(&self) -> &StoreStatusStore {
        &self.status
    }

    /// Opens the store and marks it ready without reading any records.
    pub async fn open(&self) -> Result<(), StoreError> {
        match self.store.initialize().await {
            Ok(()) => {
                self.status.set(StoreStatus::ready());
                Ok(())
            }
            Err(err) => {
                warn!("Library: store unavailable: {}", err);
                self.status.set(StoreStatus::failed(err.to_string()));
                Err(err)
            }
        }
    }

    /// Opens the store and loads every persisted record into the audio list.
    pub async fn initialize(&self) -> Result<(), StoreError> {
        self.open().await?;
        self.reload().await
    }

    /// Replaces the audio list with everything in the store, blobs included.
    pub async fn reload(&self) -> Result<(), StoreError> {
        self.ensure_ready()?;
        self.audio_list.update(|list| list.set_loading(true));
        match self.store.get_all().await {
            Ok(records) => {
                info!("Library: loaded {} records", records.len());
                self.audio_list.update(|list| {
                    list.set_all(records);
                    list.set_loading(false);
                });
                Ok(())
            }
            Err(err) => {
                warn!("Library: could not load records: {}", err);
                self.audio_list.update(|list| list.set_loading(false));
                Err(err)
            }
        }
    }

    fn ensure_ready(&self) -> Result<(), StoreError> {
        if self.status.snapshot().is_ready {
            Ok(())
        } else {
            Err(StoreError::Uninitialized)
        }
    }

    /// Runs intake on `files`, persists each record, and appends the ones the
    /// store accepted to the audio list.
    pub async fn import(&self, files: Vec<IncomingFile>) -> Result<ImportReport, StoreError> {
        self.ensure_ready()?;
        let intake = self.intake.process_files_with_report(files).await;
        let mut report = ImportReport {
            excluded: intake.excluded,
            degraded: intake.degraded,
            dropped: intake.dropped,
            ..ImportReport::default()
        };

        let mut persisted = Vec::with_capacity(intake.records.len());
        for record in intake.records {
            match self.store.put(record.clone()).await {
                Ok(()) => {
                    report.added.push(record.summary());
                    persisted.push(record);
                }
                Err(error) => {
                    warn!("Library: could not save {}: {}", record.file_name, error);
                    report.failed.push(ImportFailure {
                        file_name: record.file_name,
                        error,
                    });
                }
            }
        }

        debug!(
            "Library: imported {}, failed {}",
            report.added.len(),
            report.failed.len()
        );
        if !persisted.is_empty() {
            self.audio_list.update(|list| list.add_many(persisted));
        }
        Ok(report)
    }

    pub async fn summaries(&self) -> Result<Vec<AudioSummary>, StoreError> {
        self.ensure_ready()?;
        self.store.list_summaries().await
    }

    /// Deletes the record from the store and the list. Unknown ids are a no-op.
    pub async fn remove(&self, id: &str) -> Result<(), StoreError> {
        self.ensure_ready()?;
        self.store.delete(id).await?;
        self.audio_list.update(|list| list.remove(id));
        Ok(())
    }

    pub async fn clear(&self) -> Result<(), StoreError> {
        self.ensure_ready()?;
        self.store.clear().await?;
        self.audio_list.update(AudioListState::clear);
        Ok(())
    }

    pub async fn storage_estimate(&self) -> StorageEstimate {
        self.store.storage_estimate().await
    }
}
