use std::path::Path;
use std::sync::Arc;

use log::{debug, info};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};

use crate::error::StoreError;
use crate::protocol::{AudioRecord, AudioSummary, StorageEstimate};

pub const SCHEMA_VERSION: i64 = 1;

const RECORD_COLUMNS: &str =
    "id, title, artist, album, duration, cover, blob, file_name, mime_type, size, date_added";
const SUMMARY_COLUMNS: &str =
    "id, title, artist, album, duration, cover IS NOT NULL, file_name, mime_type, size, date_added";

fn live_page_bytes(conn: &Connection) -> Result<u64, rusqlite::Error> {
    let page_count: i64 = conn.pragma_query_value(None, "page_count", |row| row.get(0))?;
    let freelist_count: i64 = conn.pragma_query_value(None, "freelist_count", |row| row.get(0))?;
    let page_size: i64 = conn.pragma_query_value(None, "page_size", |row| row.get(0))?;
    Ok(((page_count - freelist_count).max(0) * page_size.max(0)) as u64)
}

fn ensure_capacity(
    conn: &Connection,
    quota_bytes: u64,
    record: &AudioRecord,
) -> Result<(), StoreError> {
    let usage = live_page_bytes(conn)?;
    let required = record.blob.len() as u64
        + record.cover.as_ref().map(|cover| cover.len() as u64).unwrap_or(0);
    let available = quota_bytes.saturating_sub(usage);
    if required > available {
        return Err(StoreError::QuotaExceeded {
            required,
            available,
        });
    }
    Ok(())
}

/// Synchronous SQLite access for the `audios` table.
pub struct DbManager {
    conn: Connection,
    quota_bytes: u64,
}

impl DbManager {
    pub fn open(path: &Path, quota_bytes: u64) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }
        info!("AudioStore: opening {}", path.display());
        Self::from_connection(Connection::open(path)?, quota_bytes)
    }

    pub fn open_in_memory(quota_bytes: u64) -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?, quota_bytes)
    }

    fn from_connection(conn: Connection, quota_bytes: u64) -> Result<Self, StoreError> {
        let db_manager = Self { conn, quota_bytes };
        db_manager.initialize_schema()?;
        Ok(db_manager)
    }

    fn initialize_schema(&self) -> Result<(), StoreError> {
        let found: i64 = self
            .conn
            .pragma_query_value(None, "user_version", |row| row.get(0))?;
        if found > SCHEMA_VERSION {
            return Err(StoreError::Incompatible {
                found,
                supported: SCHEMA_VERSION,
            });
        }

        self.conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS audios (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                artist TEXT NOT NULL,
                album TEXT NOT NULL,
                duration INTEGER NOT NULL,
                cover TEXT,
                blob BLOB NOT NULL,
                file_name TEXT NOT NULL,
                mime_type TEXT NOT NULL,
                size INTEGER NOT NULL,
                date_added INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_audios_title ON audios(title);
            CREATE INDEX IF NOT EXISTS idx_audios_artist ON audios(artist);
            CREATE INDEX IF NOT EXISTS idx_audios_album ON audios(album);
            CREATE INDEX IF NOT EXISTS idx_audios_date_added ON audios(date_added);",
        )?;

        if found < SCHEMA_VERSION {
            debug!(
                "AudioStore: stamping schema version {} (was {})",
                SCHEMA_VERSION, found
            );
            self.conn
                .pragma_update(None, "user_version", SCHEMA_VERSION)?;
        }
        Ok(())
    }

    fn record_from_row(row: &Row<'_>) -> Result<AudioRecord, rusqlite::Error> {
        let blob: Vec<u8> = row.get(6)?;
        Ok(AudioRecord {
            id: row.get(0)?,
            title: row.get(1)?,
            artist: row.get(2)?,
            album: row.get(3)?,
            duration: row.get::<_, i64>(4)?.max(0) as u32,
            cover: row.get(5)?,
            blob: Arc::from(blob),
            file_name: row.get(7)?,
            mime_type: row.get(8)?,
            size: row.get::<_, i64>(9)?.max(0) as u64,
            date_added: row.get(10)?,
        })
    }

    /// Bytes occupied by live pages.
    pub fn usage_bytes(&self) -> Result<u64, rusqlite::Error> {
        live_page_bytes(&self.conn)
    }

    pub fn quota_bytes(&self) -> u64 {
        self.quota_bytes
    }

    pub fn storage_estimate(&self) -> Result<StorageEstimate, rusqlite::Error> {
        Ok(StorageEstimate::new(self.usage_bytes()?, self.quota_bytes))
    }

    /// Inserts a new record in a single transaction. Existing ids are never
    /// overwritten.
    pub fn insert_audio(&mut self, record: &AudioRecord) -> Result<(), StoreError> {
        let quota_bytes = self.quota_bytes;
        let tx = self.conn.transaction()?;
        let exists = tx
            .query_row(
                "SELECT 1 FROM audios WHERE id = ?1",
                params![record.id],
                |_| Ok(()),
            )
            .optional()?
            .is_some();
        if exists {
            return Err(StoreError::DuplicateKey(record.id.clone()));
        }
        ensure_capacity(&tx, quota_bytes, record)?;

        let inserted = tx.execute(
            &format!(
                "INSERT INTO audios ({RECORD_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"
            ),
            params![
                record.id,
                record.title,
                record.artist,
                record.album,
                i64::from(record.duration),
                record.cover,
                &record.blob[..],
                record.file_name,
                record.mime_type,
                record.size as i64,
                record.date_added,
            ],
        );

        match inserted {
            Ok(_) => {}
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.code == ErrorCode::ConstraintViolation =>
            {
                return Err(StoreError::DuplicateKey(record.id.clone()));
            }
            Err(source) => {
                return Err(StoreError::WriteFailed {
                    id: record.id.clone(),
                    source,
                });
            }
        }

        tx.commit().map_err(|source| StoreError::WriteFailed {
            id: record.id.clone(),
            source,
        })
    }

    pub fn get_audio(&self, id: &str) -> Result<Option<AudioRecord>, StoreError> {
        let record = self
            .conn
            .query_row(
                &format!("SELECT {RECORD_COLUMNS} FROM audios WHERE id = ?1"),
                params![id],
                Self::record_from_row,
            )
            .optional()?;
        Ok(record)
    }

    pub fn get_all_audios(&self) -> Result<Vec<AudioRecord>, StoreError> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {RECORD_COLUMNS} FROM audios"))?;
        let record_iter = stmt.query_map([], Self::record_from_row)?;

        let mut records = Vec::new();
        for record in record_iter {
            records.push(record?);
        }
        Ok(records)
    }

    /// Blob-free listing ordered by import time.
    pub fn get_audio_summaries(&self) -> Result<Vec<AudioSummary>, StoreError> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {SUMMARY_COLUMNS} FROM audios ORDER BY date_added ASC, id ASC"
        ))?;
        let summary_iter = stmt.query_map([], |row| {
            Ok(AudioSummary {
                id: row.get(0)?,
                title: row.get(1)?,
                artist: row.get(2)?,
                album: row.get(3)?,
                duration: row.get::<_, i64>(4)?.max(0) as u32,
                has_cover: row.get(5)?,
                file_name: row.get(6)?,
                mime_type: row.get(7)?,
                size: row.get::<_, i64>(8)?.max(0) as u64,
                date_added: row.get(9)?,
            })
        })?;

        let mut summaries = Vec::new();
        for summary in summary_iter {
            summaries.push(summary?);
        }
        Ok(summaries)
    }

    /// Removes metadata and blob together. Absent ids are a no-op.
    pub fn delete_audio(&self, id: &str) -> Result<(), StoreError> {
        let removed = self
            .conn
            .execute("DELETE FROM audios WHERE id = ?1", params![id])?;
        debug!("AudioStore: delete {} removed {} row(s)", id, removed);
        Ok(())
    }

    pub fn clear_audios(&self) -> Result<(), StoreError> {
        let removed = self.conn.execute("DELETE FROM audios", [])?;
        info!("AudioStore: cleared {} record(s)", removed);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, blob_len: usize, date_added: i64) -> AudioRecord {
        let blob: Vec<u8> = (0..blob_len).map(|index| (index % 251) as u8).collect();
        AudioRecord {
            id: id.to_string(),
            title: format!("Title {id}"),
            artist: "Artist".to_string(),
            album: "Album".to_string(),
            duration: 42,
            cover: None,
            size: blob.len() as u64,
            blob: Arc::from(blob),
            file_name: format!("{id}.mp3"),
            mime_type: "audio/mpeg".to_string(),
            date_added,
        }
    }

    #[test]
    fn test_schema_stamps_user_version() {
        let db = DbManager::open_in_memory(u64::MAX).expect("db should open");
        let version: i64 = db
            .conn
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .expect("user_version should be readable");
        assert_eq!(version, SCHEMA_VERSION);
    }

    #[test]
    fn test_newer_schema_version_is_rejected() {
        let dir = tempfile::tempdir().expect("temp dir should be created");
        let path = dir.path().join("library.db");
        {
            let conn = Connection::open(&path).expect("db should open");
            conn.pragma_update(None, "user_version", SCHEMA_VERSION + 1)
                .expect("user_version should be writable");
        }

        let result = DbManager::open(&path, u64::MAX);
        assert!(matches!(
            result,
            Err(StoreError::Incompatible { found: 2, .. })
        ));
    }

    #[test]
    fn test_summaries_are_ordered_by_date_added() {
        let mut db = DbManager::open_in_memory(u64::MAX).expect("db should open");
        db.insert_audio(&record("late", 4, 300))
            .expect("insert should succeed");
        db.insert_audio(&record("early", 4, 100))
            .expect("insert should succeed");

        let summaries = db.get_audio_summaries().expect("summaries should load");
        let ids: Vec<&str> = summaries.iter().map(|summary| summary.id.as_str()).collect();
        assert_eq!(ids, vec!["early", "late"]);
        assert!(!summaries[0].has_cover);
    }

    #[test]
    fn test_duplicate_insert_keeps_original_row() {
        let mut db = DbManager::open_in_memory(u64::MAX).expect("db should open");
        db.insert_audio(&record("a", 8, 1))
            .expect("insert should succeed");
        let mut replacement = record("a", 16, 2);
        replacement.title = "Replaced".to_string();

        let err = db
            .insert_audio(&replacement)
            .expect_err("duplicate insert should fail");
        assert!(matches!(err, StoreError::DuplicateKey(id) if id == "a"));
        let stored = db
            .get_audio("a")
            .expect("lookup should succeed")
            .expect("record should exist");
        assert_eq!(stored.title, "Title a");
        assert_eq!(stored.blob.len(), 8);
    }
}
