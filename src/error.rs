//! Typed failures surfaced by the store, playback, and configuration layers.

use thiserror::Error;

/// Failures reported by the persistent audio store.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Record with id {0} already exists")]
    DuplicateKey(String),

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Storage quota exceeded: {required} bytes needed, {available} bytes available")]
    QuotaExceeded { required: u64, available: u64 },

    #[error("Write for record {id} failed: {source}")]
    WriteFailed {
        id: String,
        #[source]
        source: rusqlite::Error,
    },

    #[error("Store schema version {found} is newer than supported version {supported}")]
    Incompatible { found: i64, supported: i64 },

    #[error("Store is not initialized")]
    Uninitialized,

    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Store task failed: {0}")]
    TaskFailed(String),
}

/// Failures reported by the playback engine and its media backends.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PlaybackError {
    #[error("Playback rejected: {0}")]
    Rejected(String),

    #[error("No source loaded")]
    NoSource,

    #[error("Audio device error: {0}")]
    Device(String),

    #[error("Decoder error: {0}")]
    Decode(String),
}

/// Failures reading or writing configuration files.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error for {path}: {source}")]
    Io {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Config serialization failed: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Invalid preferences document: {0}")]
    Document(#[from] toml_edit::TomlError),

    #[error("No config directory available on this platform")]
    NoConfigDir,
}
