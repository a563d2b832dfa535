//! Domain types shared by intake, storage, state containers, and playback.

use std::{fmt, io, path::Path, sync::Arc};

use crate::media_file_discovery::mime_type_for_path;

/// Artist value used when tags carry none.
pub const UNKNOWN_ARTIST: &str = "Unknown Artist";
/// Album value used when tags carry none.
pub const UNKNOWN_ALBUM: &str = "Unknown Album";

/// Repeat behavior applied when the playing track ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RepeatMode {
    #[default]
    Off, // Stop after the last track
    All, // Wrap around to the first track
    One, // Restart the current track
}

impl RepeatMode {
    /// Off → All → One → Off.
    pub fn cycled(self) -> Self {
        match self {
            RepeatMode::Off => RepeatMode::All,
            RepeatMode::All => RepeatMode::One,
            RepeatMode::One => RepeatMode::Off,
        }
    }
}

impl std::str::FromStr for RepeatMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "off" => Ok(RepeatMode::Off),
            "all" => Ok(RepeatMode::All),
            "one" => Ok(RepeatMode::One),
            other => Err(format!("unknown repeat mode '{other}' (expected off, all, one)")),
        }
    }
}

/// An opaque file handed to intake by a picker or drop target.
#[derive(Clone)]
pub struct IncomingFile {
    pub name: String,
    /// Declared MIME type; may be empty when the source did not provide one.
    pub mime_type: String,
    pub bytes: Arc<[u8]>,
}

impl IncomingFile {
    pub fn new(name: impl Into<String>, mime_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            mime_type: mime_type.into(),
            bytes: Arc::from(bytes),
        }
    }

    /// Reads a file from disk, declaring the MIME type implied by its extension.
    pub fn from_path(path: &Path) -> io::Result<Self> {
        let bytes = std::fs::read(path)?;
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_default();
        let mime_type = mime_type_for_path(path).unwrap_or_default();
        Ok(Self::new(name, mime_type, bytes))
    }

    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }
}

impl fmt::Debug for IncomingFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IncomingFile")
            .field("name", &self.name)
            .field("mime_type", &self.mime_type)
            .field("size", &self.bytes.len())
            .finish()
    }
}

/// Normalized metadata derived from one file.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ExtractedMetadata {
    pub title: String,
    pub artist: String,
    pub album: String,
    /// Whole seconds; zero when unknown.
    pub duration: u32,
    /// Embedded cover as a `data:` URI.
    pub cover: Option<String>,
    pub file_name: String,
    pub mime_type: String,
}

/// Outcome of metadata extraction. Always carries usable metadata.
#[derive(Debug, Clone)]
pub struct ExtractionResult {
    pub metadata: ExtractedMetadata,
    pub raw_bytes: Arc<[u8]>,
    /// False when the audio payload itself could not be probed.
    pub success: bool,
    pub error: Option<String>,
}

/// A persisted audio entry: metadata plus the original audio bytes.
#[derive(Clone, PartialEq)]
pub struct AudioRecord {
    pub id: String,
    pub title: String,
    pub artist: String,
    pub album: String,
    pub duration: u32,
    pub cover: Option<String>,
    pub blob: Arc<[u8]>,
    pub file_name: String,
    pub mime_type: String,
    pub size: u64,
    /// Milliseconds since the Unix epoch.
    pub date_added: i64,
}

impl AudioRecord {
    pub fn summary(&self) -> AudioSummary {
        AudioSummary {
            id: self.id.clone(),
            title: self.title.clone(),
            artist: self.artist.clone(),
            album: self.album.clone(),
            duration: self.duration,
            has_cover: self.cover.is_some(),
            file_name: self.file_name.clone(),
            mime_type: self.mime_type.clone(),
            size: self.size,
            date_added: self.date_added,
        }
    }
}

impl fmt::Debug for AudioRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AudioRecord")
            .field("id", &self.id)
            .field("title", &self.title)
            .field("artist", &self.artist)
            .field("album", &self.album)
            .field("duration", &self.duration)
            .field("has_cover", &self.cover.is_some())
            .field("blob_len", &self.blob.len())
            .field("file_name", &self.file_name)
            .field("mime_type", &self.mime_type)
            .field("size", &self.size)
            .field("date_added", &self.date_added)
            .finish()
    }
}

/// Blob-free view of a record for listings.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct AudioSummary {
    pub id: String,
    pub title: String,
    pub artist: String,
    pub album: String,
    pub duration: u32,
    pub has_cover: bool,
    pub file_name: String,
    pub mime_type: String,
    pub size: u64,
    pub date_added: i64,
}

/// Storage usage report.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct StorageEstimate {
    pub usage: u64,
    pub quota: u64,
    pub percentage: f64,
}

impl StorageEstimate {
    pub fn new(usage: u64, quota: u64) -> Self {
        let percentage = if quota == 0 {
            0.0
        } else {
            usage as f64 / quota as f64 * 100.0
        };
        Self {
            usage,
            quota,
            percentage,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repeat_mode_cycles_through_all_modes() {
        assert_eq!(RepeatMode::Off.cycled(), RepeatMode::All);
        assert_eq!(RepeatMode::All.cycled(), RepeatMode::One);
        assert_eq!(RepeatMode::One.cycled(), RepeatMode::Off);
    }

    #[test]
    fn test_repeat_mode_parses_case_insensitively() {
        assert_eq!("ONE".parse::<RepeatMode>(), Ok(RepeatMode::One));
        assert!("sometimes".parse::<RepeatMode>().is_err());
    }

    #[test]
    fn test_storage_estimate_percentage_handles_zero_quota() {
        assert_eq!(StorageEstimate::new(10, 0).percentage, 0.0);
        assert_eq!(StorageEstimate::new(25, 100).percentage, 25.0);
    }
}
