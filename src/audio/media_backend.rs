//! The seam between the playback engine and whatever actually produces sound.

use std::fmt;
use std::sync::Arc;

use tokio::sync::mpsc::UnboundedSender;

use crate::error::PlaybackError;
use crate::protocol::AudioRecord;

/// A playable blob. Holding one keeps the bytes alive; dropping the last
/// clone releases them.
#[derive(Clone)]
pub struct MediaSource {
    pub id: String,
    pub mime_type: String,
    pub file_name: String,
    pub blob: Arc<[u8]>,
}

impl MediaSource {
    pub fn from_record(record: &AudioRecord) -> Self {
        Self {
            id: record.id.clone(),
            mime_type: record.mime_type.clone(),
            file_name: record.file_name.clone(),
            blob: Arc::clone(&record.blob),
        }
    }

    /// Lower-case extension of `file_name`, used as a container hint.
    pub fn extension_hint(&self) -> Option<String> {
        self.file_name
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .filter(|ext| !ext.is_empty())
    }
}

impl fmt::Debug for MediaSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaSource")
            .field("id", &self.id)
            .field("mime_type", &self.mime_type)
            .field("blob_len", &self.blob.len())
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlaybackEventKind {
    TimeUpdate,
    Ended,
    Error,
    LoadedMetadata,
    Play,
    Pause,
}

/// Transport notifications delivered to engine listeners.
#[derive(Debug, Clone, PartialEq)]
pub enum PlaybackEvent {
    /// Playback position in seconds.
    TimeUpdate(f64),
    Ended,
    Error(String),
    /// Duration in seconds.
    LoadedMetadata { duration: f64 },
    Play,
    Pause,
}

impl PlaybackEvent {
    pub fn kind(&self) -> PlaybackEventKind {
        match self {
            PlaybackEvent::TimeUpdate(_) => PlaybackEventKind::TimeUpdate,
            PlaybackEvent::Ended => PlaybackEventKind::Ended,
            PlaybackEvent::Error(_) => PlaybackEventKind::Error,
            PlaybackEvent::LoadedMetadata { .. } => PlaybackEventKind::LoadedMetadata,
            PlaybackEvent::Play => PlaybackEventKind::Play,
            PlaybackEvent::Pause => PlaybackEventKind::Pause,
        }
    }
}

/// An event tagged with the source generation that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct StampedEvent {
    pub generation: u64,
    pub event: PlaybackEvent,
}

pub type EventSender = UnboundedSender<StampedEvent>;

/// One media element plus its output graph.
///
/// Implementations report asynchronous progress (`TimeUpdate`, `Ended`,
/// `LoadedMetadata`, `Error`) through the [`EventSender`] they were built with,
/// stamping each event with the generation passed to the most recent `load`.
pub trait MediaBackend {
    /// Builds the output graph. Called at most once per backend instance.
    fn connect_output(&mut self) -> Result<(), PlaybackError>;

    /// Replaces the current source and rewinds to position 0.
    fn load(&mut self, source: &MediaSource, generation: u64) -> Result<(), PlaybackError>;

    fn play(&mut self) -> Result<(), PlaybackError>;

    fn pause(&mut self);

    /// `seconds` is already clamped to `[0, duration]`.
    fn seek(&mut self, seconds: f64);

    /// `volume` is already clamped to `[0, 1]`.
    fn set_volume(&mut self, volume: f32);

    fn position(&self) -> f64;

    fn duration(&self) -> f64;

    /// Releases the output graph and the loaded source.
    fn close(&mut self);
}
