//! Audio subsystem modules (decode, output backend, and the playback engine).

pub mod audio_decoder;
pub mod audio_player;
pub mod media_backend;
pub mod playback_engine;

pub use audio_player::CpalBackend;
pub use media_backend::{MediaBackend, MediaSource, PlaybackEvent, PlaybackEventKind};
pub use playback_engine::{BackendFactory, EngineState, ListenerId, PlaybackEngine};
