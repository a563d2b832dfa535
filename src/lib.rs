//! Offline music player core: tag extraction, file intake, a SQLite-backed
//! audio store, a single-source playback engine, and observable UI state.

pub mod audio;
pub mod audio_store;
pub mod config;
pub mod config_persistence;
pub mod db_manager;
pub mod error;
pub mod format;
pub mod image_pipeline;
pub mod intake;
pub mod library;
pub mod media_file_discovery;
pub mod metadata;
pub mod observable;
pub mod player_controller;
pub mod playlist;
pub mod protocol;
pub mod state;

#[cfg(test)]
mod test_support;
