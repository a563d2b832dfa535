//! Composition point for the engine, the play queue, and the observable
//! player state. Applies the track-end policy.

use log::{debug, warn};

use crate::audio::{MediaBackend, MediaSource, PlaybackEngine, PlaybackEvent};
use crate::config_persistence::PreferencesFile;
use crate::error::PlaybackError;
use crate::playlist::{Advance, Playlist};
use crate::protocol::RepeatMode;
use crate::state::{AudioListStore, PlayerState, PlayerStateStore};

/// `previous` restarts the current track instead once playback is past this.
const RESTART_THRESHOLD_SECONDS: f64 = 3.0;

/// Startup volume: the saved preference if present, otherwise the default.
pub fn restored_volume(preferences: Option<&PreferencesFile>, default_volume: f32) -> f32 {
    preferences
        .and_then(PreferencesFile::load_volume)
        .unwrap_or(default_volume)
}

pub struct PlayerController<B: MediaBackend> {
    engine: PlaybackEngine<B>,
    queue: Playlist,
    player_state: PlayerStateStore,
    audio_list: AudioListStore,
    preferences: Option<PreferencesFile>,
    finished: bool,
}

impl<B: MediaBackend> PlayerController<B> {
    pub fn new(
        engine: PlaybackEngine<B>,
        queue: Playlist,
        audio_list: AudioListStore,
        player_state: PlayerStateStore,
        preferences: Option<PreferencesFile>,
    ) -> Self {
        let mut controller = Self {
            engine,
            queue,
            player_state,
            audio_list,
            preferences,
            finished: false,
        };
        let snapshot = controller.player_state.snapshot();
        controller.engine.set_volume(snapshot.effective_volume());
        controller.queue.set_repeat(snapshot.repeat);
        controller.queue.set_shuffle(snapshot.shuffle);
        controller
    }

    pub fn player_state(&self) -> &PlayerStateStore {
        &self.player_state
    }

    pub fn engine(&self) -> &PlaybackEngine<B> {
        &self.engine
    }

    pub fn current_id(&self) -> Option<&str> {
        self.engine.source_id()
    }

    /// True once playback ran off the end of the queue with repeat off.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    fn sync_queue(&mut self) {
        self.queue.set_tracks(self.audio_list.snapshot().ids());
    }

    /// Loads the record with `id` from the audio list and starts it from 0.
    pub async fn play_record(&mut self, id: &str) -> Result<(), PlaybackError> {
        let record = self
            .audio_list
            .snapshot()
            .find(id)
            .cloned()
            .ok_or(PlaybackError::NoSource)?;
        self.sync_queue();
        self.queue.set_current(id);
        self.finished = false;

        self.player_state.update(|state| {
            state.reset();
            state.set_duration(f64::from(record.duration));
        });
        self.audio_list
            .update(|list| list.set_current_index(list.index_of(id)));
        self.engine.set_source(MediaSource::from_record(&record))?;
        debug!("PlayerController: playing {} ({})", record.title, record.id);

        let played = self.engine.play().await;
        self.player_state
            .update(|state| state.set_playing(played.is_ok()));
        played
    }

    async fn play_index(&mut self, index: usize) -> Result<(), PlaybackError> {
        let Some(id) = self.queue.track_id(index).map(str::to_string) else {
            return Err(PlaybackError::NoSource);
        };
        self.play_record(&id).await
    }

    /// Starts from the selected (or first) record when nothing is loaded.
    pub async fn toggle_play(&mut self) -> Result<(), PlaybackError> {
        if self.engine.is_playing() {
            self.pause();
            return Ok(());
        }
        if self.engine.source_id().is_some() {
            let played = self.engine.play().await;
            self.player_state
                .update(|state| state.set_playing(played.is_ok()));
            return played;
        }
        let list = self.audio_list.snapshot();
        if let Some(record) = list.current() {
            let id = record.id.clone();
            return self.play_record(&id).await;
        }
        // Nothing selected: the queue picks the opening track, at random
        // under shuffle.
        self.sync_queue();
        match self.queue.next_index(Advance::UserNext) {
            Some(index) => self.play_index(index).await,
            None => Err(PlaybackError::NoSource),
        }
    }

    pub fn pause(&mut self) {
        self.engine.pause();
        self.player_state.update(|state| state.set_playing(false));
    }

    pub fn stop(&mut self) {
        self.engine.stop();
        self.player_state.update(|state| {
            state.set_playing(false);
            state.set_current_time(0.0);
        });
    }

    /// Explicit skip; wraps at the end of the queue.
    pub async fn next(&mut self) -> Result<(), PlaybackError> {
        self.sync_queue();
        match self.queue.next_index(Advance::UserNext) {
            Some(index) => self.play_index(index).await,
            None => Err(PlaybackError::NoSource),
        }
    }

    pub async fn previous(&mut self) -> Result<(), PlaybackError> {
        if self.engine.current_time() > RESTART_THRESHOLD_SECONDS {
            self.seek(0.0);
            return Ok(());
        }
        self.sync_queue();
        match self.queue.previous_index() {
            Some(index) => self.play_index(index).await,
            None => Err(PlaybackError::NoSource),
        }
    }

    pub fn seek(&mut self, seconds: f64) {
        self.engine.seek(seconds);
        let position = self.engine.current_time();
        self.player_state
            .update(|state| state.set_current_time(position));
    }

    /// Clamps, applies, and persists the volume.
    pub fn set_volume(&mut self, volume: f32) {
        let effective = self.player_state.update(|state| {
            state.set_volume(volume);
            state.effective_volume()
        });
        self.engine.set_volume(effective);
        self.persist_volume();
    }

    pub fn toggle_mute(&mut self) {
        let effective = self.player_state.update(|state| {
            state.toggle_mute();
            state.effective_volume()
        });
        self.engine.set_volume(effective);
    }

    fn persist_volume(&self) {
        let Some(preferences) = self.preferences.as_ref() else {
            return;
        };
        let volume = self.player_state.snapshot().volume;
        if let Err(err) = preferences.save_volume(volume) {
            warn!("PlayerController: failed to save volume preference: {}", err);
        }
    }

    pub fn set_repeat(&mut self, repeat: RepeatMode) {
        self.queue.set_repeat(repeat);
        self.player_state.update(|state| state.set_repeat(repeat));
    }

    pub fn cycle_repeat(&mut self) -> RepeatMode {
        let repeat = self.player_state.update(|state| {
            state.cycle_repeat();
            state.repeat
        });
        self.queue.set_repeat(repeat);
        repeat
    }

    pub fn toggle_shuffle(&mut self) -> bool {
        let shuffle = self.player_state.update(|state| {
            state.toggle_shuffle();
            state.shuffle
        });
        self.sync_queue();
        self.queue.set_shuffle(shuffle);
        shuffle
    }

    /// Drops a deleted record from the queue, releasing it if it is loaded.
    pub fn forget_record(&mut self, id: &str) {
        self.queue.remove_track(id);
        if self.engine.source_id() == Some(id) {
            self.engine.cleanup();
            self.player_state.update(PlayerState::reset);
        }
    }

    /// Drains engine events into the player state and applies the track-end
    /// policy. Call regularly from the owning loop.
    pub async fn pump(&mut self) -> Vec<PlaybackEvent> {
        let events = self.engine.poll_events();
        for event in &events {
            match event {
                PlaybackEvent::TimeUpdate(position) => {
                    self.player_state
                        .update(|state| state.set_current_time(*position));
                }
                PlaybackEvent::LoadedMetadata { duration } => {
                    self.player_state
                        .update(|state| state.set_duration(*duration));
                }
                PlaybackEvent::Play => {
                    self.player_state.update(|state| state.set_playing(true));
                }
                PlaybackEvent::Pause => {
                    self.player_state.update(|state| state.set_playing(false));
                }
                PlaybackEvent::Error(message) => {
                    warn!("PlayerController: playback error: {}", message);
                    self.player_state.update(|state| state.set_playing(false));
                }
                PlaybackEvent::Ended => self.handle_track_end().await,
            }
        }
        events
    }

    async fn handle_track_end(&mut self) {
        if self.queue.repeat() == RepeatMode::One {
            self.engine.seek(0.0);
            let played = self.engine.play().await;
            if let Err(err) = &played {
                warn!("PlayerController: repeat-one restart failed: {}", err);
            }
            self.player_state.update(|state| {
                state.set_current_time(0.0);
                state.set_playing(played.is_ok());
            });
            return;
        }

        self.sync_queue();
        match self.queue.next_index(Advance::TrackEnded) {
            Some(index) => {
                if let Err(err) = self.play_index(index).await {
                    warn!("PlayerController: failed to advance queue: {}", err);
                }
            }
            None => {
                debug!("PlayerController: reached end of queue");
                self.stop();
                self.finished = true;
            }
        }
    }

    /// Releases the engine. A later play reinitializes it.
    pub fn shutdown(&mut self) {
        self.engine.cleanup();
        self.player_state.update(PlayerState::reset);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::playback_engine::tests::{fake_engine, push_event, FakeBackend, FakeLog};
    use crate::protocol::AudioRecord;
    use crate::state::AudioListState;
    use std::cell::RefCell;
    use std::rc::Rc;
    use std::sync::Arc;

    fn record(id: &str) -> AudioRecord {
        AudioRecord {
            id: id.to_string(),
            title: format!("Song {id}"),
            artist: "Artist".to_string(),
            album: "Album".to_string(),
            duration: 120,
            cover: None,
            blob: Arc::from(vec![1u8, 2, 3]),
            file_name: format!("{id}.mp3"),
            mime_type: "audio/mpeg".to_string(),
            size: 3,
            date_added: 0,
        }
    }

    fn controller(
        ids: &[&str],
        preferences: Option<PreferencesFile>,
    ) -> (PlayerController<FakeBackend>, Rc<RefCell<FakeLog>>) {
        let (engine, log) = fake_engine();
        let mut list = AudioListState::default();
        list.add_many(ids.iter().map(|id| record(id)));
        let controller = PlayerController::new(
            engine,
            Playlist::with_seed([3u8; 32]),
            AudioListStore::new(list),
            PlayerStateStore::new(PlayerState::with_volume(0.5)),
            preferences,
        );
        (controller, log)
    }

    fn latest_generation(log: &Rc<RefCell<FakeLog>>) -> u64 {
        log.borrow().loads.last().expect("a track should be loaded").1
    }

    #[tokio::test]
    async fn test_repeat_one_restarts_same_track_from_zero() {
        let (mut controller, log) = controller(&["a", "b"], None);
        controller.set_repeat(RepeatMode::One);
        controller.play_record("a").await.expect("play should succeed");
        controller.seek(100.0);
        controller.pump().await;

        push_event(&log, latest_generation(&log), PlaybackEvent::Ended);
        controller.pump().await;

        let state = controller.player_state().snapshot();
        assert!(state.is_playing);
        assert_eq!(state.current_time, 0.0);
        assert_eq!(controller.current_id(), Some("a"));
        assert_eq!(log.borrow().position, 0.0);
        assert_eq!(log.borrow().loads.len(), 1);
    }

    #[tokio::test]
    async fn test_track_end_advances_and_stops_after_last() {
        let (mut controller, log) = controller(&["a", "b"], None);
        controller.play_record("a").await.expect("play should succeed");

        push_event(&log, latest_generation(&log), PlaybackEvent::Ended);
        controller.pump().await;
        assert_eq!(controller.current_id(), Some("b"));
        assert!(controller.player_state().snapshot().is_playing);

        push_event(&log, latest_generation(&log), PlaybackEvent::Ended);
        controller.pump().await;
        assert!(controller.is_finished());
        assert!(!controller.player_state().snapshot().is_playing);
    }

    #[tokio::test]
    async fn test_repeat_all_wraps_to_first_track() {
        let (mut controller, log) = controller(&["a", "b"], None);
        controller.set_repeat(RepeatMode::All);
        controller.play_record("b").await.expect("play should succeed");

        push_event(&log, latest_generation(&log), PlaybackEvent::Ended);
        controller.pump().await;
        assert_eq!(controller.current_id(), Some("a"));
        assert!(!controller.is_finished());
    }

    #[tokio::test]
    async fn test_time_updates_flow_into_player_state() {
        let (mut controller, log) = controller(&["a"], None);
        controller.play_record("a").await.expect("play should succeed");
        push_event(&log, latest_generation(&log), PlaybackEvent::TimeUpdate(12.5));

        controller.pump().await;
        let state = controller.player_state().snapshot();
        assert_eq!(state.current_time, 12.5);
        assert_eq!(state.duration, 120.0);
    }

    #[tokio::test]
    async fn test_set_volume_clamps_applies_and_persists() {
        let dir = tempfile::tempdir().expect("temp dir should be created");
        let preferences = PreferencesFile::new(dir.path().join("preferences.toml"));
        let (mut controller, log) = controller(&["a"], Some(preferences.clone()));
        controller.play_record("a").await.expect("play should succeed");

        controller.set_volume(1.7);
        assert_eq!(controller.player_state().snapshot().volume, 1.0);
        assert_eq!(log.borrow().volume, 1.0);
        assert_eq!(preferences.load_volume(), Some(1.0));
        assert_eq!(restored_volume(Some(&preferences), 0.8), 1.0);
    }

    #[tokio::test]
    async fn test_toggle_mute_silences_engine_and_restores() {
        let (mut controller, log) = controller(&["a"], None);
        controller.play_record("a").await.expect("play should succeed");

        controller.toggle_mute();
        assert_eq!(log.borrow().volume, 0.0);
        assert!(controller.player_state().snapshot().is_muted);

        controller.toggle_mute();
        assert_eq!(log.borrow().volume, 0.5);
    }

    #[tokio::test]
    async fn test_toggle_play_starts_first_record_then_pauses() {
        let (mut controller, _log) = controller(&["a", "b"], None);
        controller.toggle_play().await.expect("play should succeed");
        assert_eq!(controller.current_id(), Some("a"));
        assert!(controller.engine().is_playing());

        controller.toggle_play().await.expect("pause should succeed");
        assert!(!controller.engine().is_playing());
        assert!(!controller.player_state().snapshot().is_playing);
    }

    #[tokio::test]
    async fn test_shuffle_start_is_not_pinned_to_first_record() {
        let ids = ["a", "b", "c", "d", "e"];
        let mut openers = std::collections::HashSet::new();
        for seed in 0u8..16 {
            let (engine, _log) = fake_engine();
            let mut list = AudioListState::default();
            list.add_many(ids.iter().map(|id| record(id)));
            let mut controller = PlayerController::new(
                engine,
                Playlist::with_seed([seed; 32]),
                AudioListStore::new(list),
                PlayerStateStore::new(PlayerState::with_volume(0.5)),
                None,
            );
            controller.toggle_shuffle();
            controller.toggle_play().await.expect("play should succeed");
            let current = controller.current_id().expect("a track should be loaded");
            openers.insert(current.to_string());
        }
        assert!(openers.len() > 1, "shuffle always opened on {openers:?}");
    }

    #[tokio::test]
    async fn test_previous_restarts_when_past_threshold() {
        let (mut controller, log) = controller(&["a", "b"], None);
        controller.play_record("b").await.expect("play should succeed");
        controller.seek(10.0);

        controller.previous().await.expect("previous should succeed");
        assert_eq!(controller.current_id(), Some("b"));
        assert_eq!(log.borrow().position, 0.0);

        controller.previous().await.expect("previous should succeed");
        assert_eq!(controller.current_id(), Some("a"));
    }

    #[tokio::test]
    async fn test_forget_playing_record_releases_engine() {
        let (mut controller, _log) = controller(&["a", "b"], None);
        controller.play_record("a").await.expect("play should succeed");
        controller.forget_record("a");
        assert_eq!(controller.current_id(), None);
        assert!(!controller.player_state().snapshot().is_playing);
    }

    #[tokio::test]
    async fn test_cycle_repeat_reaches_one_and_drives_track_end() {
        let (mut controller, log) = controller(&["a", "b"], None);
        assert_eq!(controller.cycle_repeat(), RepeatMode::All);
        assert_eq!(controller.cycle_repeat(), RepeatMode::One);
        assert_eq!(controller.player_state().snapshot().repeat, RepeatMode::One);

        controller.play_record("b").await.expect("play should succeed");
        push_event(&log, latest_generation(&log), PlaybackEvent::Ended);
        controller.pump().await;
        assert_eq!(controller.current_id(), Some("b"));
        assert_eq!(log.borrow().loads.len(), 1);
    }

    #[tokio::test]
    async fn test_play_unknown_record_is_no_source() {
        let (mut controller, _log) = controller(&["a"], None);
        let err = controller
            .play_record("missing")
            .await
            .expect_err("unknown id should fail");
        assert_eq!(err, PlaybackError::NoSource);
    }
}
