use crate::config::DEFAULT_VOLUME;
use crate::protocol::RepeatMode;

/// Transport state mirrored from the playback engine. It reflects the engine;
/// it never drives it.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerState {
    pub is_playing: bool,
    /// Seconds.
    pub current_time: f64,
    /// Seconds; zero until metadata is loaded.
    pub duration: f64,
    /// `[0, 1]`. Kept while muted so unmuting restores it.
    pub volume: f32,
    pub repeat: RepeatMode,
    pub shuffle: bool,
    pub is_muted: bool,
}

impl Default for PlayerState {
    fn default() -> Self {
        Self::with_volume(DEFAULT_VOLUME)
    }
}

impl PlayerState {
    pub fn with_volume(volume: f32) -> Self {
        let mut state = Self {
            is_playing: false,
            current_time: 0.0,
            duration: 0.0,
            volume: DEFAULT_VOLUME,
            repeat: RepeatMode::Off,
            shuffle: false,
            is_muted: false,
        };
        state.set_volume(volume);
        state
    }

    /// Volume the engine should actually apply.
    pub fn effective_volume(&self) -> f32 {
        if self.is_muted {
            0.0
        } else {
            self.volume
        }
    }

    pub fn set_playing(&mut self, is_playing: bool) {
        self.is_playing = is_playing;
    }

    pub fn toggle_play(&mut self) {
        self.is_playing = !self.is_playing;
    }

    pub fn set_current_time(&mut self, seconds: f64) {
        self.current_time = if seconds.is_finite() {
            seconds.max(0.0)
        } else {
            0.0
        };
    }

    pub fn set_duration(&mut self, seconds: f64) {
        self.duration = if seconds.is_finite() {
            seconds.max(0.0)
        } else {
            0.0
        };
    }

    /// Clamps into `[0, 1]`; zero mutes, anything else unmutes.
    pub fn set_volume(&mut self, volume: f32) {
        let volume = if volume.is_finite() {
            volume.clamp(0.0, 1.0)
        } else {
            0.0
        };
        self.volume = volume;
        self.is_muted = volume == 0.0;
    }

    pub fn set_repeat(&mut self, repeat: RepeatMode) {
        self.repeat = repeat;
    }

    pub fn cycle_repeat(&mut self) {
        self.repeat = self.repeat.cycled();
    }

    pub fn toggle_shuffle(&mut self) {
        self.shuffle = !self.shuffle;
    }

    pub fn toggle_mute(&mut self) {
        if self.is_muted && self.volume == 0.0 {
            self.volume = DEFAULT_VOLUME;
        }
        self.is_muted = !self.is_muted;
    }

    /// Clears transport progress. Volume, repeat, and shuffle are preferences
    /// and survive.
    pub fn reset(&mut self) {
        self.is_playing = false;
        self.current_time = 0.0;
        self.duration = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_volume_clamps_and_mutes_at_zero() {
        let mut state = PlayerState::default();
        state.set_volume(1.5);
        assert_eq!(state.volume, 1.0);
        assert!(!state.is_muted);

        state.set_volume(-0.2);
        assert_eq!(state.volume, 0.0);
        assert!(state.is_muted);

        state.set_volume(f32::NAN);
        assert_eq!(state.volume, 0.0);
    }

    #[test]
    fn test_toggle_mute_restores_previous_volume() {
        let mut state = PlayerState::with_volume(0.4);
        state.toggle_mute();
        assert!(state.is_muted);
        assert_eq!(state.effective_volume(), 0.0);

        state.toggle_mute();
        assert!(!state.is_muted);
        assert_eq!(state.effective_volume(), 0.4);
    }

    #[test]
    fn test_unmuting_from_zero_volume_uses_default() {
        let mut state = PlayerState::with_volume(0.0);
        assert!(state.is_muted);
        state.toggle_mute();
        assert_eq!(state.effective_volume(), DEFAULT_VOLUME);
    }

    #[test]
    fn test_reset_keeps_preferences() {
        let mut state = PlayerState::with_volume(0.3);
        state.set_repeat(RepeatMode::All);
        state.toggle_shuffle();
        state.set_playing(true);
        state.set_current_time(12.5);
        state.set_duration(90.0);

        state.reset();
        assert!(!state.is_playing);
        assert_eq!(state.current_time, 0.0);
        assert_eq!(state.duration, 0.0);
        assert_eq!(state.volume, 0.3);
        assert_eq!(state.repeat, RepeatMode::All);
        assert!(state.shuffle);
    }
}
