use rand::{rngs::StdRng, Rng, SeedableRng};
use std::collections::HashSet;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::protocol::RepeatMode;

/// Why the queue is being advanced.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Advance {
    TrackEnded, // The playing track finished on its own
    UserNext,   // Explicit skip; always wraps
}

/// Play queue of record ids with repeat/shuffle navigation.
pub struct Playlist {
    tracks: Vec<String>,
    playing_index: Option<usize>,
    repeat: RepeatMode,
    shuffle: bool,
    // Ids already played in the current shuffle pass
    played: HashSet<String>,
    rng: StdRng,
}

impl Default for Playlist {
    fn default() -> Self {
        Self::new()
    }
}

fn random_seed() -> [u8; 32] {
    let mut seed = [0u8; 32];
    if getrandom::fill(&mut seed).is_err() {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_nanos())
            .unwrap_or(0);
        seed[..16].copy_from_slice(&nanos.to_le_bytes());
    }
    seed
}

impl Playlist {
    pub fn new() -> Playlist {
        Self::with_seed(random_seed())
    }

    pub fn with_seed(seed: [u8; 32]) -> Playlist {
        Playlist {
            tracks: Vec::new(),
            playing_index: None,
            repeat: RepeatMode::Off,
            shuffle: false,
            played: HashSet::new(),
            rng: StdRng::from_seed(seed),
        }
    }

    /// Replaces the queue, keeping the playing track when it is still present.
    pub fn set_tracks(&mut self, ids: Vec<String>) {
        let playing_id = self.current_id().map(str::to_string);
        self.tracks = ids;
        self.playing_index =
            playing_id.and_then(|id| self.tracks.iter().position(|track| *track == id));
        let present: HashSet<&String> = self.tracks.iter().collect();
        self.played.retain(|id| present.contains(id));
    }

    pub fn tracks(&self) -> &[String] {
        &self.tracks
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn playing_index(&self) -> Option<usize> {
        self.playing_index
    }

    pub fn current_id(&self) -> Option<&str> {
        self.playing_index
            .and_then(|index| self.tracks.get(index))
            .map(String::as_str)
    }

    pub fn track_id(&self, index: usize) -> Option<&str> {
        self.tracks.get(index).map(String::as_str)
    }

    /// Marks `id` as playing. Returns its index, or `None` if it is not queued.
    pub fn set_current(&mut self, id: &str) -> Option<usize> {
        let index = self.tracks.iter().position(|track| track == id)?;
        self.playing_index = Some(index);
        self.played.insert(id.to_string());
        Some(index)
    }

    pub fn remove_track(&mut self, id: &str) {
        let Some(index) = self.tracks.iter().position(|track| track == id) else {
            return;
        };
        self.tracks.remove(index);
        self.played.remove(id);
        self.playing_index = match self.playing_index {
            Some(playing) if playing == index => None,
            Some(playing) if playing > index => Some(playing - 1),
            other => other,
        };
    }

    pub fn set_repeat(&mut self, repeat: RepeatMode) {
        self.repeat = repeat;
    }

    pub fn repeat(&self) -> RepeatMode {
        self.repeat
    }

    /// Turning shuffle on starts a fresh pass from the playing track.
    pub fn set_shuffle(&mut self, shuffle: bool) {
        if shuffle && !self.shuffle {
            self.played.clear();
            if let Some(id) = self.current_id().map(str::to_string) {
                self.played.insert(id);
            }
        }
        self.shuffle = shuffle;
    }

    pub fn shuffle(&self) -> bool {
        self.shuffle
    }

    // Wrapping is allowed for explicit skips and for repeat-all
    fn may_wrap(&self, advance: Advance) -> bool {
        advance == Advance::UserNext || self.repeat != RepeatMode::Off
    }

    /// Index of the track to play next, or `None` when playback should stop.
    pub fn next_index(&mut self, advance: Advance) -> Option<usize> {
        if self.tracks.is_empty() {
            return None;
        }
        if self.repeat == RepeatMode::One && advance == Advance::TrackEnded {
            return Some(self.playing_index.unwrap_or(0));
        }

        let Some(current) = self.playing_index else {
            return if self.shuffle {
                Some(self.rng.random_range(0..self.tracks.len()))
            } else {
                Some(0)
            };
        };

        if self.shuffle {
            return self.next_shuffled_index(current, advance);
        }

        let next_index = current + 1;
        if next_index < self.tracks.len() {
            Some(next_index)
        } else if self.may_wrap(advance) {
            Some(0)
        } else {
            None
        }
    }

    fn next_shuffled_index(&mut self, current: usize, advance: Advance) -> Option<usize> {
        if self.tracks.len() == 1 {
            return if self.may_wrap(advance) { Some(0) } else { None };
        }

        let mut candidates: Vec<usize> = (0..self.tracks.len())
            .filter(|index| *index != current && !self.played.contains(&self.tracks[*index]))
            .collect();
        if candidates.is_empty() {
            if !self.may_wrap(advance) {
                return None;
            }
            // New pass; the track that just played stays excluded.
            self.played.clear();
            self.played.insert(self.tracks[current].clone());
            candidates = (0..self.tracks.len())
                .filter(|index| *index != current)
                .collect();
        }
        Some(candidates[self.rng.random_range(0..candidates.len())])
    }

    /// Previous track in queue order, wrapping from the first to the last.
    pub fn previous_index(&self) -> Option<usize> {
        if self.tracks.is_empty() {
            return None;
        }
        match self.playing_index {
            Some(0) | None => Some(self.tracks.len() - 1),
            Some(index) => Some(index - 1),
        }
    }
}
