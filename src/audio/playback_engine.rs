//! Single owned playback engine: one media backend and one output graph for
//! the life of an initialization, reused across every track.
//!
//! The engine initializes lazily on first use and again after `cleanup`. Every
//! `set_source` bumps a generation counter; events stamped by an older
//! generation are discarded, so a track that was replaced can never report
//! progress or completion for its successor.

use log::{debug, warn};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};

use crate::audio::media_backend::{
    EventSender, MediaBackend, MediaSource, PlaybackEvent, PlaybackEventKind, StampedEvent,
};
use crate::config::DEFAULT_VOLUME;
use crate::error::PlaybackError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Uninitialized,
    Empty,
    Loaded,
    Playing,
    Paused,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Listener = Box<dyn FnMut(&PlaybackEvent)>;

/// Builds a backend bound to the engine's event channel.
pub type BackendFactory<B> = Box<dyn Fn(EventSender) -> Result<B, PlaybackError>>;

struct Initialized<B> {
    backend: B,
    events: UnboundedReceiver<StampedEvent>,
    event_sender: EventSender,
    graph_connected: bool,
}

pub struct PlaybackEngine<B: MediaBackend> {
    factory: BackendFactory<B>,
    inner: Option<Initialized<B>>,
    state: EngineState,
    generation: u64,
    source: Option<MediaSource>,
    volume: f32,
    duration: f64,
    listeners: Vec<(ListenerId, Option<PlaybackEventKind>, Listener)>,
    next_listener_id: u64,
}

impl<B: MediaBackend> PlaybackEngine<B> {
    pub fn new(factory: BackendFactory<B>) -> Self {
        Self {
            factory,
            inner: None,
            state: EngineState::Uninitialized,
            generation: 0,
            source: None,
            volume: DEFAULT_VOLUME,
            duration: 0.0,
            listeners: Vec::new(),
            next_listener_id: 0,
        }
    }

    fn ensure_initialized(&mut self) -> Result<&mut Initialized<B>, PlaybackError> {
        if self.inner.is_none() {
            let (event_sender, events) = unbounded_channel();
            let mut backend = (self.factory)(event_sender.clone())?;
            backend.set_volume(self.volume);
            debug!("PlaybackEngine: initialized");
            self.inner = Some(Initialized {
                backend,
                events,
                event_sender,
                graph_connected: false,
            });
            self.state = EngineState::Empty;
        }
        self.inner
            .as_mut()
            .ok_or_else(|| PlaybackError::Device("engine failed to initialize".to_string()))
    }

    fn emit(&self, event: PlaybackEvent) {
        if let Some(inner) = self.inner.as_ref() {
            let _ = inner.event_sender.send(StampedEvent {
                generation: self.generation,
                event,
            });
        }
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn is_playing(&self) -> bool {
        self.state == EngineState::Playing
    }

    pub fn is_graph_connected(&self) -> bool {
        self.inner
            .as_ref()
            .map(|inner| inner.graph_connected)
            .unwrap_or(false)
    }

    pub fn source_id(&self) -> Option<&str> {
        self.source.as_ref().map(|source| source.id.as_str())
    }

    /// Loads `source` from position 0 and leaves the engine `Loaded`. Events
    /// still queued for the previous source are dropped.
    pub fn set_source(&mut self, source: MediaSource) -> Result<(), PlaybackError> {
        let generation = self.generation + 1;
        let loaded = {
            let inner = self.ensure_initialized()?;
            inner.backend.pause();
            inner.backend.load(&source, generation)
        };
        self.generation = generation;
        self.duration = 0.0;

        match loaded {
            Ok(()) => {
                debug!(
                    "PlaybackEngine: loaded {} (generation {})",
                    source.id, generation
                );
                self.source = Some(source);
                self.state = EngineState::Loaded;
                Ok(())
            }
            Err(err) => {
                warn!("PlaybackEngine: failed to load {}: {}", source.id, err);
                self.source = None;
                self.state = EngineState::Empty;
                self.emit(PlaybackEvent::Error(err.to_string()));
                Err(err)
            }
        }
    }

    /// Starts playback, connecting the output graph on first use. On failure
    /// the engine state is left as it was.
    pub async fn play(&mut self) -> Result<(), PlaybackError> {
        if self.source.is_none() {
            return Err(PlaybackError::Rejected("no source loaded".to_string()));
        }
        let inner = self
            .ensure_initialized()
            .map_err(|err| PlaybackError::Rejected(err.to_string()))?;
        if !inner.graph_connected {
            inner
                .backend
                .connect_output()
                .map_err(|err| PlaybackError::Rejected(err.to_string()))?;
            inner.graph_connected = true;
            debug!("PlaybackEngine: output graph connected");
        }
        inner
            .backend
            .play()
            .map_err(|err| PlaybackError::Rejected(err.to_string()))?;
        self.state = EngineState::Playing;
        self.emit(PlaybackEvent::Play);
        Ok(())
    }

    pub fn pause(&mut self) {
        if self.state != EngineState::Playing {
            return;
        }
        if let Some(inner) = self.inner.as_mut() {
            inner.backend.pause();
        }
        self.state = EngineState::Paused;
        self.emit(PlaybackEvent::Pause);
    }

    /// Pause and rewind to 0.
    pub fn stop(&mut self) {
        self.pause();
        self.seek(0.0);
    }

    pub fn seek(&mut self, seconds: f64) {
        if self.source.is_none() {
            return;
        }
        let duration = self.duration();
        let target = if seconds.is_finite() {
            seconds.clamp(0.0, duration.max(0.0))
        } else {
            0.0
        };
        if let Some(inner) = self.inner.as_mut() {
            inner.backend.seek(target);
        }
    }

    /// Clamps to `[0, 1]`; zero means muted.
    pub fn set_volume(&mut self, volume: f32) {
        self.volume = if volume.is_finite() {
            volume.clamp(0.0, 1.0)
        } else {
            0.0
        };
        if let Some(inner) = self.inner.as_mut() {
            inner.backend.set_volume(self.volume);
        }
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }

    pub fn is_muted(&self) -> bool {
        self.volume == 0.0
    }

    pub fn current_time(&self) -> f64 {
        match (&self.inner, &self.source) {
            (Some(inner), Some(_)) => inner.backend.position(),
            _ => 0.0,
        }
    }

    pub fn duration(&self) -> f64 {
        match (&self.inner, &self.source) {
            (Some(inner), Some(_)) => {
                let reported = inner.backend.duration();
                if reported > 0.0 {
                    reported
                } else {
                    self.duration
                }
            }
            _ => 0.0,
        }
    }

    /// Registers `listener` for one event kind, or for all kinds when `filter`
    /// is `None`.
    pub fn subscribe<F>(&mut self, filter: Option<PlaybackEventKind>, listener: F) -> ListenerId
    where
        F: FnMut(&PlaybackEvent) + 'static,
    {
        let id = ListenerId(self.next_listener_id);
        self.next_listener_id += 1;
        self.listeners.push((id, filter, Box::new(listener)));
        id
    }

    pub fn unsubscribe(&mut self, id: ListenerId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(listener_id, _, _)| *listener_id != id);
        self.listeners.len() != before
    }

    /// Drains pending backend events, drops stale ones, applies them to the
    /// engine state, and dispatches them to listeners. Returns what was
    /// dispatched.
    pub fn poll_events(&mut self) -> Vec<PlaybackEvent> {
        let mut fresh = Vec::new();
        if let Some(inner) = self.inner.as_mut() {
            while let Ok(stamped) = inner.events.try_recv() {
                if stamped.generation != self.generation {
                    debug!(
                        "PlaybackEngine: dropping stale {:?} from generation {}",
                        stamped.event.kind(),
                        stamped.generation
                    );
                    continue;
                }
                fresh.push(stamped.event);
            }
        }

        for event in &fresh {
            match event {
                PlaybackEvent::LoadedMetadata { duration } => {
                    self.duration = duration.max(0.0);
                }
                PlaybackEvent::Ended => {
                    if self.state == EngineState::Playing {
                        self.state = EngineState::Paused;
                    }
                }
                _ => {}
            }
            for (_, filter, listener) in self.listeners.iter_mut() {
                if filter.map(|kind| kind == event.kind()).unwrap_or(true) {
                    listener(event);
                }
            }
        }
        fresh
    }

    /// Releases the backend and its output graph. Idempotent; the next call
    /// that needs the engine initializes it again.
    pub fn cleanup(&mut self) {
        let Some(mut inner) = self.inner.take() else {
            return;
        };
        inner.backend.close();
        self.generation += 1;
        self.source = None;
        self.duration = 0.0;
        self.state = EngineState::Uninitialized;
        debug!("PlaybackEngine: cleaned up");
    }
}
