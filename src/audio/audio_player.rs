//! CPAL-backed media element.
//!
//! A loaded blob is decoded up front into interleaved PCM at the output
//! stream's format. One output stream is built per backend and renders
//! silence while paused; the render callback reports progress and track end
//! through the engine's event channel.

use std::num::NonZeroU32;
use std::sync::{
    atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering},
    Arc, Mutex, PoisonError,
};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use log::{debug, error, warn};

use crate::audio::audio_decoder::decode_for_output;
use crate::audio::media_backend::{EventSender, MediaBackend, MediaSource, PlaybackEvent, StampedEvent};
use crate::config::PlaybackConfig;
use crate::error::PlaybackError;

type TimeUpdateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct OutputFormat {
    sample_rate: u32,
    channels: u16,
}

impl OutputFormat {
    fn seconds_at(&self, sample_index: usize) -> f64 {
        if self.sample_rate == 0 || self.channels == 0 {
            return 0.0;
        }
        (sample_index / self.channels as usize) as f64 / f64::from(self.sample_rate)
    }

    fn sample_index_at(&self, seconds: f64) -> usize {
        let frames = (seconds.max(0.0) * f64::from(self.sample_rate)).floor() as usize;
        frames * self.channels as usize
    }
}

struct LoadedTrack {
    generation: u64,
    samples: Arc<[f32]>,
}

/// State shared between the backend and the render callback.
struct RenderState {
    track: Mutex<Option<LoadedTrack>>,
    cursor: AtomicUsize,
    is_playing: AtomicBool,
    volume: AtomicU32,
}

impl RenderState {
    fn new(volume: f32) -> Self {
        Self {
            track: Mutex::new(None),
            cursor: AtomicUsize::new(0),
            is_playing: AtomicBool::new(false),
            volume: AtomicU32::new(volume.to_bits()),
        }
    }

    fn track_len(&self) -> Option<usize> {
        self.track
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|track| track.samples.len())
    }
}

pub struct CpalBackend {
    events: EventSender,
    device: cpal::Device,
    config: cpal::StreamConfig,
    sample_format: cpal::SampleFormat,
    output_format: OutputFormat,
    render: Arc<RenderState>,
    limiter: Arc<TimeUpdateLimiter>,
    stream: Option<cpal::Stream>,
}

fn score_sample_format(sample_format: cpal::SampleFormat) -> u64 {
    match sample_format {
        cpal::SampleFormat::F32 => 0,
        cpal::SampleFormat::I16 => 20,
        cpal::SampleFormat::U16 => 30,
        _ => 200,
    }
}

fn choose_sample_rate_for_range(
    range: &cpal::SupportedStreamConfigRange,
    requested_sample_rate: u32,
) -> u32 {
    const COMMON_SAMPLE_RATES: [u32; 6] = [44_100, 48_000, 88_200, 96_000, 176_400, 192_000];
    let min_rate = range.min_sample_rate().0;
    let max_rate = range.max_sample_rate().0;
    if requested_sample_rate >= min_rate && requested_sample_rate <= max_rate {
        return requested_sample_rate;
    }
    COMMON_SAMPLE_RATES
        .iter()
        .copied()
        .filter(|rate| *rate >= min_rate && *rate <= max_rate)
        .min_by_key(|rate| rate.abs_diff(requested_sample_rate))
        .unwrap_or_else(|| requested_sample_rate.clamp(min_rate, max_rate))
}

fn choose_best_stream_config(
    supported_configs: &[cpal::SupportedStreamConfigRange],
    requested_sample_rate: u32,
    requested_channels: u16,
) -> Option<cpal::SupportedStreamConfig> {
    let mut best: Option<(u64, cpal::SupportedStreamConfig)> = None;
    for range in supported_configs {
        let candidate_sample_rate = choose_sample_rate_for_range(range, requested_sample_rate);
        let candidate = range.with_sample_rate(cpal::SampleRate(candidate_sample_rate));
        let channel_penalty = u64::from(candidate.channels().abs_diff(requested_channels)) * 1_000;
        let sample_rate_penalty =
            u64::from(candidate.sample_rate().0.abs_diff(requested_sample_rate));
        let score =
            channel_penalty + sample_rate_penalty + score_sample_format(candidate.sample_format());
        match &best {
            Some((best_score, _)) if *best_score <= score => {}
            _ => best = Some((score, candidate)),
        }
    }
    best.map(|(_, candidate)| candidate)
}

fn quantize_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * i16::MAX as f32)
        .round()
        .clamp(i16::MIN as f32, i16::MAX as f32) as i16
}

fn quantize_u16(sample: f32) -> u16 {
    ((sample.clamp(-1.0, 1.0) * 0.5 + 0.5) * u16::MAX as f32)
        .round()
        .clamp(0.0, u16::MAX as f32) as u16
}

fn render_output_buffer<T, F>(
    output_buffer: &mut [T],
    render: &RenderState,
    events: &EventSender,
    limiter: &TimeUpdateLimiter,
    output_format: OutputFormat,
    mut convert_sample: F,
    silence_value: T,
) where
    T: Copy,
    F: FnMut(f32) -> T,
{
    if !render.is_playing.load(Ordering::Relaxed) {
        output_buffer.fill(silence_value);
        return;
    }

    let track_guard = render.track.lock().unwrap_or_else(PoisonError::into_inner);
    let Some(track) = track_guard.as_ref() else {
        output_buffer.fill(silence_value);
        return;
    };

    let gain = f32::from_bits(render.volume.load(Ordering::Relaxed)).clamp(0.0, 1.0);
    let start = render.cursor.load(Ordering::Relaxed).min(track.samples.len());
    let count = (track.samples.len() - start).min(output_buffer.len());
    for (output, sample) in output_buffer[..count]
        .iter_mut()
        .zip(&track.samples[start..start + count])
    {
        *output = convert_sample(sample * gain);
    }
    output_buffer[count..].fill(silence_value);

    let end = start + count;
    let finished = end >= track.samples.len();
    let generation = track.generation;
    drop(track_guard);

    // A seek that landed while rendering wins over our advance.
    let _ = render
        .cursor
        .compare_exchange(start, end, Ordering::Relaxed, Ordering::Relaxed);

    if finished {
        render.is_playing.store(false, Ordering::Relaxed);
        let _ = events.send(StampedEvent {
            generation,
            event: PlaybackEvent::TimeUpdate(output_format.seconds_at(end)),
        });
        let _ = events.send(StampedEvent {
            generation,
            event: PlaybackEvent::Ended,
        });
    } else if limiter.check().is_ok() {
        let _ = events.send(StampedEvent {
            generation,
            event: PlaybackEvent::TimeUpdate(output_format.seconds_at(end)),
        });
    }
}

fn time_update_limiter(updates_per_second: u32) -> TimeUpdateLimiter {
    let rate = NonZeroU32::new(updates_per_second.max(1)).unwrap_or(NonZeroU32::MIN);
    RateLimiter::direct(Quota::per_second(rate).allow_burst(NonZeroU32::MIN))
}

impl CpalBackend {
    /// Opens the default output device and picks the stream format closest to
    /// the configured one. The stream itself is built by `connect_output`.
    pub fn new(playback: &PlaybackConfig, events: EventSender) -> Result<Self, PlaybackError> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| PlaybackError::Device("no output device available".to_string()))?;
        let configs = device
            .supported_output_configs()
            .map_err(|err| PlaybackError::Device(format!("error getting device configs: {err}")))?
            .collect::<Vec<_>>();

        let selected_config = choose_best_stream_config(
            &configs,
            playback.output_sample_rate_hz,
            playback.output_channels,
        )
        .ok_or_else(|| PlaybackError::Device("no matching device config found".to_string()))?;

        let config: cpal::StreamConfig = selected_config.config();
        let sample_format = selected_config.sample_format();
        let output_format = OutputFormat {
            sample_rate: config.sample_rate.0,
            channels: config.channels,
        };
        debug!(
            "PlaybackEngine: output device '{}' sr={} channels={} format={:?}",
            device.name().unwrap_or_else(|_| "Unknown Device".to_string()),
            output_format.sample_rate,
            output_format.channels,
            sample_format
        );

        Ok(Self {
            events,
            device,
            config,
            sample_format,
            output_format,
            render: Arc::new(RenderState::new(playback.default_volume)),
            limiter: Arc::new(time_update_limiter(playback.time_updates_per_second)),
            stream: None,
        })
    }

    fn build_stream(&self) -> Result<cpal::Stream, PlaybackError> {
        let render = Arc::clone(&self.render);
        let events = self.events.clone();
        let limiter = Arc::clone(&self.limiter);
        let output_format = self.output_format;

        let stream_result = match self.sample_format {
            cpal::SampleFormat::F32 => self.device.build_output_stream(
                &self.config,
                move |output_buffer: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    render_output_buffer(
                        output_buffer,
                        &render,
                        &events,
                        &limiter,
                        output_format,
                        |sample| sample.clamp(-1.0, 1.0),
                        0.0,
                    );
                },
                |err| error!("Audio stream error: {}", err),
                None,
            ),
            cpal::SampleFormat::I16 => self.device.build_output_stream(
                &self.config,
                move |output_buffer: &mut [i16], _: &cpal::OutputCallbackInfo| {
                    render_output_buffer(
                        output_buffer,
                        &render,
                        &events,
                        &limiter,
                        output_format,
                        quantize_i16,
                        0,
                    );
                },
                |err| error!("Audio stream error: {}", err),
                None,
            ),
            cpal::SampleFormat::U16 => self.device.build_output_stream(
                &self.config,
                move |output_buffer: &mut [u16], _: &cpal::OutputCallbackInfo| {
                    render_output_buffer(
                        output_buffer,
                        &render,
                        &events,
                        &limiter,
                        output_format,
                        quantize_u16,
                        u16::MAX / 2 + 1,
                    );
                },
                |err| error!("Audio stream error: {}", err),
                None,
            ),
            other => {
                return Err(PlaybackError::Device(format!(
                    "unsupported output sample format: {other:?}"
                )));
            }
        };

        stream_result.map_err(|err| PlaybackError::Device(format!("failed to build stream: {err}")))
    }
}

impl MediaBackend for CpalBackend {
    fn connect_output(&mut self) -> Result<(), PlaybackError> {
        if self.stream.is_some() {
            return Ok(());
        }
        let stream = self.build_stream()?;
        stream
            .play()
            .map_err(|err| PlaybackError::Device(format!("failed to start stream: {err}")))?;
        self.stream = Some(stream);
        debug!("PlaybackEngine: audio stream created");
        Ok(())
    }

    fn load(&mut self, source: &MediaSource, generation: u64) -> Result<(), PlaybackError> {
        self.render.is_playing.store(false, Ordering::Relaxed);
        let hint = source.extension_hint();
        let decoded = decode_for_output(
            &source.blob,
            hint.as_deref(),
            self.output_format.sample_rate,
            self.output_format.channels,
        );

        let mut track = self.render.track.lock().unwrap_or_else(PoisonError::into_inner);
        let decoded = match decoded {
            Ok(decoded) => decoded,
            Err(err) => {
                *track = None;
                return Err(err);
            }
        };
        let duration = decoded.duration_seconds();
        *track = Some(LoadedTrack {
            generation,
            samples: Arc::from(decoded.samples),
        });
        self.render.cursor.store(0, Ordering::Relaxed);
        drop(track);

        let _ = self.events.send(StampedEvent {
            generation,
            event: PlaybackEvent::LoadedMetadata { duration },
        });
        Ok(())
    }

    fn play(&mut self) -> Result<(), PlaybackError> {
        let Some(track_len) = self.render.track_len() else {
            return Err(PlaybackError::NoSource);
        };
        if self.stream.is_none() {
            return Err(PlaybackError::Device("output is not connected".to_string()));
        }
        if self.render.cursor.load(Ordering::Relaxed) >= track_len {
            self.render.cursor.store(0, Ordering::Relaxed);
        }
        self.render.is_playing.store(true, Ordering::Relaxed);
        Ok(())
    }

    fn pause(&mut self) {
        self.render.is_playing.store(false, Ordering::Relaxed);
    }

    fn seek(&mut self, seconds: f64) {
        let track_len = self.render.track_len().unwrap_or(0);
        let index = self.output_format.sample_index_at(seconds).min(track_len);
        self.render.cursor.store(index, Ordering::Relaxed);
    }

    fn set_volume(&mut self, volume: f32) {
        self.render
            .volume
            .store(volume.clamp(0.0, 1.0).to_bits(), Ordering::Relaxed);
    }

    fn position(&self) -> f64 {
        self.output_format
            .seconds_at(self.render.cursor.load(Ordering::Relaxed))
    }

    fn duration(&self) -> f64 {
        self.output_format
            .seconds_at(self.render.track_len().unwrap_or(0))
    }

    fn close(&mut self) {
        self.render.is_playing.store(false, Ordering::Relaxed);
        if let Some(stream) = self.stream.take() {
            if let Err(err) = stream.pause() {
                warn!("PlaybackEngine: failed to pause stream on close: {}", err);
            }
        }
        *self.render.track.lock().unwrap_or_else(PoisonError::into_inner) = None;
        self.render.cursor.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc::unbounded_channel;

    fn render_state_with(samples: Vec<f32>, generation: u64) -> RenderState {
        let render = RenderState::new(1.0);
        *render.track.lock().expect("track lock should succeed") = Some(LoadedTrack {
            generation,
            samples: Arc::from(samples),
        });
        render.is_playing.store(true, Ordering::Relaxed);
        render
    }

    const FORMAT: OutputFormat = OutputFormat {
        sample_rate: 2,
        channels: 2,
    };

    #[test]
    fn test_render_stops_at_track_end_and_reports_ended() {
        let render = render_state_with(vec![0.5; 6], 7);
        let (sender, mut receiver) = unbounded_channel();
        let limiter = time_update_limiter(1);

        let mut first = [9.0f32; 4];
        render_output_buffer(&mut first, &render, &sender, &limiter, FORMAT, |s| s, 0.0);
        assert_eq!(first, [0.5; 4]);
        assert!(render.is_playing.load(Ordering::Relaxed));

        let mut second = [9.0f32; 4];
        render_output_buffer(&mut second, &render, &sender, &limiter, FORMAT, |s| s, 0.0);
        assert_eq!(second, [0.5, 0.5, 0.0, 0.0]);
        assert!(!render.is_playing.load(Ordering::Relaxed));

        let mut received = Vec::new();
        while let Ok(event) = receiver.try_recv() {
            assert_eq!(event.generation, 7);
            received.push(event.event);
        }
        assert_eq!(received.last(), Some(&PlaybackEvent::Ended));
        assert!(received.contains(&PlaybackEvent::TimeUpdate(1.5)));
    }

    #[test]
    fn test_render_applies_volume_and_silences_when_paused() {
        let render = render_state_with(vec![1.0; 8], 1);
        render.volume.store(0.25f32.to_bits(), Ordering::Relaxed);
        let (sender, _receiver) = unbounded_channel();
        let limiter = time_update_limiter(4);

        let mut buffer = [0i16; 2];
        render_output_buffer(&mut buffer, &render, &sender, &limiter, FORMAT, quantize_i16, 0);
        assert_eq!(buffer, [quantize_i16(0.25); 2]);

        render.is_playing.store(false, Ordering::Relaxed);
        let mut paused = [5u16; 2];
        render_output_buffer(
            &mut paused,
            &render,
            &sender,
            &limiter,
            FORMAT,
            quantize_u16,
            u16::MAX / 2 + 1,
        );
        assert_eq!(paused, [u16::MAX / 2 + 1; 2]);
        assert_eq!(render.cursor.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn test_quantize_clamps_out_of_range_samples() {
        assert_eq!(quantize_i16(2.0), i16::MAX);
        assert_eq!(quantize_i16(-2.0), -i16::MAX);
        assert_eq!(quantize_u16(-1.0), 0);
        assert_eq!(quantize_u16(1.0), u16::MAX);
    }

    #[test]
    fn test_output_format_converts_between_seconds_and_samples() {
        let format = OutputFormat {
            sample_rate: 48_000,
            channels: 2,
        };
        assert_eq!(format.sample_index_at(1.5), 144_000);
        assert_eq!(format.seconds_at(144_000), 1.5);
        assert_eq!(format.sample_index_at(-3.0), 0);
    }
}
