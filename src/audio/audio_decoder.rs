//! Whole-blob decoding into interleaved `f32` PCM at the output format.

use std::io::Cursor;
use std::sync::Arc;

use log::{debug, warn};
use rubato::{FftFixedIn, Resampler};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::error::PlaybackError;

const RESAMPLER_CHUNK_FRAMES: usize = 1024;

/// Interleaved PCM.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedAudio {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: u16,
}

impl DecodedAudio {
    pub fn frames(&self) -> usize {
        if self.channels == 0 {
            return 0;
        }
        self.samples.len() / self.channels as usize
    }

    pub fn duration_seconds(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frames() as f64 / f64::from(self.sample_rate)
    }
}

fn decode_error(message: impl std::fmt::Display) -> PlaybackError {
    PlaybackError::Decode(message.to_string())
}

pub fn decode_blob(bytes: &Arc<[u8]>, extension: Option<&str>) -> Result<DecodedAudio, PlaybackError> {
    let media_source = MediaSourceStream::new(Box::new(Cursor::new(Arc::clone(bytes))), Default::default());
    let mut hint = Hint::new();
    if let Some(extension) = extension {
        hint.with_extension(extension);
    }

    let mut probed = symphonia::default::get_probe()
        .format(
            &hint,
            media_source,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|err| decode_error(format!("failed to probe media source: {err}")))?;

    let track = probed
        .format
        .tracks()
        .iter()
        .find(|track| track.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| decode_error("no audio track found"))?;
    let track_id = track.id;
    let mut sample_rate = track.codec_params.sample_rate.unwrap_or(0);
    let mut channels = track
        .codec_params
        .channels
        .map(|channels| channels.count() as u16)
        .unwrap_or(0);

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|err| decode_error(format!("failed to create decoder: {err}")))?;

    let mut samples = Vec::new();
    loop {
        let packet = match probed.format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(err))
                if err.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                break;
            }
            Err(SymphoniaError::ResetRequired) => break,
            Err(err) => {
                warn!("AudioDecoder: stopping at packet error: {}", err);
                break;
            }
        };
        if packet.track_id() != track_id {
            continue;
        }

        match decoder.decode(&packet) {
            Ok(decoded) => {
                let spec = *decoded.spec();
                sample_rate = spec.rate;
                channels = spec.channels.count() as u16;

                let mut sample_buffer = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
                sample_buffer.copy_interleaved_ref(decoded);
                samples.extend_from_slice(sample_buffer.samples());
            }
            Err(SymphoniaError::DecodeError(err)) => {
                debug!("AudioDecoder: skipping undecodable packet: {}", err);
            }
            Err(err) => {
                warn!("AudioDecoder: decode error: {}", err);
                break;
            }
        }
    }

    if sample_rate == 0 || channels == 0 {
        return Err(decode_error("stream reported no sample format"));
    }
    debug!(
        "AudioDecoder: decoded {} samples, sample_rate={}, channels={}",
        samples.len(),
        sample_rate,
        channels
    );
    Ok(DecodedAudio {
        samples,
        sample_rate,
        channels,
    })
}

/// Maps interleaved frames between channel counts. Mono fans out to every
/// output channel; extra input channels are averaged into mono or dropped.
pub fn remix_channels(samples: &[f32], from: u16, to: u16) -> Vec<f32> {
    if from == to || from == 0 || to == 0 {
        return samples.to_vec();
    }
    let from = from as usize;
    let to = to as usize;
    let frames = samples.len() / from;
    let mut remixed = Vec::with_capacity(frames * to);
    for frame in samples.chunks_exact(from) {
        if from == 1 {
            remixed.extend(std::iter::repeat(frame[0]).take(to));
        } else if to == 1 {
            remixed.push(frame.iter().sum::<f32>() / from as f32);
        } else {
            for channel in 0..to {
                remixed.push(frame.get(channel).copied().unwrap_or(0.0));
            }
        }
    }
    remixed
}

fn deinterleave(samples: &[f32], channels: usize) -> Vec<Vec<f32>> {
    let mut planar = vec![Vec::with_capacity(samples.len() / channels); channels];
    for frame in samples.chunks_exact(channels) {
        for (channel, sample) in frame.iter().enumerate() {
            planar[channel].push(*sample);
        }
    }
    planar
}

fn interleave(planar: &[Vec<f32>], frames: usize) -> Vec<f32> {
    let mut samples = Vec::with_capacity(frames * planar.len());
    for frame in 0..frames {
        for channel in planar {
            samples.push(channel.get(frame).copied().unwrap_or(0.0));
        }
    }
    samples
}

pub fn resample(audio: DecodedAudio, target_rate: u32) -> Result<DecodedAudio, PlaybackError> {
    if audio.sample_rate == target_rate || audio.samples.is_empty() {
        return Ok(DecodedAudio {
            sample_rate: target_rate,
            ..audio
        });
    }
    let channels = audio.channels as usize;
    let frames = audio.frames();
    let planar = deinterleave(&audio.samples, channels);

    let mut resampler = FftFixedIn::<f32>::new(
        audio.sample_rate as usize,
        target_rate as usize,
        RESAMPLER_CHUNK_FRAMES,
        2,
        channels,
    )
    .map_err(|err| decode_error(format!("failed to create resampler: {err}")))?;

    let mut output: Vec<Vec<f32>> = vec![Vec::new(); channels];
    let mut cursor = 0;
    while cursor < frames {
        let needed = resampler.input_frames_next();
        let end = (cursor + needed).min(frames);
        let chunk: Vec<&[f32]> = planar.iter().map(|channel| &channel[cursor..end]).collect();
        let processed = if end - cursor == needed {
            resampler.process(chunk.as_slice(), None)
        } else {
            resampler.process_partial(Some(chunk.as_slice()), None)
        }
        .map_err(|err| decode_error(format!("resampling failed: {err}")))?;
        for (channel, data) in output.iter_mut().zip(processed) {
            channel.extend(data);
        }
        cursor = end;
    }
    let tail = resampler
        .process_partial(None::<&[Vec<f32>]>, None)
        .map_err(|err| decode_error(format!("resampling failed: {err}")))?;
    for (channel, data) in output.iter_mut().zip(tail) {
        channel.extend(data);
    }

    let delay = resampler.output_delay();
    let expected_frames = ((frames as u64 * u64::from(target_rate)) as f64
        / f64::from(audio.sample_rate))
    .round() as usize;
    for channel in &mut output {
        let start = delay.min(channel.len());
        channel.drain(..start);
        channel.truncate(expected_frames);
    }
    let produced = output.first().map(Vec::len).unwrap_or(0);

    Ok(DecodedAudio {
        samples: interleave(&output, produced),
        sample_rate: target_rate,
        channels: audio.channels,
    })
}

/// Decodes `bytes` and converts the result to the output stream's format.
pub fn decode_for_output(
    bytes: &Arc<[u8]>,
    extension: Option<&str>,
    output_sample_rate: u32,
    output_channels: u16,
) -> Result<DecodedAudio, PlaybackError> {
    let decoded = decode_blob(bytes, extension)?;
    let remixed = DecodedAudio {
        samples: remix_channels(&decoded.samples, decoded.channels, output_channels),
        sample_rate: decoded.sample_rate,
        channels: output_channels,
    };
    resample(remixed, output_sample_rate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::wav_bytes;

    #[test]
    fn test_decode_blob_reads_wav_pcm() {
        let bytes: Arc<[u8]> = Arc::from(wav_bytes(1, 8_000));
        let decoded = decode_blob(&bytes, Some("wav")).expect("wav should decode");
        assert_eq!(decoded.sample_rate, 8_000);
        assert_eq!(decoded.channels, 1);
        assert_eq!(decoded.frames(), 8_000);
        assert!((decoded.duration_seconds() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_decode_blob_rejects_garbage() {
        let bytes: Arc<[u8]> = Arc::from(b"nothing to hear here".to_vec());
        assert!(matches!(
            decode_blob(&bytes, Some("mp3")),
            Err(PlaybackError::Decode(_))
        ));
    }

    #[test]
    fn test_remix_channels_mono_to_stereo_and_back() {
        let stereo = remix_channels(&[0.1, 0.2], 1, 2);
        assert_eq!(stereo, vec![0.1, 0.1, 0.2, 0.2]);
        let mono = remix_channels(&[0.2, 0.4, -1.0, 1.0], 2, 1);
        assert_eq!(mono.len(), 2);
        assert!((mono[0] - 0.3).abs() < 1e-6);
        assert!(mono[1].abs() < 1e-6);
    }

    #[test]
    fn test_resample_doubles_frame_count() {
        let audio = DecodedAudio {
            samples: (0..8_000).map(|index| ((index % 100) as f32 / 100.0) - 0.5).collect(),
            sample_rate: 8_000,
            channels: 1,
        };
        let resampled = resample(audio, 16_000).expect("resampling should succeed");
        assert_eq!(resampled.sample_rate, 16_000);
        let frames = resampled.frames() as i64;
        assert!((frames - 16_000).abs() <= 32, "unexpected frame count {frames}");
    }

    #[test]
    fn test_resample_same_rate_is_identity() {
        let audio = DecodedAudio {
            samples: vec![0.25; 64],
            sample_rate: 48_000,
            channels: 2,
        };
        assert_eq!(resample(audio.clone(), 48_000).expect("noop resample"), audio);
    }
}
