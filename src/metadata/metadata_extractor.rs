//! Raw file → normalized, display-ready metadata.
//!
//! Extraction never fails outright: a file whose audio payload cannot be probed
//! still yields usable metadata with `success == false`, and a file whose tags
//! are missing or malformed gets fallback values with `success == true`.

use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::config::{ArtworkConfig, Config, DEFAULT_MAX_TEXT_CHARS};
use crate::image_pipeline::cover_data_uri;
use crate::media_file_discovery::mime_type_for_extension;
use crate::metadata::metadata_tags::{read_tags, TagReadout};
use crate::protocol::{
    ExtractedMetadata, ExtractionResult, IncomingFile, UNKNOWN_ALBUM, UNKNOWN_ARTIST,
};

pub const LOAD_FAILURE_MESSAGE: &str = "Could not load audio file";
const UNTITLED: &str = "Untitled";

/// Replaces control characters with spaces, collapses whitespace runs, trims,
/// and truncates to `max_chars` characters.
pub fn sanitize_text(raw: &str, max_chars: usize) -> String {
    let spaced: String = raw
        .chars()
        .map(|ch| if ch.is_control() { ' ' } else { ch })
        .collect();
    let collapsed = spaced.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() <= max_chars {
        return collapsed;
    }
    collapsed
        .chars()
        .take(max_chars)
        .collect::<String>()
        .trim_end()
        .to_string()
}

/// `"song.mp3"` → `"song"`. Names without an extension are returned as is.
pub fn file_stem(file_name: &str) -> &str {
    match file_name.rsplit_once('.') {
        Some((stem, ext)) if !ext.is_empty() && !ext.contains('/') => stem,
        _ => file_name,
    }
}

fn extension_hint(file: &IncomingFile) -> Option<String> {
    file.name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .filter(|ext| !ext.is_empty())
}

/// Probes the container and confirms a decoder exists for its default audio
/// track. `Ok(None)` means the stream is playable but carries no frame count.
fn probe_duration(bytes: &Arc<[u8]>, extension: Option<&str>) -> Result<Option<f64>, String> {
    let mss = MediaSourceStream::new(Box::new(Cursor::new(Arc::clone(bytes))), Default::default());
    let mut hint = Hint::new();
    if let Some(extension) = extension {
        hint.with_extension(extension);
    }

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|err| format!("probe failed: {err}"))?;

    let track = probed
        .format
        .tracks()
        .iter()
        .find(|track| track.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| "no audio track".to_string())?;
    let params = &track.codec_params;

    symphonia::default::get_codecs()
        .make(params, &DecoderOptions::default())
        .map_err(|err| format!("unsupported codec: {err}"))?;

    let Some(frames) = params.n_frames else {
        return Ok(None);
    };
    if let Some(time_base) = params.time_base {
        let time = time_base.calc_time(frames);
        return Ok(Some(time.seconds as f64 + time.frac));
    }
    Ok(params
        .sample_rate
        .filter(|rate| *rate > 0)
        .map(|rate| frames as f64 / f64::from(rate)))
}

fn whole_seconds(seconds: f64) -> u32 {
    if !seconds.is_finite() || seconds <= 0.0 {
        return 0;
    }
    seconds.round().min(f64::from(u32::MAX)) as u32
}

/// Stateless extractor configured with normalization limits. Cheap to clone
/// into blocking tasks.
#[derive(Debug, Clone)]
pub struct MetadataExtractor {
    artwork: ArtworkConfig,
    max_text_chars: usize,
}

impl Default for MetadataExtractor {
    fn default() -> Self {
        Self {
            artwork: ArtworkConfig::default(),
            max_text_chars: DEFAULT_MAX_TEXT_CHARS,
        }
    }
}

impl MetadataExtractor {
    pub fn new(config: &Config) -> Self {
        Self {
            artwork: config.artwork.clone(),
            max_text_chars: config.metadata.max_text_chars,
        }
    }

    fn text_or(&self, raw: &str, fallback: &str) -> String {
        let sanitized = sanitize_text(raw, self.max_text_chars);
        if sanitized.is_empty() {
            fallback.to_string()
        } else {
            sanitized
        }
    }

    fn fallback_title(&self, file_name: &str) -> String {
        let from_stem = sanitize_text(file_stem(file_name), self.max_text_chars);
        if !from_stem.is_empty() {
            return from_stem;
        }
        self.text_or(file_name, UNTITLED)
    }

    pub fn extract(&self, file: &IncomingFile) -> ExtractionResult {
        let extension = extension_hint(file);
        let mime_type = if file.mime_type.trim().is_empty() {
            extension
                .as_deref()
                .and_then(mime_type_for_extension)
                .unwrap_or_default()
                .to_string()
        } else {
            file.mime_type.trim().to_string()
        };

        let probed = probe_duration(&file.bytes, extension.as_deref());
        // Tags are read even when the stream is unplayable; a readable tag
        // block still gives the listing something better than the file name.
        let tags = read_tags(&file.bytes, extension.as_deref());

        let (success, error, probe_seconds) = match probed {
            Ok(seconds) => (true, None, seconds),
            Err(reason) => {
                warn!(
                    "MetadataExtractor: {} could not be probed: {}",
                    file.name, reason
                );
                (false, Some(LOAD_FAILURE_MESSAGE.to_string()), None)
            }
        };

        let tag_seconds = tags
            .as_ref()
            .and_then(|readout| readout.duration)
            .map(|duration: Duration| duration.as_secs_f64());
        let duration = if success {
            whole_seconds(probe_seconds.or(tag_seconds).unwrap_or(0.0))
        } else {
            0
        };

        let metadata = match tags {
            Some(readout) => self.metadata_from_tags(file, &mime_type, readout, duration),
            None => {
                warn!(
                    "MetadataExtractor: no readable tags in {}; using file name",
                    file.name
                );
                ExtractedMetadata {
                    title: self.fallback_title(&file.name),
                    artist: UNKNOWN_ARTIST.to_string(),
                    album: UNKNOWN_ALBUM.to_string(),
                    duration,
                    cover: None,
                    file_name: file.name.clone(),
                    mime_type,
                }
            }
        };

        debug!(
            "MetadataExtractor: {} -> title='{}' artist='{}' duration={}s",
            file.name, metadata.title, metadata.artist, metadata.duration
        );
        ExtractionResult {
            metadata,
            raw_bytes: Arc::clone(&file.bytes),
            success,
            error,
        }
    }

    fn metadata_from_tags(
        &self,
        file: &IncomingFile,
        mime_type: &str,
        readout: TagReadout,
        duration: u32,
    ) -> ExtractedMetadata {
        let title = {
            let sanitized = sanitize_text(&readout.metadata.title, self.max_text_chars);
            if sanitized.is_empty() {
                self.fallback_title(&file.name)
            } else {
                sanitized
            }
        };
        let cover = readout.cover.and_then(|cover| {
            cover_data_uri(cover.mime_type.as_deref(), &cover.data, &self.artwork)
        });

        ExtractedMetadata {
            title,
            artist: self.text_or(&readout.metadata.artist, UNKNOWN_ARTIST),
            album: self.text_or(&readout.metadata.album, UNKNOWN_ALBUM),
            duration,
            cover,
            file_name: file.name.clone(),
            mime_type: mime_type.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{wav_bytes, with_corrupt_info_chunk, with_info_tags};

    #[test]
    fn test_sanitize_text_strips_controls_and_collapses_whitespace() {
        assert_eq!(
            sanitize_text("  Hello\n\tWorld \u{7}  again ", 200),
            "Hello World again"
        );
        assert_eq!(sanitize_text("\r\n\t", 200), "");
    }

    #[test]
    fn test_sanitize_text_truncates_by_characters() {
        let long = "é".repeat(250);
        let sanitized = sanitize_text(&long, 200);
        assert_eq!(sanitized.chars().count(), 200);
        assert_eq!(sanitize_text("ab cd", 3), "ab");
    }

    #[test]
    fn test_file_stem_removes_only_last_extension() {
        assert_eq!(file_stem("mix.final.mp3"), "mix.final");
        assert_eq!(file_stem("noextension"), "noextension");
        assert_eq!(file_stem("trailing."), "trailing.");
    }

    #[test]
    fn test_extract_reads_tags_and_duration_from_wav() {
        let wav = with_info_tags(
            wav_bytes(3, 8_000),
            &[("INAM", "Night\nDrive"), ("IART", "Synth Unit"), ("IPRD", "Roads")],
        );
        let file = IncomingFile::new("night.wav", "audio/wav", wav);

        let result = MetadataExtractor::default().extract(&file);
        assert!(result.success);
        assert_eq!(result.error, None);
        assert_eq!(result.metadata.title, "Night Drive");
        assert_eq!(result.metadata.artist, "Synth Unit");
        assert_eq!(result.metadata.album, "Roads");
        assert_eq!(result.metadata.duration, 3);
        assert_eq!(result.metadata.file_name, "night.wav");
        assert_eq!(result.raw_bytes.len(), file.bytes.len());
    }

    #[test]
    fn test_extract_untagged_wav_falls_back_to_file_name() {
        let file = IncomingFile::new("field recording.wav", "", wav_bytes(1, 8_000));

        let result = MetadataExtractor::default().extract(&file);
        assert!(result.success);
        assert_eq!(result.metadata.title, "field recording");
        assert_eq!(result.metadata.artist, UNKNOWN_ARTIST);
        assert_eq!(result.metadata.album, UNKNOWN_ALBUM);
        assert_eq!(result.metadata.mime_type, "audio/wav");
        assert_eq!(result.metadata.duration, 1);
    }

    #[test]
    fn test_extract_corrupt_tag_section_is_degraded_success() {
        let wav = with_corrupt_info_chunk(wav_bytes(2, 8_000));
        let file = IncomingFile::new("broken.wav", "audio/wav", wav);

        let result = MetadataExtractor::default().extract(&file);
        assert!(result.success);
        assert_eq!(result.metadata.artist, UNKNOWN_ARTIST);
        assert!(!result.metadata.title.is_empty());
    }

    #[test]
    fn test_extract_non_audio_reports_load_failure() {
        let file = IncomingFile::new("fake.mp3", "audio/mpeg", b"not really audio".to_vec());

        let result = MetadataExtractor::default().extract(&file);
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some(LOAD_FAILURE_MESSAGE));
        assert_eq!(result.metadata.duration, 0);
        assert_eq!(result.metadata.title, "fake");
        assert_eq!(result.metadata.artist, UNKNOWN_ARTIST);
    }

    #[test]
    fn test_extract_title_never_empty() {
        let file = IncomingFile::new(".wav", "audio/wav", wav_bytes(1, 8_000));
        let result = MetadataExtractor::default().extract(&file);
        assert_eq!(result.metadata.title, ".wav");
    }

    #[test]
    fn test_whole_seconds_rounds_and_rejects_invalid() {
        assert_eq!(whole_seconds(2.6), 3);
        assert_eq!(whole_seconds(-1.0), 0);
        assert_eq!(whole_seconds(f64::NAN), 0);
    }
}
