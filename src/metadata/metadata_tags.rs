//! Tag/cover-art readers over in-memory audio bytes, backed by `lofty` with a
//! `symphonia` fallback.

use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

use lofty::config::{ParseOptions, ParsingMode};
use lofty::file::{AudioFile, TaggedFile, TaggedFileExt};
use lofty::picture::PictureType;
use lofty::prelude::Accessor;
use lofty::probe::Probe;
use lofty::tag::Tag;
use log::{debug, warn};
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::{MetadataOptions, MetadataRevision, StandardTagKey, StandardVisualKey};
use symphonia::core::probe::Hint;

/// Common text values extracted from file tags. Empty when absent.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommonTrackMetadata {
    pub title: String,
    pub artist: String,
    pub album: String,
}

/// Embedded picture bytes with the MIME type declared by the tag, if any.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddedCover {
    pub data: Vec<u8>,
    pub mime_type: Option<String>,
}

/// Everything the tag readers could recover from one file.
#[derive(Debug, Clone, Default)]
pub struct TagReadout {
    pub metadata: CommonTrackMetadata,
    pub cover: Option<EmbeddedCover>,
    /// Duration from container properties, when the tag reader parsed them.
    pub duration: Option<Duration>,
}

fn first_non_empty_value<F>(primary_tag: Option<&Tag>, tags: &[Tag], mut extractor: F) -> String
where
    F: FnMut(&Tag) -> Option<String>,
{
    if let Some(tag) = primary_tag {
        if let Some(value) = extractor(tag) {
            let trimmed = value.trim();
            if !trimmed.is_empty() {
                return trimmed.to_string();
            }
        }
    }

    for tag in tags {
        if let Some(value) = extractor(tag) {
            let trimmed = value.trim();
            if !trimmed.is_empty() {
                return trimmed.to_string();
            }
        }
    }

    String::new()
}

fn metadata_parse_options(parsing_mode: ParsingMode, max_junk_bytes: usize) -> ParseOptions {
    ParseOptions::new()
        .read_properties(true)
        .read_cover_art(true)
        .parsing_mode(parsing_mode)
        .max_junk_bytes(max_junk_bytes)
}

fn read_tagged_file(bytes: &[u8]) -> Option<TaggedFile> {
    let attempts = [
        (ParsingMode::BestAttempt, 1024),
        (ParsingMode::Relaxed, 64 * 1024),
    ];

    for (parsing_mode, max_junk_bytes) in attempts {
        let probe = match Probe::new(Cursor::new(bytes))
            .options(metadata_parse_options(parsing_mode, max_junk_bytes))
            .guess_file_type()
        {
            Ok(probe) => probe,
            Err(error) => {
                debug!("Tag read could not guess file type: {}", error);
                return None;
            }
        };

        match probe.read() {
            Ok(tagged_file) => return Some(tagged_file),
            Err(error) => {
                debug!("Tag read failed in {:?} mode: {}", parsing_mode, error);
            }
        }
    }
    None
}

fn first_cover(primary_tag: Option<&Tag>, tags: &[Tag]) -> Option<EmbeddedCover> {
    let candidates = primary_tag.into_iter().chain(tags.iter());
    let mut fallback = None;
    for tag in candidates {
        for picture in tag.pictures() {
            if picture.data().is_empty() {
                continue;
            }
            let cover = EmbeddedCover {
                data: picture.data().to_vec(),
                mime_type: picture.mime_type().map(|mime| mime.as_str().to_string()),
            };
            if picture.pic_type() == PictureType::CoverFront {
                return Some(cover);
            }
            if fallback.is_none() {
                fallback = Some(cover);
            }
        }
    }
    fallback
}

fn read_tags_with_lofty(bytes: &[u8]) -> Option<TagReadout> {
    let tagged_file = read_tagged_file(bytes)?;
    let primary_tag = tagged_file.primary_tag();
    let tags = tagged_file.tags();

    let metadata = CommonTrackMetadata {
        title: first_non_empty_value(primary_tag, tags, |tag| {
            tag.title().map(|value| value.into_owned())
        }),
        artist: first_non_empty_value(primary_tag, tags, |tag| {
            tag.artist().map(|value| value.into_owned())
        }),
        album: first_non_empty_value(primary_tag, tags, |tag| {
            tag.album().map(|value| value.into_owned())
        }),
    };
    let duration = Some(tagged_file.properties().duration()).filter(|value| !value.is_zero());

    Some(TagReadout {
        metadata,
        cover: first_cover(primary_tag, tags),
        duration,
    })
}

fn set_if_empty(target: &mut String, value: &str) {
    let trimmed = value.trim();
    if target.is_empty() && !trimmed.is_empty() {
        *target = trimmed.to_string();
    }
}

fn apply_symphonia_revision(readout: &mut TagReadout, revision: &MetadataRevision) {
    for tag in revision.tags() {
        let value = tag.value.to_string();
        match tag.std_key {
            Some(StandardTagKey::TrackTitle) => set_if_empty(&mut readout.metadata.title, &value),
            Some(StandardTagKey::Artist) => set_if_empty(&mut readout.metadata.artist, &value),
            Some(StandardTagKey::Album) => set_if_empty(&mut readout.metadata.album, &value),
            _ => match tag.key.trim().to_ascii_uppercase().as_str() {
                "TIT2" | "TITLE" | "INAM" => set_if_empty(&mut readout.metadata.title, &value),
                "TPE1" | "ARTIST" | "IART" => set_if_empty(&mut readout.metadata.artist, &value),
                "TALB" | "ALBUM" | "IPRD" => set_if_empty(&mut readout.metadata.album, &value),
                _ => {}
            },
        }
    }

    if readout.cover.is_none() {
        let visuals = revision.visuals();
        readout.cover = visuals
            .iter()
            .find(|visual| {
                matches!(visual.usage, Some(StandardVisualKey::FrontCover))
                    && !visual.data.is_empty()
            })
            .or_else(|| visuals.iter().find(|visual| !visual.data.is_empty()))
            .map(|visual| EmbeddedCover {
                data: visual.data.to_vec(),
                mime_type: Some(visual.media_type.clone()).filter(|mime| !mime.is_empty()),
            });
    }
}

fn has_any_common_metadata(readout: &TagReadout) -> bool {
    !readout.metadata.title.is_empty()
        || !readout.metadata.artist.is_empty()
        || !readout.metadata.album.is_empty()
        || readout.cover.is_some()
}

fn read_tags_with_symphonia(bytes: &Arc<[u8]>, extension: Option<&str>) -> Option<TagReadout> {
    let mss = MediaSourceStream::new(Box::new(Cursor::new(Arc::clone(bytes))), Default::default());
    let mut hint = Hint::new();
    if let Some(extension) = extension {
        hint.with_extension(extension);
    }

    let mut probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .ok()?;
    let mut readout = TagReadout::default();

    if let Some(probe_meta) = probed.metadata.get() {
        if let Some(revision) = probe_meta.current() {
            apply_symphonia_revision(&mut readout, revision);
        }
    }

    while !probed.format.metadata().is_latest() {
        let _ = probed.format.metadata().pop();
    }
    if let Some(revision) = probed.format.metadata().current() {
        apply_symphonia_revision(&mut readout, revision);
    }

    if has_any_common_metadata(&readout) {
        Some(readout)
    } else {
        None
    }
}

/// Reads tags from in-memory audio. `None` means no reader could parse any tag
/// section at all; callers apply their own fallbacks.
pub fn read_tags(bytes: &Arc<[u8]>, extension: Option<&str>) -> Option<TagReadout> {
    if let Some(lofty_readout) = read_tags_with_lofty(bytes) {
        return Some(lofty_readout);
    }

    let symphonia_readout = read_tags_with_symphonia(bytes, extension);
    if symphonia_readout.is_some() {
        debug!("Tag read recovered via symphonia fallback");
    } else {
        warn!("Tag read failed in both lofty and symphonia paths");
    }
    symphonia_readout
}
