//! File intake: type filtering, concurrent metadata extraction, and record
//! assembly.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use log::{debug, error, warn};
use rand::Rng;
use tokio::task::JoinHandle;

use crate::media_file_discovery::is_supported_audio;
use crate::metadata::MetadataExtractor;
use crate::protocol::{AudioRecord, ExtractionResult, IncomingFile};

const ID_SUFFIX_ALPHABET: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
const ID_SUFFIX_LEN: usize = 9;

static LAST_DATE_ADDED: AtomicI64 = AtomicI64::new(0);

/// Outcome of one task in a fan-out batch.
#[derive(Debug)]
pub enum Settled<T> {
    Fulfilled(T),
    Rejected(String),
}

/// Awaits every task and reports each outcome in input order. A failing or
/// panicking task never cancels its siblings.
pub async fn settle_all<T>(handles: Vec<JoinHandle<T>>) -> Vec<Settled<T>> {
    let mut outcomes = Vec::with_capacity(handles.len());
    for handle in handles {
        outcomes.push(match handle.await {
            Ok(value) => Settled::Fulfilled(value),
            Err(err) => Settled::Rejected(err.to_string()),
        });
    }
    outcomes
}

fn unix_millis_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as i64)
        .unwrap_or(0)
}

/// Wall-clock milliseconds that never go backwards within this process.
pub fn next_date_added() -> i64 {
    let now = unix_millis_now();
    let previous = LAST_DATE_ADDED.fetch_max(now, Ordering::SeqCst);
    previous.max(now)
}

/// `<unix-millis>-<9 base36 chars>`.
pub fn generate_record_id() -> String {
    let mut rng = rand::rng();
    let suffix: String = (0..ID_SUFFIX_LEN)
        .map(|_| ID_SUFFIX_ALPHABET[rng.random_range(0..ID_SUFFIX_ALPHABET.len())] as char)
        .collect();
    format!("{}-{}", unix_millis_now(), suffix)
}

fn record_from_extraction(result: ExtractionResult) -> AudioRecord {
    let metadata = result.metadata;
    AudioRecord {
        id: generate_record_id(),
        title: metadata.title,
        artist: metadata.artist,
        album: metadata.album,
        duration: metadata.duration,
        cover: metadata.cover,
        size: result.raw_bytes.len() as u64,
        blob: result.raw_bytes,
        file_name: metadata.file_name,
        mime_type: metadata.mime_type,
        date_added: next_date_added(),
    }
}

/// Detailed result of one intake batch.
#[derive(Debug, Default)]
pub struct IntakeReport {
    pub records: Vec<AudioRecord>,
    /// Files rejected by the type filter.
    pub excluded: Vec<String>,
    /// Files whose audio could not be probed; records were still produced.
    pub degraded: Vec<String>,
    /// Files whose extraction task failed outright.
    pub dropped: Vec<String>,
}

/// Turns incoming files into unsaved records.
#[derive(Debug, Clone, Default)]
pub struct Intake {
    extractor: Arc<MetadataExtractor>,
}

impl Intake {
    pub fn new(extractor: MetadataExtractor) -> Self {
        Self {
            extractor: Arc::new(extractor),
        }
    }

    /// Records for every supported file, in input order. Unsupported files are
    /// skipped silently.
    pub async fn process_files(&self, files: Vec<IncomingFile>) -> Vec<AudioRecord> {
        self.process_files_with_report(files).await.records
    }

    pub async fn process_files_with_report(&self, files: Vec<IncomingFile>) -> IntakeReport {
        let mut report = IntakeReport::default();
        let mut accepted_names = Vec::new();
        let mut handles = Vec::new();

        for file in files {
            if !is_supported_audio(&file.name, &file.mime_type) {
                debug!(
                    "Intake: skipping unsupported file {} ({})",
                    file.name, file.mime_type
                );
                report.excluded.push(file.name);
                continue;
            }
            accepted_names.push(file.name.clone());
            let extractor = Arc::clone(&self.extractor);
            handles.push(tokio::task::spawn_blocking(move || {
                extractor.extract(&file)
            }));
        }

        for (name, outcome) in accepted_names.into_iter().zip(settle_all(handles).await) {
            match outcome {
                Settled::Fulfilled(result) => {
                    if !result.success {
                        warn!(
                            "Intake: {} imported with degraded metadata: {}",
                            name,
                            result.error.as_deref().unwrap_or("unknown error")
                        );
                        report.degraded.push(name);
                    }
                    report.records.push(record_from_extraction(result));
                }
                Settled::Rejected(reason) => {
                    error!("Intake: failed to process {}: {}", name, reason);
                    report.dropped.push(name);
                }
            }
        }

        debug!(
            "Intake: {} records, {} excluded, {} degraded, {} dropped",
            report.records.len(),
            report.excluded.len(),
            report.degraded.len(),
            report.dropped.len()
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::UNKNOWN_ARTIST;
    use crate::test_support::{wav_bytes, with_corrupt_info_chunk, with_info_tags};
    use std::collections::HashSet;

    fn tagged_wav(title: &str) -> Vec<u8> {
        with_info_tags(
            wav_bytes(1, 8_000),
            &[("INAM", title), ("IART", "Batch Artist")],
        )
    }

    #[test]
    fn test_generate_record_id_shape() {
        let id = generate_record_id();
        let (millis, suffix) = id.split_once('-').expect("id should contain a dash");
        assert!(millis.parse::<i64>().is_ok());
        assert_eq!(suffix.len(), ID_SUFFIX_LEN);
        assert!(suffix
            .bytes()
            .all(|byte| byte.is_ascii_digit() || byte.is_ascii_lowercase()));
    }

    #[test]
    fn test_next_date_added_is_non_decreasing() {
        let mut previous = next_date_added();
        for _ in 0..1000 {
            let next = next_date_added();
            assert!(next >= previous);
            previous = next;
        }
    }

    #[tokio::test]
    async fn test_settle_all_keeps_order_and_survives_panics() {
        let handles = vec![
            tokio::task::spawn_blocking(|| 1),
            tokio::task::spawn_blocking(|| -> i32 { panic!("boom") }),
            tokio::task::spawn_blocking(|| 3),
        ];
        let outcomes = settle_all(handles).await;
        assert!(matches!(outcomes[0], Settled::Fulfilled(1)));
        assert!(matches!(outcomes[1], Settled::Rejected(_)));
        assert!(matches!(outcomes[2], Settled::Fulfilled(3)));
    }

    #[tokio::test]
    async fn test_batch_with_one_corrupt_tag_section_yields_all_records() {
        let mut files: Vec<IncomingFile> = (0..4)
            .map(|index| {
                IncomingFile::new(
                    format!("track{index}.wav"),
                    "audio/wav",
                    tagged_wav(&format!("Track {index}")),
                )
            })
            .collect();
        files.push(IncomingFile::new(
            "corrupt.wav",
            "audio/wav",
            with_corrupt_info_chunk(wav_bytes(1, 8_000)),
        ));

        let records = Intake::default().process_files(files).await;
        assert_eq!(records.len(), 5);
        assert_eq!(records[4].file_name, "corrupt.wav");
        assert_eq!(records[4].artist, UNKNOWN_ARTIST);
        assert_eq!(records[0].title, "Track 0");
        assert_eq!(records[0].artist, "Batch Artist");

        let ids: HashSet<&str> = records.iter().map(|record| record.id.as_str()).collect();
        assert_eq!(ids.len(), 5);
        assert!(records
            .windows(2)
            .all(|pair| pair[0].date_added <= pair[1].date_added));
    }

    #[tokio::test]
    async fn test_unsupported_files_are_excluded() {
        let files = vec![
            IncomingFile::new("notes.txt", "text/plain", b"hello".to_vec()),
            IncomingFile::new("song.wav", "", wav_bytes(1, 8_000)),
        ];

        let report = Intake::default().process_files_with_report(files).await;
        assert_eq!(report.records.len(), 1);
        assert_eq!(report.records[0].file_name, "song.wav");
        assert_eq!(report.excluded, vec!["notes.txt".to_string()]);
        assert!(report.dropped.is_empty());
    }

    #[tokio::test]
    async fn test_undecodable_audio_is_degraded_but_kept() {
        let files = vec![IncomingFile::new(
            "broken.mp3",
            "audio/mpeg",
            b"garbage bytes".to_vec(),
        )];
        let report = Intake::default().process_files_with_report(files).await;
        assert_eq!(report.records.len(), 1);
        assert_eq!(report.records[0].duration, 0);
        assert_eq!(report.records[0].size, 13);
        assert_eq!(report.degraded, vec!["broken.mp3".to_string()]);
    }
}
