use std::{
    collections::BTreeSet,
    path::{Path, PathBuf},
};

use log::debug;

pub const SUPPORTED_AUDIO_EXTENSIONS: [&str; 8] =
    ["mp3", "mp4", "wav", "ogg", "webm", "flac", "aac", "m4a"];

pub const SUPPORTED_AUDIO_MIME_TYPES: [&str; 10] = [
    "audio/mpeg",
    "audio/mp4",
    "audio/wav",
    "audio/ogg",
    "audio/webm",
    "audio/flac",
    "audio/aac",
    "audio/x-wav",
    "audio/x-m4a",
    "audio/x-flac",
];

fn extension_of(file_name: &str) -> Option<&str> {
    file_name.rsplit_once('.').map(|(_, ext)| ext)
}

fn is_supported_extension(ext: &str) -> bool {
    SUPPORTED_AUDIO_EXTENSIONS
        .iter()
        .any(|supported| ext.eq_ignore_ascii_case(supported))
}

/// Accepts a file when either its declared MIME type or its extension is known.
pub fn is_supported_audio(file_name: &str, mime_type: &str) -> bool {
    let mime = mime_type.trim();
    if SUPPORTED_AUDIO_MIME_TYPES
        .iter()
        .any(|supported| mime.eq_ignore_ascii_case(supported))
    {
        return true;
    }
    extension_of(file_name)
        .map(is_supported_extension)
        .unwrap_or(false)
}

pub fn is_supported_audio_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(is_supported_extension)
        .unwrap_or(false)
}

pub fn mime_type_for_extension(ext: &str) -> Option<&'static str> {
    let mime = match ext.to_ascii_lowercase().as_str() {
        "mp3" => "audio/mpeg",
        "mp4" => "audio/mp4",
        "m4a" => "audio/x-m4a",
        "wav" => "audio/wav",
        "ogg" => "audio/ogg",
        "webm" => "audio/webm",
        "flac" => "audio/flac",
        "aac" => "audio/aac",
        _ => return None,
    };
    Some(mime)
}

pub fn mime_type_for_path(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|ext| ext.to_str())
        .and_then(mime_type_for_extension)
        .map(str::to_string)
}

pub fn collect_audio_files_from_folder(folder_path: &Path) -> Vec<PathBuf> {
    let mut pending_directories = vec![folder_path.to_path_buf()];
    let mut tracks = Vec::new();

    while let Some(directory) = pending_directories.pop() {
        let entries = match std::fs::read_dir(&directory) {
            Ok(entries) => entries,
            Err(err) => {
                debug!("Failed to read directory {}: {}", directory.display(), err);
                continue;
            }
        };

        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    debug!(
                        "Failed to read a directory entry in {}: {}",
                        directory.display(),
                        err
                    );
                    continue;
                }
            };

            let path = entry.path();
            let file_type = match entry.file_type() {
                Ok(file_type) => file_type,
                Err(err) => {
                    debug!("Failed to inspect {}: {}", path.display(), err);
                    continue;
                }
            };

            if file_type.is_dir() {
                pending_directories.push(path);
                continue;
            }

            if file_type.is_file() && is_supported_audio_file(&path) {
                tracks.push(path);
            }
        }
    }

    tracks.sort_unstable();
    tracks
}

/// Expands dropped paths into files. Folders contribute only supported audio;
/// explicitly named files are passed through so intake can make the call.
pub fn collect_audio_files_from_dropped_paths(paths: &[PathBuf]) -> Vec<PathBuf> {
    let mut tracks = BTreeSet::new();
    for path in paths {
        if path.is_file() {
            tracks.insert(path.clone());
            continue;
        }
        if path.is_dir() {
            for track in collect_audio_files_from_folder(path) {
                tracks.insert(track);
            }
        }
    }
    tracks.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_is_supported_audio_accepts_mime_or_extension() {
        assert!(is_supported_audio("song.bin", "audio/mpeg"));
        assert!(is_supported_audio("song.FLAC", ""));
        assert!(is_supported_audio("voice.m4a", "application/octet-stream"));
        assert!(!is_supported_audio("notes.txt", "text/plain"));
        assert!(!is_supported_audio("mp3", ""));
    }

    #[test]
    fn test_mime_type_for_extension_is_case_insensitive() {
        assert_eq!(mime_type_for_extension("MP3"), Some("audio/mpeg"));
        assert_eq!(mime_type_for_extension("txt"), None);
    }

    #[test]
    fn test_collect_audio_files_from_folder_recurses_and_filters() {
        let dir = tempfile::tempdir().expect("temp dir should be created");
        let nested = dir.path().join("nested");
        fs::create_dir_all(&nested).expect("nested dir should be created");
        fs::write(dir.path().join("a.mp3"), b"x").expect("fixture should be written");
        fs::write(nested.join("b.ogg"), b"x").expect("fixture should be written");
        fs::write(nested.join("cover.jpg"), b"x").expect("fixture should be written");

        let files = collect_audio_files_from_folder(dir.path());
        let names: Vec<String> = files
            .iter()
            .map(|path| path.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(files.len(), 2);
        assert!(names.contains(&"a.mp3".to_string()));
        assert!(names.contains(&"b.ogg".to_string()));
    }

    #[test]
    fn test_collect_audio_files_from_dropped_paths_keeps_explicit_files() {
        let dir = tempfile::tempdir().expect("temp dir should be created");
        let readme = dir.path().join("readme.txt");
        fs::write(&readme, b"x").expect("fixture should be written");

        let files = collect_audio_files_from_dropped_paths(&[readme.clone()]);
        assert_eq!(files, vec![readme]);
    }
}
