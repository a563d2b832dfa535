use std::path::{Path, PathBuf};

use log::{info, warn};
use toml_edit::{value, DocumentMut, Item, Table};

use crate::{
    config::{sanitize_config, Config},
    error::ConfigError,
};

const APP_DIR_NAME: &str = "pocketplay";
const CONFIG_FILE_NAME: &str = "config.toml";
const PREFERENCES_FILE_NAME: &str = "preferences.toml";
const PLAYBACK_SECTION: &str = "playback";
const VOLUME_KEY: &str = "volume";

pub fn app_config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|path| path.join(APP_DIR_NAME))
}

pub fn app_data_dir() -> Option<PathBuf> {
    dirs::data_dir().map(|path| path.join(APP_DIR_NAME))
}

pub fn default_config_path() -> Option<PathBuf> {
    app_config_dir().map(|path| path.join(CONFIG_FILE_NAME))
}

/// Preferences live next to whichever `config.toml` is in use.
pub fn preferences_path_beside(config_path: &Path) -> PathBuf {
    config_path
        .parent()
        .map(|dir| dir.join(PREFERENCES_FILE_NAME))
        .unwrap_or_else(|| PathBuf::from(PREFERENCES_FILE_NAME))
}

pub fn default_database_path() -> Option<PathBuf> {
    app_data_dir().map(|path| path.join("library.db"))
}

fn io_error(path: &Path, source: std::io::Error) -> ConfigError {
    ConfigError::Io {
        path: path.to_path_buf(),
        source,
    }
}

fn ensure_parent_dir(path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent).map_err(|err| io_error(parent, err))?;
        }
    }
    Ok(())
}

/// Loads `config.toml`, writing defaults first when the file does not exist.
/// A file that fails to parse is reported and replaced by defaults in memory.
pub fn load_or_create_config(path: &Path) -> Result<Config, ConfigError> {
    if !path.exists() {
        info!(
            "Config file not found. Creating default config. path={}",
            path.display()
        );
        ensure_parent_dir(path)?;
        let serialized = toml::to_string(&Config::default())?;
        std::fs::write(path, serialized).map_err(|err| io_error(path, err))?;
    }

    let content = std::fs::read_to_string(path).map_err(|err| io_error(path, err))?;
    let config = match toml::from_str::<Config>(&content) {
        Ok(config) => config,
        Err(err) => {
            warn!(
                "Config: failed to parse {}; using defaults: {}",
                path.display(),
                err
            );
            Config::default()
        }
    };
    Ok(sanitize_config(config))
}

fn set_table_value_preserving_decor(table: &mut Table, key: &str, item: Item) {
    let existing_value_decor = table
        .get(key)
        .and_then(|current| current.as_value().map(|value| value.decor().clone()));
    table[key] = item;
    if let Some(existing_value_decor) = existing_value_decor {
        if let Some(next_value) = table[key].as_value_mut() {
            *next_value.decor_mut() = existing_value_decor;
        }
    }
}

fn ensure_section_table(document: &mut DocumentMut, key: &str) {
    let root = document.as_table_mut();
    let should_replace = !matches!(root.get(key), Some(item) if item.is_table());
    if should_replace {
        root.insert(key, Item::Table(Table::new()));
    }
}

/// Process-durable key-value slot holding user preferences (currently volume).
/// Kept apart from the record store so it survives store resets.
#[derive(Debug, Clone)]
pub struct PreferencesFile {
    path: PathBuf,
}

impl PreferencesFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_document(&self) -> Result<DocumentMut, ConfigError> {
        if !self.path.exists() {
            return Ok(DocumentMut::new());
        }
        let content =
            std::fs::read_to_string(&self.path).map_err(|err| io_error(&self.path, err))?;
        Ok(content.parse::<DocumentMut>()?)
    }

    /// Saved volume, if one exists and is a finite value in `[0, 1]`.
    pub fn load_volume(&self) -> Option<f32> {
        let document = match self.read_document() {
            Ok(document) => document,
            Err(err) => {
                warn!("Preferences: ignoring unreadable {}: {}", self.path.display(), err);
                return None;
            }
        };
        let raw = document
            .get(PLAYBACK_SECTION)?
            .get(VOLUME_KEY)?
            .as_value()
            .and_then(|value| {
                value
                    .as_float()
                    .or_else(|| value.as_integer().map(|int| int as f64))
            })?;
        if !raw.is_finite() {
            return None;
        }
        Some((raw as f32).clamp(0.0, 1.0))
    }

    /// Writes the volume, keeping any comments and unrelated keys in the file.
    pub fn save_volume(&self, volume: f32) -> Result<(), ConfigError> {
        let mut document = self.read_document()?;
        ensure_section_table(&mut document, PLAYBACK_SECTION);
        if let Some(playback) = document[PLAYBACK_SECTION].as_table_mut() {
            let rounded = (f64::from(volume.clamp(0.0, 1.0)) * 1000.0).round() / 1000.0;
            set_table_value_preserving_decor(playback, VOLUME_KEY, value(rounded));
        }
        ensure_parent_dir(&self.path)?;
        std::fs::write(&self.path, document.to_string()).map_err(|err| io_error(&self.path, err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preferences_path_sits_beside_config() {
        let path = preferences_path_beside(Path::new("/tmp/pocketplay/config.toml"));
        assert_eq!(path, PathBuf::from("/tmp/pocketplay/preferences.toml"));
    }

    #[test]
    fn test_load_or_create_config_writes_defaults_when_missing() {
        let dir = tempfile::tempdir().expect("temp dir should be created");
        let path = dir.path().join("nested").join("config.toml");

        let config = load_or_create_config(&path).expect("config should load");
        assert_eq!(config, Config::default());
        assert!(path.exists(), "default config should be written to disk");
    }

    #[test]
    fn test_load_or_create_config_falls_back_on_invalid_toml() {
        let dir = tempfile::tempdir().expect("temp dir should be created");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[store\nquota_mb = ").expect("fixture should be written");

        let config = load_or_create_config(&path).expect("invalid config should not error");
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_volume_preference_roundtrip_preserves_comments() {
        let dir = tempfile::tempdir().expect("temp dir should be created");
        let path = dir.path().join("preferences.toml");
        std::fs::write(&path, "# user notes\n[playback]\nvolume = 0.5 # quiet\n")
            .expect("fixture should be written");
        let preferences = PreferencesFile::new(&path);

        assert_eq!(preferences.load_volume(), Some(0.5));
        preferences.save_volume(0.25).expect("volume should save");

        let written = std::fs::read_to_string(&path).expect("preferences should be readable");
        assert!(written.contains("# user notes"));
        assert!(written.contains("# quiet"));
        assert_eq!(preferences.load_volume(), Some(0.25));
    }

    #[test]
    fn test_volume_preference_missing_file_reads_none() {
        let dir = tempfile::tempdir().expect("temp dir should be created");
        let preferences = PreferencesFile::new(dir.path().join("absent.toml"));
        assert_eq!(preferences.load_volume(), None);
    }

    #[test]
    fn test_volume_preference_clamps_saved_value() {
        let dir = tempfile::tempdir().expect("temp dir should be created");
        let path = dir.path().join("preferences.toml");
        std::fs::write(&path, "[playback]\nvolume = 4\n").expect("fixture should be written");
        assert_eq!(PreferencesFile::new(&path).load_volume(), Some(1.0));
    }
}
