//! Persistent application configuration model and defaults.

use std::path::PathBuf;

pub const DEFAULT_QUOTA_MB: u32 = 500;
pub const DEFAULT_MAX_COVER_BYTES: usize = 1024 * 1024;
pub const DEFAULT_COVER_MAX_EDGE_PX: u32 = 256;
pub const DEFAULT_COVER_JPEG_QUALITY: u8 = 70;
pub const DEFAULT_MAX_TEXT_CHARS: usize = 200;
pub const DEFAULT_VOLUME: f32 = 0.8;

/// Root configuration persisted to `config.toml`.
#[derive(Debug, Clone, Default, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct Config {
    #[serde(default)]
    /// Record store location and capacity.
    pub store: StoreConfig,
    #[serde(default)]
    /// Cover-art normalization limits.
    pub artwork: ArtworkConfig,
    #[serde(default)]
    /// Tag text normalization limits.
    pub metadata: MetadataConfig,
    #[serde(default)]
    /// Output and transport preferences.
    pub playback: PlaybackConfig,
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct StoreConfig {
    /// Overrides `<data_dir>/pocketplay/library.db`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_path: Option<PathBuf>,
    #[serde(default = "default_quota_mb")]
    pub quota_mb: u32,
}

/// Cover art above `max_cover_bytes` (encoded) is downscaled and re-encoded.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct ArtworkConfig {
    #[serde(default = "default_max_cover_bytes")]
    pub max_cover_bytes: usize,
    #[serde(default = "default_cover_max_edge_px")]
    pub max_edge_px: u32,
    #[serde(default = "default_cover_jpeg_quality")]
    pub jpeg_quality: u8,
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct MetadataConfig {
    #[serde(default = "default_max_text_chars")]
    pub max_text_chars: usize,
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct PlaybackConfig {
    /// Used when no saved volume preference exists.
    #[serde(default = "default_volume")]
    pub default_volume: f32,
    #[serde(default = "default_time_updates_per_second")]
    pub time_updates_per_second: u32,
    #[serde(default = "default_output_sample_rate_hz")]
    pub output_sample_rate_hz: u32,
    #[serde(default = "default_output_channels")]
    pub output_channels: u16,
}

fn default_quota_mb() -> u32 {
    DEFAULT_QUOTA_MB
}

fn default_max_cover_bytes() -> usize {
    DEFAULT_MAX_COVER_BYTES
}

fn default_cover_max_edge_px() -> u32 {
    DEFAULT_COVER_MAX_EDGE_PX
}

fn default_cover_jpeg_quality() -> u8 {
    DEFAULT_COVER_JPEG_QUALITY
}

fn default_max_text_chars() -> usize {
    DEFAULT_MAX_TEXT_CHARS
}

fn default_volume() -> f32 {
    DEFAULT_VOLUME
}

fn default_time_updates_per_second() -> u32 {
    4
}

fn default_output_sample_rate_hz() -> u32 {
    48_000
}

fn default_output_channels() -> u16 {
    2
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            quota_mb: default_quota_mb(),
        }
    }
}

impl Default for ArtworkConfig {
    fn default() -> Self {
        Self {
            max_cover_bytes: default_max_cover_bytes(),
            max_edge_px: default_cover_max_edge_px(),
            jpeg_quality: default_cover_jpeg_quality(),
        }
    }
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            max_text_chars: default_max_text_chars(),
        }
    }
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            default_volume: default_volume(),
            time_updates_per_second: default_time_updates_per_second(),
            output_sample_rate_hz: default_output_sample_rate_hz(),
            output_channels: default_output_channels(),
        }
    }
}

impl StoreConfig {
    pub fn quota_bytes(&self) -> u64 {
        u64::from(self.quota_mb.max(1)) * 1024 * 1024
    }
}

/// Clamps user-edited values into ranges the runtime can honor.
pub fn sanitize_config(config: Config) -> Config {
    let mut config = config;
    config.store.quota_mb = config.store.quota_mb.max(1);
    config.artwork.max_cover_bytes = config.artwork.max_cover_bytes.max(1024);
    config.artwork.max_edge_px = config.artwork.max_edge_px.clamp(16, 4096);
    config.artwork.jpeg_quality = config.artwork.jpeg_quality.clamp(1, 100);
    config.metadata.max_text_chars = config.metadata.max_text_chars.clamp(1, 4096);
    config.playback.default_volume = if config.playback.default_volume.is_finite() {
        config.playback.default_volume.clamp(0.0, 1.0)
    } else {
        DEFAULT_VOLUME
    };
    config.playback.time_updates_per_second = config.playback.time_updates_per_second.clamp(1, 60);
    config.playback.output_sample_rate_hz =
        config.playback.output_sample_rate_hz.clamp(8_000, 192_000);
    config.playback.output_channels = config.playback.output_channels.clamp(1, 8);
    config
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_yields_defaults() {
        let config: Config = toml::from_str("").expect("empty config should parse");
        assert_eq!(config, Config::default());
        assert_eq!(config.store.quota_bytes(), 500 * 1024 * 1024);
    }

    #[test]
    fn test_partial_section_keeps_other_defaults() {
        let config: Config = toml::from_str("[artwork]\nmax_edge_px = 512\n")
            .expect("partial config should parse");
        assert_eq!(config.artwork.max_edge_px, 512);
        assert_eq!(config.artwork.jpeg_quality, DEFAULT_COVER_JPEG_QUALITY);
        assert_eq!(config.playback, PlaybackConfig::default());
    }

    #[test]
    fn test_sanitize_config_clamps_out_of_range_values() {
        let mut config = Config::default();
        config.playback.default_volume = 3.5;
        config.artwork.jpeg_quality = 0;
        config.store.quota_mb = 0;
        config.playback.time_updates_per_second = 0;

        let sanitized = sanitize_config(config);
        assert_eq!(sanitized.playback.default_volume, 1.0);
        assert_eq!(sanitized.artwork.jpeg_quality, 1);
        assert_eq!(sanitized.store.quota_mb, 1);
        assert_eq!(sanitized.playback.time_updates_per_second, 1);
    }

    #[test]
    fn test_sanitize_config_replaces_nan_volume() {
        let mut config = Config::default();
        config.playback.default_volume = f32::NAN;
        assert_eq!(
            sanitize_config(config).playback.default_volume,
            DEFAULT_VOLUME
        );
    }
}
