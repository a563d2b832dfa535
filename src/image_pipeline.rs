//! Cover-art normalization: data-URI encoding and oversized-image downscaling.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use image::{codecs::jpeg::JpegEncoder, imageops::FilterType, DynamicImage, GenericImageView};
use log::{debug, warn};
use zune_core::{colorspace::ColorSpace, options::DecoderOptions};
use zune_jpeg::JpegDecoder;

use crate::config::ArtworkConfig;

const FALLBACK_IMAGE_MIME: &str = "image/jpeg";

pub fn encode_data_uri(mime_type: &str, bytes: &[u8]) -> String {
    format!("data:{};base64,{}", mime_type, STANDARD.encode(bytes))
}

/// Best-effort MIME type for image bytes, preferring the declared one.
pub fn image_mime_type(declared: Option<&str>, bytes: &[u8]) -> String {
    if let Some(declared) = declared.map(str::trim).filter(|value| value.starts_with("image/")) {
        return declared.to_string();
    }
    image::guess_format(bytes)
        .map(|format| format.to_mime_type().to_string())
        .unwrap_or_else(|_| FALLBACK_IMAGE_MIME.to_string())
}

/// Encodes embedded cover bytes as a data URI, downscaling when the URI would
/// exceed `artwork.max_cover_bytes`. If the image cannot be decoded for
/// downscaling, the oversized URI is returned as is.
pub fn cover_data_uri(
    declared_mime: Option<&str>,
    bytes: &[u8],
    artwork: &ArtworkConfig,
) -> Option<String> {
    if bytes.is_empty() {
        return None;
    }
    let mime_type = image_mime_type(declared_mime, bytes);
    let data_uri = encode_data_uri(&mime_type, bytes);
    if data_uri.len() <= artwork.max_cover_bytes {
        return Some(data_uri);
    }

    warn!(
        "ImagePipeline: cover is {} bytes encoded, compressing to {}px",
        data_uri.len(),
        artwork.max_edge_px
    );
    match downscale_to_jpeg(bytes, artwork.max_edge_px, artwork.jpeg_quality) {
        Some(compressed) => {
            let compressed_uri = encode_data_uri("image/jpeg", &compressed);
            debug!(
                "ImagePipeline: cover compressed from {} to {} bytes",
                data_uri.len(),
                compressed_uri.len()
            );
            Some(compressed_uri)
        }
        None => {
            warn!("ImagePipeline: cover could not be decoded; keeping oversized image");
            Some(data_uri)
        }
    }
}

/// Decodes, fits the longer edge to `max_edge_px`, and re-encodes as JPEG.
pub fn downscale_to_jpeg(bytes: &[u8], max_edge_px: u32, quality: u8) -> Option<Vec<u8>> {
    let decoded = decode_image_from_memory_with_fallback(bytes)?;
    let (source_width, source_height) = decoded.dimensions();
    let (target_width, target_height) = fit_to_max_edge(source_width, source_height, max_edge_px);
    let resized = if target_width == source_width && target_height == source_height {
        decoded
    } else {
        decoded.resize_exact(target_width, target_height, FilterType::Lanczos3)
    };
    // JPEG has no alpha channel.
    let rgb = DynamicImage::ImageRgb8(resized.to_rgb8());

    let mut encoded = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut encoded, quality.clamp(1, 100));
    if let Err(err) = encoder.encode_image(&rgb) {
        warn!("ImagePipeline: jpeg re-encode failed: {}", err);
        return None;
    }
    Some(encoded)
}

fn looks_like_jpeg(bytes: &[u8]) -> bool {
    bytes.len() >= 2 && bytes[0] == 0xff && bytes[1] == 0xd8
}

fn decode_jpeg_non_strict(bytes: &[u8]) -> Option<DynamicImage> {
    if !looks_like_jpeg(bytes) {
        return None;
    }

    let options = DecoderOptions::new_cmd()
        .set_strict_mode(false)
        .jpeg_set_out_colorspace(ColorSpace::RGBA);
    let mut decoder = JpegDecoder::new_with_options(bytes, options);
    let pixels = decoder.decode().ok()?;
    let (width, height) = decoder.dimensions()?;
    let image = image::RgbaImage::from_raw(width as u32, height as u32, pixels)?;
    Some(DynamicImage::ImageRgba8(image))
}

fn decode_image_from_memory_with_fallback(bytes: &[u8]) -> Option<DynamicImage> {
    // Embedded art is frequently truncated or padded; retry JPEGs non-strictly.
    image::load_from_memory(bytes)
        .ok()
        .or_else(|| decode_jpeg_non_strict(bytes))
}

fn fit_to_max_edge(width: u32, height: u32, max_edge: u32) -> (u32, u32) {
    if width == 0 || height == 0 {
        return (1, 1);
    }
    let clamped = max_edge.max(1);
    if width.max(height) <= clamped {
        return (width, height);
    }
    if width >= height {
        let scaled_height =
            ((u64::from(height) * u64::from(clamped)) + (u64::from(width) / 2)) / u64::from(width);
        (clamped, scaled_height.max(1) as u32)
    } else {
        let scaled_width =
            ((u64::from(width) * u64::from(clamped)) + (u64::from(height) / 2)) / u64::from(height);
        (scaled_width.max(1) as u32, clamped)
    }
}
