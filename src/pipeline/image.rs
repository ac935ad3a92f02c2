//! Image normalisation: arbitrary photo bytes → canonical transport payload.
//!
//! Prescription photographs arrive in whatever format and size the phone
//! produced. This stage decodes, optionally enhances legibility
//! (contrast/sharpness/brightness), constrains the longer edge, and
//! re-encodes as JPEG at a fixed quality factor so the base64 payload stays
//! well below provider upload limits.
//!
//! The whole transform is pure and deterministic — same bytes in, same
//! payload out — with no retry semantics. Decode failure is terminal
//! ([`RxplainError::UnreadableImage`]): backoff cannot fix a corrupt file.
//!
//! ## Why JPEG here, unlike text-document pipelines?
//!
//! Rasterised documents favour lossless PNG, but camera photographs are
//! already JPEG-noisy and much larger; re-encoding at quality 95 roughly
//! halves payload size without measurably hurting handwriting recognition.

use crate::client::ImagePayload;
use crate::config::PipelineConfig;
use crate::error::RxplainError;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::DynamicImage;
use std::io::Cursor;
use tracing::debug;

/// Normalise raw photo bytes into a transport-ready [`ImagePayload`].
///
/// Runs the pixel work inside `spawn_blocking`: decode + Lanczos resize of
/// a phone photo is tens of milliseconds of pure CPU.
pub async fn normalize_image(
    bytes: Vec<u8>,
    config: &PipelineConfig,
) -> Result<ImagePayload, RxplainError> {
    let max_edge = config.max_edge_px;
    let quality = config.jpeg_quality;
    let enhance = config.enhance;

    tokio::task::spawn_blocking(move || normalize_blocking(&bytes, max_edge, quality, enhance))
        .await
        .map_err(|e| RxplainError::Internal(format!("image task panicked: {e}")))?
}

/// Blocking implementation of image normalisation.
fn normalize_blocking(
    bytes: &[u8],
    max_edge: u32,
    quality: u8,
    enhance: bool,
) -> Result<ImagePayload, RxplainError> {
    let img = image::load_from_memory(bytes).map_err(|e| RxplainError::UnreadableImage {
        detail: e.to_string(),
    })?;

    let img = if enhance { enhance_legibility(img) } else { img };
    let img = constrain_longer_edge(img, max_edge);

    let rgb = img.to_rgb8();
    let mut buf = Vec::new();
    let mut cursor = Cursor::new(&mut buf);
    let mut encoder = JpegEncoder::new_with_quality(&mut cursor, quality);
    encoder
        .encode_image(&rgb)
        .map_err(|e| RxplainError::Internal(format!("JPEG encoding failed: {e}")))?;

    debug!(
        width = rgb.width(),
        height = rgb.height(),
        bytes = buf.len(),
        "image normalised"
    );

    Ok(ImagePayload {
        data: STANDARD.encode(&buf),
        mime_type: "image/jpeg".into(),
    })
}

/// Deterministic legibility enhancement: lift contrast so faint ballpoint
/// strokes separate from the paper, sharpen stroke edges, and brighten
/// shadowed photographs slightly.
fn enhance_legibility(img: DynamicImage) -> DynamicImage {
    img.adjust_contrast(15.0).unsharpen(1.0, 2).brighten(10)
}

/// Scale down (never up) so the longer edge is at most `max_edge` pixels,
/// preserving aspect ratio.
fn constrain_longer_edge(img: DynamicImage, max_edge: u32) -> DynamicImage {
    if img.width() <= max_edge && img.height() <= max_edge {
        return img;
    }
    img.resize(max_edge, max_edge, FilterType::Lanczos3)
}
