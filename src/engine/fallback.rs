//! # Fallback Engine (built-in codecs)
//!
//! Engine in-process basato sul crate `image`, usato quando ImageMagick non è
//! disponibile. Decodifica, ridimensiona e ricodifica interamente in memoria su un
//! thread bloccante (`spawn_blocking`), così i worker async non vengono mai fermati.
//!
//! ## Limitazioni rispetto al primary:
//! - Input AVIF non decodificabile (solo encoding)
//! - WebP tramite `libwebp` (crate `webp`): `quality` e `lossless` rispettati, `method` no
//! - JPEG sempre baseline: `progressive` viene ignorato
//! - I metadati non vengono mai copiati, indipendentemente da `stripMetadata`.
//!   L'orientamento EXIF viene quindi applicato ai pixel prima del resize.
//!
//! Un task in timeout non interrompe la decodifica: il thread bloccante termina
//! comunque il suo lavoro, solo il risultato viene scartato.

use super::resize::{Dimensions, ResizePlan};
use super::TransformPlan;
use crate::config::{FormatSettings, MaxDimensions};
use crate::error::TransformError;
use crate::format::ImageFormat;
use image::codecs::avif::AvifEncoder;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{CompressionType, FilterType as PngFilter, PngEncoder};
use image::imageops::FilterType;
use image::metadata::Orientation;
use image::{DynamicImage, ImageDecoder, ImageReader};
use std::path::Path;
use tracing::debug;

/// Output of an in-memory transformation
#[derive(Debug)]
pub struct Encoded {
    pub bytes: Vec<u8>,
    pub resize: ResizePlan,
}

#[derive(Debug, Clone, Default)]
pub struct FallbackEngine;

impl FallbackEngine {
    pub fn new() -> Self {
        Self
    }

    /// True when at least one output encoder is compiled in
    pub fn prerequisites_met() -> bool {
        ImageFormat::ALL
            .iter()
            .any(|format| format.as_image_format().writing_enabled())
    }

    pub fn supports_target(format: ImageFormat) -> bool {
        format.as_image_format().writing_enabled()
    }

    /// Decode, resize and re-encode `plan.input` into memory
    pub async fn encode(
        &self,
        plan: &TransformPlan,
        max: MaxDimensions,
        settings: &FormatSettings,
    ) -> Result<Encoded, TransformError> {
        if plan.source_format == ImageFormat::Avif {
            return Err(TransformError::Unsupported(
                "AVIF input requires the ImageMagick engine".to_string(),
            ));
        }
        if !Self::supports_target(plan.target_format) {
            return Err(TransformError::Unsupported(format!(
                "{} output is not available in this build",
                plan.target_format
            )));
        }

        let input = plan.input.clone();
        let target = plan.target_format;
        let settings = settings.clone();

        tokio::task::spawn_blocking(move || encode_blocking(&input, target, max, &settings))
            .await
            .map_err(|e| TransformError::Panicked(e.to_string()))?
    }
}

fn encode_blocking(
    input: &Path,
    target: ImageFormat,
    max: MaxDimensions,
    settings: &FormatSettings,
) -> Result<Encoded, TransformError> {
    let mut decoder = ImageReader::open(input)
        .map_err(|e| TransformError::io(input, e))?
        .with_guessed_format()
        .map_err(|e| TransformError::io(input, e))?
        .into_decoder()?;
    let orientation = decoder.orientation().unwrap_or(Orientation::NoTransforms);

    let mut img = DynamicImage::from_decoder(decoder)?;
    if orientation != Orientation::NoTransforms {
        debug!("Applying {:?} to {}", orientation, input.display());
        img.apply_orientation(orientation);
    }

    let source = Dimensions::new(img.width(), img.height());
    let resize = ResizePlan::compute(source, max);

    let img = if resize.is_resize() {
        debug!("Resizing {} from {} to {}", input.display(), source, resize.target);
        img.resize_exact(resize.target.width, resize.target.height, FilterType::Lanczos3)
    } else {
        img
    };

    let bytes = write_image(&img, target, settings)?;
    Ok(Encoded { bytes, resize })
}

fn write_image(
    img: &DynamicImage,
    target: ImageFormat,
    settings: &FormatSettings,
) -> Result<Vec<u8>, TransformError> {
    let mut bytes = Vec::new();

    match target {
        ImageFormat::Jpeg => {
            // JPEG non ha canale alpha
            let quality = settings.jpeg.quality.clamp(1, 100);
            let encoder = JpegEncoder::new_with_quality(&mut bytes, quality);
            img.to_rgb8().write_with_encoder(encoder)?;
        }
        ImageFormat::Png => {
            let encoder = PngEncoder::new_with_quality(
                &mut bytes,
                png_compression(settings.png.compression_level),
                PngFilter::Adaptive,
            );
            img.write_with_encoder(encoder)?;
        }
        ImageFormat::Webp => {
            let options = &settings.webp;
            let rgba = img.to_rgba8();
            let encoder = webp::Encoder::from_rgba(rgba.as_raw(), rgba.width(), rgba.height());
            let encoded = if options.lossless {
                encoder.encode_lossless()
            } else {
                encoder.encode(options.quality.min(100) as f32)
            };
            bytes.extend_from_slice(&encoded);
        }
        ImageFormat::Avif => {
            let avif = &settings.avif;
            let encoder =
                AvifEncoder::new_with_speed_quality(&mut bytes, avif.speed, avif.quality.clamp(1, 100));
            img.to_rgba8().write_with_encoder(encoder)?;
        }
    }

    Ok(bytes)
}

/// Map a zlib-style level (0-9) onto the encoder presets
fn png_compression(level: u8) -> CompressionType {
    match level {
        0..=3 => CompressionType::Fast,
        4..=6 => CompressionType::Default,
        _ => CompressionType::Best,
    }
}
