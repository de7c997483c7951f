//! # Primary Engine (ImageMagick)
//!
//! Trasformazione delegata a ImageMagick come tool esterno, per la massima
//! fedeltà e il supporto completo dei quattro formati (incluso AVIF in input).
//!
//! ## Pipeline per singola immagine
//! 1. Lettura dimensioni (header via `image` su un thread bloccante, altrimenti `identify`),
//!    già ruotate secondo l'orientamento EXIF: `-auto-orient` gira l'immagine prima del resize
//! 2. Calcolo del `ResizePlan`
//! 3. Esecuzione di `magick`/`convert` verso il path di staging
//!
//! ## Argomenti per formato
//!
//! | Formato | Argomenti |
//! |---------|-----------|
//! | JPEG    | `-quality Q -interlace Plane\|None` |
//! | PNG     | `-define png:compression-level=N` |
//! | WebP    | `-quality Q -define webp:lossless=B -define webp:method=N` |
//! | AVIF    | `-quality Q -define heic:speed=N` |
//!
//! `-strip` viene aggiunto quando `stripMetadata` è attivo, `-resize WxH!` solo
//! se il piano richiede un ridimensionamento.
//!
//! Il processo figlio viene lanciato con `kill_on_drop`: se il task va in timeout
//! il tool viene terminato insieme al future.

use super::resize::{Dimensions, ResizePlan};
use super::TransformPlan;
use crate::config::FormatSettings;
use crate::error::TransformError;
use crate::format::ImageFormat;
use image::metadata::Orientation;
use image::{ImageDecoder, ImageReader};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tokio::process::Command;
use tracing::{debug, warn};

/// Longest stderr excerpt kept in an error message
const STDERR_EXCERPT: usize = 400;

#[derive(Debug, Clone)]
pub struct PrimaryEngine {
    /// `magick` or `convert`
    tool: String,
    path: PathBuf,
}

impl PrimaryEngine {
    pub fn new(tool: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            tool: tool.into(),
            path: path.into(),
        }
    }

    pub fn tool(&self) -> &str {
        &self.tool
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Gets the displayed image dimensions, reading only the header when possible.
    ///
    /// Falls back to ImageMagick `identify` for inputs the `image` crate
    /// cannot parse (e.g. AVIF).
    pub async fn identify(&self, input: &Path) -> Result<Dimensions, TransformError> {
        let header_input = input.to_path_buf();
        let from_header = tokio::task::spawn_blocking(move || header_dimensions(&header_input))
            .await
            .map_err(|e| TransformError::Panicked(e.to_string()))?;
        if let Ok(dimensions) = from_header {
            return Ok(dimensions);
        }

        let mut command = Command::new(&self.path);
        if self.tool == "magick" {
            command.arg("identify");
        } else {
            // ImageMagick 6: `identify` sta accanto a `convert`
            command = Command::new(self.path.with_file_name(executable_sibling("identify")));
        }

        let output = command
            .args(["-format", "%w %h %[orientation]"])
            .arg(first_frame(input))
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| TransformError::io(input, e))?;

        if !output.status.success() {
            return Err(tool_failure("identify", &output.status, &output.stderr));
        }

        parse_dimensions(&String::from_utf8_lossy(&output.stdout)).ok_or_else(|| {
            TransformError::Unsupported(format!(
                "Unable to detect image dimensions for {}",
                input.display()
            ))
        })
    }

    /// Runs the conversion into `staged`
    pub async fn run(
        &self,
        plan: &TransformPlan,
        resize: &ResizePlan,
        staged: &Path,
        settings: &FormatSettings,
    ) -> Result<(), TransformError> {
        let args = build_args(&plan.input, staged, plan.target_format, resize, settings);
        debug!("Running {} {:?}", self.tool, args);

        let start_time = Instant::now();
        let output = Command::new(&self.path)
            .args(&args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| TransformError::io(&self.path, e))?;
        let elapsed = start_time.elapsed();

        if output.status.success() {
            debug!("{} finished {} in {:?}", self.tool, plan.input.display(), elapsed);
            Ok(())
        } else {
            warn!("{} failed on {} after {:?}", self.tool, plan.input.display(), elapsed);
            Err(tool_failure(&self.tool, &output.status, &output.stderr))
        }
    }
}

/// Build the ImageMagick argument list for one conversion
pub fn build_args(
    input: &Path,
    output: &Path,
    format: ImageFormat,
    resize: &ResizePlan,
    settings: &FormatSettings,
) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec![first_frame(input), "-auto-orient".into()];

    if resize.is_resize() {
        args.extend(["-filter".into(), "Lanczos".into()]);
        args.extend(["-resize".into(), resize.imagemagick_geometry().into()]);
    }

    if settings.strip_metadata(format) {
        args.push("-strip".into());
    }

    match format {
        ImageFormat::Jpeg => {
            let jpeg = &settings.jpeg;
            let interlace = if jpeg.progressive { "Plane" } else { "None" };
            args.extend(["-quality".into(), jpeg.quality.to_string().into()]);
            args.extend(["-interlace".into(), interlace.into()]);
        }
        ImageFormat::Png => {
            let level = format!("png:compression-level={}", settings.png.compression_level);
            args.extend(["-define".into(), level.into()]);
        }
        ImageFormat::Webp => {
            let webp = &settings.webp;
            args.extend(["-quality".into(), webp.quality.to_string().into()]);
            args.extend(["-define".into(), format!("webp:lossless={}", webp.lossless).into()]);
            args.extend(["-define".into(), format!("webp:method={}", webp.method).into()]);
        }
        ImageFormat::Avif => {
            let avif = &settings.avif;
            args.extend(["-quality".into(), avif.quality.to_string().into()]);
            args.extend(["-define".into(), format!("heic:speed={}", avif.speed).into()]);
        }
    }

    // prefisso esplicito: il formato segue il target, non l'estensione dello staging
    let mut target = OsString::from(format!("{}:", format.key()));
    target.push(output.as_os_str());
    args.push(target);
    args
}

/// `input[0]`: only the first frame of animated/multi-page inputs
fn first_frame(input: &Path) -> OsString {
    let mut arg = input.as_os_str().to_os_string();
    arg.push("[0]");
    arg
}

fn executable_sibling(tool: &str) -> String {
    if cfg!(windows) {
        format!("{}.exe", tool)
    } else {
        tool.to_string()
    }
}

/// Header-only read through the `image` decoders, EXIF orientation applied
fn header_dimensions(input: &Path) -> image::ImageResult<Dimensions> {
    let mut decoder = ImageReader::open(input)?.with_guessed_format()?.into_decoder()?;
    let (width, height) = decoder.dimensions();
    let orientation = decoder.orientation().unwrap_or(Orientation::NoTransforms);
    Ok(Dimensions::new(width, height).oriented(orientation))
}

/// Parse `identify -format "%w %h %[orientation]"`
fn parse_dimensions(raw: &str) -> Option<Dimensions> {
    let mut parts = raw.split_whitespace();
    let width = parts.next()?.parse().ok()?;
    let height = parts.next()?.parse().ok()?;
    let orientation = parts.next().map_or(Orientation::NoTransforms, imagemagick_orientation);
    Some(Dimensions::new(width, height).oriented(orientation))
}

/// ImageMagick orientation names, in EXIF order 1-8
fn imagemagick_orientation(name: &str) -> Orientation {
    match name {
        "TopRight" => Orientation::FlipHorizontal,
        "BottomRight" => Orientation::Rotate180,
        "BottomLeft" => Orientation::FlipVertical,
        "LeftTop" => Orientation::Rotate90FlipH,
        "RightTop" => Orientation::Rotate90,
        "RightBottom" => Orientation::Rotate270FlipH,
        "LeftBottom" => Orientation::Rotate270,
        _ => Orientation::NoTransforms,
    }
}

fn tool_failure(tool: &str, status: &std::process::ExitStatus, stderr: &[u8]) -> TransformError {
    let stderr = String::from_utf8_lossy(stderr);
    let stderr = stderr.trim();
    let excerpt = match stderr.char_indices().nth(STDERR_EXCERPT) {
        Some((cut, _)) => format!("{}...", &stderr[..cut]),
        None => stderr.to_string(),
    };

    TransformError::ToolFailed {
        tool: tool.to_string(),
        status: status.to_string(),
        stderr: if excerpt.is_empty() { "no output".to_string() } else { excerpt },
    }
}
