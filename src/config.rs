//! # Configuration Management Module
//!
//! Questo modulo definisce la configurazione tipizzata della pipeline.
//!
//! ## Responsabilità:
//! - Definisce la struct `Config` con le impostazioni per formato, i limiti di processing e la policy di output
//! - Fornisce i valori di default (anche come albero JSON, base del merge a livelli)
//! - Valida i range dei parametri una volta sola, prima che parta qualsiasi task
//! - Carica i layer di configurazione utente da file JSON
//!
//! ## Struttura del documento JSON:
//! ```json
//! {
//!   "defaultSettings": { "jpeg": {...}, "png": {...}, "webp": {...}, "avif": {...} },
//!   "processing": { "maxThreads": 4, "maxDimensions": { "width": 2048, "height": 2048 }, "minFileSizeKB": 10 },
//!   "output": { "preserveStructure": true, "namingPattern": "{name}{ext}", "createBackup": false, "overwriteOriginal": false }
//! }
//! ```
//!
//! ## Validazione:
//! - `quality` di ogni formato in 0-100
//! - `compressionLevel` PNG in 0-9, `method` WebP in 0-6, `speed` AVIF in 1-10
//! - `maxThreads` > 0, `maxDimensions` > 0
//!
//! ## Note:
//! - `retryAttempts` viene letto ma nessun componente lo consulta (nessun retry automatico)
//! - `createBackup` viene letto ma il backup è responsabilità di un collaboratore esterno
//!
//! La configurazione risolta è immutabile: viene condivisa tra i worker tramite `Arc<Config>`.

use crate::error::ConfigError;
use crate::format::ImageFormat;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Fully resolved pipeline configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Per-format encoder settings
    pub default_settings: FormatSettings,
    /// Processing bounds (threads, dimensions, size threshold)
    pub processing: ProcessingSettings,
    /// Output naming and overwrite policy
    pub output: OutputSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormatSettings {
    pub jpeg: JpegSettings,
    pub png: PngSettings,
    pub webp: WebpSettings,
    pub avif: AvifSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct JpegSettings {
    /// JPEG quality (0-100)
    pub quality: u8,
    /// Progressive (interlaced) encoding
    pub progressive: bool,
    pub strip_metadata: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PngSettings {
    /// PNG quality (0-100), used by the primary engine
    pub quality: u8,
    /// zlib compression level (0-9)
    pub compression_level: u8,
    pub strip_metadata: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WebpSettings {
    /// WebP quality (0-100)
    pub quality: u8,
    pub lossless: bool,
    /// Encoder effort (0 = fast, 6 = slowest/best)
    pub method: u8,
    pub strip_metadata: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AvifSettings {
    /// AVIF quality (0-100)
    pub quality: u8,
    /// Encoder speed (1 = slowest/best, 10 = fastest)
    pub speed: u8,
    pub strip_metadata: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaxDimensions {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingSettings {
    /// Default worker count when the caller does not pass a throttle limit
    pub max_threads: usize,
    /// Images larger than this (on either side) are scaled down
    pub max_dimensions: MaxDimensions,
    /// Files smaller than this are skipped during discovery
    #[serde(rename = "minFileSizeKB")]
    pub min_file_size_kb: u64,
    /// Parsed for compatibility, never consulted
    #[serde(default)]
    pub retry_attempts: u32,
    /// Per-task timeout; `None` lets a task run indefinitely
    #[serde(default)]
    pub task_timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputSettings {
    /// Mirror the input sub-directory layout under the output directory
    pub preserve_structure: bool,
    /// Output file name, with `{name}` (input stem) and `{ext}` (".ext") placeholders
    pub naming_pattern: String,
    /// Carried for the backup collaborator; not acted on here
    pub create_backup: bool,
    /// Write outputs in place of the inputs
    pub overwrite_original: bool,
}

impl Default for JpegSettings {
    fn default() -> Self {
        Self {
            quality: 85,
            progressive: true,
            strip_metadata: true,
        }
    }
}

impl Default for PngSettings {
    fn default() -> Self {
        Self {
            quality: 90,
            compression_level: 6,
            strip_metadata: true,
        }
    }
}

impl Default for WebpSettings {
    fn default() -> Self {
        Self {
            quality: 80,
            lossless: false,
            method: 4,
            strip_metadata: true,
        }
    }
}

impl Default for AvifSettings {
    fn default() -> Self {
        Self {
            quality: 60,
            speed: 6,
            strip_metadata: true,
        }
    }
}

impl Default for FormatSettings {
    fn default() -> Self {
        Self {
            jpeg: JpegSettings::default(),
            png: PngSettings::default(),
            webp: WebpSettings::default(),
            avif: AvifSettings::default(),
        }
    }
}

impl Default for ProcessingSettings {
    fn default() -> Self {
        Self {
            max_threads: 4,
            max_dimensions: MaxDimensions {
                width: 2048,
                height: 2048,
            },
            min_file_size_kb: 10,
            retry_attempts: 2,
            task_timeout_seconds: None,
        }
    }
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            preserve_structure: true,
            naming_pattern: "{name}{ext}".to_string(),
            create_backup: false,
            overwrite_original: false,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_settings: FormatSettings::default(),
            processing: ProcessingSettings::default(),
            output: OutputSettings::default(),
        }
    }
}

impl FormatSettings {
    /// Qualità configurata per un formato
    pub fn quality(&self, format: ImageFormat) -> u8 {
        match format {
            ImageFormat::Jpeg => self.jpeg.quality,
            ImageFormat::Png => self.png.quality,
            ImageFormat::Webp => self.webp.quality,
            ImageFormat::Avif => self.avif.quality,
        }
    }

    pub fn strip_metadata(&self, format: ImageFormat) -> bool {
        match format {
            ImageFormat::Jpeg => self.jpeg.strip_metadata,
            ImageFormat::Png => self.png.strip_metadata,
            ImageFormat::Webp => self.webp.strip_metadata,
            ImageFormat::Avif => self.avif.strip_metadata,
        }
    }
}

impl Config {
    /// Default layer as a JSON tree, the base of every merge
    pub fn builtin_defaults() -> Value {
        serde_json::to_value(Self::default()).unwrap_or_default()
    }

    /// Validate configuration parameters
    pub fn validate(&self) -> Result<(), ConfigError> {
        for format in ImageFormat::ALL {
            let quality = self.default_settings.quality(format);
            if quality > 100 {
                return Err(ConfigError::invalid(
                    format!("defaultSettings.{}.quality", format.key()),
                    format!("must be between 0 and 100 (got {})", quality),
                ));
            }
        }

        if self.default_settings.png.compression_level > 9 {
            return Err(ConfigError::invalid(
                "defaultSettings.png.compressionLevel",
                "must be between 0 and 9",
            ));
        }

        if self.default_settings.webp.method > 6 {
            return Err(ConfigError::invalid(
                "defaultSettings.webp.method",
                "must be between 0 and 6",
            ));
        }

        if !(1..=10).contains(&self.default_settings.avif.speed) {
            return Err(ConfigError::invalid(
                "defaultSettings.avif.speed",
                "must be between 1 and 10",
            ));
        }

        if self.processing.max_threads == 0 {
            return Err(ConfigError::invalid(
                "processing.maxThreads",
                "must be greater than 0",
            ));
        }

        let dims = self.processing.max_dimensions;
        if dims.width == 0 || dims.height == 0 {
            return Err(ConfigError::invalid(
                "processing.maxDimensions",
                "width and height must be greater than 0",
            ));
        }

        if self.output.naming_pattern.trim().is_empty() {
            return Err(ConfigError::invalid(
                "output.namingPattern",
                "must not be empty",
            ));
        }

        Ok(())
    }

    /// Timeout per task, se configurato
    pub fn task_timeout(&self) -> Option<std::time::Duration> {
        self.processing
            .task_timeout_seconds
            .map(std::time::Duration::from_secs)
    }
}

/// Load a configuration layer from a JSON file
///
/// Returns `Ok(None)` if the file does not exist.
pub async fn load_layer(path: &Path) -> Result<Option<Value>, ConfigError> {
    if !path.exists() {
        debug!("No configuration layer at {}", path.display());
        return Ok(None);
    }

    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
    let value: Value = serde_json::from_str(&content)?;
    debug!("Loaded configuration layer from {}", path.display());
    Ok(Some(value))
}

/// Default location of the user configuration layer
pub fn default_user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("media-optimizer").join("config.json"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();
        assert!(config.validate().is_ok());

        config.default_settings.webp.quality = 101;
        assert!(config.validate().is_err());

        config.default_settings.webp.quality = 80;
        config.default_settings.png.compression_level = 10;
        assert!(config.validate().is_err());

        config.default_settings.png.compression_level = 9;
        config.processing.max_threads = 0;
        assert!(config.validate().is_err());

        config.processing.max_threads = 2;
        config.processing.max_dimensions.height = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.default_settings.jpeg.quality, 85);
        assert!(config.default_settings.jpeg.progressive);
        assert_eq!(config.processing.max_threads, 4);
        assert_eq!(config.processing.max_dimensions, MaxDimensions { width: 2048, height: 2048 });
        assert_eq!(config.output.naming_pattern, "{name}{ext}");
        assert!(config.task_timeout().is_none());
    }

    #[test]
    fn test_builtin_defaults_use_document_keys() {
        let value = Config::builtin_defaults();
        assert_eq!(value["defaultSettings"]["jpeg"]["quality"], 85);
        assert_eq!(value["processing"]["minFileSizeKB"], 10);
        assert_eq!(value["processing"]["maxDimensions"]["width"], 2048);
        assert_eq!(value["output"]["overwriteOriginal"], false);
    }

    #[tokio::test]
    async fn test_load_layer() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.json");

        assert!(load_layer(&path).await.unwrap().is_none());

        tokio::fs::write(&path, r#"{"defaultSettings":{"jpeg":{"quality":70}}}"#)
            .await
            .unwrap();
        let layer = load_layer(&path).await.unwrap().unwrap();
        assert_eq!(layer["defaultSettings"]["jpeg"]["quality"], 70);

        tokio::fs::write(&path, "{ not json").await.unwrap();
        assert!(matches!(load_layer(&path).await, Err(ConfigError::Malformed(_))));
    }
}
