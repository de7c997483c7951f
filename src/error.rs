//! # Error Types Module
//!
//! Questo modulo definisce tutti i tipi di errore custom della pipeline.
//!
//! ## Responsabilità:
//! - Separa gli errori fatali (che bloccano il batch prima di iniziare) da quelli per-task
//! - Fornisce messaggi di errore descrittivi e stabili (usati nei risultati dei task)
//! - Integra con `thiserror` per conversioni automatiche
//!
//! ## Categorie di errori:
//! - `ConfigError`: configurazione malformata o incompleta (fatale)
//! - `PipelineError`: errori fatali del batch (configurazione, nessun engine disponibile)
//! - `TransformError`: errori di un singolo task, registrati nel risultato e mai propagati
//!
//! ## Esempio:
//! ```rust,ignore
//! if !engine.is_available() {
//!     return Err(PipelineError::EngineUnavailable);
//! }
//! ```

use std::path::PathBuf;
use std::time::Duration;

/// Errors raised while resolving or validating the configuration tree
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("Missing required configuration key: {0}")]
    MissingKey(String),

    #[error("Invalid configuration value for {key}: {reason}")]
    InvalidValue { key: String, reason: String },

    #[error("Malformed configuration: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Failed to read configuration file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl ConfigError {
    pub fn invalid(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            key: key.into(),
            reason: reason.into(),
        }
    }
}

/// Fatal errors: they abort the whole batch before any worker starts
#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),

    #[error("No transformation engine available (install ImageMagick or enable the built-in fallback)")]
    EngineUnavailable,

    #[error("Throttle limit must be at least 1")]
    InvalidThrottle,

    #[error("Failed to start runtime: {0}")]
    Runtime(#[from] std::io::Error),
}

/// Per-task errors, rendered into `TransformResult::error_message`
#[derive(thiserror::Error, Debug)]
pub enum TransformError {
    #[error("Unsupported file format: {0}")]
    UnsupportedFormat(String),

    #[error("Invalid quality {quality} for {format}: must be between 0 and 100")]
    InvalidQuality { format: &'static str, quality: u8 },

    #[error("Input file not found: {0}")]
    InputNotFound(PathBuf),

    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("{tool} exited with {status}: {stderr}")]
    ToolFailed {
        tool: String,
        status: String,
        stderr: String,
    },

    #[error("Output file was not produced: {0}")]
    OutputMissing(PathBuf),

    #[error("Output file is empty: {0}")]
    OutputEmpty(PathBuf),

    #[error("Image processing error: {0}")]
    Image(#[from] image::ImageError),

    #[error("{0}")]
    Unsupported(String),

    #[error("Transformation timed out after {}s", .0.as_secs())]
    TimedOut(Duration),

    #[error("Transformation panicked: {0}")]
    Panicked(String),

    #[error("No transformation engine available")]
    EngineUnavailable,
}

impl TransformError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsupported_format_message() {
        let err = TransformError::UnsupportedFormat(".txt".to_string());
        assert_eq!(err.to_string(), "Unsupported file format: .txt");
    }

    #[test]
    fn test_timeout_message() {
        let err = TransformError::TimedOut(Duration::from_secs(30));
        assert_eq!(err.to_string(), "Transformation timed out after 30s");
    }

    #[test]
    fn test_config_error_wraps_into_pipeline_error() {
        let err: PipelineError = ConfigError::MissingKey("output".to_string()).into();
        assert!(err.to_string().contains("Missing required configuration key: output"));
    }
}
