//! # Task and Result Types
//!
//! Strutture dati che attraversano la pipeline:
//! - `ProcessingTask`: un file da trasformare (creato una volta, read-only)
//! - `TransformResult`: esito strutturato prodotto dall'engine, esattamente uno per task
//! - `ProcessingResult`: `TransformResult` + info del worker, accumulato dall'orchestratore

use crate::engine::EngineKind;
use crate::error::TransformError;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// One file slated for transformation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessingTask {
    pub input_path: PathBuf,
    pub output_path: PathBuf,
    /// Path relative to the discovery root, used for display
    pub relative_path: PathBuf,
}

impl ProcessingTask {
    pub fn new(
        input_path: impl Into<PathBuf>,
        output_path: impl Into<PathBuf>,
        relative_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            input_path: input_path.into(),
            output_path: output_path.into(),
            relative_path: relative_path.into(),
        }
    }

    /// Nome da mostrare nei report (path relativo, o nome del file)
    pub fn display_name(&self) -> String {
        if self.relative_path.as_os_str().is_empty() {
            self.input_path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| self.input_path.display().to_string())
        } else {
            self.relative_path.display().to_string()
        }
    }
}

/// Structured outcome of a single transformation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransformResult {
    pub success: bool,
    pub error_message: Option<String>,
    pub original_size: u64,
    pub optimized_size: u64,
    pub resized: bool,
    pub output_width: u32,
    pub output_height: u32,
    pub engine_used: EngineKind,
}

impl TransformResult {
    pub fn failure(engine: EngineKind, original_size: u64, error: &TransformError) -> Self {
        Self {
            success: false,
            error_message: Some(error.to_string()),
            original_size,
            optimized_size: 0,
            resized: false,
            output_width: 0,
            output_height: 0,
            engine_used: engine,
        }
    }

    /// Percentuale di riduzione rispetto all'originale
    pub fn reduction_percent(&self) -> f64 {
        if !self.success || self.original_size == 0 {
            return 0.0;
        }
        (self.original_size as f64 - self.optimized_size as f64) / self.original_size as f64 * 100.0
    }
}

/// `TransformResult` as recorded by the orchestrator
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessingResult {
    pub file_name: String,
    pub input_path: PathBuf,
    pub worker_id: usize,
    pub duration: Duration,
    #[serde(flatten)]
    pub outcome: TransformResult,
}

impl ProcessingResult {
    pub fn success(&self) -> bool {
        self.outcome.success
    }

    pub fn input_path(&self) -> &Path {
        &self.input_path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_name_prefers_relative_path() {
        let task = ProcessingTask::new("/in/sub/a.jpg", "/out/sub/a.jpg", "sub/a.jpg");
        assert_eq!(task.display_name(), "sub/a.jpg");

        let task = ProcessingTask::new("/in/b.png", "/out/b.png", "");
        assert_eq!(task.display_name(), "b.png");
    }

    #[test]
    fn test_failure_carries_message() {
        let err = TransformError::UnsupportedFormat(".txt".to_string());
        let result = TransformResult::failure(EngineKind::Fallback, 12, &err);
        assert!(!result.success);
        assert_eq!(result.error_message.as_deref(), Some("Unsupported file format: .txt"));
        assert_eq!(result.original_size, 12);
        assert_eq!(result.reduction_percent(), 0.0);
    }
}
