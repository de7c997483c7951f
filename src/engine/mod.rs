//! # Transformation Engines
//!
//! Astrazione sugli engine di trasformazione: il resto della pipeline vede solo
//! `Engine` e `TransformResult`, mai il backend concreto.
//!
//! ## Varianti:
//! - `Primary`: ImageMagick come processo esterno (`primary`)
//! - `Fallback`: codec built-in del crate `image` (`fallback`)
//! - `Unavailable`: nessun backend; ogni trasformazione fallisce
//!
//! ## Contratto di `transform`:
//! - Non fallisce mai: ogni esito, anche un errore, diventa un `TransformResult`
//! - Formati validati dall'estensione prima di qualsiasi accesso al disco
//! - L'output viene scritto in staging e spostato sul path finale solo se non vuoto
//!
//! La scelta della variante avviene una volta per batch in `probe::CapabilityProbe`.

pub mod fallback;
pub mod primary;
pub mod probe;
pub mod resize;
mod staging;
#[cfg(test)]
mod testing;

use crate::config::Config;
use crate::error::TransformError;
use crate::format::{extension_label, ImageFormat};
use crate::task::{ProcessingTask, TransformResult};
use fallback::FallbackEngine;
use primary::PrimaryEngine;
use resize::ResizePlan;
use serde::Serialize;
use staging::StagedOutput;
use std::fmt;
use std::path::PathBuf;
use tracing::{debug, warn};

/// Which backend produced a result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    Primary,
    Fallback,
    Unavailable,
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Primary => "primary",
            Self::Fallback => "fallback",
            Self::Unavailable => "unavailable",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone)]
pub enum Engine {
    Primary(PrimaryEngine),
    Fallback(FallbackEngine),
    Unavailable,
}

/// Validated inputs of a single transformation
#[derive(Debug, Clone)]
pub struct TransformPlan {
    pub input: PathBuf,
    pub output: PathBuf,
    pub source_format: ImageFormat,
    pub target_format: ImageFormat,
    pub quality: u8,
    pub original_size: u64,
}

impl TransformPlan {
    /// Valida formato, qualità e presenza dell'input, in quest'ordine
    pub async fn prepare(task: &ProcessingTask, config: &Config) -> Result<Self, TransformError> {
        let source_format = ImageFormat::from_path(&task.input_path)
            .ok_or_else(|| TransformError::UnsupportedFormat(extension_label(&task.input_path)))?;
        let target_format = ImageFormat::from_path(&task.output_path)
            .ok_or_else(|| TransformError::UnsupportedFormat(extension_label(&task.output_path)))?;

        if source_format != target_format {
            debug!(
                "Converting {} from {} to {}",
                task.display_name(),
                source_format,
                target_format
            );
        }

        let quality = config.default_settings.quality(target_format);
        if quality > 100 {
            return Err(TransformError::InvalidQuality {
                format: target_format.key(),
                quality,
            });
        }

        let metadata = match tokio::fs::metadata(&task.input_path).await {
            Ok(metadata) if metadata.is_file() => metadata,
            Ok(_) => return Err(TransformError::InputNotFound(task.input_path.clone())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(TransformError::InputNotFound(task.input_path.clone()))
            }
            Err(e) => return Err(TransformError::io(&task.input_path, e)),
        };

        Ok(Self {
            input: task.input_path.clone(),
            output: task.output_path.clone(),
            source_format,
            target_format,
            quality,
            original_size: metadata.len(),
        })
    }
}

impl Engine {
    pub fn kind(&self) -> EngineKind {
        match self {
            Self::Primary(_) => EngineKind::Primary,
            Self::Fallback(_) => EngineKind::Fallback,
            Self::Unavailable => EngineKind::Unavailable,
        }
    }

    pub fn is_available(&self) -> bool {
        !matches!(self, Self::Unavailable)
    }

    /// Trasforma un singolo file; qualsiasi errore finisce nel risultato
    pub async fn transform(&self, task: &ProcessingTask, config: &Config) -> TransformResult {
        if !self.is_available() {
            return self.failure(task, 0, TransformError::EngineUnavailable);
        }

        let plan = match TransformPlan::prepare(task, config).await {
            Ok(plan) => plan,
            Err(e) => return self.failure(task, 0, e),
        };

        match self.execute(&plan, config).await {
            Ok(result) => {
                debug!(
                    "{} -> {} ({} -> {} bytes, {}x{})",
                    plan.input.display(),
                    plan.output.display(),
                    result.original_size,
                    result.optimized_size,
                    result.output_width,
                    result.output_height
                );
                result
            }
            Err(e) => self.failure(task, plan.original_size, e),
        }
    }

    async fn execute(
        &self,
        plan: &TransformPlan,
        config: &Config,
    ) -> Result<TransformResult, TransformError> {
        let staged = StagedOutput::create(&plan.output, plan.target_format).await?;
        let max = config.processing.max_dimensions;

        let resize = match self {
            Self::Primary(primary) => {
                let source = primary.identify(&plan.input).await?;
                let resize = ResizePlan::compute(source, max);
                primary
                    .run(plan, &resize, staged.path(), &config.default_settings)
                    .await?;
                resize
            }
            Self::Fallback(fallback) => {
                let encoded = fallback.encode(plan, max, &config.default_settings).await?;
                staged.write(&encoded.bytes).await?;
                encoded.resize
            }
            Self::Unavailable => return Err(TransformError::EngineUnavailable),
        };

        let optimized_size = staged.verify().await?;
        staged.commit().await?;

        Ok(TransformResult {
            success: true,
            error_message: None,
            original_size: plan.original_size,
            optimized_size,
            resized: resize.is_resize(),
            output_width: resize.target.width,
            output_height: resize.target.height,
            engine_used: self.kind(),
        })
    }

    fn failure(&self, task: &ProcessingTask, original_size: u64, error: TransformError) -> TransformResult {
        warn!("Failed to transform {}: {}", task.display_name(), error);
        TransformResult::failure(self.kind(), original_size, &error)
    }
}

/// Convenience wrapper around [`Engine::transform`]
pub async fn transform(task: &ProcessingTask, config: &Config, engine: &Engine) -> TransformResult {
    engine.transform(task, config).await
}
