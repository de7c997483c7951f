//! # Output Staging
//!
//! Scrittura sicura dell'output: l'engine scrive in una directory temporanea
//! accanto alla destinazione, l'output viene verificato (esiste, non è vuoto)
//! e solo allora rinominato sul path finale.
//!
//! Se il task fallisce, va in timeout o panica, `StagedOutput` viene droppato e
//! la directory temporanea rimossa: al path di output non resta mai un file parziale.

use crate::error::TransformError;
use crate::format::ImageFormat;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::debug;

pub struct StagedOutput {
    /// Removed on drop together with anything left inside
    _dir: TempDir,
    staged_path: PathBuf,
    target: PathBuf,
}

impl StagedOutput {
    /// Prepara una posizione temporanea nella stessa directory della destinazione
    pub async fn create(target: &Path, format: ImageFormat) -> Result<Self, TransformError> {
        let parent = match target.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };

        tokio::fs::create_dir_all(&parent)
            .await
            .map_err(|e| TransformError::io(&parent, e))?;

        let dir = tempfile::Builder::new()
            .prefix(".media-optimizer-")
            .tempdir_in(&parent)
            .map_err(|e| TransformError::io(&parent, e))?;

        let staged_path = dir.path().join(format!("staged.{}", format.extension()));
        debug!("Staging {} at {}", target.display(), staged_path.display());

        Ok(Self {
            _dir: dir,
            staged_path,
            target: target.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.staged_path
    }

    pub async fn write(&self, bytes: &[u8]) -> Result<(), TransformError> {
        tokio::fs::write(&self.staged_path, bytes)
            .await
            .map_err(|e| TransformError::io(&self.target, e))
    }

    /// Controlla che l'engine abbia prodotto un file non vuoto; ritorna la dimensione
    pub async fn verify(&self) -> Result<u64, TransformError> {
        let metadata = match tokio::fs::metadata(&self.staged_path).await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(TransformError::OutputMissing(self.target.clone()))
            }
            Err(e) => return Err(TransformError::io(&self.target, e)),
        };

        if metadata.len() == 0 {
            return Err(TransformError::OutputEmpty(self.target.clone()));
        }
        Ok(metadata.len())
    }

    /// Sposta l'output verificato sul path finale
    pub async fn commit(self) -> Result<PathBuf, TransformError> {
        tokio::fs::rename(&self.staged_path, &self.target)
            .await
            .map_err(|e| TransformError::io(&self.target, e))?;
        Ok(self.target)
    }
}
