//! # JSON Output Module
//!
//! Questo modulo gestisce l'output strutturato in JSON (una riga per evento su stdout)
//! per l'integrazione con altri processi.
//!
//! ## Tipi di messaggi:
//! - `start`: inizio del batch (input, output, numero di file, engine)
//! - `progress`: snapshot di avanzamento dopo ogni file completato
//! - `file_complete`: esito di un singolo file
//! - `complete`: aggregato finale
//! - `error`: errore fatale

use crate::engine::EngineKind;
use crate::optimizer::{BatchAggregate, ProgressSink, ProgressSnapshot};
use crate::task::ProcessingResult;
use serde::Serialize;
use std::path::PathBuf;

/// Tipo di messaggio JSON
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JsonMessage {
    /// Inizio del batch
    Start {
        input: PathBuf,
        output_dir: Option<PathBuf>,
        total_files: usize,
        engine: EngineKind,
        threads: usize,
    },

    /// Avanzamento corrente
    Progress {
        processed: usize,
        total: usize,
        percentage: f64,
        current_file: String,
        rate: f64,
        eta_seconds: f64,
    },

    /// Esito di un singolo file
    FileComplete {
        path: PathBuf,
        success: bool,
        original_size: u64,
        optimized_size: u64,
        reduction_percent: f64,
        resized: bool,
        worker_id: usize,
        error: Option<String>,
    },

    /// Batch completato
    Complete {
        files_processed: usize,
        succeeded: usize,
        errors: usize,
        total_bytes_saved: u64,
        average_reduction: f64,
        workers_used: usize,
        duration_seconds: f64,
        memory_delta_mb: Option<f64>,
    },

    /// Errore fatale
    Error {
        message: String,
        details: Option<String>,
    },
}

impl JsonMessage {
    /// Emette il messaggio JSON su stdout
    pub fn emit(&self) {
        if let Ok(json) = serde_json::to_string(self) {
            println!("{}", json);
        }
    }

    pub fn start(
        input: PathBuf,
        output_dir: Option<PathBuf>,
        total_files: usize,
        engine: EngineKind,
        threads: usize,
    ) -> Self {
        Self::Start {
            input,
            output_dir,
            total_files,
            engine,
            threads,
        }
    }

    pub fn progress(snapshot: &ProgressSnapshot) -> Self {
        Self::Progress {
            processed: snapshot.processed,
            total: snapshot.total,
            percentage: snapshot.percent_complete,
            current_file: snapshot.current_file.clone(),
            rate: snapshot.rate,
            eta_seconds: snapshot.estimated_remaining.as_secs_f64(),
        }
    }

    pub fn file_complete(result: &ProcessingResult) -> Self {
        Self::FileComplete {
            path: result.input_path.clone(),
            success: result.success(),
            original_size: result.outcome.original_size,
            optimized_size: result.outcome.optimized_size,
            reduction_percent: result.outcome.reduction_percent(),
            resized: result.outcome.resized,
            worker_id: result.worker_id,
            error: result.outcome.error_message.clone(),
        }
    }

    /// Crea il messaggio finale; `duration_seconds` è il tempo reale del batch
    pub fn complete(aggregate: &BatchAggregate, duration_seconds: f64) -> Self {
        Self::Complete {
            files_processed: aggregate.total_processed,
            succeeded: aggregate.success_count,
            errors: aggregate.error_count,
            total_bytes_saved: aggregate.bytes_saved(),
            average_reduction: aggregate.overall_reduction_percent(),
            workers_used: aggregate.worker_ids_used.len(),
            duration_seconds,
            memory_delta_mb: aggregate.memory_delta_mb,
        }
    }

    pub fn error(message: String, details: Option<String>) -> Self {
        Self::Error { message, details }
    }
}

/// Progress sink printing one `progress` line per completed file
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonProgressSink;

impl ProgressSink for JsonProgressSink {
    fn on_progress(&self, snapshot: ProgressSnapshot) {
        JsonMessage::progress(&snapshot).emit();
    }
}
