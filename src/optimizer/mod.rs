//! # Optimizer Module
//!
//! Orchestrazione parallela dei batch, separata in sottomoduli:
//! - `orchestrator`: pool di worker, isolamento dei task, raccolta dei risultati
//! - `progress_tracker`: contatore atomico e consegna degli snapshot al sink
//! - `aggregate`: riepilogo finale del batch
//! - `memory`: campionamento RSS best-effort

pub mod aggregate;
pub mod memory;
pub mod orchestrator;
pub mod progress_tracker;

pub use aggregate::BatchAggregate;
pub use orchestrator::BatchOrchestrator;
pub use progress_tracker::{ProgressSink, ProgressSnapshot, ProgressTracker};
