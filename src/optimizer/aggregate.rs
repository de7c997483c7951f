//! # Batch Aggregate
//!
//! Riepilogo finale di un batch, costruito a partire dai `ProcessingResult`
//! raccolti dal canale dei risultati.

use crate::file_manager::FileManager;
use crate::task::ProcessingResult;
use serde::Serialize;
use std::collections::BTreeSet;
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchAggregate {
    pub total_processed: usize,
    pub success_count: usize,
    pub error_count: usize,
    /// Distinct worker ids that processed at least one task
    pub worker_ids_used: BTreeSet<usize>,
    /// Sum of per-task durations (not wall-clock time)
    pub total_duration: Duration,
    pub average_duration: Duration,
    /// RSS after the batch minus RSS before, when measurable
    pub memory_delta_mb: Option<f64>,
    pub results: Vec<ProcessingResult>,
}

impl BatchAggregate {
    /// Aggregate vuoto: nessun task, nessun worker
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_results(results: Vec<ProcessingResult>, memory_delta_mb: Option<f64>) -> Self {
        let success_count = results.iter().filter(|r| r.success()).count();
        let total_duration: Duration = results.iter().map(|r| r.duration).sum();
        let average_duration = if results.is_empty() {
            Duration::ZERO
        } else {
            total_duration / results.len() as u32
        };

        Self {
            total_processed: results.len(),
            success_count,
            error_count: results.len() - success_count,
            worker_ids_used: results.iter().map(|r| r.worker_id).collect(),
            total_duration,
            average_duration,
            memory_delta_mb,
            results,
        }
    }

    /// `(file_name, message)` for every failed task
    pub fn errors(&self) -> Vec<(String, String)> {
        self.results
            .iter()
            .filter(|r| !r.success())
            .map(|r| {
                let message = r
                    .outcome
                    .error_message
                    .clone()
                    .unwrap_or_else(|| "Unknown error".to_string());
                (r.file_name.clone(), message)
            })
            .collect()
    }

    pub fn total_original_size(&self) -> u64 {
        self.results
            .iter()
            .filter(|r| r.success())
            .map(|r| r.outcome.original_size)
            .sum()
    }

    pub fn total_optimized_size(&self) -> u64 {
        self.results
            .iter()
            .filter(|r| r.success())
            .map(|r| r.outcome.optimized_size)
            .sum()
    }

    pub fn bytes_saved(&self) -> u64 {
        self.total_original_size()
            .saturating_sub(self.total_optimized_size())
    }

    pub fn overall_reduction_percent(&self) -> f64 {
        let original = self.total_original_size();
        if original > 0 {
            self.bytes_saved() as f64 / original as f64 * 100.0
        } else {
            0.0
        }
    }

    pub fn format_summary(&self) -> String {
        format!(
            "Processed: {} files | Succeeded: {} | Errors: {} | Workers: {} | Total saved: {} ({:.2}%)",
            self.total_processed,
            self.success_count,
            self.error_count,
            self.worker_ids_used.len(),
            FileManager::format_size(self.bytes_saved()),
            self.overall_reduction_percent()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineKind;
    use crate::task::TransformResult;
    use std::path::PathBuf;

    fn result(name: &str, worker_id: usize, millis: u64, ok: bool) -> ProcessingResult {
        ProcessingResult {
            file_name: name.to_string(),
            input_path: PathBuf::from(name),
            worker_id,
            duration: Duration::from_millis(millis),
            outcome: TransformResult {
                success: ok,
                error_message: (!ok).then(|| format!("{} failed", name)),
                original_size: 1000,
                optimized_size: if ok { 400 } else { 0 },
                resized: false,
                output_width: 10,
                output_height: 10,
                engine_used: EngineKind::Fallback,
            },
        }
    }

    #[test]
    fn test_counts_and_durations() {
        let aggregate = BatchAggregate::from_results(
            vec![
                result("a.jpg", 1, 100, true),
                result("b.png", 2, 300, false),
                result("c.webp", 1, 200, true),
            ],
            Some(1.5),
        );

        assert_eq!(aggregate.total_processed, 3);
        assert_eq!(aggregate.success_count, 2);
        assert_eq!(aggregate.error_count, 1);
        assert_eq!(aggregate.worker_ids_used, BTreeSet::from([1, 2]));
        assert_eq!(aggregate.total_duration, Duration::from_millis(600));
        assert_eq!(aggregate.average_duration, Duration::from_millis(200));
        assert_eq!(aggregate.bytes_saved(), 1200);
        assert_eq!(aggregate.errors(), vec![("b.png".to_string(), "b.png failed".to_string())]);
    }

    #[test]
    fn test_empty_aggregate_is_all_zero() {
        let aggregate = BatchAggregate::from_results(Vec::new(), None);
        assert_eq!(aggregate.total_processed, 0);
        assert_eq!(aggregate.average_duration, Duration::ZERO);
        assert!(aggregate.worker_ids_used.is_empty());
        assert_eq!(aggregate.overall_reduction_percent(), 0.0);
    }
}
