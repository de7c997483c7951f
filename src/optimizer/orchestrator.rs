//! # Batch Orchestrator
//!
//! Esegue un batch di `ProcessingTask` su un pool fisso di worker tokio.
//!
//! ## Modello di concorrenza:
//! - Pool di `min(throttle_limit, tasks.len())` worker con id 1..=k
//! - I task vivono in un `Arc<[ProcessingTask]>` immutabile; ogni worker reclama il
//!   prossimo indice con un cursore atomico finché la lista non è esaurita
//! - I risultati arrivano all'orchestratore su un canale unbounded (nessun lock)
//! - Ogni trasformazione è isolata: panic (`catch_unwind`) e timeout diventano
//!   risultati Failed, i task fratelli proseguono
//!
//! ## Garanzie:
//! - Esattamente un `ProcessingResult` per task, restituiti nell'ordine dei task
//! - Errori fatali (throttle nullo, nessun engine) prima che parta qualsiasi worker
//! - Nessun retry: ogni task viene tentato una sola volta

use super::aggregate::BatchAggregate;
use super::memory;
use super::progress_tracker::{ProgressSink, ProgressTracker};
use crate::config::Config;
use crate::engine::probe::CapabilityProbe;
use crate::engine::{Engine, EngineKind};
use crate::error::{PipelineError, TransformError};
use crate::task::{ProcessingResult, ProcessingTask, TransformResult};
use futures::FutureExt;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

pub struct BatchOrchestrator {
    config: Arc<Config>,
    engine: Arc<Engine>,
}

impl BatchOrchestrator {
    pub fn new(config: Arc<Config>, engine: Engine) -> Self {
        Self {
            config,
            engine: Arc::new(engine),
        }
    }

    /// Build an orchestrator with whatever engine the probe detects
    pub async fn with_probe(config: Arc<Config>, probe: &CapabilityProbe) -> Self {
        let engine = probe.detect().await;
        Self::new(config, engine)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Esegue il batch e restituisce l'aggregato
    pub async fn run(
        &self,
        tasks: Vec<ProcessingTask>,
        throttle_limit: usize,
        sink: Option<Arc<dyn ProgressSink>>,
    ) -> Result<BatchAggregate, PipelineError> {
        if throttle_limit == 0 {
            return Err(PipelineError::InvalidThrottle);
        }

        if tasks.is_empty() {
            info!("No tasks to process");
            return Ok(BatchAggregate::empty());
        }

        if !self.engine.is_available() {
            error!("Refusing to start batch of {} tasks: no engine", tasks.len());
            return Err(PipelineError::EngineUnavailable);
        }

        let total = tasks.len();
        let pool_size = throttle_limit.min(total);
        info!(
            "Processing {} files with {} workers ({} engine)",
            total,
            pool_size,
            self.engine.kind()
        );

        let memory_before = memory::resident_mb();
        let tasks: Arc<[ProcessingTask]> = tasks.into();
        let cursor = Arc::new(AtomicUsize::new(0));
        let timeout = self.config.task_timeout();
        let (tracker, drain) = ProgressTracker::new(total, sink);
        let (tx, mut rx) = mpsc::unbounded_channel::<(usize, ProcessingResult)>();

        let mut workers = Vec::with_capacity(pool_size);
        for worker_id in 1..=pool_size {
            let tasks = tasks.clone();
            let cursor = cursor.clone();
            let tracker = tracker.clone();
            let tx = tx.clone();
            let config = self.config.clone();
            let engine = self.engine.clone();

            workers.push(tokio::spawn(async move {
                loop {
                    let index = cursor.fetch_add(1, Ordering::SeqCst);
                    let Some(task) = tasks.get(index) else {
                        break;
                    };

                    debug!("Worker {} picked {}", worker_id, task.display_name());
                    let work = engine.transform(task, &config);
                    let result = guarded(task, worker_id, engine.kind(), timeout, work).await;

                    tracker.complete(&result.file_name);
                    if tx.send((index, result)).is_err() {
                        break;
                    }
                }
                debug!("Worker {} finished", worker_id);
            }));
        }
        drop(tx);

        let mut slots: Vec<Option<ProcessingResult>> = vec![None; total];
        while let Some((index, result)) = rx.recv().await {
            slots[index] = Some(result);
        }

        for handle in workers {
            if let Err(e) = handle.await {
                error!("Worker terminated abnormally: {}", e);
            }
        }

        let results: Vec<ProcessingResult> = slots
            .into_iter()
            .enumerate()
            .map(|(index, slot)| {
                slot.unwrap_or_else(|| {
                    let task = &tasks[index];
                    warn!("No result reported for {}", task.display_name());
                    let result = lost_result(task, self.engine.kind());
                    tracker.complete(&result.file_name);
                    result
                })
            })
            .collect();

        drop(tracker);
        if let Some(drain) = drain {
            if let Err(e) = drain.await {
                warn!("Progress sink stopped early: {}", e);
            }
        }

        let memory_delta_mb = match (memory_before, memory::resident_mb()) {
            (Some(before), Some(after)) => Some(after - before),
            _ => None,
        };

        let aggregate = BatchAggregate::from_results(results, memory_delta_mb);
        info!("{}", aggregate.format_summary());
        Ok(aggregate)
    }

    /// Synchronous entry point: builds a multi-thread runtime and blocks on `run`
    ///
    /// Must not be called from inside an async context.
    pub fn run_blocking(
        &self,
        tasks: Vec<ProcessingTask>,
        throttle_limit: usize,
        sink: Option<Arc<dyn ProgressSink>>,
    ) -> Result<BatchAggregate, PipelineError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()?;
        runtime.block_on(self.run(tasks, throttle_limit, sink))
    }
}

/// Runs one transformation with panic and timeout isolation
async fn guarded<F>(
    task: &ProcessingTask,
    worker_id: usize,
    engine: EngineKind,
    timeout: Option<Duration>,
    work: F,
) -> ProcessingResult
where
    F: Future<Output = TransformResult>,
{
    let start_time = Instant::now();
    let work = AssertUnwindSafe(work).catch_unwind();

    let outcome = match timeout {
        Some(limit) => match tokio::time::timeout(limit, work).await {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!("{} timed out after {:?}", task.display_name(), limit);
                Ok(failure(task, engine, TransformError::TimedOut(limit)).await)
            }
        },
        None => work.await,
    };

    let outcome = match outcome {
        Ok(outcome) => outcome,
        Err(panic) => {
            let message = panic_message(panic.as_ref());
            error!("Transformation of {} panicked: {}", task.display_name(), message);
            failure(task, engine, TransformError::Panicked(message)).await
        }
    };

    ProcessingResult {
        file_name: task.display_name(),
        input_path: task.input_path.clone(),
        worker_id,
        duration: start_time.elapsed(),
        outcome,
    }
}

async fn failure(task: &ProcessingTask, engine: EngineKind, error: TransformError) -> TransformResult {
    let original_size = tokio::fs::metadata(&task.input_path)
        .await
        .map(|m| m.len())
        .unwrap_or(0);
    TransformResult::failure(engine, original_size, &error)
}

fn lost_result(task: &ProcessingTask, engine: EngineKind) -> ProcessingResult {
    let error = TransformError::Panicked("Worker terminated before reporting a result".to_string());
    ProcessingResult {
        file_name: task.display_name(),
        input_path: task.input_path.clone(),
        worker_id: 0,
        duration: Duration::ZERO,
        outcome: TransformResult::failure(engine, 0, &error),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::fallback::FallbackEngine;
    use crate::optimizer::progress_tracker::ProgressSnapshot;
    use image::{Rgb, RgbImage};
    use std::path::Path;
    use std::sync::Mutex;
    use tempfile::TempDir;
    use tokio_test::assert_ok;

    fn write_image(path: &Path, width: u32, height: u32) {
        RgbImage::from_fn(width, height, |x, y| Rgb([(x * 7) as u8, (y * 5) as u8, 128]))
            .save(path)
            .unwrap();
    }

    fn fallback_orchestrator() -> BatchOrchestrator {
        BatchOrchestrator::new(Arc::new(Config::default()), Engine::Fallback(FallbackEngine::new()))
    }

    fn image_tasks(dir: &Path, names: &[&str]) -> Vec<ProcessingTask> {
        let out = dir.join("out");
        names
            .iter()
            .map(|name| {
                let input = dir.join(name);
                write_image(&input, 64, 48);
                ProcessingTask::new(input, out.join(name), *name)
            })
            .collect()
    }

    #[tokio::test]
    async fn test_every_task_gets_a_result() {
        let temp_dir = TempDir::new().unwrap();
        let names = ["1.png", "2.png", "3.jpg", "4.jpg", "5.webp"];
        let orchestrator = fallback_orchestrator();

        for throttle in [1, 2, 5, 16] {
            let tasks = image_tasks(temp_dir.path(), &names);
            let aggregate = orchestrator.run(tasks, throttle, None).await.unwrap();

            assert_eq!(aggregate.results.len(), names.len());
            assert_eq!(aggregate.success_count, names.len());
            assert!(aggregate.worker_ids_used.len() <= throttle.min(names.len()));
            assert!(aggregate.worker_ids_used.iter().all(|id| (1..=throttle).contains(id)));
        }
    }

    #[tokio::test]
    async fn test_three_formats_with_two_workers() {
        let temp_dir = TempDir::new().unwrap();
        let tasks = image_tasks(temp_dir.path(), &["a.jpg", "b.png", "c.webp"]);

        let aggregate = fallback_orchestrator().run(tasks, 2, None).await.unwrap();

        assert_eq!(aggregate.total_processed, 3);
        assert_eq!(aggregate.success_count, 3);
        assert_eq!(aggregate.error_count, 0);
        assert!(aggregate.worker_ids_used.len() <= 2);
        for name in ["a.jpg", "b.png", "c.webp"] {
            assert!(temp_dir.path().join("out").join(name).exists());
        }
    }

    #[tokio::test]
    async fn test_empty_batch_returns_zeros() {
        let aggregate = fallback_orchestrator().run(Vec::new(), 4, None).await.unwrap();
        assert_eq!(aggregate.total_processed, 0);
        assert_eq!(aggregate.success_count, 0);
        assert_eq!(aggregate.error_count, 0);
        assert!(aggregate.worker_ids_used.is_empty());
    }

    #[tokio::test]
    async fn test_failures_do_not_affect_siblings() {
        let temp_dir = TempDir::new().unwrap();
        let mut tasks = image_tasks(temp_dir.path(), &["ok1.png", "ok2.jpg"]);
        let missing = temp_dir.path().join("missing.jpg");
        tasks.insert(1, ProcessingTask::new(&missing, temp_dir.path().join("out/missing.jpg"), "missing.jpg"));
        let notes = temp_dir.path().join("notes.txt");
        std::fs::write(&notes, b"hello").unwrap();
        tasks.push(ProcessingTask::new(&notes, temp_dir.path().join("out/notes.txt"), "notes.txt"));

        let aggregate = fallback_orchestrator().run(tasks, 3, None).await.unwrap();

        assert_eq!(aggregate.total_processed, 4);
        assert_eq!(aggregate.success_count, 2);
        assert_eq!(aggregate.error_count, 2);

        let errors = aggregate.errors();
        let (name, message) = &errors[0];
        assert_eq!(name, "missing.jpg");
        assert!(message.contains("missing.jpg"));
        assert_eq!(errors[1], ("notes.txt".to_string(), "Unsupported file format: .txt".to_string()));
    }

    #[tokio::test]
    async fn test_unavailable_engine_is_fatal() {
        let orchestrator = BatchOrchestrator::new(Arc::new(Config::default()), Engine::Unavailable);
        let tasks = vec![ProcessingTask::new("a.jpg", "b.jpg", "a.jpg")];

        let err = orchestrator.run(tasks, 2, None).await.unwrap_err();
        assert!(matches!(err, PipelineError::EngineUnavailable));
    }

    #[tokio::test]
    async fn test_zero_throttle_is_rejected() {
        let err = fallback_orchestrator().run(Vec::new(), 0, None).await.unwrap_err();
        assert!(matches!(err, PipelineError::InvalidThrottle));
    }

    #[tokio::test]
    async fn test_sink_sees_every_completion() {
        let temp_dir = TempDir::new().unwrap();
        let tasks = image_tasks(temp_dir.path(), &["a.png", "b.png", "c.png", "d.png"]);
        let seen: Arc<Mutex<Vec<ProgressSnapshot>>> = Arc::new(Mutex::new(Vec::new()));
        let sink_seen = seen.clone();
        let sink: Arc<dyn ProgressSink> = Arc::new(move |snapshot: ProgressSnapshot| {
            sink_seen.lock().unwrap().push(snapshot);
        });

        assert_ok!(fallback_orchestrator().run(tasks, 2, Some(sink)).await);

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 4);
        assert!(seen.iter().all(|s| s.total == 4));
        let mut processed: Vec<usize> = seen.iter().map(|s| s.processed).collect();
        processed.sort_unstable();
        assert_eq!(processed, vec![1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_panic_becomes_failed_result() {
        async fn exploding() -> TransformResult {
            panic!("decoder exploded")
        }
        let task = ProcessingTask::new("boom.jpg", "out.jpg", "boom.jpg");

        let result = guarded(&task, 3, EngineKind::Fallback, None, exploding()).await;

        assert!(!result.success());
        assert_eq!(result.worker_id, 3);
        assert!(result.outcome.error_message.unwrap().contains("decoder exploded"));
    }

    #[tokio::test]
    async fn test_timeout_becomes_failed_result() {
        let task = ProcessingTask::new("slow.jpg", "out.jpg", "slow.jpg");
        let work = async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            TransformResult::failure(EngineKind::Fallback, 0, &TransformError::EngineUnavailable)
        };

        let result = guarded(&task, 1, EngineKind::Fallback, Some(Duration::from_millis(20)), work).await;

        assert!(!result.success());
        assert_eq!(
            result.outcome.error_message.as_deref(),
            Some("Transformation timed out after 0s")
        );
    }

    #[test]
    fn test_run_blocking() {
        let temp_dir = TempDir::new().unwrap();
        let tasks = image_tasks(temp_dir.path(), &["x.png", "y.jpg"]);

        let aggregate = fallback_orchestrator().run_blocking(tasks, 4, None).unwrap();
        assert_eq!(aggregate.success_count, 2);
        assert!(aggregate.worker_ids_used.len() <= 2);
    }
}
