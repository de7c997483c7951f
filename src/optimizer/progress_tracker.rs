//! # Progress Tracking Module
//!
//! Contatore di avanzamento condiviso tra i worker, senza lock.
//!
//! - Un singolo `AtomicUsize` incrementato esattamente una volta per task completato
//! - Dopo ogni incremento viene calcolato uno `ProgressSnapshot`
//! - Gli snapshot viaggiano su un canale unbounded verso un task di drain che chiama
//!   il `ProgressSink`: un sink lento non rallenta mai i worker
//!
//! Gli snapshot sono solo informativi: possono arrivare al sink in un ordine
//! leggermente diverso da quello degli incrementi.

use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

/// Point-in-time view of batch progress
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressSnapshot {
    pub percent_complete: f64,
    pub processed: usize,
    pub total: usize,
    /// File whose completion produced this snapshot
    pub current_file: String,
    pub elapsed: Duration,
    pub estimated_remaining: Duration,
    /// Files per second
    pub rate: f64,
}

impl ProgressSnapshot {
    pub fn compute(processed: usize, total: usize, current_file: String, elapsed: Duration) -> Self {
        let percent_complete = if total == 0 {
            100.0
        } else {
            processed as f64 / total as f64 * 100.0
        };

        let elapsed_secs = elapsed.as_secs_f64();
        let rate = if elapsed_secs > 0.0 {
            processed as f64 / elapsed_secs
        } else {
            0.0
        };

        let estimated_remaining = if processed == 0 {
            Duration::ZERO
        } else {
            let remaining = total.saturating_sub(processed) as f64;
            Duration::from_secs_f64(elapsed_secs / processed as f64 * remaining)
        };

        Self {
            percent_complete,
            processed,
            total,
            current_file,
            elapsed,
            estimated_remaining,
            rate,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.processed >= self.total
    }
}

/// Receiver of progress snapshots (progress bar, JSON lines, tests...)
pub trait ProgressSink: Send + Sync {
    fn on_progress(&self, snapshot: ProgressSnapshot);
}

impl<F> ProgressSink for F
where
    F: Fn(ProgressSnapshot) + Send + Sync,
{
    fn on_progress(&self, snapshot: ProgressSnapshot) {
        self(snapshot)
    }
}

/// Shared, lock-free progress counter
#[derive(Clone)]
pub struct ProgressTracker {
    total: usize,
    processed: Arc<AtomicUsize>,
    started_at: Instant,
    sender: Option<mpsc::UnboundedSender<ProgressSnapshot>>,
}

impl ProgressTracker {
    /// Crea il tracker e, se c'è un sink, avvia il task di drain
    pub fn new(total: usize, sink: Option<Arc<dyn ProgressSink>>) -> (Self, Option<JoinHandle<()>>) {
        let (sender, drain) = match sink {
            Some(sink) => {
                let (tx, mut rx) = mpsc::unbounded_channel::<ProgressSnapshot>();
                let handle = tokio::spawn(async move {
                    while let Some(snapshot) = rx.recv().await {
                        sink.on_progress(snapshot);
                    }
                    debug!("Progress drain finished");
                });
                (Some(tx), Some(handle))
            }
            None => (None, None),
        };

        let tracker = Self {
            total,
            processed: Arc::new(AtomicUsize::new(0)),
            started_at: Instant::now(),
            sender,
        };
        (tracker, drain)
    }

    /// Segna un task come completato e pubblica lo snapshot
    pub fn complete(&self, file_name: &str) -> ProgressSnapshot {
        let processed = self.processed.fetch_add(1, Ordering::SeqCst) + 1;
        let snapshot = ProgressSnapshot::compute(
            processed,
            self.total,
            file_name.to_string(),
            self.started_at.elapsed(),
        );

        if let Some(ref sender) = self.sender {
            // il drain può essere già terminato solo a batch concluso
            let _ = sender.send(snapshot.clone());
        }
        snapshot
    }

    pub fn processed(&self) -> usize {
        self.processed.load(Ordering::SeqCst)
    }

    pub fn total(&self) -> usize {
        self.total
    }
}
