//! # Progress Bar Module
//!
//! `ProgressSink` che mostra l'avanzamento del batch con `indicatif`.
//!
//! ## Visual feedback:
//! ```text
//! ⠋ [00:02:15] [========================>---------------] 90/150 (60%) 0.7 files/s, ETA 85s  photo.jpg
//! ```
//!
//! ## Esempio:
//! ```rust,ignore
//! let bar = Arc::new(ProgressManager::new(tasks.len() as u64));
//! let aggregate = orchestrator.run(tasks, 4, Some(bar.clone())).await?;
//! bar.finish(&aggregate.format_summary());
//! ```

use crate::optimizer::{ProgressSink, ProgressSnapshot};
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

/// Manages the terminal progress bar
#[derive(Clone)]
pub struct ProgressManager {
    bar: ProgressBar,
}

impl ProgressManager {
    /// Create a new progress manager
    pub fn new(total_files: u64) -> Self {
        let bar = ProgressBar::new(total_files);

        if let Ok(style) = ProgressStyle::default_bar().template(
            "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({percent}%) {msg}",
        ) {
            bar.set_style(style.progress_chars("=>-"));
        }

        bar.enable_steady_tick(Duration::from_millis(100));

        Self { bar }
    }

    /// Finish with a final message
    pub fn finish(&self, message: &str) {
        self.bar.finish_with_message(message.to_string());
    }
}

impl ProgressSink for ProgressManager {
    fn on_progress(&self, snapshot: ProgressSnapshot) {
        // gli snapshot possono arrivare fuori ordine: la barra non torna indietro
        let position = self.bar.position().max(snapshot.processed as u64);
        self.bar.set_position(position);
        self.bar.set_message(format!(
            "{:.1} files/s, ETA {}s  {}",
            snapshot.rate,
            snapshot.estimated_remaining.as_secs(),
            snapshot.current_file
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sink_moves_bar() {
        let manager = ProgressManager::new(4);
        manager.on_progress(ProgressSnapshot::compute(3, 4, "c.png".into(), Duration::from_secs(3)));
        assert_eq!(manager.bar.position(), 3);
        assert!(manager.bar.message().contains("c.png"));
        manager.finish("done");
        assert!(manager.bar.is_finished());
    }

    #[test]
    fn test_late_snapshot_does_not_rewind_bar() {
        let manager = ProgressManager::new(4);
        manager.on_progress(ProgressSnapshot::compute(3, 4, "c.png".into(), Duration::from_secs(3)));
        manager.on_progress(ProgressSnapshot::compute(2, 4, "b.png".into(), Duration::from_secs(3)));

        assert_eq!(manager.bar.position(), 3);
        assert!(manager.bar.message().contains("b.png"));
    }
}
