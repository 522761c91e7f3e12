//! Progress reporting
//!
//! The trainer never prints. It calls a [`ProgressReporter`] at run, epoch,
//! batch and checkpoint boundaries; the reporter decides how that is shown.

use std::sync::Mutex;

use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{debug, info, warn};

use crate::training::trainer::{EpochMetrics, TrainingHistory};

/// Which half of an epoch a batch belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Train,
    Validate,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::Train => write!(f, "train"),
            Phase::Validate => write!(f, "val"),
        }
    }
}

/// Observer of a training run. All methods default to no-ops.
pub trait ProgressReporter {
    fn on_run_start(&self, _epochs: usize) {}

    /// `epoch` is 1-based
    fn on_epoch_start(&self, _epoch: usize, _epochs: usize) {}

    /// `loss` is `None` for validation batches
    fn on_batch(&self, _phase: Phase, _batch_idx: usize, _num_batches: usize, _loss: Option<f64>) {}

    fn on_epoch_end(&self, _metrics: &EpochMetrics) {}

    fn on_checkpoint(&self, _epoch: usize, _val_acc: f64) {}

    fn on_run_end(&self, _history: &TrainingHistory) {}
}

/// Reports nothing
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentReporter;

impl ProgressReporter for SilentReporter {}

/// Reports through `tracing`
#[derive(Debug, Clone, Copy)]
pub struct TracingReporter {
    /// Log every n-th training batch at debug level
    pub batch_log_interval: usize,
}

impl Default for TracingReporter {
    fn default() -> Self {
        Self { batch_log_interval: 10 }
    }
}

impl ProgressReporter for TracingReporter {
    fn on_run_start(&self, epochs: usize) {
        info!("Starting training for {} epochs", epochs);
    }

    fn on_batch(&self, phase: Phase, batch_idx: usize, num_batches: usize, loss: Option<f64>) {
        let interval = self.batch_log_interval.max(1);
        if phase == Phase::Train && ((batch_idx + 1) % interval == 0 || batch_idx + 1 == num_batches) {
            if let Some(loss) = loss {
                debug!("  batch {:>4}/{}: loss = {:.4}", batch_idx + 1, num_batches, loss);
            }
        }
    }

    fn on_epoch_end(&self, metrics: &EpochMetrics) {
        if !metrics.is_valid() {
            warn!(
                "Epoch {} ran on an empty split (train {}, val {}); metrics are sentinels",
                metrics.epoch, metrics.train_samples, metrics.val_samples
            );
        }
        info!(
            "Epoch {}: train loss {:.4} | val acc {:.2}%",
            metrics.epoch,
            metrics.train_loss,
            metrics.val_accuracy * 100.0
        );
    }

    fn on_checkpoint(&self, epoch: usize, val_acc: f64) {
        info!("New best val acc {:.2}% at epoch {}, checkpoint saved", val_acc * 100.0, epoch);
    }

    fn on_run_end(&self, history: &TrainingHistory) {
        info!(
            "Training finished after {} epochs, best val acc {:.2}% (epoch {})",
            history.len(),
            history.best_val_accuracy * 100.0,
            history.best_epoch.unwrap_or(0)
        );
    }
}

/// Progress bar per phase plus colored epoch summaries
#[derive(Default)]
pub struct ConsoleReporter {
    bar: Mutex<Option<ProgressBar>>,
}

impl ConsoleReporter {
    pub fn new() -> Self {
        Self::default()
    }

    fn style() -> ProgressStyle {
        ProgressStyle::default_bar()
            .template("  {prefix:>5} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=>-")
    }

    fn finish_bar(&self) {
        if let Ok(mut guard) = self.bar.lock() {
            if let Some(bar) = guard.take() {
                bar.finish_and_clear();
            }
        }
    }
}

impl ProgressReporter for ConsoleReporter {
    fn on_run_start(&self, epochs: usize) {
        println!("{}", format!("Starting Training ({} epochs)...", epochs).green().bold());
        println!();
    }

    fn on_epoch_start(&self, epoch: usize, epochs: usize) {
        println!("{}", format!("Epoch {}/{}", epoch, epochs).yellow().bold());
    }

    fn on_batch(&self, phase: Phase, batch_idx: usize, num_batches: usize, loss: Option<f64>) {
        let Ok(mut guard) = self.bar.lock() else {
            return;
        };

        if batch_idx == 0 {
            if let Some(previous) = guard.take() {
                previous.finish_and_clear();
            }
            let bar = ProgressBar::new(num_batches as u64);
            bar.set_style(Self::style());
            bar.set_prefix(phase.to_string());
            *guard = Some(bar);
        }

        if let Some(bar) = guard.as_ref() {
            if let Some(loss) = loss {
                bar.set_message(format!("loss {:.4}", loss));
            }
            bar.inc(1);
        }
    }

    fn on_epoch_end(&self, metrics: &EpochMetrics) {
        self.finish_bar();

        let summary = format!(
            "  {} Loss: {:.4} | Val Acc: {:.2}% ({} train / {} val samples)",
            "→".cyan(),
            metrics.train_loss,
            metrics.val_accuracy * 100.0,
            metrics.train_samples,
            metrics.val_samples
        );
        println!("{}", summary);
        if !metrics.is_valid() {
            println!("  {} empty split, metrics for this epoch are not meaningful", "Warning:".yellow());
        }
    }

    fn on_checkpoint(&self, epoch: usize, val_acc: f64) {
        println!(
            "  {} best so far ({:.2}% at epoch {}), checkpoint saved",
            "✓".green(),
            val_acc * 100.0,
            epoch
        );
    }

    fn on_run_end(&self, history: &TrainingHistory) {
        self.finish_bar();
        println!();
        println!("{}", "Training Complete!".green().bold());
        println!(
            "  Best validation accuracy: {:.2}% (epoch {})",
            history.best_val_accuracy * 100.0,
            history.best_epoch.unwrap_or(0)
        );
    }
}
