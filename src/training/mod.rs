//! Training module
//!
//! This module provides:
//! - The epoch loop (train, validate, checkpoint on strict improvement)
//! - Best-checkpoint persistence
//! - Progress reporting decoupled from presentation
//! - The end-to-end training pipeline used by the CLI

pub mod checkpoint;
pub mod progress;
pub mod supervised;
pub mod trainer;

use serde::{Deserialize, Serialize};

use crate::utils::error::{GrassfierError, Result};

pub use checkpoint::{
    BestCheckpointPolicy, Checkpoint, CheckpointSink, FileCheckpointSink, MemoryCheckpointSink,
    BEST_CHECKPOINT_FILE,
};
pub use progress::{ConsoleReporter, Phase, ProgressReporter, SilentReporter, TracingReporter};
pub use supervised::{run_training, TrainingReport, FINAL_MODEL_FILE, HISTORY_FILE};
pub use trainer::{evaluate, EpochMetrics, EvalResult, Trainer, TrainingHistory};

/// Default number of training epochs
pub const DEFAULT_EPOCHS: usize = 10;

/// Default learning rate
pub const DEFAULT_LEARNING_RATE: f64 = 1e-4;

/// Hyperparameters of the epoch loop
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    pub epochs: usize,
    pub learning_rate: f64,
    /// Stop after this many epochs without a strict improvement; `None` runs every epoch
    pub early_stopping_patience: Option<usize>,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            epochs: DEFAULT_EPOCHS,
            learning_rate: DEFAULT_LEARNING_RATE,
            early_stopping_patience: None,
        }
    }
}

impl TrainingConfig {
    pub fn validate(&self) -> Result<()> {
        if self.epochs == 0 {
            return Err(GrassfierError::Config("epochs must be at least 1".to_string()));
        }
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return Err(GrassfierError::Config(format!(
                "learning_rate must be positive, got {}",
                self.learning_rate
            )));
        }
        if self.early_stopping_patience == Some(0) {
            return Err(GrassfierError::Config(
                "early_stopping_patience must be at least 1 when set".to_string(),
            ));
        }
        Ok(())
    }
}
