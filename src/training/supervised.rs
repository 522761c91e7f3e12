//! Supervised training pipeline
//!
//! Loads the processed dataset, persists the class index, builds the
//! configured classifier, runs the epoch loop and writes the final artifacts.

use std::path::{Path, PathBuf};

use burn::{
    module::{AutodiffModule, Module},
    record::{BinFileRecorder, FullPrecisionSettings},
    tensor::backend::{AutodiffBackend, Backend},
};
use tracing::info;

use crate::backend::{default_num_workers, ComputeDevice};
use crate::config::PipelineConfig;
use crate::dataset::{load_datasets, ClassIndex, CLASS_NAMES_FILE};
use crate::model::{Classifier, MODEL_CONFIG_FILE};
use crate::training::checkpoint::FileCheckpointSink;
use crate::training::progress::ProgressReporter;
use crate::training::trainer::{evaluate, EvalResult, Trainer, TrainingHistory};
use crate::utils::error::{GrassfierError, Result};

/// Final model parameters inside the output directory
pub const FINAL_MODEL_FILE: &str = "model.bin";

/// Default name for an exported training history
pub const HISTORY_FILE: &str = "training_history.json";

/// Result of a full training run
#[derive(Debug, Clone)]
pub struct TrainingReport {
    pub history: TrainingHistory,
    /// Final model on the test split
    pub test: EvalResult,
    pub classes: ClassIndex,
    pub output_dir: PathBuf,
}

impl TrainingReport {
    pub fn final_model_path(&self) -> PathBuf {
        self.output_dir.join(FINAL_MODEL_FILE)
    }
}

/// Run the whole pipeline on backend `B`.
///
/// `compute` only picks the decode worker count when the config leaves it unset;
/// `device` is the Burn handle for the same device.
pub fn run_training<B: AutodiffBackend>(
    config: &PipelineConfig,
    compute: ComputeDevice,
    device: &B::Device,
    reporter: &dyn ProgressReporter,
) -> Result<TrainingReport> {
    config.validate()?;

    let output_dir = config.paths.output_dir.clone();
    std::fs::create_dir_all(&output_dir)?;

    let num_workers = config.data.num_workers.unwrap_or_else(|| default_num_workers(&compute));
    let views = load_datasets(&config.paths.processed_dir, &config.data, num_workers)?;
    if views.train.is_empty() {
        return Err(GrassfierError::Dataset(format!(
            "training split under {} has no images",
            config.paths.processed_dir.display()
        )));
    }

    views.classes.save(&output_dir.join(CLASS_NAMES_FILE))?;

    let model_config = config.model.to_model_config(views.classes.len(), &config.data);
    let model = model_config.init::<B>(device)?;
    model_config.save(&output_dir.join(MODEL_CONFIG_FILE))?;
    info!(
        "Model: {} | {} classes | {}x{} input | device {}",
        model_config.variant,
        model_config.num_classes,
        model_config.image_size,
        model_config.image_size,
        compute
    );

    let mut sink = FileCheckpointSink::in_dir(&output_dir);
    let trainer = Trainer::<B>::new(config.training.clone(), device.clone(), reporter)
        .with_class_names(views.classes.names().to_vec());
    let (model, history) = trainer.train(model, &views.train, &views.val, &mut sink)?;

    let final_model = model.valid();
    let test = evaluate(&final_model, &views.test, device)?;
    info!(
        "Test accuracy: {:.2}% ({}/{})",
        test.accuracy * 100.0,
        test.correct,
        test.total
    );

    save_final_model(final_model, &output_dir)?;

    Ok(TrainingReport {
        history,
        test,
        classes: views.classes,
        output_dir,
    })
}

fn save_final_model<B: Backend>(model: Classifier<B>, output_dir: &Path) -> Result<()> {
    // The recorder appends the `.bin` extension
    let stem = output_dir.join(FINAL_MODEL_FILE).with_extension("");
    model
        .save_file(stem, &BinFileRecorder::<FullPrecisionSettings>::new())
        .map_err(|e| GrassfierError::Model(format!("failed to save final model: {:?}", e)))?;
    info!("Final model saved to {:?}", output_dir.join(FINAL_MODEL_FILE));
    Ok(())
}
