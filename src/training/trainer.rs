//! Epoch loop
//!
//! Each epoch runs `Training → Validating → (Checkpointing if improved)`.
//! Training loss is averaged over samples, not batches, so a short final batch
//! weighs in proportion to its size. Empty views never divide by zero: the
//! denominator floors to 1 and the epoch is flagged invalid instead.

use std::fs;
use std::path::Path;

use burn::{
    module::{AutodiffModule, Module},
    nn::loss::CrossEntropyLossConfig,
    optim::{AdamConfig, GradientsParams, Optimizer},
    tensor::{
        backend::{AutodiffBackend, Backend},
        ElementConversion,
    },
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::dataset::BatchedView;
use crate::model::Classifier;
use crate::training::checkpoint::{record_to_bytes, BestCheckpointPolicy, Checkpoint, CheckpointSink};
use crate::training::progress::{Phase, ProgressReporter, SilentReporter};
use crate::training::TrainingConfig;
use crate::utils::error::Result;

/// Outcome of one completed epoch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochMetrics {
    /// 1-based
    pub epoch: usize,
    pub train_loss: f64,
    /// In [0, 1]
    pub val_accuracy: f64,
    pub train_samples: usize,
    pub val_samples: usize,
}

impl EpochMetrics {
    /// False when either split was empty and the metrics are sentinels
    pub fn is_valid(&self) -> bool {
        self.train_samples > 0 && self.val_samples > 0
    }
}

/// Per-epoch losses and accuracies, index-aligned
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingHistory {
    pub train_losses: Vec<f64>,
    pub val_accuracies: Vec<f64>,
    pub epochs: Vec<EpochMetrics>,
    pub best_val_accuracy: f64,
    pub best_epoch: Option<usize>,
}

impl TrainingHistory {
    pub fn push(&mut self, metrics: EpochMetrics) {
        self.train_losses.push(metrics.train_loss);
        self.val_accuracies.push(metrics.val_accuracy);
        self.epochs.push(metrics);
    }

    /// Number of completed epochs
    pub fn len(&self) -> usize {
        self.epochs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.epochs.is_empty()
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        info!("Training history saved to {:?}", path);
        Ok(())
    }
}

/// Accuracy over one view
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EvalResult {
    pub correct: usize,
    pub total: usize,
    /// `correct / max(total, 1)`
    pub accuracy: f64,
}

impl EvalResult {
    pub fn new(correct: usize, total: usize) -> Self {
        Self {
            correct,
            total,
            accuracy: correct as f64 / total.max(1) as f64,
        }
    }
}

/// Arg-max accuracy of `model` over every batch of `view`
pub fn evaluate<B: Backend>(model: &Classifier<B>, view: &BatchedView, device: &B::Device) -> Result<EvalResult> {
    evaluate_with_reporter(model, view, device, &SilentReporter)
}

fn evaluate_with_reporter<B: Backend>(
    model: &Classifier<B>,
    view: &BatchedView,
    device: &B::Device,
    reporter: &dyn ProgressReporter,
) -> Result<EvalResult> {
    let num_batches = view.num_batches();
    let mut correct = 0usize;
    let mut total = 0usize;

    for (batch_idx, batch) in view.batches::<B>(device, 0).enumerate() {
        let batch = batch?;
        let n = batch.targets.dims()[0];

        let predictions = model.forward(batch.images).argmax(1).reshape([n]);
        let batch_correct: i64 = predictions
            .equal(batch.targets)
            .int()
            .sum()
            .into_scalar()
            .elem();

        correct += batch_correct as usize;
        total += n;
        reporter.on_batch(Phase::Validate, batch_idx, num_batches, None);
    }

    Ok(EvalResult::new(correct, total))
}

/// Runs the epoch loop on an autodiff backend
pub struct Trainer<'a, B: AutodiffBackend> {
    config: TrainingConfig,
    device: B::Device,
    reporter: &'a dyn ProgressReporter,
    class_names: Vec<String>,
}

impl<'a, B: AutodiffBackend> Trainer<'a, B> {
    pub fn new(config: TrainingConfig, device: B::Device, reporter: &'a dyn ProgressReporter) -> Self {
        Self {
            config,
            device,
            reporter,
            class_names: Vec::new(),
        }
    }

    /// Label names stored in every checkpoint
    pub fn with_class_names(mut self, class_names: Vec<String>) -> Self {
        self.class_names = class_names;
        self
    }

    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    /// Train `model` and return it with the per-epoch history
    pub fn train(
        &self,
        mut model: Classifier<B>,
        train: &BatchedView,
        val: &BatchedView,
        sink: &mut dyn CheckpointSink,
    ) -> Result<(Classifier<B>, TrainingHistory)> {
        self.config.validate()?;

        let epochs = self.config.epochs;
        let loss_fn = CrossEntropyLossConfig::new().init(&self.device);
        let mut optimizer = AdamConfig::new().init::<B, Classifier<B>>();
        let mut policy = BestCheckpointPolicy::new();
        let mut history = TrainingHistory::default();
        let mut epochs_without_improvement = 0usize;

        self.reporter.on_run_start(epochs);

        for epoch in 1..=epochs {
            self.reporter.on_epoch_start(epoch, epochs);

            // Training
            let num_batches = train.num_batches();
            let mut loss_sum = 0.0f64;
            let mut train_samples = 0usize;

            for (batch_idx, batch) in train.batches::<B>(&self.device, epoch).enumerate() {
                let batch = batch?;
                let n = batch.targets.dims()[0];

                let output = model.forward(batch.images);
                let loss = loss_fn.forward(output, batch.targets);
                let loss_value: f64 = loss.clone().into_scalar().elem();

                let grads = GradientsParams::from_grads(loss.backward(), &model);
                model = optimizer.step(self.config.learning_rate, model, grads);

                loss_sum += loss_value * n as f64;
                train_samples += n;
                self.reporter.on_batch(Phase::Train, batch_idx, num_batches, Some(loss_value));
            }

            let train_loss = loss_sum / train_samples.max(1) as f64;

            // Validation
            let valid_model = model.valid();
            let eval = evaluate_with_reporter(&valid_model, val, &self.device, self.reporter)?;

            let metrics = EpochMetrics {
                epoch,
                train_loss,
                val_accuracy: eval.accuracy,
                train_samples,
                val_samples: eval.total,
            };
            self.reporter.on_epoch_end(&metrics);
            history.push(metrics);

            // Checkpointing
            let improved = policy.checkpoint_if_improved(epoch, eval.accuracy, sink, || {
                let model_state =
                    record_to_bytes::<B::InnerBackend, _>(valid_model.clone().into_record())?;
                let optimizer_state = record_to_bytes::<B, _>(optimizer.to_record())?;
                Ok(Checkpoint::new(
                    epoch,
                    eval.accuracy,
                    &model_state,
                    &optimizer_state,
                    self.class_names.clone(),
                ))
            })?;

            if improved {
                epochs_without_improvement = 0;
                self.reporter.on_checkpoint(epoch, eval.accuracy);
            } else {
                epochs_without_improvement += 1;
                debug!(
                    "Epoch {}: no improvement over {:.4} ({} in a row)",
                    epoch,
                    policy.best_val_acc(),
                    epochs_without_improvement
                );
            }

            if let Some(patience) = self.config.early_stopping_patience {
                if epochs_without_improvement >= patience {
                    info!(
                        "Early stopping at epoch {}: no improvement for {} epochs",
                        epoch, epochs_without_improvement
                    );
                    break;
                }
            }
        }

        history.best_val_accuracy = policy.best_val_acc();
        history.best_epoch = policy.best_epoch();
        self.reporter.on_run_end(&history);

        Ok((model, history))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{EvalTransform, ImageTransform, Split};
    use crate::model::{ModelConfig, ModelVariant};
    use crate::training::checkpoint::MemoryCheckpointSink;
    use burn::backend::Autodiff;
    use burn_ndarray::{NdArray, NdArrayDevice};
    use image::{ImageBuffer, Rgb};
    use std::path::PathBuf;
    use tempfile::TempDir;

    type TestBackend = Autodiff<NdArray<f32>>;

    const SIZE: u32 = 32;

    fn write_samples(dir: &Path, per_class: usize) -> Vec<(PathBuf, usize)> {
        let mut samples = Vec::new();
        for label in 0..2usize {
            let class_dir = dir.join(format!("class_{}", label));
            std::fs::create_dir_all(&class_dir).unwrap();
            for i in 0..per_class {
                let path = class_dir.join(format!("img_{}.png", i));
                let shade = if label == 0 { 30 } else { 220 };
                ImageBuffer::from_fn(SIZE, SIZE, |x, _| Rgb([shade, (x * 4) as u8, shade]))
                    .save(&path)
                    .unwrap();
                samples.push((path, label));
            }
        }
        samples
    }

    fn view(split: Split, samples: Vec<(PathBuf, usize)>) -> BatchedView {
        BatchedView::new(
            split,
            samples,
            ImageTransform::Eval(EvalTransform::new(SIZE)),
            3,
            split == Split::Train,
            7,
        )
    }

    fn model(device: &NdArrayDevice) -> Classifier<TestBackend> {
        ModelConfig::new(ModelVariant::Simple, 2, SIZE as usize)
            .init::<TestBackend>(device)
            .unwrap()
    }

    fn config(epochs: usize) -> TrainingConfig {
        TrainingConfig {
            epochs,
            learning_rate: 1e-3,
            early_stopping_patience: None,
        }
    }

    #[test]
    fn test_history_length_matches_epochs() {
        let tmp = TempDir::new().unwrap();
        let device = NdArrayDevice::Cpu;
        let train = view(Split::Train, write_samples(&tmp.path().join("train"), 3));
        let val = view(Split::Val, write_samples(&tmp.path().join("val"), 1));

        let mut sink = MemoryCheckpointSink::new();
        let trainer = Trainer::<TestBackend>::new(config(2), device, &SilentReporter)
            .with_class_names(vec!["class_0".into(), "class_1".into()]);
        let (_, history) = trainer.train(model(&device), &train, &val, &mut sink).unwrap();

        assert_eq!(history.len(), 2);
        assert_eq!(history.train_losses.len(), 2);
        assert_eq!(history.val_accuracies.len(), 2);
        for metrics in &history.epochs {
            assert!(metrics.is_valid());
            assert!(metrics.train_loss.is_finite());
            assert_eq!(metrics.train_samples, 6);
            assert_eq!(metrics.val_samples, 2);
            assert!((0.0..=1.0).contains(&metrics.val_accuracy));
        }

        // Stored checkpoints only ever improve, and the last is the best epoch
        let stored: Vec<f64> = sink.saved.iter().map(|c| c.val_acc).collect();
        assert!(stored.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(sink.latest().map(|c| c.epoch), history.best_epoch);
        if let Some(checkpoint) = sink.latest() {
            assert_eq!(checkpoint.class_names, vec!["class_0", "class_1"]);
            assert!(!checkpoint.model_bytes().unwrap().is_empty());
        }
    }

    #[test]
    fn test_empty_views_yield_sentinel_epochs() {
        let device = NdArrayDevice::Cpu;
        let train = view(Split::Train, Vec::new());
        let val = view(Split::Val, Vec::new());

        let mut sink = MemoryCheckpointSink::new();
        let trainer = Trainer::<TestBackend>::new(config(3), device, &SilentReporter);
        let (_, history) = trainer.train(model(&device), &train, &val, &mut sink).unwrap();

        assert_eq!(history.len(), 3);
        for metrics in &history.epochs {
            assert!(!metrics.is_valid());
            assert_eq!(metrics.train_loss, 0.0);
            assert_eq!(metrics.val_accuracy, 0.0);
        }
        assert!(sink.saved.is_empty());
        assert!(history.best_epoch.is_none());
    }

    #[test]
    fn test_early_stopping_ends_run() {
        let device = NdArrayDevice::Cpu;
        let train = view(Split::Train, Vec::new());
        let val = view(Split::Val, Vec::new());

        let mut sink = MemoryCheckpointSink::new();
        let config = TrainingConfig {
            early_stopping_patience: Some(2),
            ..config(5)
        };
        let trainer = Trainer::<TestBackend>::new(config, device, &SilentReporter);
        let (_, history) = trainer.train(model(&device), &train, &val, &mut sink).unwrap();

        assert_eq!(history.len(), 2);
    }

    #[test]
    fn test_decode_failure_aborts_training() {
        let tmp = TempDir::new().unwrap();
        let device = NdArrayDevice::Cpu;
        let bogus = tmp.path().join("broken.png");
        std::fs::write(&bogus, b"not an image").unwrap();

        let train = view(Split::Train, vec![(bogus, 0)]);
        let val = view(Split::Val, Vec::new());

        let mut sink = MemoryCheckpointSink::new();
        let trainer = Trainer::<TestBackend>::new(config(1), device, &SilentReporter);
        let result = trainer.train(model(&device), &train, &val, &mut sink);
        assert!(matches!(result, Err(crate::utils::error::GrassfierError::BatchDecode(_))));
    }

    #[test]
    fn test_eval_result_floors_denominator() {
        let empty = EvalResult::new(0, 0);
        assert_eq!(empty.accuracy, 0.0);
        assert_eq!(EvalResult::new(3, 4).accuracy, 0.75);
    }

    #[test]
    fn test_history_save() {
        let tmp = TempDir::new().unwrap();
        let mut history = TrainingHistory::default();
        history.push(EpochMetrics {
            epoch: 1,
            train_loss: 0.7,
            val_accuracy: 0.5,
            train_samples: 10,
            val_samples: 4,
        });
        let path = tmp.path().join("history.json");
        history.save(&path).unwrap();

        let loaded: TrainingHistory =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(loaded, history);
    }
}
