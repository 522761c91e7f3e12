//! Best-model checkpointing.
//!
//! A single "best" slot: a checkpoint is written only when validation accuracy
//! strictly exceeds every earlier epoch, and each write replaces the previous file.
//!
//! The on-disk record is JSON. Model and optimizer state are Burn records
//! serialized with `BinBytesRecorder` (full precision) and embedded as base64.

use std::fs;
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use burn::{
    module::Module,
    record::{BinBytesRecorder, FullPrecisionSettings, Record, Recorder},
    tensor::backend::Backend,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::utils::error::{GrassfierError, Result};

/// File name of the best checkpoint inside the output directory
pub const BEST_CHECKPOINT_FILE: &str = "best_model.json";

/// Serialize any Burn record to bytes
pub fn record_to_bytes<B: Backend, R: Record<B>>(record: R) -> Result<Vec<u8>> {
    let recorder = BinBytesRecorder::<FullPrecisionSettings>::default();
    Ok(Recorder::<B>::record(&recorder, record, ())?)
}

/// Inverse of [`record_to_bytes`]
pub fn record_from_bytes<B: Backend, R: Record<B>>(bytes: Vec<u8>, device: &B::Device) -> Result<R> {
    let recorder = BinBytesRecorder::<FullPrecisionSettings>::default();
    Ok(Recorder::<B>::load(&recorder, bytes, device)?)
}

/// Snapshot of the best epoch so far
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// 1-based epoch that produced this snapshot
    pub epoch: usize,
    /// Validation accuracy in [0, 1]
    pub val_acc: f64,
    /// Base64 model record
    pub model_state: String,
    /// Base64 optimizer record
    pub optimizer_state: String,
    /// RFC 3339
    pub timestamp: String,
    /// Label space the model was trained on
    pub class_names: Vec<String>,
}

impl Checkpoint {
    pub fn new(
        epoch: usize,
        val_acc: f64,
        model_state: &[u8],
        optimizer_state: &[u8],
        class_names: Vec<String>,
    ) -> Self {
        Self {
            epoch,
            val_acc,
            model_state: STANDARD.encode(model_state),
            optimizer_state: STANDARD.encode(optimizer_state),
            timestamp: Utc::now().to_rfc3339(),
            class_names,
        }
    }

    pub fn model_bytes(&self) -> Result<Vec<u8>> {
        Ok(STANDARD.decode(&self.model_state)?)
    }

    pub fn optimizer_bytes(&self) -> Result<Vec<u8>> {
        Ok(STANDARD.decode(&self.optimizer_state)?)
    }

    /// Load the stored parameters into `model`
    pub fn restore_model<B: Backend, M: Module<B>>(&self, model: M, device: &B::Device) -> Result<M> {
        let record = record_from_bytes::<B, M::Record>(self.model_bytes()?, device)?;
        Ok(model.load_record(record))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| GrassfierError::Checkpoint(format!("failed to serialize checkpoint: {}", e)))?;
        fs::write(path, json)?;
        debug!("Checkpoint for epoch {} written to {:?}", self.epoch, path);
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let json = fs::read_to_string(path).map_err(|e| {
            GrassfierError::Checkpoint(format!("failed to read {}: {}", path.display(), e))
        })?;
        let checkpoint: Checkpoint = serde_json::from_str(&json)
            .map_err(|e| GrassfierError::Checkpoint(format!("failed to parse checkpoint: {}", e)))?;
        info!(
            "Loaded checkpoint from {:?} (epoch {}, val acc {:.4})",
            path, checkpoint.epoch, checkpoint.val_acc
        );
        Ok(checkpoint)
    }
}

/// Destination of best checkpoints
pub trait CheckpointSink {
    fn save(&mut self, checkpoint: &Checkpoint) -> Result<()>;
}

/// Writes to one fixed path, overwriting
#[derive(Debug, Clone)]
pub struct FileCheckpointSink {
    path: PathBuf,
}

impl FileCheckpointSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `best_model.json` inside `output_dir`
    pub fn in_dir(output_dir: &Path) -> Self {
        Self::new(output_dir.join(BEST_CHECKPOINT_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CheckpointSink for FileCheckpointSink {
    fn save(&mut self, checkpoint: &Checkpoint) -> Result<()> {
        checkpoint.save(&self.path)
    }
}

/// Keeps every written checkpoint in memory
#[derive(Debug, Default, Clone)]
pub struct MemoryCheckpointSink {
    pub saved: Vec<Checkpoint>,
}

impl MemoryCheckpointSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Epochs in write order
    pub fn epochs(&self) -> Vec<usize> {
        self.saved.iter().map(|c| c.epoch).collect()
    }

    /// The checkpoint a fixed-path sink would currently hold
    pub fn latest(&self) -> Option<&Checkpoint> {
        self.saved.last()
    }
}

impl CheckpointSink for MemoryCheckpointSink {
    fn save(&mut self, checkpoint: &Checkpoint) -> Result<()> {
        self.saved.push(checkpoint.clone());
        Ok(())
    }
}

/// Tracks the running best validation accuracy
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BestCheckpointPolicy {
    best_val_acc: f64,
    best_epoch: Option<usize>,
}

impl Default for BestCheckpointPolicy {
    fn default() -> Self {
        Self {
            best_val_acc: 0.0,
            best_epoch: None,
        }
    }
}

impl BestCheckpointPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn best_val_acc(&self) -> f64 {
        self.best_val_acc
    }

    pub fn best_epoch(&self) -> Option<usize> {
        self.best_epoch
    }

    /// Record an epoch's accuracy; true only on strict improvement
    pub fn observe(&mut self, epoch: usize, val_acc: f64) -> bool {
        if val_acc > self.best_val_acc {
            self.best_val_acc = val_acc;
            self.best_epoch = Some(epoch);
            true
        } else {
            false
        }
    }

    /// Observe `val_acc` and, on improvement, build and write a checkpoint.
    ///
    /// `build` is only called when a write will happen. Returns whether it did.
    pub fn checkpoint_if_improved<F>(
        &mut self,
        epoch: usize,
        val_acc: f64,
        sink: &mut dyn CheckpointSink,
        build: F,
    ) -> Result<bool>
    where
        F: FnOnce() -> Result<Checkpoint>,
    {
        if !self.observe(epoch, val_acc) {
            return Ok(false);
        }
        sink.save(&build()?)?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::nn::{Linear, LinearConfig};
    use burn::tensor::Tensor;
    use burn_ndarray::{NdArray, NdArrayDevice};
    use tempfile::TempDir;

    type TestBackend = NdArray<f32>;

    fn dummy(epoch: usize, val_acc: f64) -> Result<Checkpoint> {
        Ok(Checkpoint::new(epoch, val_acc, &[1, 2, 3], &[4], vec!["a".into()]))
    }

    #[test]
    fn test_writes_only_on_strict_improvement() {
        let mut policy = BestCheckpointPolicy::new();
        let mut sink = MemoryCheckpointSink::new();

        for (i, acc) in [0.40, 0.55, 0.50, 0.61].into_iter().enumerate() {
            let epoch = i + 1;
            policy
                .checkpoint_if_improved(epoch, acc, &mut sink, || dummy(epoch, acc))
                .unwrap();
        }

        assert_eq!(sink.epochs(), vec![1, 2, 4]);
        assert_eq!(policy.best_epoch(), Some(4));
        assert_eq!(sink.latest().unwrap().val_acc, 0.61);
    }

    #[test]
    fn test_tie_does_not_write() {
        let mut policy = BestCheckpointPolicy::new();
        let mut sink = MemoryCheckpointSink::new();

        for (i, acc) in [0.5, 0.5, 0.5].into_iter().enumerate() {
            let epoch = i + 1;
            policy
                .checkpoint_if_improved(epoch, acc, &mut sink, || dummy(epoch, acc))
                .unwrap();
        }
        assert_eq!(sink.epochs(), vec![1]);
    }

    #[test]
    fn test_zero_accuracy_never_checkpoints() {
        let mut policy = BestCheckpointPolicy::new();
        assert!(!policy.observe(1, 0.0));
        assert!(policy.best_epoch().is_none());
    }

    #[test]
    fn test_stored_accuracy_is_non_decreasing() {
        let mut policy = BestCheckpointPolicy::new();
        let mut sink = MemoryCheckpointSink::new();
        let accs = [0.1, 0.3, 0.2, 0.3, 0.05, 0.7, 0.69];
        for (i, acc) in accs.into_iter().enumerate() {
            policy
                .checkpoint_if_improved(i + 1, acc, &mut sink, || dummy(i + 1, acc))
                .unwrap();
        }
        let stored: Vec<f64> = sink.saved.iter().map(|c| c.val_acc).collect();
        assert!(stored.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_file_sink_overwrites_single_slot() {
        let tmp = TempDir::new().unwrap();
        let mut sink = FileCheckpointSink::in_dir(tmp.path());

        sink.save(&dummy(1, 0.4).unwrap()).unwrap();
        sink.save(&dummy(2, 0.6).unwrap()).unwrap();

        let loaded = Checkpoint::load(sink.path()).unwrap();
        assert_eq!(loaded.epoch, 2);
        assert_eq!(loaded.model_bytes().unwrap(), vec![1, 2, 3]);
        assert_eq!(loaded.optimizer_bytes().unwrap(), vec![4]);
        assert_eq!(std::fs::read_dir(tmp.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_restore_model_from_record_bytes() {
        let device = NdArrayDevice::Cpu;
        let source: Linear<TestBackend> = LinearConfig::new(4, 2).init(&device);
        let bytes = record_to_bytes::<TestBackend, _>(source.clone().into_record()).unwrap();
        let checkpoint = Checkpoint::new(3, 0.9, &bytes, &[], vec![]);

        let fresh: Linear<TestBackend> = LinearConfig::new(4, 2).init(&device);
        let restored = checkpoint.restore_model::<TestBackend, _>(fresh, &device).unwrap();

        let input = Tensor::<TestBackend, 2>::ones([1, 4], &device);
        let expected: Vec<f32> = source.forward(input.clone()).into_data().to_vec().unwrap();
        let actual: Vec<f32> = restored.forward(input).into_data().to_vec().unwrap();
        assert_eq!(expected, actual);
    }

    #[test]
    fn test_load_missing_file_is_checkpoint_error() {
        let result = Checkpoint::load(Path::new("/no/such/best_model.json"));
        assert!(matches!(result, Err(GrassfierError::Checkpoint(_))));
    }
}
