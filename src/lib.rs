//! # Grassfier
//!
//! Grass and pasture species image classification with the Burn framework.
//!
//! The pipeline runs in four stages:
//!
//! 1. **Split**: a raw `<class>/<image>` collection is shuffled per class and copied
//!    into `train/`, `val/` and `test/` trees.
//! 2. **Load**: the processed tree becomes three batched views sharing one class index.
//! 3. **Build**: a from-scratch CNN or a ResNet-18 transfer model is created for that index.
//! 4. **Train**: the epoch loop keeps the best validation checkpoint and writes a final model.
//!
//! ## Modules
//!
//! - `dataset`: splitting, loading, augmentation and batching
//! - `model`: the two classifier variants and their configuration
//! - `training`: epoch loop, checkpoints, progress reporting, the full pipeline
//! - `inference`: prediction from saved artifacts and upload validation
//! - `backend`: device selection
//! - `config`: TOML pipeline configuration
//! - `utils`: errors and logging
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use grassfier::backend::{cpu_device, CpuTrainingBackend, ComputeDevice};
//! use grassfier::config::PipelineConfig;
//! use grassfier::training::{run_training, TracingReporter};
//!
//! let config = PipelineConfig::load(Some("grassfier.toml".as_ref()))?;
//! let report = run_training::<CpuTrainingBackend>(
//!     &config,
//!     ComputeDevice::Cpu,
//!     &cpu_device(),
//!     &TracingReporter::default(),
//! )?;
//! println!("test accuracy: {:.2}%", report.test.accuracy * 100.0);
//! ```

pub mod backend;
pub mod config;
pub mod dataset;
pub mod inference;
pub mod model;
pub mod training;
pub mod utils;

// Re-export commonly used items for convenience
pub use config::PipelineConfig;
pub use dataset::{load_datasets, prepare_dataset, BatchedView, ClassIndex, DataViews, SplitManifest, SplitRatios};
pub use inference::{Prediction, Predictor, UploadPolicy};
pub use model::{Classifier, ModelConfig, ModelVariant};
pub use training::{run_training, Checkpoint, Trainer, TrainingConfig, TrainingHistory, TrainingReport};
pub use utils::error::{GrassfierError, Result};

/// Default side length of the square model input
pub const IMAGE_SIZE: usize = 224;

/// Version of the library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
