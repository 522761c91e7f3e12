//! Dataset module
//!
//! - `split`: partition a raw per-class collection into train/val/test and copy it to disk
//! - `loader`: discover the processed tree and build batched views plus the class index
//! - `augmentation`: train and eval image transforms
//! - `burn_dataset`: items, batches and the normalizing batcher for Burn

pub mod augmentation;
pub mod burn_dataset;
pub mod loader;
pub mod split;

pub use augmentation::{AugmentationConfig, EvalTransform, ImageTransform, TrainTransform};
pub use burn_dataset::{BatchedView, ImageBatch, ImageBatcher, ImageItem, Normalization};
pub use loader::{load_datasets, ClassIndex, DataViews, DatasetStats, CLASS_NAMES_FILE};
pub use split::{
    discover_raw_collection, materialize, prepare_dataset, split_collection, RawImageCollection,
    Split, SplitManifest, SplitRatios,
};
