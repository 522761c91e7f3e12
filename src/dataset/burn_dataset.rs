//! Burn integration: items, batches, the normalizing batcher and batched views
//!
//! A [`BatchedView`] owns one split's `(path, label)` samples, its transform and
//! batch size. Iterating it decodes images (optionally on a rayon pool), runs the
//! transform and hands the items to [`ImageBatcher`], which builds normalized
//! `[N, 3, H, W]` tensors.
//!
//! Each item's randomness comes from an RNG seeded by `(seed, epoch, index)`,
//! so the number of decode workers changes throughput but never batch contents.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use burn::data::dataloader::batcher::Batcher;
use burn::prelude::*;
use image::{DynamicImage, ImageReader};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::dataset::augmentation::ImageTransform;
use crate::dataset::split::Split;
use crate::utils::error::{GrassfierError, ItemFailure, Result};

/// Per-channel normalization statistics
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Normalization {
    pub mean: [f32; 3],
    pub std: [f32; 3],
}

impl Normalization {
    /// ImageNet RGB statistics
    pub const IMAGENET: Normalization = Normalization {
        mean: [0.485, 0.456, 0.406],
        std: [0.229, 0.224, 0.225],
    };
}

impl Default for Normalization {
    fn default() -> Self {
        Self::IMAGENET
    }
}

/// A decoded, transformed image ready for batching
#[derive(Clone, Debug)]
pub struct ImageItem {
    /// Image data as flattened CHW float array [3 * H * W] in [0, 1]
    pub image: Vec<f32>,
    /// Class label index
    pub label: usize,
    /// Source path (for error reporting)
    pub path: PathBuf,
}

impl ImageItem {
    /// Decode an image from disk and run the transform on it
    pub fn from_path(
        path: &PathBuf,
        label: usize,
        transform: &ImageTransform,
        rng: &mut ChaCha8Rng,
    ) -> std::result::Result<Self, ItemFailure> {
        let img = decode_image(path).map_err(|reason| ItemFailure {
            path: path.clone(),
            reason,
        })?;

        Ok(Self {
            image: transform.apply(img, rng),
            label,
            path: path.clone(),
        })
    }
}

/// Decode an image, sniffing the format from its content
pub fn decode_image(path: &Path) -> std::result::Result<DynamicImage, String> {
    ImageReader::open(path)
        .and_then(|r| r.with_guessed_format())
        .map_err(|e| e.to_string())?
        .decode()
        .map_err(|e| e.to_string())
}

/// A batch of images for training or evaluation
#[derive(Clone, Debug)]
pub struct ImageBatch<B: Backend> {
    /// Normalized images with shape [batch_size, 3, height, width]
    pub images: Tensor<B, 4>,
    /// Class labels with shape [batch_size]
    pub targets: Tensor<B, 1, Int>,
}

/// Stacks items into tensors and applies channel normalization
#[derive(Clone, Debug)]
pub struct ImageBatcher {
    image_size: usize,
    normalization: Normalization,
}

impl ImageBatcher {
    pub fn new(image_size: usize) -> Self {
        Self {
            image_size,
            normalization: Normalization::IMAGENET,
        }
    }

    pub fn image_size(&self) -> usize {
        self.image_size
    }

    /// Batch on a concrete backend
    pub fn make_batch<B: Backend>(&self, items: Vec<ImageItem>, device: &B::Device) -> ImageBatch<B> {
        <Self as Batcher<B, ImageItem, ImageBatch<B>>>::batch(self, items, device)
    }
}

impl<B: Backend> Batcher<B, ImageItem, ImageBatch<B>> for ImageBatcher {
    fn batch(&self, items: Vec<ImageItem>, device: &B::Device) -> ImageBatch<B> {
        let batch_size = items.len();
        let size = self.image_size;

        let images_data: Vec<f32> = items.iter().flat_map(|item| item.image.iter().copied()).collect();
        let images = Tensor::<B, 4>::from_floats(
            TensorData::new(images_data, [batch_size, 3, size, size]),
            device,
        );

        let mean = Tensor::<B, 4>::from_floats(
            TensorData::new(self.normalization.mean.to_vec(), [1, 3, 1, 1]),
            device,
        );
        let std = Tensor::<B, 4>::from_floats(
            TensorData::new(self.normalization.std.to_vec(), [1, 3, 1, 1]),
            device,
        );
        let images = (images - mean) / std;

        let targets_data: Vec<i64> = items.iter().map(|item| item.label as i64).collect();
        let targets =
            Tensor::<B, 1, Int>::from_data(TensorData::new(targets_data, [batch_size]), device);

        ImageBatch { images, targets }
    }
}

/// Derive the RNG seed for one sample in one epoch
fn item_seed(seed: u64, epoch: usize, index: usize) -> u64 {
    let mut x = seed ^ (epoch as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15);
    x ^= (index as u64).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    x = (x ^ (x >> 30)).wrapping_mul(0x94D0_49BB_1331_11EB);
    x ^ (x >> 31)
}

/// Iterable view over one split
#[derive(Clone)]
pub struct BatchedView {
    split: Split,
    samples: Vec<(PathBuf, usize)>,
    transform: ImageTransform,
    batcher: ImageBatcher,
    batch_size: usize,
    shuffle: bool,
    seed: u64,
    pool: Option<Arc<rayon::ThreadPool>>,
}

impl std::fmt::Debug for BatchedView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchedView")
            .field("split", &self.split)
            .field("len", &self.samples.len())
            .field("batch_size", &self.batch_size)
            .field("shuffle", &self.shuffle)
            .field("workers", &self.pool.as_ref().map_or(0, |p| p.current_num_threads()))
            .finish()
    }
}

impl BatchedView {
    /// Create a view that decodes on the calling thread
    pub fn new(
        split: Split,
        samples: Vec<(PathBuf, usize)>,
        transform: ImageTransform,
        batch_size: usize,
        shuffle: bool,
        seed: u64,
    ) -> Self {
        let batcher = ImageBatcher::new(transform.image_size() as usize);
        Self {
            split,
            samples,
            transform,
            batcher,
            batch_size: batch_size.max(1),
            shuffle,
            seed,
            pool: None,
        }
    }

    /// Decode on a dedicated pool of `num_workers` threads (0 keeps decoding inline)
    pub fn with_workers(mut self, num_workers: usize) -> Result<Self> {
        self.pool = if num_workers == 0 {
            None
        } else {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(num_workers)
                .thread_name(|i| format!("grassfier-decode-{}", i))
                .build()
                .map_err(|e| GrassfierError::Device(format!("failed to start {} decode workers: {}", num_workers, e)))?;
            Some(Arc::new(pool))
        };
        Ok(self)
    }

    pub fn split(&self) -> Split {
        self.split
    }

    pub fn samples(&self) -> &[(PathBuf, usize)] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn num_batches(&self) -> usize {
        self.samples.len().div_ceil(self.batch_size)
    }

    pub fn transform(&self) -> &ImageTransform {
        &self.transform
    }

    pub fn batcher(&self) -> &ImageBatcher {
        &self.batcher
    }

    /// Sample visiting order for an epoch
    pub fn epoch_order(&self, epoch: usize) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.samples.len()).collect();
        if self.shuffle {
            let mut rng = ChaCha8Rng::seed_from_u64(item_seed(self.seed, epoch, usize::MAX));
            order.shuffle(&mut rng);
        }
        order
    }

    /// Decode and transform the given samples, preserving their order.
    ///
    /// Every failure is collected; any failure fails the whole call.
    pub fn load_items(&self, indices: &[usize], epoch: usize) -> Result<Vec<ImageItem>> {
        let load = |&index: &usize| {
            let (path, label) = &self.samples[index];
            let mut rng = ChaCha8Rng::seed_from_u64(item_seed(self.seed, epoch, index));
            ImageItem::from_path(path, *label, &self.transform, &mut rng)
        };

        let results: Vec<std::result::Result<ImageItem, ItemFailure>> = match &self.pool {
            Some(pool) => pool.install(|| indices.par_iter().map(load).collect()),
            None => indices.iter().map(load).collect(),
        };

        let mut items = Vec::with_capacity(results.len());
        let mut failures = Vec::new();
        for result in results {
            match result {
                Ok(item) => items.push(item),
                Err(failure) => failures.push(failure),
            }
        }

        if failures.is_empty() {
            Ok(items)
        } else {
            Err(GrassfierError::BatchDecode(failures))
        }
    }

    /// Iterate the batches of one epoch on `device`
    pub fn batches<B: Backend>(&self, device: &B::Device, epoch: usize) -> BatchIter<'_, B> {
        debug!(
            "{} view: epoch {} over {} samples in {} batches",
            self.split,
            epoch,
            self.len(),
            self.num_batches()
        );
        BatchIter {
            view: self,
            order: self.epoch_order(epoch),
            cursor: 0,
            epoch,
            device: device.clone(),
        }
    }
}

/// Iterator over one epoch of a [`BatchedView`]
pub struct BatchIter<'a, B: Backend> {
    view: &'a BatchedView,
    order: Vec<usize>,
    cursor: usize,
    epoch: usize,
    device: B::Device,
}

impl<B: Backend> Iterator for BatchIter<'_, B> {
    type Item = Result<ImageBatch<B>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor >= self.order.len() {
            return None;
        }

        let end = (self.cursor + self.view.batch_size).min(self.order.len());
        let indices = &self.order[self.cursor..end];
        self.cursor = end;

        Some(
            self.view
                .load_items(indices, self.epoch)
                .map(|items| self.view.batcher.make_batch::<B>(items, &self.device)),
        )
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = (self.order.len() - self.cursor).div_ceil(self.view.batch_size);
        (remaining, Some(remaining))
    }
}
