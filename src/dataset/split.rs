//! Train/validation/test splitting of a raw per-class image collection
//!
//! The raw collection is laid out as one directory per class:
//!
//! ```text
//! data/raw/
//! ├── perennial_ryegrass/
//! │   ├── IMG_0001.jpg
//! │   └── IMG_0002.png
//! └── white_clover/
//!     └── ...
//! ```
//!
//! Each class is shuffled independently and cut at `floor(n * train)` and
//! `floor(n * val)`; whatever is left becomes the test split. The resulting
//! [`SplitManifest`] is then copied onto disk as
//! `<processed>/<split>/<class>/<file>` by [`materialize`].
//!
//! Classes are visited in sorted order and images are sorted before
//! shuffling, so a fixed seed reproduces the same manifest on any machine.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use indicatif::{ProgressBar, ProgressStyle};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::utils::error::{GrassfierError, Result};

/// File extensions accepted as images (compared case-insensitively)
pub const IMAGE_EXTENSIONS: [&str; 8] = ["png", "jpg", "jpeg", "bmp", "gif", "webp", "tiff", "jfif"];

/// File name of the manifest written next to the processed dataset
pub const MANIFEST_FILE: &str = "split_manifest.json";

const RATIO_TOLERANCE: f64 = 1e-6;

/// Returns true if the path has an allowed image extension
pub fn is_image_file(path: &Path) -> bool {
    path.extension()
        .map(|ext| {
            let ext = ext.to_string_lossy().to_lowercase();
            IMAGE_EXTENSIONS.contains(&ext.as_str())
        })
        .unwrap_or(false)
}

/// One of the three dataset splits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Split {
    Train,
    Val,
    Test,
}

impl Split {
    pub const ALL: [Split; 3] = [Split::Train, Split::Val, Split::Test];

    /// Directory name used under the processed root
    pub fn as_str(&self) -> &'static str {
        match self {
            Split::Train => "train",
            Split::Val => "val",
            Split::Test => "test",
        }
    }
}

impl std::fmt::Display for Split {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Train/val/test fractions
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SplitRatios {
    pub train: f64,
    pub val: f64,
    pub test: f64,
}

impl Default for SplitRatios {
    fn default() -> Self {
        Self {
            train: 0.7,
            val: 0.2,
            test: 0.1,
        }
    }
}

impl SplitRatios {
    /// Create validated ratios
    pub fn new(train: f64, val: f64, test: f64) -> Result<Self> {
        let ratios = Self { train, val, test };
        ratios.validate()?;
        Ok(ratios)
    }

    /// Each ratio must lie in [0, 1] and the three must sum to 1.0
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [("train", self.train), ("val", self.val), ("test", self.test)] {
            if !(0.0..=1.0).contains(&value) {
                return Err(GrassfierError::Config(format!(
                    "{} ratio must be between 0.0 and 1.0, got {}",
                    name, value
                )));
            }
        }

        let sum = self.train + self.val + self.test;
        if (sum - 1.0).abs() > RATIO_TOLERANCE {
            return Err(GrassfierError::Config(format!(
                "split ratios must sum to 1.0, got {:.6} ({} + {} + {})",
                sum, self.train, self.val, self.test
            )));
        }

        Ok(())
    }

    /// Number of train and val images for a class of `n` images.
    /// The test split receives the remainder.
    pub fn counts(&self, n: usize) -> (usize, usize, usize) {
        let n_train = ((n as f64 * self.train) + RATIO_TOLERANCE).floor() as usize;
        let n_train = n_train.min(n);
        let n_val = ((n as f64 * self.val) + RATIO_TOLERANCE).floor() as usize;
        let n_val = n_val.min(n - n_train);
        (n_train, n_val, n - n_train - n_val)
    }
}

/// Images found under the raw root, grouped by class
#[derive(Debug, Clone)]
pub struct RawImageCollection {
    pub root: PathBuf,
    /// Class name to sorted image paths; only classes with at least one image
    pub classes: BTreeMap<String, Vec<PathBuf>>,
    /// Class directories that held no allowed images
    pub skipped_classes: Vec<String>,
}

impl RawImageCollection {
    pub fn num_images(&self) -> usize {
        self.classes.values().map(Vec::len).sum()
    }
}

/// Enumerate class directories and their images under `raw_root`.
///
/// Non-directories at the top level are ignored. A class without any allowed
/// image is skipped with a warning. Finding no class directory at all is a
/// configuration error.
pub fn discover_raw_collection<P: AsRef<Path>>(raw_root: P) -> Result<RawImageCollection> {
    let root = raw_root.as_ref().to_path_buf();
    info!("Scanning raw collection at {:?}", root);

    if !root.is_dir() {
        return Err(GrassfierError::Config(format!(
            "raw data directory does not exist: {}",
            root.display()
        )));
    }

    let mut class_dirs: Vec<(String, PathBuf)> = Vec::new();
    for entry in fs::read_dir(&root)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            class_dirs.push((entry.file_name().to_string_lossy().to_string(), entry.path()));
        }
    }
    class_dirs.sort();

    if class_dirs.is_empty() {
        warn!("No class directories found in {:?}", root);
        return Err(GrassfierError::Config(format!(
            "no class directories found in {}",
            root.display()
        )));
    }

    let mut classes = BTreeMap::new();
    let mut skipped_classes = Vec::new();

    for (class_name, class_dir) in class_dirs {
        let mut images: Vec<PathBuf> = WalkDir::new(&class_dir)
            .min_depth(1)
            .max_depth(1)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| e.into_path())
            .filter(|p| is_image_file(p))
            .collect();
        images.sort();

        if images.is_empty() {
            warn!("Class '{}' has no valid images, skipping", class_name);
            skipped_classes.push(class_name);
            continue;
        }

        debug!("Class '{}': {} images", class_name, images.len());
        classes.insert(class_name, images);
    }

    info!(
        "Found {} classes with images ({} skipped)",
        classes.len(),
        skipped_classes.len()
    );

    Ok(RawImageCollection {
        root,
        classes,
        skipped_classes,
    })
}

/// Which files go to which split, per class
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SplitManifest {
    pub ratios: SplitRatios,
    pub seed: Option<u64>,
    pub train: BTreeMap<String, Vec<PathBuf>>,
    pub val: BTreeMap<String, Vec<PathBuf>>,
    pub test: BTreeMap<String, Vec<PathBuf>>,
    /// Classes that contributed no images to any split
    #[serde(default)]
    pub skipped_classes: Vec<String>,
}

impl SplitManifest {
    /// Per-class lists for one split
    pub fn split(&self, split: Split) -> &BTreeMap<String, Vec<PathBuf>> {
        match split {
            Split::Train => &self.train,
            Split::Val => &self.val,
            Split::Test => &self.test,
        }
    }

    /// Class names in manifest order, including skipped ones
    pub fn class_names(&self) -> Vec<String> {
        self.train.keys().cloned().collect()
    }

    /// Total images assigned to one class across the three splits
    pub fn class_total(&self, class_name: &str) -> usize {
        Split::ALL
            .iter()
            .map(|s| self.split(*s).get(class_name).map_or(0, Vec::len))
            .sum()
    }

    pub fn stats(&self) -> SplitSummary {
        let mut per_class = BTreeMap::new();
        for class_name in self.class_names() {
            let counts = [
                self.train.get(&class_name).map_or(0, Vec::len),
                self.val.get(&class_name).map_or(0, Vec::len),
                self.test.get(&class_name).map_or(0, Vec::len),
            ];
            per_class.insert(class_name, counts);
        }

        SplitSummary {
            train: per_class.values().map(|c| c[0]).sum(),
            val: per_class.values().map(|c| c[1]).sum(),
            test: per_class.values().map(|c| c[2]).sum(),
            per_class,
            skipped_classes: self.skipped_classes.clone(),
        }
    }

    /// Save the manifest as pretty-printed JSON
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let json = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }
}

/// Shuffle every class and cut it into train/val/test.
///
/// `seed = None` draws the shuffle from OS entropy, which makes the split
/// non-reproducible.
pub fn split_collection(
    collection: &RawImageCollection,
    ratios: &SplitRatios,
    seed: Option<u64>,
) -> Result<SplitManifest> {
    ratios.validate()?;

    let mut rng = match seed {
        Some(seed) => ChaCha8Rng::seed_from_u64(seed),
        None => ChaCha8Rng::from_entropy(),
    };

    let mut manifest = SplitManifest {
        ratios: *ratios,
        seed,
        train: BTreeMap::new(),
        val: BTreeMap::new(),
        test: BTreeMap::new(),
        skipped_classes: collection.skipped_classes.clone(),
    };

    for (class_name, images) in &collection.classes {
        let mut shuffled = images.clone();
        shuffled.shuffle(&mut rng);

        let (n_train, n_val, _) = ratios.counts(shuffled.len());
        let test = shuffled.split_off(n_train + n_val);
        let val = shuffled.split_off(n_train);

        manifest.train.insert(class_name.clone(), shuffled);
        manifest.val.insert(class_name.clone(), val);
        manifest.test.insert(class_name.clone(), test);
    }

    for class_name in &collection.skipped_classes {
        manifest.train.insert(class_name.clone(), Vec::new());
        manifest.val.insert(class_name.clone(), Vec::new());
        manifest.test.insert(class_name.clone(), Vec::new());
    }

    Ok(manifest)
}

/// Image counts per split and per class
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SplitSummary {
    pub train: usize,
    pub val: usize,
    pub test: usize,
    /// Class name to [train, val, test] counts
    pub per_class: BTreeMap<String, [usize; 3]>,
    pub skipped_classes: Vec<String>,
}

impl SplitSummary {
    pub fn total(&self) -> usize {
        self.train + self.val + self.test
    }
}

impl std::fmt::Display for SplitSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let total = self.total().max(1) as f64;
        writeln!(f, "Dataset Split Statistics:")?;
        writeln!(f, "  Total images: {}", self.total())?;
        writeln!(f, "  Classes: {}", self.per_class.len())?;
        writeln!(f, "  Train: {} ({:.1}%)", self.train, 100.0 * self.train as f64 / total)?;
        writeln!(f, "  Val:   {} ({:.1}%)", self.val, 100.0 * self.val as f64 / total)?;
        writeln!(f, "  Test:  {} ({:.1}%)", self.test, 100.0 * self.test as f64 / total)?;
        for (class_name, [train, val, test]) in &self.per_class {
            writeln!(f, "    {:40} {:5} {:5} {:5}", class_name, train, val, test)?;
        }
        if !self.skipped_classes.is_empty() {
            writeln!(f, "  Skipped (no images): {}", self.skipped_classes.join(", "))?;
        }
        Ok(())
    }
}

/// Number of files copied per split
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaterializeSummary {
    pub train: usize,
    pub val: usize,
    pub test: usize,
}

impl MaterializeSummary {
    pub fn total(&self) -> usize {
        self.train + self.val + self.test
    }

    fn bump(&mut self, split: Split) {
        match split {
            Split::Train => self.train += 1,
            Split::Val => self.val += 1,
            Split::Test => self.test += 1,
        }
    }
}

/// Copy the manifest onto disk as `<processed_root>/<split>/<class>/<file>`.
///
/// Files are copied, never moved. The destination is not cleared first, so
/// running twice over the same root without cleaning accumulates files.
/// Classes with no images get no directories. Any I/O failure aborts.
pub fn materialize(manifest: &SplitManifest, processed_root: &Path) -> Result<MaterializeSummary> {
    let total: usize = Split::ALL
        .iter()
        .map(|s| manifest.split(*s).values().map(Vec::len).sum::<usize>())
        .sum();

    let pb = ProgressBar::new(total as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("  {spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} copying")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-"),
    );

    let mut summary = MaterializeSummary::default();

    for split in Split::ALL {
        for (class_name, files) in manifest.split(split) {
            if manifest.class_total(class_name) == 0 {
                continue;
            }

            let dest_dir = processed_root.join(split.as_str()).join(class_name);
            fs::create_dir_all(&dest_dir)?;

            for src in files {
                let file_name = src.file_name().ok_or_else(|| {
                    GrassfierError::Dataset(format!("not a file path: {}", src.display()))
                })?;
                fs::copy(src, dest_dir.join(file_name))?;
                summary.bump(split);
                pb.inc(1);
            }
        }
    }

    pb.finish_and_clear();
    info!(
        "Copied {} files into {:?} (train {}, val {}, test {})",
        summary.total(),
        processed_root,
        summary.train,
        summary.val,
        summary.test
    );

    Ok(summary)
}

/// Outcome of [`prepare_dataset`]
#[derive(Debug, Clone)]
pub struct PrepareReport {
    pub manifest: SplitManifest,
    pub copied: MaterializeSummary,
    pub manifest_path: PathBuf,
}

/// Discover, split and copy a raw collection in one go.
///
/// Configuration problems are reported before anything is written.
pub fn prepare_dataset(
    raw_root: &Path,
    processed_root: &Path,
    ratios: &SplitRatios,
    seed: Option<u64>,
) -> Result<PrepareReport> {
    ratios.validate()?;
    let collection = discover_raw_collection(raw_root)?;
    let manifest = split_collection(&collection, ratios, seed)?;

    let copied = materialize(&manifest, processed_root)?;
    let manifest_path = processed_root.join(MANIFEST_FILE);
    manifest.save(&manifest_path)?;

    Ok(PrepareReport {
        manifest,
        copied,
        manifest_path,
    })
}
