//! Processed Dataset Loader
//!
//! Reads the `<processed>/<split>/<class>/<file>` tree written by the splitter
//! and builds one [`BatchedView`] per split.
//!
//! The class list is the sorted union of class directories across all three
//! splits. Its order defines the label space of the classifier output, so it is
//! persisted next to the model as `class_names.json`.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use colored::Colorize;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::config::DataConfig;
use crate::dataset::augmentation::{EvalTransform, ImageTransform, TrainTransform};
use crate::dataset::burn_dataset::BatchedView;
use crate::dataset::split::{is_image_file, Split};
use crate::utils::error::{GrassfierError, Result, ResultExt};

/// File name of the persisted class list
pub const CLASS_NAMES_FILE: &str = "class_names.json";

/// Ordered class names; position is the label index
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassIndex {
    names: Vec<String>,
}

impl ClassIndex {
    /// Build from names, sorting them lexicographically
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let set: BTreeSet<String> = names.into_iter().map(Into::into).collect();
        Self {
            names: set.into_iter().collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Position of `name`; a loaded list keeps its stored order, so no sorted lookup
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }

    pub fn name_of(&self, index: usize) -> Option<&str> {
        self.names.get(index).map(String::as_str)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(&self.names)?)?;
        Ok(())
    }

    /// Load a persisted list, keeping its stored order
    pub fn load(path: &Path) -> Result<Self> {
        let names: Vec<String> = serde_json::from_str(&fs::read_to_string(path)?)?;
        Ok(Self { names })
    }
}

/// Train/val/test views sharing one label space
#[derive(Debug, Clone)]
pub struct DataViews {
    pub train: BatchedView,
    pub val: BatchedView,
    pub test: BatchedView,
    pub classes: ClassIndex,
}

impl DataViews {
    pub fn view(&self, split: Split) -> &BatchedView {
        match split {
            Split::Train => &self.train,
            Split::Val => &self.val,
            Split::Test => &self.test,
        }
    }
}

/// Class directories directly under a split directory
fn class_dirs(split_dir: &Path) -> Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in fs::read_dir(split_dir)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            names.push(entry.file_name().to_string_lossy().to_string());
        }
    }
    names.sort();
    Ok(names)
}

fn split_dir(processed_root: &Path, split: Split) -> Result<PathBuf> {
    let dir = processed_root.join(split.as_str());
    if !dir.is_dir() {
        return Err(GrassfierError::Dataset(format!(
            "missing split directory: {}",
            dir.display()
        )));
    }
    Ok(dir)
}

/// Discover the shared class list of a processed dataset
pub fn discover_classes(processed_root: &Path) -> Result<ClassIndex> {
    let mut names = BTreeSet::new();
    for split in Split::ALL {
        names.extend(class_dirs(&split_dir(processed_root, split)?)?);
    }
    Ok(ClassIndex::new(names))
}

/// `(path, label)` pairs for one split, ordered by class then file name
pub fn collect_samples(
    processed_root: &Path,
    split: Split,
    classes: &ClassIndex,
) -> Result<Vec<(PathBuf, usize)>> {
    let dir = split_dir(processed_root, split)?;
    let mut samples = Vec::new();

    for class_name in class_dirs(&dir)? {
        let label = classes
            .index_of(&class_name)
            .with_context(|| format!("class '{}' is not in the class index", class_name))?;

        let mut files: Vec<PathBuf> = WalkDir::new(dir.join(&class_name))
            .min_depth(1)
            .max_depth(1)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| e.into_path())
            .filter(|p| is_image_file(p))
            .collect();
        files.sort();

        debug!("{} / '{}' (label {}): {} images", split, class_name, label, files.len());
        samples.extend(files.into_iter().map(|p| (p, label)));
    }

    Ok(samples)
}

/// Build the three views over a processed dataset.
///
/// `num_workers` is the resolved decode thread count (see
/// [`crate::backend::default_num_workers`] when the config leaves it unset).
pub fn load_datasets(processed_root: &Path, config: &DataConfig, num_workers: usize) -> Result<DataViews> {
    config.validate()?;
    info!("Loading processed dataset from {:?}", processed_root);

    let classes = discover_classes(processed_root)?;
    if classes.is_empty() {
        return Err(GrassfierError::Dataset(format!(
            "no classes found under {}",
            processed_root.display()
        )));
    }

    let image_size = config.image_size as u32;
    let resize_size = config.resize_size.unwrap_or(config.image_size) as u32;
    let eval = ImageTransform::Eval(EvalTransform::with_resize(image_size, resize_size));
    let train = ImageTransform::Train(TrainTransform::new(config.augmentation.clone(), image_size));

    let build = |split: Split, transform: ImageTransform, shuffle: bool| -> Result<BatchedView> {
        let samples = collect_samples(processed_root, split, &classes)?;
        if samples.is_empty() {
            warn!("{} split is empty", split);
        }
        BatchedView::new(split, samples, transform, config.batch_size, shuffle, config.seed)
            .with_workers(num_workers)
    };

    let views = DataViews {
        train: build(Split::Train, train, true)?,
        val: build(Split::Val, eval.clone(), false)?,
        test: build(Split::Test, eval, false)?,
        classes: classes.clone(),
    };

    info!(
        "{} classes | train {} | val {} | test {} | batch size {} | workers {}",
        classes.len(),
        views.train.len(),
        views.val.len(),
        views.test.len(),
        config.batch_size,
        num_workers
    );

    Ok(views)
}

/// Per-split, per-class image counts of a processed dataset
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetStats {
    pub classes: Vec<String>,
    /// Split name to per-class counts, index-aligned with `classes`
    pub counts: BTreeMap<Split, Vec<usize>>,
}

impl DatasetStats {
    pub fn from_processed(processed_root: &Path) -> Result<Self> {
        let classes = discover_classes(processed_root)?;
        let mut counts = BTreeMap::new();

        for split in Split::ALL {
            let mut per_class = vec![0usize; classes.len()];
            for (_, label) in collect_samples(processed_root, split, &classes)? {
                per_class[label] += 1;
            }
            counts.insert(split, per_class);
        }

        Ok(Self {
            classes: classes.names().to_vec(),
            counts,
        })
    }

    pub fn split_total(&self, split: Split) -> usize {
        self.counts.get(&split).map_or(0, |c| c.iter().sum())
    }

    /// Print statistics to console
    pub fn print(&self) {
        println!("\n{}", "Dataset Statistics:".cyan().bold());
        for split in Split::ALL {
            println!("  {:5}: {} images", split.as_str(), self.split_total(split));
        }
        println!("\n  {:40} {:>6} {:>6} {:>6}", "class", "train", "val", "test");
        for (idx, name) in self.classes.iter().enumerate() {
            let get = |s: Split| self.counts.get(&s).map_or(0, |c| c[idx]);
            println!(
                "  {:40} {:>6} {:>6} {:>6}",
                name,
                get(Split::Train),
                get(Split::Val),
                get(Split::Test)
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgb};
    use tempfile::TempDir;

    fn write_png(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        ImageBuffer::from_pixel(12, 12, Rgb([10u8, 200, 30])).save(path).unwrap();
    }

    fn build_processed(layout: &[(Split, &str, usize)]) -> TempDir {
        let tmp = TempDir::new().unwrap();
        for split in Split::ALL {
            fs::create_dir_all(tmp.path().join(split.as_str())).unwrap();
        }
        for (split, class_name, count) in layout {
            for i in 0..*count {
                write_png(&tmp.path().join(split.as_str()).join(class_name).join(format!("{}.png", i)));
            }
        }
        tmp
    }

    #[test]
    fn test_class_order_is_lexicographic() {
        let index = ClassIndex::new(["white_clover", "cocksfoot", "ryegrass"]);
        assert_eq!(index.name_of(0), Some("cocksfoot"));
        assert_eq!(index.index_of("white_clover"), Some(2));
        assert_eq!(index.index_of("fescue"), None);
    }

    #[test]
    fn test_class_index_roundtrip_keeps_order() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(CLASS_NAMES_FILE);
        let index = ClassIndex::new(["b", "a"]);
        index.save(&path).unwrap();
        assert_eq!(ClassIndex::load(&path).unwrap().names(), &["a", "b"]);
    }

    #[test]
    fn test_loaded_order_drives_lookups() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(CLASS_NAMES_FILE);
        fs::write(&path, r#"["ryegrass", "cocksfoot", "white_clover"]"#).unwrap();

        let index = ClassIndex::load(&path).unwrap();
        assert_eq!(index.index_of("ryegrass"), Some(0));
        assert_eq!(index.index_of("cocksfoot"), Some(1));
        assert_eq!(index.index_of("white_clover"), Some(2));
        assert_eq!(index.index_of("fescue"), None);
        assert_eq!(index.name_of(1), Some("cocksfoot"));
    }

    #[test]
    fn test_union_of_classes_across_splits() {
        let processed = build_processed(&[
            (Split::Train, "healthy", 3),
            (Split::Val, "blight", 1),
            (Split::Test, "healthy", 1),
        ]);

        let classes = discover_classes(processed.path()).unwrap();
        assert_eq!(classes.names(), &["blight", "healthy"]);

        let val = collect_samples(processed.path(), Split::Val, &classes).unwrap();
        assert_eq!(val.len(), 1);
        assert_eq!(val[0].1, 0);
    }

    #[test]
    fn test_load_datasets_builds_three_views() {
        let processed = build_processed(&[
            (Split::Train, "a", 4),
            (Split::Train, "b", 3),
            (Split::Val, "a", 2),
            (Split::Test, "b", 1),
        ]);
        let config = DataConfig {
            batch_size: 2,
            image_size: 8,
            ..DataConfig::default()
        };

        let views = load_datasets(processed.path(), &config, 0).unwrap();
        assert_eq!(views.train.len(), 7);
        assert_eq!(views.val.len(), 2);
        assert_eq!(views.test.len(), 1);
        assert_eq!(views.train.num_batches(), 4);
        assert!(views.train.transform().is_stochastic());
        assert!(!views.view(Split::Val).transform().is_stochastic());
        assert_eq!(views.classes.len(), 2);
    }

    #[test]
    fn test_missing_split_is_error() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("train").join("a")).unwrap();
        let err = load_datasets(tmp.path(), &DataConfig::default(), 0).unwrap_err();
        assert!(err.to_string().contains("missing split directory"));
    }

    #[test]
    fn test_stats_counts() {
        let processed = build_processed(&[
            (Split::Train, "a", 4),
            (Split::Val, "a", 2),
            (Split::Test, "b", 1),
        ]);
        let stats = DatasetStats::from_processed(processed.path()).unwrap();
        assert_eq!(stats.split_total(Split::Train), 4);
        assert_eq!(stats.counts[&Split::Test], vec![0, 1]);
    }
}
