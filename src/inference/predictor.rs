//! Inference Predictor Module
//!
//! Loads a trained classifier with its class list and labels single images.
//! Preprocessing is the eval-time pipeline used for the val/test views
//! (resize, center crop, ImageNet normalization) so scores match training.

use std::fs;
use std::path::{Path, PathBuf};

use burn::{
    module::Module,
    record::{BinFileRecorder, FullPrecisionSettings},
    tensor::backend::Backend,
};
use image::{DynamicImage, ImageReader};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::dataset::{ClassIndex, EvalTransform, ImageBatcher, ImageItem, CLASS_NAMES_FILE};
use crate::model::{Classifier, ModelConfig, MODEL_CONFIG_FILE};
use crate::training::{Checkpoint, FINAL_MODEL_FILE};
use crate::utils::error::{GrassfierError, Result};

/// Number of alternatives reported by default
pub const DEFAULT_TOP_K: usize = 5;

/// Properties of the image that was classified
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageInfo {
    pub file_name: Option<String>,
    pub file_size: Option<u64>,
    /// Container format, when it was read from a file
    pub format: Option<String>,
    pub width: u32,
    pub height: u32,
    /// Pixel layout such as `Rgb8` or `Rgba8`
    pub color_mode: String,
}

impl ImageInfo {
    fn describe(img: &DynamicImage) -> Self {
        Self {
            file_name: None,
            file_size: None,
            format: None,
            width: img.width(),
            height: img.height(),
            color_mode: format!("{:?}", img.color()),
        }
    }
}

/// Result of labeling one image
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prediction {
    pub label: String,
    pub class_index: usize,
    /// Softmax probability of `label`
    pub confidence: f32,
    /// Best classes first
    pub top_k: Vec<(String, f32)>,
    pub image: ImageInfo,
}

impl Prediction {
    fn from_probabilities(probabilities: &[f32], classes: &ClassIndex, top_k: usize, image: ImageInfo) -> Result<Self> {
        let mut ranked: Vec<(usize, f32)> = probabilities.iter().copied().enumerate().collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));

        let &(class_index, confidence) = ranked
            .first()
            .ok_or_else(|| GrassfierError::Inference("model produced no scores".to_string()))?;

        let name = |idx: usize| -> Result<String> {
            classes
                .name_of(idx)
                .map(str::to_string)
                .ok_or_else(|| GrassfierError::Inference(format!("no class name for index {}", idx)))
        };

        let top_k = ranked
            .iter()
            .take(top_k.max(1))
            .map(|&(idx, p)| Ok((name(idx)?, p)))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            label: name(class_index)?,
            class_index,
            confidence,
            top_k,
            image,
        })
    }

    /// Multi-line human-readable summary
    pub fn display(&self) -> String {
        let mut output = String::new();
        if let Some(name) = &self.image.file_name {
            output.push_str(&format!("Image: {}\n", name));
        }
        output.push_str(&format!(
            "Size: {}x{} ({})\n",
            self.image.width, self.image.height, self.image.color_mode
        ));
        output.push_str(&format!("Prediction: {} (class {})\n", self.label, self.class_index));
        output.push_str(&format!("Confidence: {:.2}%\n", self.confidence * 100.0));

        output.push_str(&format!("\nTop-{} predictions:\n", self.top_k.len()));
        for (i, (name, prob)) in self.top_k.iter().enumerate() {
            output.push_str(&format!("  {}. {} - {:.2}%\n", i + 1, name, prob * 100.0));
        }
        output
    }
}

/// A trained classifier ready to label images
pub struct Predictor<B: Backend> {
    model: Classifier<B>,
    classes: ClassIndex,
    transform: EvalTransform,
    batcher: ImageBatcher,
    top_k: usize,
    device: B::Device,
}

impl<B: Backend> Predictor<B> {
    /// Wrap an in-memory model
    pub fn new(model: Classifier<B>, classes: ClassIndex, image_size: usize, device: B::Device) -> Result<Self> {
        if classes.is_empty() {
            return Err(GrassfierError::Inference("class list is empty".to_string()));
        }
        Ok(Self {
            model,
            classes,
            transform: EvalTransform::new(image_size as u32),
            batcher: ImageBatcher::new(image_size),
            top_k: DEFAULT_TOP_K,
            device,
        })
    }

    /// Load `model_config.json`, `class_names.json` and `model.bin` from a training output dir
    pub fn from_dir(dir: &Path, device: &B::Device) -> Result<Self> {
        let (config, model) = build_model::<B>(dir, device)?;
        let classes = ClassIndex::load(&dir.join(CLASS_NAMES_FILE))?;
        check_class_count(&config, &classes)?;

        let weights = dir.join(FINAL_MODEL_FILE);
        if !weights.exists() {
            return Err(GrassfierError::Inference(format!(
                "model weights not found: {}",
                weights.display()
            )));
        }
        let model = model
            .load_file(weights.with_extension(""), &BinFileRecorder::<FullPrecisionSettings>::new(), device)
            .map_err(|e| GrassfierError::Inference(format!("failed to load model weights: {:?}", e)))?;
        info!("Loaded {} model with {} classes from {:?}", config.variant, classes.len(), dir);

        Self::from_config(model, classes, &config, device)
    }

    /// Use the best checkpoint's parameters and class names; the architecture comes from `dir`
    pub fn from_checkpoint(dir: &Path, checkpoint_path: &Path, device: &B::Device) -> Result<Self> {
        let (config, model) = build_model::<B>(dir, device)?;
        let checkpoint = Checkpoint::load(checkpoint_path)?;
        let classes = ClassIndex::new(checkpoint.class_names.iter().cloned());
        check_class_count(&config, &classes)?;

        let model = checkpoint.restore_model::<B, _>(model, device)?;
        info!(
            "Loaded checkpoint from epoch {} (val acc {:.2}%)",
            checkpoint.epoch,
            checkpoint.val_acc * 100.0
        );

        Self::from_config(model, classes, &config, device)
    }

    /// Apply the eval geometry recorded at training time
    fn from_config(model: Classifier<B>, classes: ClassIndex, config: &ModelConfig, device: &B::Device) -> Result<Self> {
        let predictor = Self::new(model, classes, config.image_size, device.clone())?;
        Ok(match config.resize_size {
            Some(resize) => predictor.with_resize_size(resize),
            None => predictor,
        })
    }

    /// Resize to `resize_size` before the center crop.
    /// `from_dir` and `from_checkpoint` already apply the value saved with the model.
    pub fn with_resize_size(mut self, resize_size: usize) -> Self {
        self.transform = EvalTransform::with_resize(self.transform.image_size(), resize_size as u32);
        self
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k.max(1);
        self
    }

    pub fn classes(&self) -> &ClassIndex {
        &self.classes
    }

    /// Class probabilities for one image
    pub fn probabilities(&self, img: &DynamicImage) -> Result<Vec<f32>> {
        let item = ImageItem {
            image: self.transform.apply(img),
            label: 0,
            path: PathBuf::new(),
        };
        let batch = self.batcher.make_batch::<B>(vec![item], &self.device);

        self.model
            .forward_softmax(batch.images)
            .into_data()
            .to_vec::<f32>()
            .map_err(|e| GrassfierError::Inference(format!("failed to read model output: {:?}", e)))
    }

    pub fn predict_image(&self, img: &DynamicImage) -> Result<Prediction> {
        let probabilities = self.probabilities(img)?;
        Prediction::from_probabilities(&probabilities, &self.classes, self.top_k, ImageInfo::describe(img))
    }

    pub fn predict_path(&self, path: &Path) -> Result<Prediction> {
        let reader = ImageReader::open(path)
            .and_then(|r| r.with_guessed_format())
            .map_err(|e| GrassfierError::ImageLoad(path.to_path_buf(), e.to_string()))?;
        let format = reader.format().map(|f| format!("{:?}", f));
        let img = reader
            .decode()
            .map_err(|e| GrassfierError::ImageLoad(path.to_path_buf(), e.to_string()))?;

        let mut info = ImageInfo::describe(&img);
        info.file_name = path.file_name().map(|n| n.to_string_lossy().to_string());
        info.file_size = fs::metadata(path).ok().map(|m| m.len());
        info.format = format;
        debug!("Classifying {:?} ({}x{})", path, info.width, info.height);

        let probabilities = self.probabilities(&img)?;
        Prediction::from_probabilities(&probabilities, &self.classes, self.top_k, info)
    }
}

/// Rebuild the architecture recorded in `dir`, without fetching pretrained weights
fn build_model<B: Backend>(dir: &Path, device: &B::Device) -> Result<(ModelConfig, Classifier<B>)> {
    let config_path = dir.join(MODEL_CONFIG_FILE);
    let mut config = ModelConfig::load(&config_path).map_err(|e| {
        GrassfierError::Inference(format!("failed to read {}: {}", config_path.display(), e))
    })?;
    config.pretrained = false;
    let model = config.init::<B>(device)?;
    Ok((config, model))
}

fn check_class_count(config: &ModelConfig, classes: &ClassIndex) -> Result<()> {
    if config.num_classes != classes.len() {
        return Err(GrassfierError::Inference(format!(
            "model has {} outputs but {} class names were found",
            config.num_classes,
            classes.len()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ModelVariant;
    use burn_ndarray::{NdArray, NdArrayDevice};
    use image::{ImageBuffer, Rgb};
    use tempfile::TempDir;

    type TestBackend = NdArray<f32>;

    fn classes() -> ClassIndex {
        ClassIndex::new(["clover", "fescue", "ryegrass"])
    }

    fn predictor() -> Predictor<TestBackend> {
        let device = NdArrayDevice::Cpu;
        let model = ModelConfig::new(ModelVariant::Simple, 3, 32)
            .init::<TestBackend>(&device)
            .unwrap();
        Predictor::new(model, classes(), 32, device).unwrap()
    }

    fn sample_image() -> DynamicImage {
        DynamicImage::ImageRgb8(ImageBuffer::from_fn(50, 40, |x, y| Rgb([x as u8, y as u8, 90])))
    }

    #[test]
    fn test_prediction_ranks_classes() {
        let probs = [0.1, 0.7, 0.2];
        let info = ImageInfo::describe(&sample_image());
        let prediction = Prediction::from_probabilities(&probs, &classes(), 2, info).unwrap();

        assert_eq!(prediction.label, "fescue");
        assert_eq!(prediction.class_index, 1);
        assert_eq!(prediction.top_k, vec![("fescue".to_string(), 0.7), ("ryegrass".to_string(), 0.2)]);
        assert_eq!(prediction.image.width, 50);
        assert_eq!(prediction.image.color_mode, "Rgb8");
    }

    #[test]
    fn test_predict_image_probabilities_sum_to_one() {
        let predictor = predictor();
        let probs = predictor.probabilities(&sample_image()).unwrap();
        assert_eq!(probs.len(), 3);
        assert!((probs.iter().sum::<f32>() - 1.0).abs() < 1e-4);

        let prediction = predictor.predict_image(&sample_image()).unwrap();
        assert!(prediction.top_k.len() <= DEFAULT_TOP_K);
        assert!(classes().index_of(&prediction.label).is_some());
    }

    #[test]
    fn test_eval_preprocessing_is_deterministic() {
        let predictor = predictor();
        let a = predictor.probabilities(&sample_image()).unwrap();
        let b = predictor.probabilities(&sample_image()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_predict_path_reports_file_info() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("leaf.png");
        sample_image().save(&path).unwrap();

        let prediction = predictor().with_top_k(1).predict_path(&path).unwrap();
        assert_eq!(prediction.image.file_name.as_deref(), Some("leaf.png"));
        assert_eq!(prediction.image.format.as_deref(), Some("Png"));
        assert!(prediction.image.file_size.unwrap_or(0) > 0);
        assert_eq!(prediction.top_k.len(), 1);
    }

    #[test]
    fn test_undecodable_file_is_image_load_error() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("broken.jpg");
        std::fs::write(&path, b"garbage").unwrap();
        assert!(matches!(predictor().predict_path(&path), Err(GrassfierError::ImageLoad(_, _))));
    }

    #[test]
    fn test_from_dir_uses_saved_eval_resize() {
        let tmp = TempDir::new().unwrap();
        let device = NdArrayDevice::Cpu;

        let mut config = ModelConfig::new(ModelVariant::Simple, 3, 32);
        config.resize_size = Some(64);
        config.save(&tmp.path().join(MODEL_CONFIG_FILE)).unwrap();
        classes().save(&tmp.path().join(CLASS_NAMES_FILE)).unwrap();

        let model = config.init::<TestBackend>(&device).unwrap();
        model
            .clone()
            .save_file(
                tmp.path().join(FINAL_MODEL_FILE).with_extension(""),
                &BinFileRecorder::<FullPrecisionSettings>::new(),
            )
            .unwrap();

        let val_time = Predictor::new(model, classes(), 32, device.clone())
            .unwrap()
            .with_resize_size(64)
            .probabilities(&sample_image())
            .unwrap();
        let loaded = Predictor::<TestBackend>::from_dir(tmp.path(), &device)
            .unwrap()
            .probabilities(&sample_image())
            .unwrap();

        assert_eq!(loaded, val_time);
    }

    #[test]
    fn test_from_dir_requires_matching_class_count() {
        let tmp = TempDir::new().unwrap();
        ModelConfig::new(ModelVariant::Simple, 4, 32)
            .save(&tmp.path().join(MODEL_CONFIG_FILE))
            .unwrap();
        classes().save(&tmp.path().join(CLASS_NAMES_FILE)).unwrap();

        let result = Predictor::<TestBackend>::from_dir(tmp.path(), &NdArrayDevice::Cpu);
        assert!(matches!(result, Err(GrassfierError::Inference(_))));
    }
}
