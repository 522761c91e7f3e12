//! Pipeline configuration
//!
//! One TOML file drives the whole pipeline. Every section is optional and falls
//! back to the defaults below:
//!
//! ```toml
//! [paths]
//! raw_dir = "data/raw"
//! processed_dir = "data/processed"
//! output_dir = "model/saved"
//!
//! [split]
//! train = 0.7
//! val = 0.2
//! test = 0.1
//! seed = 42
//!
//! [data]
//! batch_size = 32
//! image_size = 224
//!
//! [model]
//! variant = "simple"
//!
//! [training]
//! epochs = 10
//! learning_rate = 1e-4
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::dataset::augmentation::AugmentationConfig;
use crate::dataset::split::SplitRatios;
use crate::model::config::{ModelConfig, ModelVariant};
use crate::training::TrainingConfig;
use crate::utils::error::{GrassfierError, Result};

/// Load any deserializable config from a TOML file
pub fn load_toml_config<T>(path: &Path) -> Result<T>
where
    T: DeserializeOwned,
{
    let content = fs::read_to_string(path).map_err(|e| {
        GrassfierError::Config(format!("Failed to read config {}: {e}", path.display()))
    })?;

    toml::from_str(&content).map_err(|e| {
        GrassfierError::Config(format!("Failed to parse config {}: {e}", path.display()))
    })
}

/// Filesystem locations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub raw_dir: PathBuf,
    pub processed_dir: PathBuf,
    /// Checkpoint, final model, class names
    pub output_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            raw_dir: PathBuf::from("data/raw"),
            processed_dir: PathBuf::from("data/processed"),
            output_dir: PathBuf::from("model/saved"),
        }
    }
}

/// Split ratios plus the shuffle seed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SplitConfig {
    pub train: f64,
    pub val: f64,
    pub test: f64,
    /// `None` shuffles from OS entropy
    pub seed: Option<u64>,
}

impl Default for SplitConfig {
    fn default() -> Self {
        let ratios = SplitRatios::default();
        Self {
            train: ratios.train,
            val: ratios.val,
            test: ratios.test,
            seed: Some(42),
        }
    }
}

impl SplitConfig {
    pub fn ratios(&self) -> Result<SplitRatios> {
        SplitRatios::new(self.train, self.val, self.test)
    }
}

/// Loader settings shared by the three views
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    pub batch_size: usize,
    /// Side length of the square model input
    pub image_size: usize,
    /// Eval-time resize before the center crop; defaults to `image_size`
    pub resize_size: Option<usize>,
    /// Decode threads; `None` picks from the selected device
    pub num_workers: Option<usize>,
    /// Seed for epoch shuffling and augmentation
    pub seed: u64,
    pub augmentation: AugmentationConfig,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            batch_size: 32,
            image_size: crate::IMAGE_SIZE,
            resize_size: None,
            num_workers: None,
            seed: 42,
            augmentation: AugmentationConfig::default(),
        }
    }
}

impl DataConfig {
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(GrassfierError::Config("batch_size must be at least 1".to_string()));
        }
        if self.image_size == 0 {
            return Err(GrassfierError::Config("image_size must be at least 1".to_string()));
        }
        if let Some(resize) = self.resize_size {
            if resize < self.image_size {
                return Err(GrassfierError::Config(format!(
                    "resize_size ({}) must not be smaller than image_size ({})",
                    resize, self.image_size
                )));
            }
        }
        Ok(())
    }
}

/// Architecture choice; the class count is only known once the data is loaded
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSettings {
    pub variant: ModelVariant,
    pub dropout: f64,
    /// Initialize the transfer backbone from `pretrained_weights`
    pub pretrained: bool,
    pub pretrained_weights: Option<PathBuf>,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            variant: ModelVariant::Simple,
            dropout: 0.5,
            pretrained: false,
            pretrained_weights: None,
        }
    }
}

impl ModelSettings {
    /// Freeze the architecture and the eval-time geometry from `data`
    pub fn to_model_config(&self, num_classes: usize, data: &DataConfig) -> ModelConfig {
        ModelConfig {
            variant: self.variant,
            num_classes,
            image_size: data.image_size,
            resize_size: data.resize_size,
            dropout: self.dropout,
            pretrained: self.pretrained,
            pretrained_weights: self.pretrained_weights.clone(),
        }
    }
}

/// Full pipeline configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub paths: PathsConfig,
    pub split: SplitConfig,
    pub data: DataConfig,
    pub model: ModelSettings,
    pub training: TrainingConfig,
}

impl PipelineConfig {
    /// Load from a TOML file, or use defaults when no path is given
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config: Self = match path {
            Some(path) => {
                debug!("Loading config from {:?}", path);
                load_toml_config(path)?
            }
            None => Self::default(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Check every section before any work starts
    pub fn validate(&self) -> Result<()> {
        self.split.ratios()?;
        self.data.validate()?;
        self.training.validate()?;
        // Class count is unknown until the data is loaded; check the rest of the model
        self.model.to_model_config(1, &self.data).validate()?;
        Ok(())
    }
}
