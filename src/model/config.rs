//! Model configuration
//!
//! Serializable description of which classifier to build. It is saved next to the
//! trained weights as `model_config.json` so inference can rebuild the same
//! architecture before loading the record.

use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use burn::tensor::backend::Backend;
use serde::{Deserialize, Serialize};

use crate::model::cnn::{SimpleCnnConfig, DOWNSAMPLE_FACTOR};
use crate::model::resnet::ResNetClassifier;
use crate::model::Classifier;
use crate::utils::error::{GrassfierError, Result};

/// File name of the persisted model configuration
pub const MODEL_CONFIG_FILE: &str = "model_config.json";

/// Smallest input the ResNet stem and pooling stages accept
pub const MIN_TRANSFER_IMAGE_SIZE: usize = 32;

/// Available classifier architectures
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelVariant {
    /// Small CNN trained from scratch
    #[default]
    Simple,
    /// ResNet-18 backbone with a replaced head
    Transfer,
}

impl FromStr for ModelVariant {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "simple" | "cnn" => Ok(ModelVariant::Simple),
            "transfer" | "resnet" | "resnet18" => Ok(ModelVariant::Transfer),
            other => Err(format!("unknown model variant '{}' (expected simple or transfer)", other)),
        }
    }
}

impl std::fmt::Display for ModelVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModelVariant::Simple => write!(f, "simple"),
            ModelVariant::Transfer => write!(f, "transfer"),
        }
    }
}

/// Everything needed to construct a classifier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub variant: ModelVariant,
    /// Width of the output layer; equals the class index length
    pub num_classes: usize,
    /// Side length of the square input
    pub image_size: usize,
    /// Eval-time resize before the center crop; `None` resizes straight to `image_size`
    #[serde(default)]
    pub resize_size: Option<usize>,
    /// Dropout of the simple variant's head
    pub dropout: f64,
    /// Load backbone weights for the transfer variant
    pub pretrained: bool,
    pub pretrained_weights: Option<PathBuf>,
}

impl ModelConfig {
    pub fn new(variant: ModelVariant, num_classes: usize, image_size: usize) -> Self {
        Self {
            variant,
            num_classes,
            image_size,
            resize_size: None,
            dropout: 0.5,
            pretrained: false,
            pretrained_weights: None,
        }
    }

    /// Check that `image_size` fits the architecture's geometry
    pub fn validate_geometry(variant: ModelVariant, image_size: usize) -> Result<()> {
        match variant {
            ModelVariant::Simple => {
                if image_size == 0 || image_size % DOWNSAMPLE_FACTOR != 0 {
                    return Err(GrassfierError::Config(format!(
                        "simple model needs an image size divisible by {}, got {}",
                        DOWNSAMPLE_FACTOR, image_size
                    )));
                }
            }
            ModelVariant::Transfer => {
                if image_size < MIN_TRANSFER_IMAGE_SIZE {
                    return Err(GrassfierError::Config(format!(
                        "transfer model needs an image size of at least {}, got {}",
                        MIN_TRANSFER_IMAGE_SIZE, image_size
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.num_classes == 0 {
            return Err(GrassfierError::Config("num_classes must be at least 1".to_string()));
        }
        if !(0.0..1.0).contains(&self.dropout) {
            return Err(GrassfierError::Config(format!(
                "dropout must be in [0, 1), got {}",
                self.dropout
            )));
        }
        Self::validate_geometry(self.variant, self.image_size)?;

        if let Some(resize) = self.resize_size {
            if resize < self.image_size {
                return Err(GrassfierError::Config(format!(
                    "resize_size ({}) must not be smaller than image_size ({})",
                    resize, self.image_size
                )));
            }
        }

        if self.pretrained && self.variant == ModelVariant::Transfer {
            match &self.pretrained_weights {
                None => {
                    return Err(GrassfierError::Config(
                        "pretrained is set but no pretrained_weights path was given".to_string(),
                    ))
                }
                Some(path) if !path.exists() => {
                    return Err(GrassfierError::Config(format!(
                        "pretrained weights not found: {}",
                        path.display()
                    )))
                }
                Some(_) => {}
            }
        }
        Ok(())
    }

    /// Build the classifier on `device`
    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<Classifier<B>> {
        self.validate()?;

        let classifier = match self.variant {
            ModelVariant::Simple => Classifier::Simple(
                SimpleCnnConfig::new(self.num_classes)
                    .with_image_size(self.image_size)
                    .with_dropout(self.dropout)
                    .init(device),
            ),
            ModelVariant::Transfer => {
                let weights = if self.pretrained {
                    self.pretrained_weights.as_deref()
                } else {
                    None
                };
                Classifier::Transfer(ResNetClassifier::new(self.num_classes, weights, device)?)
            }
        };

        Ok(classifier)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        Ok(serde_json::from_str(&fs::read_to_string(path)?)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_variant_parsing() {
        assert_eq!("simple".parse::<ModelVariant>().unwrap(), ModelVariant::Simple);
        assert_eq!("ResNet".parse::<ModelVariant>().unwrap(), ModelVariant::Transfer);
        assert!("vit".parse::<ModelVariant>().is_err());
    }

    #[test]
    fn test_geometry_validation() {
        assert!(ModelConfig::validate_geometry(ModelVariant::Simple, 224).is_ok());
        assert!(ModelConfig::validate_geometry(ModelVariant::Simple, 230).is_err());
        assert!(ModelConfig::validate_geometry(ModelVariant::Transfer, 230).is_ok());
        assert!(ModelConfig::validate_geometry(ModelVariant::Transfer, 16).is_err());
    }

    #[test]
    fn test_zero_classes_rejected() {
        let config = ModelConfig::new(ModelVariant::Simple, 0, 64);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_pretrained_needs_weights() {
        let mut config = ModelConfig::new(ModelVariant::Transfer, 4, 64);
        config.pretrained = true;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_pretrained_weights_must_exist() {
        let tmp = TempDir::new().unwrap();
        let mut config = ModelConfig::new(ModelVariant::Transfer, 4, 64);
        config.pretrained = true;
        config.pretrained_weights = Some(tmp.path().join("resnet18.bin"));

        let err = config.validate().unwrap_err();
        assert!(matches!(err, GrassfierError::Config(_)));
        assert!(err.to_string().contains("not found"));

        fs::write(tmp.path().join("resnet18.bin"), b"weights").unwrap();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_resize_smaller_than_input_rejected() {
        let mut config = ModelConfig::new(ModelVariant::Simple, 2, 64);
        config.resize_size = Some(48);
        assert!(config.validate().is_err());
        config.resize_size = Some(72);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_without_resize_field_loads() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(MODEL_CONFIG_FILE);
        fs::write(
            &path,
            r#"{"variant":"simple","num_classes":3,"image_size":32,"dropout":0.5,"pretrained":false,"pretrained_weights":null}"#,
        )
        .unwrap();
        assert_eq!(ModelConfig::load(&path).unwrap().resize_size, None);
    }

    #[test]
    fn test_save_load() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(MODEL_CONFIG_FILE);
        let mut config = ModelConfig::new(ModelVariant::Transfer, 7, 96);
        config.resize_size = Some(112);
        config.save(&path).unwrap();
        assert_eq!(ModelConfig::load(&path).unwrap(), config);
    }
}
