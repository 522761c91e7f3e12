//! Inference module
//!
//! This module provides:
//! - Loading a trained classifier from the training output directory or best checkpoint
//! - Single image prediction with the eval-time preprocessing
//! - Upload validation for a serving layer built on top

pub mod predictor;
pub mod upload;

pub use predictor::{ImageInfo, Prediction, Predictor, DEFAULT_TOP_K};
pub use upload::{UploadPolicy, UploadViolation, DEFAULT_MAX_UPLOAD_BYTES};
