//! Error Handling Module
//!
//! Defines the error type shared by every stage of the pipeline
//! (splitting, loading, model construction, training, inference).

use std::path::PathBuf;

use thiserror::Error;

/// A single image that failed to decode or transform inside a batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemFailure {
    pub path: PathBuf,
    pub reason: String,
}

impl std::fmt::Display for ItemFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.path.display(), self.reason)
    }
}

/// Main error type for Grassfier operations
#[derive(Error, Debug)]
pub enum GrassfierError {
    /// Invalid configuration (ratios, sizes, missing classes)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Error with dataset layout or contents
    #[error("Dataset error: {0}")]
    Dataset(String),

    /// Error loading or processing an image
    #[error("Failed to load image at '{0}': {1}")]
    ImageLoad(PathBuf, String),

    /// One or more items of a batch could not be decoded
    #[error("{} item(s) failed to decode in batch: {}", .0.len(), format_failures(.0))]
    BatchDecode(Vec<ItemFailure>),

    /// Error with model construction or weights
    #[error("Model error: {0}")]
    Model(String),

    /// Error writing or reading a checkpoint
    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    /// Error with inference
    #[error("Inference error: {0}")]
    Inference(String),

    /// Device/hardware error
    #[error("Device error: {0}")]
    Device(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

fn format_failures(failures: &[ItemFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl From<serde_json::Error> for GrassfierError {
    fn from(err: serde_json::Error) -> Self {
        GrassfierError::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for GrassfierError {
    fn from(err: toml::de::Error) -> Self {
        GrassfierError::Serialization(err.to_string())
    }
}

impl From<base64::DecodeError> for GrassfierError {
    fn from(err: base64::DecodeError) -> Self {
        GrassfierError::Serialization(err.to_string())
    }
}

impl From<burn::record::RecorderError> for GrassfierError {
    fn from(err: burn::record::RecorderError) -> Self {
        GrassfierError::Checkpoint(format!("{:?}", err))
    }
}

/// Convenience Result type for Grassfier operations
pub type Result<T> = std::result::Result<T, GrassfierError>;

/// Extension trait for adding context to foreign errors
pub trait ResultExt<T> {
    /// Add context to an error
    fn context(self, msg: &str) -> Result<T>;

    /// Add context with a closure (lazy evaluation)
    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T>;
}

impl<T, E: std::error::Error> ResultExt<T> for std::result::Result<T, E> {
    fn context(self, msg: &str) -> Result<T> {
        self.map_err(|e| GrassfierError::Dataset(format!("{}: {}", msg, e)))
    }

    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T> {
        self.map_err(|e| GrassfierError::Dataset(format!("{}: {}", f(), e)))
    }
}

impl<T> ResultExt<T> for Option<T> {
    fn context(self, msg: &str) -> Result<T> {
        self.ok_or_else(|| GrassfierError::Dataset(msg.to_string()))
    }

    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T> {
        self.ok_or_else(|| GrassfierError::Dataset(f()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = GrassfierError::Config("ratios sum to 0.9".to_string());
        assert_eq!(format!("{}", err), "Configuration error: ratios sum to 0.9");

        let err = GrassfierError::Device("failed to start 4 decode workers".to_string());
        assert_eq!(err.to_string(), "Device error: failed to start 4 decode workers");
    }

    #[test]
    fn test_batch_decode_lists_every_failure() {
        let err = GrassfierError::BatchDecode(vec![
            ItemFailure {
                path: PathBuf::from("a/leaf_1.jpg"),
                reason: "truncated".to_string(),
            },
            ItemFailure {
                path: PathBuf::from("b/leaf_2.png"),
                reason: "bad header".to_string(),
            },
        ]);
        let msg = err.to_string();
        assert!(msg.starts_with("2 item(s)"));
        assert!(msg.contains("leaf_1.jpg"));
        assert!(msg.contains("leaf_2.png"));
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: GrassfierError = io.into();
        assert!(matches!(err, GrassfierError::Io(_)));
    }

    #[test]
    fn test_option_context() {
        let opt: Option<i32> = None;
        let with_context = opt.context("class not found");
        assert!(with_context.is_err());
    }
}
