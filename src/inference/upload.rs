//! Upload validation
//!
//! Checks a candidate image upload against an allow-list of extensions and a
//! size limit. Every violation is reported, not just the first.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::dataset::split::IMAGE_EXTENSIONS;

/// Default upload limit (10 MiB)
pub const DEFAULT_MAX_UPLOAD_BYTES: u64 = 10 * 1024 * 1024;

/// One reason an upload was rejected
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum UploadViolation {
    /// Extension missing or not on the allow-list
    TypeNotAllowed { extension: Option<String> },
    SizeExceeded { size: u64, max_bytes: u64 },
    Empty,
}

impl std::fmt::Display for UploadViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UploadViolation::TypeNotAllowed { extension: Some(ext) } => {
                write!(f, "file type '.{}' is not allowed", ext)
            }
            UploadViolation::TypeNotAllowed { extension: None } => {
                write!(f, "file has no extension")
            }
            UploadViolation::SizeExceeded { size, max_bytes } => {
                write!(f, "file is {} bytes, limit is {} bytes", size, max_bytes)
            }
            UploadViolation::Empty => write!(f, "file is empty"),
        }
    }
}

/// Accepted upload types and size
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadPolicy {
    /// Lowercase, without the dot
    pub allowed_extensions: Vec<String>,
    pub max_bytes: u64,
}

impl Default for UploadPolicy {
    fn default() -> Self {
        Self {
            allowed_extensions: IMAGE_EXTENSIONS.iter().map(|e| e.to_string()).collect(),
            max_bytes: DEFAULT_MAX_UPLOAD_BYTES,
        }
    }
}

impl UploadPolicy {
    pub fn with_max_bytes(mut self, max_bytes: u64) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    /// Validate a file name and its size in bytes
    pub fn validate(&self, file_name: &str, size: u64) -> Result<(), Vec<UploadViolation>> {
        let mut violations = Vec::new();

        let extension = Path::new(file_name)
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase());
        let allowed = extension
            .as_deref()
            .is_some_and(|ext| self.allowed_extensions.iter().any(|a| a == ext));
        if !allowed {
            violations.push(UploadViolation::TypeNotAllowed { extension });
        }

        if size == 0 {
            violations.push(UploadViolation::Empty);
        } else if size > self.max_bytes {
            violations.push(UploadViolation::SizeExceeded {
                size,
                max_bytes: self.max_bytes,
            });
        }

        if violations.is_empty() {
            Ok(())
        } else {
            Err(violations)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_allowed_upload() {
        let policy = UploadPolicy::default();
        assert!(policy.validate("meadow.JPG", 2048).is_ok());
        assert!(policy.validate("leaf.jfif", 1).is_ok());
    }

    #[test]
    fn test_collects_every_violation() {
        let policy = UploadPolicy::default().with_max_bytes(100);
        let violations = policy.validate("notes.txt", 101).unwrap_err();
        assert_eq!(
            violations,
            vec![
                UploadViolation::TypeNotAllowed {
                    extension: Some("txt".to_string())
                },
                UploadViolation::SizeExceeded {
                    size: 101,
                    max_bytes: 100
                },
            ]
        );
    }

    #[test]
    fn test_missing_extension_and_empty_file() {
        let violations = UploadPolicy::default().validate("README", 0).unwrap_err();
        assert_eq!(violations.len(), 2);
        assert_eq!(violations[0].to_string(), "file has no extension");
        assert_eq!(violations[1], UploadViolation::Empty);
    }
}
