//! Utility modules: error types and logging setup.

pub mod error;
pub mod logging;

pub use error::{GrassfierError, ItemFailure, Result, ResultExt};
pub use logging::{init_logging, LogConfig, LogLevel};
