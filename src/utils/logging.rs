//! Logging Module
//!
//! Structured logging through `tracing`. `RUST_LOG` overrides the configured level.

use std::io::IsTerminal;

use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Minimum log level to display
    pub level: LogLevel,
    /// Whether to include target (module path)
    pub include_target: bool,
    /// Whether to include thread IDs
    pub include_thread_ids: bool,
    /// Whether to use ANSI colors
    pub ansi_colors: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            include_target: false,
            include_thread_ids: false,
            ansi_colors: true,
        }
    }
}

impl LogConfig {
    /// Debug output with module paths and thread ids
    pub fn verbose() -> Self {
        Self {
            level: LogLevel::Debug,
            include_target: true,
            include_thread_ids: true,
            ansi_colors: true,
        }
    }

    /// Warnings and errors only
    pub fn quiet() -> Self {
        Self {
            level: LogLevel::Warn,
            ..Self::default()
        }
    }

    /// Plain output for log files and CI
    pub fn production() -> Self {
        Self {
            ansi_colors: false,
            ..Self::default()
        }
    }
}

/// Log level enum
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Convert to tracing Level
    pub fn to_tracing_level(self) -> Level {
        match self {
            LogLevel::Trace => Level::TRACE,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Info => Level::INFO,
            LogLevel::Warn => Level::WARN,
            LogLevel::Error => Level::ERROR,
        }
    }

    /// Parse a level name, falling back to `Info`
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "trace" => LogLevel::Trace,
            "debug" => LogLevel::Debug,
            "warn" | "warning" => LogLevel::Warn,
            "error" => LogLevel::Error,
            _ => LogLevel::Info,
        }
    }

    fn as_filter(self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_filter().to_uppercase())
    }
}

/// Initialize the global subscriber.
///
/// Returns an error message if a subscriber is already installed.
pub fn init_logging(config: &LogConfig) -> Result<(), String> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.as_filter()));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(config.ansi_colors)
        .with_target(config.include_target)
        .with_thread_ids(config.include_thread_ids)
        .compact()
        .try_init()
        .map_err(|e| format!("Failed to initialize logging: {}", e))
}

/// Pick a preset from the CLI flags
pub fn config_from_flags(verbose: bool, quiet: bool) -> LogConfig {
    if verbose {
        LogConfig::verbose()
    } else if quiet {
        LogConfig::quiet()
    } else if !std::io::stdout().is_terminal() {
        LogConfig::production()
    } else {
        LogConfig::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_parsing() {
        assert_eq!(LogLevel::parse("DEBUG"), LogLevel::Debug);
        assert_eq!(LogLevel::parse("warning"), LogLevel::Warn);
        assert_eq!(LogLevel::parse("nonsense"), LogLevel::Info);
        assert_eq!(LogLevel::Error.to_string(), "ERROR");
    }

    #[test]
    fn test_flag_presets() {
        assert_eq!(config_from_flags(true, true).level, LogLevel::Debug);
        assert_eq!(config_from_flags(false, true).level, LogLevel::Warn);
        assert_eq!(config_from_flags(false, false).level, LogLevel::Info);
    }

    #[test]
    fn test_production_preset_is_plain() {
        let config = LogConfig::production();
        assert!(!config.ansi_colors);
        assert_eq!(config.level, LogLevel::Info);
    }

    #[test]
    fn test_second_init_is_not_fatal() {
        let _ = init_logging(&LogConfig::quiet());
        let second = init_logging(&LogConfig::quiet());
        assert!(second.is_err());
    }
}
