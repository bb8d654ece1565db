//! Trace configuration.
//!
//! Limits and render options for one trace. Loaded from an optional TOML
//! file; anything missing falls back to the defaults below.
//!
//! ```toml
//! [limits]
//! max_invocations = 1000
//! max_duration_ms = 10000
//! max_depth = 200
//!
//! [render]
//! show_none_returns = false
//! ```

use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_MAX_INVOCATIONS: usize = 1000;
pub const DEFAULT_MAX_DURATION: Duration = Duration::from_secs(10);
pub const DEFAULT_MAX_DEPTH: usize = 200;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Resolved settings for a trace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceConfig {
    pub max_invocations: usize,
    pub max_duration: Duration,
    pub max_depth: usize,
    /// Draw return edges for calls that returned `None`.
    pub show_none_returns: bool,
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self {
            max_invocations: DEFAULT_MAX_INVOCATIONS,
            max_duration: DEFAULT_MAX_DURATION,
            max_depth: DEFAULT_MAX_DEPTH,
            show_none_returns: false,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    #[serde(default)]
    limits: LimitsSection,
    #[serde(default)]
    render: RenderSection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct LimitsSection {
    max_invocations: Option<usize>,
    max_duration_ms: Option<u64>,
    max_depth: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RenderSection {
    show_none_returns: Option<bool>,
}

impl TraceConfig {
    /// Parse TOML text on top of the defaults.
    pub fn from_toml_str(text: &str, origin: &str) -> Result<Self, ConfigError> {
        let file: ConfigFile = toml::from_str(text).map_err(|source| ConfigError::Parse {
            path: origin.to_string(),
            source,
        })?;
        let defaults = Self::default();
        let config = Self {
            max_invocations: file.limits.max_invocations.unwrap_or(defaults.max_invocations),
            max_duration: file
                .limits
                .max_duration_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.max_duration),
            max_depth: file.limits.max_depth.unwrap_or(defaults.max_depth),
            show_none_returns: file.render.show_none_returns.unwrap_or(defaults.show_none_returns),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let origin = path.display().to_string();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: origin.clone(),
            source,
        })?;
        Self::from_toml_str(&text, &origin)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_invocations == 0 {
            return Err(ConfigError::Invalid("max_invocations must be at least 1".into()));
        }
        if self.max_depth == 0 {
            return Err(ConfigError::Invalid("max_depth must be at least 1".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_empty_file_gives_defaults() {
        let config = TraceConfig::from_toml_str("", "inline").unwrap();
        assert_eq!(config, TraceConfig::default());
    }

    #[test]
    fn test_partial_override() {
        let text = "[limits]\nmax_invocations = 10\nmax_duration_ms = 250\n\n[render]\nshow_none_returns = true\n";
        let config = TraceConfig::from_toml_str(text, "inline").unwrap();
        assert_eq!(config.max_invocations, 10);
        assert_eq!(config.max_duration, Duration::from_millis(250));
        assert_eq!(config.max_depth, DEFAULT_MAX_DEPTH);
        assert!(config.show_none_returns);
    }

    #[test]
    fn test_unknown_key_rejected() {
        let err = TraceConfig::from_toml_str("[limits]\nmax_frames = 3\n", "inline").unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_zero_limit_rejected() {
        let err = TraceConfig::from_toml_str("[limits]\nmax_invocations = 0\n", "inline").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[limits]\nmax_depth = 50").unwrap();
        let config = TraceConfig::load(file.path()).unwrap();
        assert_eq!(config.max_depth, 50);
    }

    #[test]
    fn test_missing_file() {
        let err = TraceConfig::load(Path::new("/nonexistent/recurviz.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
