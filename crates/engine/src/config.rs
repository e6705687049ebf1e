//! Engine configuration via `composer.toml`
//!
//! Hosts usually construct an [`EngineConfig`] in code or through the
//! [`ImportEngineBuilder`](crate::ImportEngineBuilder). A host that wants the
//! knobs editable without a rebuild can ship a `composer.toml` next to its
//! plugins; [`EngineConfig::write_default_if_missing`] drops a commented
//! default there on first start.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Config file name placed in the host's configuration directory.
pub const CONFIG_FILE_NAME: &str = "composer.toml";

/// Default cap on nested part compositions.
pub const DEFAULT_MAX_COMPOSITION_DEPTH: usize = 10;

/// Errors raised while loading or validating configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read or written
    #[error("failed to access config file '{}': {source}", .path.display())]
    Io {
        /// File path
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// The config text is not valid TOML for [`EngineConfig`]
    #[error("failed to parse engine config: {message}")]
    Parse {
        /// Parser message
        message: String,
    },

    /// A value is out of range
    #[error("invalid engine config: {message}")]
    Invalid {
        /// Description of the problem
        message: String,
    },
}

/// Import engine configuration loaded from `composer.toml`.
///
/// # Example
///
/// ```toml
/// # Maximum depth of nested part compositions (default: 10)
/// max_composition_depth = 10
///
/// # Serialize composition with a real lock (default: true)
/// thread_safe = true
///
/// # Allow preview_imports to reject parts silently (default: true)
/// silent_rejection = true
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Maximum depth of the recursion stack before composition fails with
    /// `TooManyIterations`. Must be at least 1.
    #[serde(default = "default_max_composition_depth")]
    pub max_composition_depth: usize,
    /// When false the composition-wide lock is a no-op.
    #[serde(default = "default_true")]
    pub thread_safe: bool,
    /// When false `preview_imports` does nothing.
    #[serde(default = "default_true")]
    pub silent_rejection: bool,
}

fn default_max_composition_depth() -> usize {
    DEFAULT_MAX_COMPOSITION_DEPTH
}

fn default_true() -> bool {
    true
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_composition_depth: DEFAULT_MAX_COMPOSITION_DEPTH,
            thread_safe: true,
            silent_rejection: true,
        }
    }
}

impl EngineConfig {
    /// Check value ranges.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if `max_composition_depth` is zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_composition_depth == 0 {
            return Err(ConfigError::Invalid {
                message: "max_composition_depth must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    /// Parse and validate config from TOML text. Missing keys take defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the text cannot be parsed or a value is invalid.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = toml::from_str(content).map_err(|e| ConfigError::Parse {
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse config from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed, or validated.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::from_toml_str(&content)
    }

    /// Returns the default config file content with comments.
    pub fn default_toml() -> &'static str {
        r#"# Composer import engine configuration
#
# Maximum depth of nested part compositions (default: 10).
# Composing a part whose exports are needed by another part nests one level.
max_composition_depth = 10

# Serialize composition with a real lock (default: true).
# Set to false only when every engine call happens on a single thread.
thread_safe = true

# Allow preview_imports to reject parts silently (default: true).
# When false, preview_imports does nothing and failures surface on satisfy.
silent_rejection = true
"#
    }

    /// Write the default config file if it does not already exist.
    ///
    /// Returns `Ok(())` whether the file was created or already existed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file does not exist and cannot be written.
    pub fn write_default_if_missing(path: &Path) -> Result<(), ConfigError> {
        if !path.exists() {
            std::fs::write(path, Self::default_toml()).map_err(|e| ConfigError::Io {
                path: path.to_path_buf(),
                source: e,
            })?;
        }
        Ok(())
    }
}
