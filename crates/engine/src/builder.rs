//! Import engine builder
//!
//! Fluent equivalent of constructing an [`EngineConfig`] by hand.

use std::path::Path;
use std::sync::Arc;

use crate::config::{ConfigError, EngineConfig};
use crate::engine::ImportEngine;
use crate::provider::ExportProvider;

// ============================================================================
// Import Engine Builder
// ============================================================================

/// Builder for [`ImportEngine`]
///
/// ```ignore
/// use composer_engine::ImportEngine;
///
/// // 1. Defaults
/// let engine = ImportEngine::new(provider);
///
/// // 2. Tuned
/// let engine = ImportEngine::builder()
///     .max_composition_depth(32)
///     .disable_silent_rejection()
///     .build(provider)?;
///
/// // 3. From composer.toml
/// let engine = ImportEngine::builder()
///     .config_file(&dir.join("composer.toml"))?
///     .build(provider)?;
/// ```
#[derive(Debug, Clone, Default)]
pub struct ImportEngineBuilder {
    config: EngineConfig,
}

impl ImportEngineBuilder {
    /// Create a builder with the default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole configuration
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Load the configuration from a TOML file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed, or validated.
    pub fn config_file(mut self, path: &Path) -> Result<Self, ConfigError> {
        self.config = EngineConfig::from_file(path)?;
        Ok(self)
    }

    /// Cap on nested part compositions
    pub fn max_composition_depth(mut self, depth: usize) -> Self {
        self.config.max_composition_depth = depth;
        self
    }

    /// Make the composition lock a no-op
    pub fn not_thread_safe(mut self) -> Self {
        self.config.thread_safe = false;
        self
    }

    /// Turn `preview_imports` into a no-op
    pub fn disable_silent_rejection(mut self) -> Self {
        self.config.silent_rejection = false;
        self
    }

    /// Configuration built so far
    pub fn current_config(&self) -> &EngineConfig {
        &self.config
    }

    /// Create the engine
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn build(self, provider: Arc<dyn ExportProvider>) -> Result<Arc<ImportEngine>, ConfigError> {
        ImportEngine::with_config(provider, self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CONFIG_FILE_NAME;
    use tempfile::TempDir;

    #[test]
    fn test_builder_overrides() {
        let builder = ImportEngineBuilder::new()
            .max_composition_depth(3)
            .not_thread_safe()
            .disable_silent_rejection();
        let config = builder.current_config();
        assert_eq!(config.max_composition_depth, 3);
        assert!(!config.thread_safe);
        assert!(!config.silent_rejection);
    }

    #[test]
    fn test_builder_from_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, "max_composition_depth = 4\n").unwrap();

        let builder = ImportEngineBuilder::new().config_file(&path).unwrap();
        assert_eq!(builder.current_config().max_composition_depth, 4);
        assert!(builder.current_config().thread_safe);
    }
}
