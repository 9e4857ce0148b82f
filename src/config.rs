//! Store configuration, read from `.taskmem/config.yaml` when present.

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Config file name within the store directory.
pub const CONFIG_FILE: &str = "config.yaml";

/// Default mirror file name within the store directory.
pub const DEFAULT_MIRROR_FILE: &str = "tasks.jsonl";

/// Configuration for a store handle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Mirror file name, relative to the store directory.
    pub mirror_file: String,

    /// Regenerate the mirror after every mutation.
    pub auto_export: bool,

    /// Retries after the first attempt when the database is locked.
    pub lock_retries: u32,

    /// Delay unit for lock retries; attempt n waits n * base.
    pub lock_retry_base_ms: u64,

    /// SQLite busy wait before a lock error surfaces to the retry loop.
    pub busy_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            mirror_file: DEFAULT_MIRROR_FILE.to_string(),
            auto_export: true,
            lock_retries: 5,
            lock_retry_base_ms: 50,
            busy_timeout_ms: 100,
        }
    }
}

impl StoreConfig {
    /// Create a new config with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load from `<store_dir>/config.yaml`, falling back to defaults.
    pub fn load(store_dir: &Path) -> Result<Self> {
        let path = store_dir.join(CONFIG_FILE);
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = fs::read_to_string(&path).with_context(|| format!("Failed to read {}", path.display()))?;
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: StoreConfig =
            serde_yaml::from_str(&text).with_context(|| format!("Failed to parse {}", path.display()))?;
        config.validate()?;
        log::debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Write this config to `<store_dir>/config.yaml`.
    pub fn save(&self, store_dir: &Path) -> Result<()> {
        let path = store_dir.join(CONFIG_FILE);
        let text = serde_yaml::to_string(self).context("Failed to serialize config")?;
        fs::write(&path, text).with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        let name = Path::new(&self.mirror_file);
        if self.mirror_file.is_empty() || name.components().count() != 1 {
            eyre::bail!(
                "mirror_file must be a plain file name inside the store directory, got '{}'",
                self.mirror_file
            );
        }
        Ok(())
    }

    /// Set the mirror file name.
    pub fn mirror_file(mut self, name: impl Into<String>) -> Self {
        self.mirror_file = name.into();
        self
    }

    /// Enable or disable mirror regeneration on mutation.
    pub fn auto_export(mut self, enabled: bool) -> Self {
        self.auto_export = enabled;
        self
    }

    /// Set the lock retry policy.
    pub fn lock_retries(mut self, retries: u32, base_ms: u64) -> Self {
        self.lock_retries = retries;
        self.lock_retry_base_ms = base_ms;
        self
    }

    /// Set the SQLite busy timeout.
    pub fn busy_timeout_ms(mut self, ms: u64) -> Self {
        self.busy_timeout_ms = ms;
        self
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.lock_retry_base_ms.saturating_mul(attempt as u64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_config_builder() {
        let config = StoreConfig::new()
            .mirror_file("work.jsonl")
            .auto_export(false)
            .lock_retries(3, 10);

        assert_eq!(config.mirror_file, "work.jsonl");
        assert!(!config.auto_export);
        assert_eq!(config.lock_retries, 3);
        assert_eq!(config.retry_delay(2), Duration::from_millis(20));
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let config = StoreConfig::load(temp_dir.path()).unwrap();
        assert_eq!(config, StoreConfig::default());
    }

    #[test]
    fn test_load_partial_yaml() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join(CONFIG_FILE), "lock_retries: 9\n").unwrap();

        let config = StoreConfig::load(temp_dir.path()).unwrap();
        assert_eq!(config.lock_retries, 9);
        assert_eq!(config.mirror_file, DEFAULT_MIRROR_FILE);
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let temp_dir = TempDir::new().unwrap();
        let config = StoreConfig::new().mirror_file("other.jsonl");
        config.save(temp_dir.path()).unwrap();

        assert_eq!(StoreConfig::load(temp_dir.path()).unwrap(), config);
    }

    #[test]
    fn test_mirror_file_must_stay_in_store_dir() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join(CONFIG_FILE), "mirror_file: ../escape.jsonl\n").unwrap();
        assert!(StoreConfig::load(temp_dir.path()).is_err());
    }
}
