//! `itemsync.toml` - persister and logging settings for the CLI and
//! embedding applications

use crate::persist::PersistSettings;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct ItemsyncConfig {
    #[serde(default)]
    pub persist: PersistSection,
    #[serde(default)]
    pub log: LogSection,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PersistSection {
    /// Lookup and delete chunk size for classes without their own
    pub batch_size: Option<usize>,
    /// Apply bulk defaults and merge items before persisting
    #[serde(default = "default_process")]
    pub process: bool,
}

impl Default for PersistSection {
    fn default() -> Self {
        Self {
            batch_size: None,
            process: default_process(),
        }
    }
}

fn default_process() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct LogSection {
    /// `tracing_subscriber::EnvFilter` directives, e.g. `itemsync=debug`
    pub filter: Option<String>,
}

impl ItemsyncConfig {
    pub fn persist_settings(&self) -> PersistSettings {
        PersistSettings {
            batch_size: self.persist.batch_size,
            process: self.persist.process,
        }
    }
}

pub fn default_config_path() -> PathBuf {
    PathBuf::from("itemsync.toml")
}

pub fn load_config(path: Option<&Path>) -> anyhow::Result<Option<ItemsyncConfig>> {
    let path = path.map(Path::to_path_buf).unwrap_or_else(default_config_path);
    if !path.exists() {
        return Ok(None);
    }

    let contents = std::fs::read_to_string(&path)?;
    let config: ItemsyncConfig = toml::from_str(&contents)?;
    if config.persist.batch_size == Some(0) {
        anyhow::bail!("{}: persist.batch_size must be at least 1", path.display());
    }
    Ok(Some(config))
}

pub fn write_config(path: &Path, config: &ItemsyncConfig, force: bool) -> anyhow::Result<()> {
    if path.exists() && !force {
        anyhow::bail!("config already exists at {} (use --force to overwrite)", path.display());
    }

    let contents = toml::to_string_pretty(config)?;
    std::fs::write(path, contents)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_config_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("itemsync.toml");
        assert!(load_config(Some(&path)).unwrap().is_none());
    }

    #[test]
    fn test_write_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("itemsync.toml");
        let mut config = ItemsyncConfig::default();
        config.persist.batch_size = Some(25);
        config.log.filter = Some("itemsync=debug".to_string());

        write_config(&path, &config, false).unwrap();
        let loaded = load_config(Some(&path)).unwrap().unwrap();
        assert_eq!(loaded, config);
        assert_eq!(loaded.persist_settings().batch_size, Some(25));
        assert!(loaded.persist_settings().process);

        assert!(write_config(&path, &config, false).is_err());
        write_config(&path, &ItemsyncConfig::default(), true).unwrap();
        assert_eq!(load_config(Some(&path)).unwrap().unwrap().persist.batch_size, None);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("itemsync.toml");
        std::fs::write(&path, "[log]\nfilter = \"warn\"\n").unwrap();

        let config = load_config(Some(&path)).unwrap().unwrap();
        assert_eq!(config.persist, PersistSection::default());
        assert_eq!(config.log.filter.as_deref(), Some("warn"));
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("itemsync.toml");
        std::fs::write(&path, "[persist]\nbatch_size = 0\n").unwrap();
        assert!(load_config(Some(&path)).is_err());
    }
}
