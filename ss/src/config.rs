//! Configuration for the sessionstore CLI

use eyre::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::job::default_registry_path;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory holding session.json and plan.json
    #[serde(default = "default_session_dir")]
    pub session_dir: PathBuf,

    /// Path to the shared background job registry
    #[serde(default = "default_registry")]
    pub registry_path: PathBuf,

    /// Job ledger retention window in days
    #[serde(default = "default_retention_days")]
    pub retention_days: i64,
}

fn default_session_dir() -> PathBuf {
    PathBuf::from(".shipwright")
}

fn default_registry() -> PathBuf {
    default_registry_path()
}

fn default_retention_days() -> i64 {
    7
}

impl Default for Config {
    fn default() -> Self {
        Self {
            session_dir: default_session_dir(),
            registry_path: default_registry(),
            retention_days: default_retention_days(),
        }
    }
}

impl Config {
    /// Load config from file, or use defaults
    pub fn load(path: Option<&PathBuf>) -> Result<Self> {
        if let Some(config_path) = path {
            let content = std::fs::read_to_string(config_path)?;
            let config: Config = serde_yaml::from_str(&content)?;
            return Ok(config);
        }

        // Try default locations
        let default_paths = [
            dirs::config_dir().map(|p| p.join("sessionstore").join("config.yml")),
            Some(PathBuf::from("sessionstore.yml")),
        ];

        for path in default_paths.iter().flatten() {
            if path.exists() {
                let content = std::fs::read_to_string(path)?;
                let config: Config = serde_yaml::from_str(&content)?;
                return Ok(config);
            }
        }

        Ok(Config::default())
    }

    /// Save config to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.session_dir, PathBuf::from(".shipwright"));
        assert_eq!(config.retention_days, 7);
    }

    #[test]
    fn test_load_partial_file_fills_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.yml");
        std::fs::write(&path, "retention_days: 3\n").unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.retention_days, 3);
        assert_eq!(config.session_dir, PathBuf::from(".shipwright"));
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.yml");
        let mut config = Config::default();
        config.retention_days = 14;
        config.save(&path).unwrap();

        let back = Config::load(Some(&path)).unwrap();
        assert_eq!(back.retention_days, 14);
    }
}
