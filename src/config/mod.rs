//! Configuration management for Dockyard

pub mod schema;

pub use schema::{Config, ServiceConfig};

use crate::error::{DockyardError, DockyardResult};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

/// File name of the project-local configuration
pub const LOCAL_CONFIG_NAME: &str = "dockyard.toml";

/// Configuration manager
pub struct ConfigManager {
    config_path: PathBuf,
}

impl ConfigManager {
    /// Create a new config manager with default path
    pub fn new() -> Self {
        Self {
            config_path: Self::default_config_path(),
        }
    }

    /// Create a config manager with a custom path
    pub fn with_path(path: PathBuf) -> Self {
        Self { config_path: path }
    }

    /// Get the default config file path
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("dockyard")
            .join("config.toml")
    }

    /// Get the state directory path
    pub fn state_dir() -> PathBuf {
        dirs::state_dir()
            .or_else(dirs::data_local_dir)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("dockyard")
    }

    /// Get the audit log path
    pub fn audit_log_path() -> PathBuf {
        Self::state_dir().join("audit.log")
    }

    /// Walk up from `start` looking for a project-local `dockyard.toml`
    pub fn find_local_config(start: &Path) -> Option<PathBuf> {
        start
            .ancestors()
            .map(|dir| dir.join(LOCAL_CONFIG_NAME))
            .find(|candidate| candidate.is_file())
    }

    /// Load the global config with an optional project config merged over it.
    ///
    /// Tables merge key by key; any other value in the project config
    /// replaces the global one.
    pub async fn load_merged(&self, local: Option<&Path>) -> DockyardResult<Config> {
        let mut merged = if self.config_path.exists() {
            read_toml_value(&self.config_path).await?
        } else {
            toml::Value::Table(toml::map::Map::new())
        };

        let origin = match local {
            Some(local_path) => {
                debug!("Merging project config {}", local_path.display());
                let overlay = read_toml_value(local_path).await?;
                merge_values(&mut merged, overlay);
                local_path
            }
            None => self.config_path.as_path(),
        };

        merged.try_into().map_err(|e: toml::de::Error| DockyardError::ConfigInvalid {
            path: origin.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Ensure the state directory exists
    pub async fn ensure_state_dirs() -> DockyardResult<()> {
        let dir = Self::state_dir();
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| DockyardError::io(format!("creating directory {}", dir.display()), e))
    }

    /// Get the config file path
    pub fn path(&self) -> &Path {
        &self.config_path
    }
}

impl Default for ConfigManager {
    fn default() -> Self {
        Self::new()
    }
}

async fn read_toml_value(path: &Path) -> DockyardResult<toml::Value> {
    let content = fs::read_to_string(path)
        .await
        .map_err(|e| DockyardError::io(format!("reading config from {}", path.display()), e))?;

    content.parse().map_err(|e: toml::de::Error| DockyardError::ConfigInvalid {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

fn merge_values(base: &mut toml::Value, overlay: toml::Value) {
    match (base, overlay) {
        (toml::Value::Table(base_table), toml::Value::Table(overlay_table)) => {
            for (key, value) in overlay_table {
                match base_table.get_mut(&key) {
                    Some(existing) => merge_values(existing, value),
                    None => {
                        base_table.insert(key, value);
                    }
                }
            }
        }
        (slot, value) => *slot = value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn defaults_when_no_config_exists() {
        let temp = TempDir::new().unwrap();
        let manager = ConfigManager::with_path(temp.path().join("nonexistent.toml"));

        let config = manager.load_merged(None).await.unwrap();
        assert_eq!(config.service.entry, "main:app");
        assert_eq!(config.image.expose, config.service.port);
    }

    #[tokio::test]
    async fn local_config_overrides_global() {
        let temp = TempDir::new().unwrap();
        let global = temp.path().join("config.toml");
        std::fs::write(
            &global,
            "[service]\nhost = \"127.0.0.1\"\nport = 9000\n[image]\nexpose = 9000\n",
        )
        .unwrap();

        let local = temp.path().join(LOCAL_CONFIG_NAME);
        std::fs::write(&local, "[service]\nentry = \"service:app\"\n").unwrap();

        let config = ConfigManager::with_path(global)
            .load_merged(Some(&local))
            .await
            .unwrap();

        assert_eq!(config.service.entry, "service:app");
        assert_eq!(config.service.host, "127.0.0.1");
        assert_eq!(config.service.port, 9000);
    }

    #[tokio::test]
    async fn invalid_local_config_names_file() {
        let temp = TempDir::new().unwrap();
        let local = temp.path().join(LOCAL_CONFIG_NAME);
        std::fs::write(&local, "[service]\nport = \"not a number\"\n").unwrap();

        let err = ConfigManager::with_path(temp.path().join("missing.toml"))
            .load_merged(Some(&local))
            .await
            .unwrap_err();

        match err {
            DockyardError::ConfigInvalid { path, .. } => assert_eq!(path, local),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn find_local_config_walks_up() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join(LOCAL_CONFIG_NAME), "").unwrap();
        let nested = temp.path().join("a").join("b");
        std::fs::create_dir_all(&nested).unwrap();

        let found = ConfigManager::find_local_config(&nested).unwrap();
        assert_eq!(found, temp.path().join(LOCAL_CONFIG_NAME));
    }

    #[test]
    fn merge_replaces_scalars_and_arrays() {
        let mut base: toml::Value = toml::from_str("a = [1, 2]\n[t]\nx = 1\ny = 2\n").unwrap();
        let overlay: toml::Value = toml::from_str("a = [3]\n[t]\ny = 5\n").unwrap();
        merge_values(&mut base, overlay);

        assert_eq!(base["a"].as_array().unwrap().len(), 1);
        assert_eq!(base["t"]["x"].as_integer(), Some(1));
        assert_eq!(base["t"]["y"].as_integer(), Some(5));
    }
}
