//! Service configuration, read from `config.toml`. Every field has a default
//! so an empty or missing file is a valid configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::{info, warn};

pub const CONFIG_ENV: &str = "CLASSROOM_QUESTS_CONFIG";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Root of the `guides/`, `quests/`, `cues/` and `subjects/` directories
    pub data_dir: PathBuf,
    pub database_url: String,
    pub bind_addr: String,
    /// Experiment tracking poll period
    pub tracking_interval_ms: u64,
    pub reward_timeout_ms: u64,
    /// Broadcast capacity of each experiment channel
    pub event_capacity: usize,
    /// Watch the data directory and reload content on change
    pub hot_reload: bool,
    pub log_filter: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            database_url: "sqlite:classroom.db?mode=rwc".to_string(),
            bind_addr: "127.0.0.1:2568".to_string(),
            tracking_interval_ms: 100,
            reward_timeout_ms: 5000,
            event_capacity: 64,
            hot_reload: cfg!(debug_assertions),
            log_filter: "classroom_quests=info".to_string(),
        }
    }
}

impl Config {
    pub fn from_toml_str(content: &str) -> Result<Self, String> {
        let config: Config =
            toml::from_str(content).map_err(|e| format!("Failed to parse config: {}", e))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, String> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read {:?}: {}", path, e))?;
        let config = Self::from_toml_str(&content).map_err(|e| format!("{:?}: {}", path, e))?;
        info!("Loaded config from {:?}", path);
        Ok(config)
    }

    /// Path from the first CLI argument, then the environment. With neither,
    /// `config.toml` is used when present and defaults otherwise.
    pub fn resolve(cli_path: Option<String>, env_path: Option<String>) -> Result<Self, String> {
        match cli_path.or(env_path) {
            Some(path) => Self::load(Path::new(&path)),
            None => {
                let default_path = Path::new("config.toml");
                if default_path.exists() {
                    Self::load(default_path)
                } else {
                    warn!("No config file found, using defaults");
                    Ok(Self::default())
                }
            }
        }
    }

    fn validate(&self) -> Result<(), String> {
        if self.tracking_interval_ms == 0 {
            return Err("tracking_interval_ms must be positive".to_string());
        }
        if self.event_capacity == 0 {
            return Err("event_capacity must be positive".to_string());
        }
        Ok(())
    }

    pub fn tracking_interval(&self) -> Duration {
        Duration::from_millis(self.tracking_interval_ms)
    }

    pub fn reward_timeout(&self) -> Duration {
        Duration::from_millis(self.reward_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_fill_missing_fields() {
        let config = Config::from_toml_str("bind_addr = \"0.0.0.0:9000\"\n").unwrap();
        assert_eq!(config.bind_addr, "0.0.0.0:9000");
        assert_eq!(config.data_dir, PathBuf::from("data"));
        assert_eq!(config.tracking_interval(), Duration::from_millis(100));
        assert_eq!(config.log_filter, "classroom_quests=info");
    }

    #[test]
    fn test_invalid_values() {
        assert!(Config::from_toml_str("tracking_interval_ms = 0").is_err());
        assert!(Config::from_toml_str("event_capacity = \"many\"").is_err());
    }

    #[test]
    fn test_cli_path_wins() {
        let dir = TempDir::new().unwrap();
        let cli = dir.path().join("cli.toml");
        let env = dir.path().join("env.toml");
        std::fs::write(&cli, "reward_timeout_ms = 10").unwrap();
        std::fs::write(&env, "reward_timeout_ms = 20").unwrap();

        let config = Config::resolve(
            Some(cli.to_string_lossy().to_string()),
            Some(env.to_string_lossy().to_string()),
        )
        .unwrap();
        assert_eq!(config.reward_timeout(), Duration::from_millis(10));

        let config = Config::resolve(None, Some(env.to_string_lossy().to_string())).unwrap();
        assert_eq!(config.reward_timeout_ms, 20);

        assert!(Config::resolve(Some("/no/such/file.toml".into()), None).is_err());
    }
}
