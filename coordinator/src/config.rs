use crate::errors::{FederatedError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Configuration for the federated runtime
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub runtime: RuntimeConfig,
    pub logging: LoggingConfig,
}

/// Worker and session settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Bound of each worker's request queue
    pub worker_queue_depth: usize,
    /// Partition count used when none is given on the command line
    pub default_partitions: usize,
    /// Session id (`tid`) attached to federated requests
    pub session_id: u64,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub log_to_file: bool,
    /// Directory for rolling log files (default `~/.fedexec/logs`)
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            runtime: RuntimeConfig {
                worker_queue_depth: 64,
                default_partitions: 3,
                session_id: 1,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                log_to_file: false,
                log_dir: None,
            },
        }
    }
}

impl Config {
    /// Get default configuration file path: `~/.fedexec/config.toml`
    pub fn default_path() -> Result<PathBuf> {
        let home = dirs::home_dir()
            .ok_or_else(|| FederatedError::Config("Cannot determine home directory".into()))?;
        Ok(home.join(".fedexec").join("config.toml"))
    }

    /// Load and validate configuration from file
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            tracing::error!(path = %path.display(), error = %e, "Failed to read config file");
            e
        })?;

        let config: Config = toml::from_str(&content)?;
        config.validate()?;

        tracing::info!(path = %path.display(), "Configuration loaded");
        Ok(config)
    }

    /// Save configuration, writing a temp file and renaming it into place
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let toml_string = toml::to_string_pretty(self)?;

        let temp_path = path.with_extension("toml.tmp");
        fs::write(&temp_path, &toml_string).map_err(|e| {
            tracing::error!(path = %temp_path.display(), error = %e, "Failed to write temp config file");
            e
        })?;
        fs::rename(&temp_path, path).map_err(|e| {
            tracing::error!(
                from = %temp_path.display(),
                to = %path.display(),
                error = %e,
                "Failed to rename temp config file"
            );
            e
        })?;

        tracing::info!(path = %path.display(), "Configuration saved");
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.runtime.worker_queue_depth == 0 || self.runtime.worker_queue_depth > 65536 {
            return Err(FederatedError::Config(
                "worker_queue_depth must be between 1 and 65536".into(),
            ));
        }

        if self.runtime.default_partitions == 0 {
            return Err(FederatedError::Config(
                "default_partitions must be at least 1".into(),
            ));
        }

        match self.logging.level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => {
                return Err(FederatedError::Config(
                    "log level must be one of: trace, debug, info, warn, error".into(),
                ))
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = Config::default();
        config.runtime.session_id = 42;
        config.logging.log_dir = Some(dir.path().join("logs"));
        config.save(&path).unwrap();

        assert!(!path.with_extension("toml.tmp").exists());
        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_load_rejects_invalid_values() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");

        let mut config = Config::default();
        config.runtime.worker_queue_depth = 0;
        config.save(&path).unwrap();
        assert!(matches!(Config::load(&path), Err(FederatedError::Config(_))));

        let mut config = Config::default();
        config.logging.level = "loud".to_string();
        config.save(&path).unwrap();
        assert!(Config::load(&path).is_err());
    }

    #[test]
    fn test_load_missing_file() {
        let dir = TempDir::new().unwrap();
        let err = Config::load(&dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, FederatedError::Io(_)));
    }

    #[test]
    fn test_log_dir_is_optional() {
        let toml = r#"
            [runtime]
            worker_queue_depth = 8
            default_partitions = 2
            session_id = 3

            [logging]
            level = "debug"
            log_to_file = true
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.logging.log_dir, None);
        assert_eq!(config.runtime.default_partitions, 2);
    }
}
