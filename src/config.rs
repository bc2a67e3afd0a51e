// src/config.rs
//
// Data layer configuration
//
// PRINCIPLES:
// - Every field has a default, an empty file is a valid config
// - Environment variables override the file
// - Unknown log levels degrade to `info` instead of failing

use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::{DataError, DataResult};

pub const ENV_DATABASE_PATH: &str = "COREBASE_DATABASE_PATH";
pub const ENV_LOG_LEVEL: &str = "COREBASE_LOG_LEVEL";
pub const ENV_LOG_DIR: &str = "COREBASE_LOG_DIR";

const DEFAULT_LOG_LEVEL: &str = "info";

/// Top-level configuration for the store and its logging.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    /// SQLite database file. `None` resolves to the platform data directory.
    pub database_path: Option<PathBuf>,
    pub pool_max_size: u32,
    pub busy_timeout_ms: u64,
    pub connection_timeout_ms: u64,
    pub logging: LoggingConfig,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            pool_max_size: 15,
            busy_timeout_ms: 5000,
            connection_timeout_ms: 30_000,
            logging: LoggingConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub directory: PathBuf,
    pub minimum_level: String,
    /// Per-module level overrides, e.g. `"corebase::uow" -> "debug"`.
    pub overrides: BTreeMap<String, String>,
    pub console: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("Logs"),
            minimum_level: DEFAULT_LOG_LEVEL.to_string(),
            overrides: BTreeMap::new(),
            console: true,
        }
    }
}

impl LoggingConfig {
    /// flexi_logger spec string: minimum level followed by module overrides.
    pub fn log_spec(&self) -> String {
        let mut spec = parse_log_level(&self.minimum_level).to_string();
        for (module, level) in &self.overrides {
            spec.push_str(&format!(", {}={}", module, parse_log_level(level)));
        }
        spec
    }
}

impl DataConfig {
    /// Load from a JSON file, then apply environment overrides.
    pub fn from_file(path: impl AsRef<Path>) -> DataResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            DataError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;

        let mut config = Self::from_json(&raw)?;
        config.apply_env_overrides();
        Ok(config)
    }

    pub fn from_json(raw: &str) -> DataResult<Self> {
        let config: DataConfig = serde_json::from_str(raw)
            .map_err(|e| DataError::Config(format!("Invalid configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults plus environment overrides, for callers without a config file.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup(ENV_DATABASE_PATH).filter(|v| !v.trim().is_empty()) {
            self.database_path = Some(PathBuf::from(path));
        }
        if let Some(level) = lookup(ENV_LOG_LEVEL).filter(|v| !v.trim().is_empty()) {
            self.logging.minimum_level = level;
        }
        if let Some(dir) = lookup(ENV_LOG_DIR).filter(|v| !v.trim().is_empty()) {
            self.logging.directory = PathBuf::from(dir);
        }
    }

    fn validate(&self) -> DataResult<()> {
        if self.pool_max_size == 0 {
            return Err(DataError::Config(
                "pool_max_size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Resolve the database file, creating the parent directory.
    ///
    /// Default location: {APP_DATA}/corebase/corebase.db
    pub fn resolve_database_path(&self) -> DataResult<PathBuf> {
        let path = match &self.database_path {
            Some(path) => path.clone(),
            None => {
                let data_dir = dirs::data_dir().ok_or_else(|| {
                    DataError::Config("Could not determine app data directory".to_string())
                })?;
                data_dir.join("corebase").join("corebase.db")
            }
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        Ok(path)
    }
}

/// Normalize a level name. Anything unrecognized becomes `info`.
pub fn parse_log_level(level: &str) -> &'static str {
    match level.trim().to_ascii_lowercase().as_str() {
        "trace" | "verbose" => "trace",
        "debug" => "debug",
        "info" | "information" => "info",
        "warn" | "warning" => "warn",
        "error" | "fatal" => "error",
        "off" => "off",
        _ => DEFAULT_LOG_LEVEL,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_empty_json_uses_defaults() {
        let config = DataConfig::from_json("{}").unwrap();
        assert_eq!(config.pool_max_size, 15);
        assert_eq!(config.busy_timeout_ms, 5000);
        assert_eq!(config.logging, LoggingConfig::default());
        assert!(config.database_path.is_none());
    }

    #[test]
    fn test_zero_pool_size_is_rejected() {
        let err = DataConfig::from_json(r#"{ "pool_max_size": 0 }"#).unwrap_err();
        assert!(matches!(err, DataError::Config(_)));
    }

    #[test]
    fn test_log_spec_includes_overrides() {
        let config = DataConfig::from_json(
            r#"{
                "logging": {
                    "minimum_level": "Warning",
                    "overrides": { "corebase::uow": "Debug", "r2d2": "nonsense" }
                }
            }"#,
        )
        .unwrap();

        assert_eq!(
            config.logging.log_spec(),
            "warn, corebase::uow=debug, r2d2=info"
        );
    }

    #[test]
    fn test_unknown_level_falls_back_to_info() {
        assert_eq!(parse_log_level("loud"), "info");
        assert_eq!(parse_log_level(" Information "), "info");
        assert_eq!(parse_log_level("Fatal"), "error");
    }

    #[test]
    fn test_overrides_replace_file_values() {
        let vars: HashMap<&str, &str> = [
            (ENV_DATABASE_PATH, "/tmp/override.db"),
            (ENV_LOG_LEVEL, "debug"),
            (ENV_LOG_DIR, "  "),
        ]
        .into_iter()
        .collect();

        let mut config = DataConfig::default();
        config.apply_overrides(|key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(config.database_path, Some(PathBuf::from("/tmp/override.db")));
        assert_eq!(config.logging.minimum_level, "debug");
        // Blank values are ignored
        assert_eq!(config.logging.directory, PathBuf::from("Logs"));
    }

    #[test]
    fn test_resolve_database_path_creates_parent() {
        let dir = tempfile::tempdir().unwrap();
        let config = DataConfig {
            database_path: Some(dir.path().join("nested").join("data.db")),
            ..DataConfig::default()
        };

        let path = config.resolve_database_path().unwrap();
        assert!(path.parent().unwrap().is_dir());
    }

    #[test]
    fn test_from_file_reads_json() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("corebase.json");
        std::fs::write(&file, r#"{ "pool_max_size": 4 }"#).unwrap();

        let config = DataConfig::from_file(&file).unwrap();
        assert_eq!(config.pool_max_size, 4);
    }
}
