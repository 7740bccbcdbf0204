use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;

use crate::error::SuiteError;
use crate::memory::megabytes;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database_path: PathBuf,
    pub report_path: PathBuf,
    pub run: RunOptions,
    pub thresholds: Thresholds,
    /// suite name -> category name -> shell commands
    pub suites: BTreeMap<String, BTreeMap<String, Vec<String>>>,
}

/// Options recognised by a single run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunOptions {
    pub parallel: bool,
    pub max_processes: usize,
    #[serde(alias = "timeout")]
    pub timeout_seconds: u64,
    #[serde(alias = "memory_limit")]
    pub memory_limit_mb: u64,
    pub groups: BTreeSet<String>,
    pub debug: bool,
    #[serde(alias = "chaos_engineering_enabled")]
    pub chaos: bool,
    #[serde(alias = "load_testing_enabled")]
    pub load_testing: bool,
    pub optimization: bool,
    pub failure_analysis: bool,
    pub real_time_monitoring: bool,
    pub caching: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suite_timeout_seconds: Option<u64>,
    pub max_execution_time_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    pub performance: f64,
    pub security: f64,
    pub integration: f64,
    pub coverage: f64,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("suiterun");

        Self {
            database_path: data_dir.join(crate::defaults::DEFAULT_DB_NAME),
            report_path: PathBuf::from(crate::defaults::DEFAULT_REPORT_DIR),
            run: RunOptions::default(),
            thresholds: Thresholds::default(),
            suites: BTreeMap::new(),
        }
    }
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            parallel: false,
            max_processes: default_max_processes(),
            timeout_seconds: 300,
            memory_limit_mb: 512,
            groups: BTreeSet::new(),
            debug: false,
            chaos: false,
            load_testing: false,
            optimization: true,
            failure_analysis: false,
            real_time_monitoring: false,
            caching: false,
            suite_timeout_seconds: None,
            max_execution_time_ms: 30_000,
        }
    }
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            performance: 80.0,
            security: 90.0,
            integration: 85.0,
            coverage: 95.0,
        }
    }
}

/// Host core count, capped at four workers
pub fn default_max_processes() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
        .min(4)
}

impl RunOptions {
    /// Build options from a loosely-typed map; unrecognised keys are ignored.
    pub fn from_map(options: &Map<String, Value>) -> crate::error::Result<Self> {
        serde_json::from_value(Value::Object(options.clone()))
            .map_err(|e| SuiteError::ConfigError(format!("Invalid run options: {}", e)))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    pub fn suite_timeout(&self) -> Option<Duration> {
        self.suite_timeout_seconds.map(Duration::from_secs)
    }

    pub fn memory_limit_bytes(&self) -> u64 {
        megabytes(self.memory_limit_mb)
    }

    pub fn worker_count(&self) -> usize {
        self.max_processes.max(1)
    }
}

impl Config {
    /// Load from an explicit path, or from the default location when none is given.
    /// A missing default file yields the default configuration.
    pub async fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = match path {
            Some(p) => p.to_path_buf(),
            None => {
                let default_path = Self::get_config_path()?;
                if !default_path.exists() {
                    return Ok(Self::default());
                }
                default_path
            }
        };

        let contents = fs::read_to_string(&config_path)
            .await
            .with_context(|| format!("Failed to read config file {}", config_path.display()))?;

        let config: Config = toml::from_str(&contents).context("Failed to parse config file")?;

        Ok(config)
    }

    pub async fn save(&self, path: Option<&Path>) -> Result<PathBuf> {
        let config_path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::get_config_path()?,
        };

        // Ensure config directory exists
        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent)
                .await
                .context("Failed to create config directory")?;
        }

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;

        fs::write(&config_path, contents)
            .await
            .context("Failed to write config file")?;

        Ok(config_path)
    }

    pub fn get_config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Could not find config directory")?
            .join("suiterun");

        Ok(config_dir.join(crate::defaults::DEFAULT_CONFIG_NAME))
    }

    pub async fn ensure_database_directory(&self) -> Result<()> {
        if let Some(parent) = self.database_path.parent() {
            fs::create_dir_all(parent)
                .await
                .context("Failed to create database directory")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_run_options_default() {
        let options = RunOptions::default();
        assert!(!options.parallel);
        assert_eq!(options.timeout_seconds, 300);
        assert_eq!(options.memory_limit_mb, 512);
        assert!(options.groups.is_empty());
        assert!(options.max_processes >= 1 && options.max_processes <= 4);
        assert!(options.optimization);
    }

    #[test]
    fn test_run_options_from_map_with_aliases() {
        let map = json!({
            "parallel": true,
            "max_processes": 2,
            "timeout": 12,
            "memory_limit": 64,
            "groups": ["unit", "api"],
            "chaos_engineering_enabled": true,
            "something_else": "ignored"
        });

        let options = RunOptions::from_map(map.as_object().unwrap()).unwrap();
        assert!(options.parallel);
        assert_eq!(options.max_processes, 2);
        assert_eq!(options.timeout(), Duration::from_secs(12));
        assert_eq!(options.memory_limit_bytes(), 64 * 1024 * 1024);
        assert!(options.groups.contains("unit") && options.groups.contains("api"));
        assert!(options.chaos);
        assert!(!options.load_testing);
    }

    #[test]
    fn test_run_options_from_map_rejects_bad_types() {
        let map = json!({ "parallel": "yes" });
        let err = RunOptions::from_map(map.as_object().unwrap()).unwrap_err();
        assert!(err.to_string().contains("Configuration error"));
    }

    #[test]
    fn test_worker_count_never_zero() {
        let options = RunOptions {
            max_processes: 0,
            ..RunOptions::default()
        };
        assert_eq!(options.worker_count(), 1);
    }

    #[tokio::test]
    async fn test_config_save_and_load_partial_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");

        fs::write(
            &path,
            r#"
            report_path = "out"

            [run]
            parallel = true

            [suites.unit]
            lib = ["true", "echo ok"]
            "#,
        )
        .await
        .unwrap();

        let config = Config::load(Some(&path)).await.unwrap();
        assert_eq!(config.report_path, PathBuf::from("out"));
        assert!(config.run.parallel);
        assert_eq!(config.run.timeout_seconds, 300);
        assert_eq!(config.suites["unit"]["lib"].len(), 2);
        assert_eq!(config.thresholds, Thresholds::default());

        let saved = config.save(Some(&path)).await.unwrap();
        let reloaded = Config::load(Some(&saved)).await.unwrap();
        assert_eq!(reloaded.run, config.run);
    }

    #[tokio::test]
    async fn test_config_load_missing_explicit_path_fails() {
        let temp_dir = TempDir::new().unwrap();
        let result = Config::load(Some(&temp_dir.path().join("nope.toml"))).await;
        assert!(result.is_err());
    }
}
