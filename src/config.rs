//! Layered configuration.
//!
//! Precedence (lowest to highest):
//! 1. Built-in defaults
//! 2. `clovr.toml` in the working directory, or the file given with `--config`
//! 3. `CLOVR_*` environment variables, `__` separating nested keys
//!    (`CLOVR_CACHE__EXPIRE_AFTER_ACCESS_SECS=60`, `CLOVR_HEALTHY__METHOD=75`)
//!
//! Command-line flags override the result.

use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::cache::DEFAULT_EXPIRE_AFTER_ACCESS;
use crate::error::{ClovrError, Result};
use crate::target::CoverageTarget;

pub const DEFAULT_CONFIG_FILE: &str = "clovr.toml";

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// SQLite database holding builds and reports.
    pub db: PathBuf,
    /// Root of archived reports (`<data_dir>/builds/<n>/...`).
    pub data_dir: PathBuf,
    pub log_level: String,
    pub cache: CacheConfig,
    pub healthy: CoverageTarget,
    pub unhealthy: CoverageTarget,
    pub failing: CoverageTarget,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub expire_after_access_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            expire_after_access_secs: DEFAULT_EXPIRE_AFTER_ACCESS.as_secs(),
        }
    }
}

impl CacheConfig {
    pub fn expire_after_access(&self) -> Duration {
        Duration::from_secs(self.expire_after_access_secs)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db: PathBuf::from(".clovr.db"),
            data_dir: PathBuf::from(".clovr"),
            log_level: "warn".to_string(),
            cache: CacheConfig::default(),
            healthy: CoverageTarget::default_healthy(),
            unhealthy: CoverageTarget::new(Some(0), Some(0), Some(0)),
            failing: CoverageTarget::default(),
        }
    }
}

impl Config {
    /// The figment this configuration is extracted from.
    pub fn figment(file: &Path) -> Figment {
        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(file))
            .merge(Env::prefixed("CLOVR_").split("__"))
    }

    /// Load from `file` (default `clovr.toml`) and the environment. A missing
    /// file is not an error.
    pub fn load(file: Option<&Path>) -> Result<Self> {
        let file = file.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_FILE));
        Self::from_figment(Self::figment(file))
    }

    pub fn from_figment(figment: Figment) -> Result<Self> {
        let config: Config = figment.extract()?;
        config.validate()?;
        Ok(config.with_default_targets())
    }

    pub fn validate(&self) -> Result<()> {
        if !LOG_LEVELS.contains(&self.log_level.to_lowercase().as_str()) {
            return Err(ClovrError::InvalidConfig(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.log_level,
                LOG_LEVELS.join(", ")
            )));
        }
        if self.db.as_os_str().is_empty() {
            return Err(ClovrError::InvalidConfig(
                "Database path cannot be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// An empty healthy target falls back to 70/80/80.
    pub fn with_default_targets(mut self) -> Self {
        self.healthy = Self::healthy_or_default(self.healthy);
        self
    }

    /// Healthy target for one publish: `flag` when given, else the
    /// configured one. Empty either way means 70/80/80.
    pub fn healthy_target(&self, flag: Option<CoverageTarget>) -> CoverageTarget {
        Self::healthy_or_default(flag.unwrap_or(self.healthy))
    }

    fn healthy_or_default(target: CoverageTarget) -> CoverageTarget {
        if target.is_empty() {
            CoverageTarget::default_healthy()
        } else {
            target
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn from_toml(toml: &str) -> Result<Config> {
        Config::from_figment(
            Figment::new()
                .merge(Serialized::defaults(Config::default()))
                .merge(Toml::string(toml)),
        )
    }

    #[test]
    fn test_defaults() {
        let config = from_toml("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.cache.expire_after_access(), Duration::from_secs(3600));
        assert_eq!(config.healthy, CoverageTarget::default_healthy());
        assert!(config.failing.is_empty());
    }

    #[test]
    fn test_file_overrides() {
        let config = from_toml(
            r#"
            db = "ci.db"
            log_level = "debug"

            [cache]
            expire_after_access_secs = 60

            [failing]
            method = 50
            "#,
        )
        .unwrap();
        assert_eq!(config.db, PathBuf::from("ci.db"));
        assert_eq!(config.cache.expire_after_access_secs, 60);
        assert_eq!(config.failing.method, Some(50));
        assert_eq!(config.failing.statement, None);
    }

    #[test]
    fn test_empty_healthy_target_gets_default() {
        let mut config = Config::default();
        config.healthy = CoverageTarget::default();
        let config = config.with_default_targets();
        assert_eq!(config.healthy, CoverageTarget::default_healthy());
    }

    #[test]
    fn test_healthy_flag_gets_same_default() {
        let config = Config::default();
        let empty = CoverageTarget::default();
        assert_eq!(config.healthy_target(Some(empty)), CoverageTarget::default_healthy());
        assert_eq!(config.healthy_target(None), CoverageTarget::default_healthy());

        let strict = CoverageTarget::new(Some(90), None, None);
        assert_eq!(config.healthy_target(Some(strict)), strict);
    }

    #[test]
    fn test_invalid_log_level() {
        let err = from_toml(r#"log_level = "loud""#).unwrap_err();
        assert!(matches!(err, ClovrError::InvalidConfig(_)), "{err}");
        assert!(err.to_string().contains("Invalid log level 'loud'"));
    }

    #[test]
    fn test_empty_db_path_rejected() {
        let err = from_toml(r#"db = """#).unwrap_err();
        assert!(matches!(err, ClovrError::InvalidConfig(_)), "{err}");
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let figment = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(dir.path().join("absent.toml")));
        assert_eq!(Config::from_figment(figment).unwrap(), Config::default());
    }
}
