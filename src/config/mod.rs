//! Configuration for cardtpl
//!
//! Settings that shape a refresh pass live in a small TOML file. Every key is
//! optional; a missing file means all defaults.
//!
//! # Location
//!
//! - `--config <path>` when given (`~` and `$VARS` are expanded)
//! - otherwise `~/.cardtpl/config.toml` (`%LOCALAPPDATA%\cardtpl\config.toml` on
//!   Windows)
//!
//! # Format
//!
//! ```toml
//! # Maximum nesting of template expansions along one branch
//! max_depth = 50
//!
//! # Whether a later template definition replaces an earlier one with the same key
//! overwrite = true
//!
//! [fetch]
//! # Partial bodies fetched at once
//! concurrency = 8
//! # Retries for a failed HTTP fetch (exponential backoff)
//! retries = 3
//! # Per-request timeout
//! timeout_secs = 30
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use cardtpl_cli::config::EngineConfig;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = EngineConfig::load_with_optional(None).await?;
//! println!("max depth: {}", config.max_depth);
//! # Ok(())
//! # }
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;

use crate::constants::{
    DEFAULT_FETCH_CONCURRENCY, DEFAULT_FETCH_RETRIES, DEFAULT_FETCH_TIMEOUT_SECS,
    DEFAULT_MAX_DEPTH,
};
use crate::core::CardtplError;

const fn default_max_depth() -> usize {
    DEFAULT_MAX_DEPTH
}

const fn default_true() -> bool {
    true
}

const fn default_concurrency() -> usize {
    DEFAULT_FETCH_CONCURRENCY
}

const fn default_retries() -> usize {
    DEFAULT_FETCH_RETRIES
}

const fn default_timeout_secs() -> u64 {
    DEFAULT_FETCH_TIMEOUT_SECS
}

/// Settings for one refresh pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    /// Maximum nesting of template expansions.
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,

    /// Whether a later template replaces an earlier one with the same key.
    #[serde(default = "default_true")]
    pub overwrite: bool,

    /// Partial source fetching.
    #[serde(default)]
    pub fetch: FetchConfig,
}

/// Settings for fetching partial bodies from URLs and files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FetchConfig {
    /// Partial bodies fetched at once.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Retries for a failed HTTP fetch.
    #[serde(default = "default_retries")]
    pub retries: usize,

    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
            overwrite: true,
            fetch: FetchConfig::default(),
        }
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_FETCH_CONCURRENCY,
            retries: DEFAULT_FETCH_RETRIES,
            timeout_secs: DEFAULT_FETCH_TIMEOUT_SECS,
        }
    }
}

impl FetchConfig {
    /// The per-request timeout.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl EngineConfig {
    /// Load from `path` when given, else from the default location.
    ///
    /// A missing file yields the defaults. An explicitly given path that does not
    /// exist is an error.
    pub async fn load_with_optional(path: Option<&str>) -> Result<Self> {
        if let Some(path) = path {
            let path = resolve_path(path)?;
            if !path.exists() {
                return Err(CardtplError::ConfigError {
                    message: format!("Config file not found: {}", path.display()),
                }
                .into());
            }
            return Self::load_from(&path).await;
        }

        let path = Self::default_path()?;
        if path.exists() {
            Self::load_from(&path).await
        } else {
            tracing::debug!("No config at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    /// Load and validate a specific file.
    pub async fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config from {}", path.display()))?;

        let config: Self = toml::from_str(&content).map_err(|e| CardtplError::ConfigError {
            message: format!("{}: {e}", path.display()),
        })?;
        config.validate()?;

        tracing::debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// `~/.cardtpl/config.toml`, or `%LOCALAPPDATA%\cardtpl\config.toml` on
    /// Windows.
    pub fn default_path() -> Result<PathBuf> {
        let config_dir = if cfg!(target_os = "windows") {
            dirs::data_local_dir()
                .ok_or_else(|| anyhow::anyhow!("Unable to determine local data directory"))?
                .join("cardtpl")
        } else {
            dirs::home_dir()
                .ok_or_else(|| anyhow::anyhow!("Unable to determine home directory"))?
                .join(".cardtpl")
        };

        Ok(config_dir.join("config.toml"))
    }

    fn validate(&self) -> Result<(), CardtplError> {
        if self.max_depth == 0 {
            return Err(CardtplError::ConfigError {
                message: "max_depth must be at least 1".to_string(),
            });
        }
        if self.fetch.concurrency == 0 {
            return Err(CardtplError::ConfigError {
                message: "fetch.concurrency must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

/// Expand `~` and environment variables in a user-supplied path.
pub fn resolve_path(path: &str) -> Result<PathBuf> {
    let expanded = shellexpand::full(path)
        .with_context(|| format!("Failed to expand path: {path}"))?;
    Ok(PathBuf::from(expanded.into_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.max_depth, 50);
        assert!(config.overwrite);
        assert_eq!(config.fetch.concurrency, 8);
        assert_eq!(config.fetch.retries, 3);
        assert_eq!(config.fetch.timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let config: EngineConfig = toml::from_str("max_depth = 12\n[fetch]\nretries = 0\n").unwrap();
        assert_eq!(config.max_depth, 12);
        assert!(config.overwrite);
        assert_eq!(config.fetch.retries, 0);
        assert_eq!(config.fetch.concurrency, 8);
    }

    #[test]
    fn test_unknown_keys_rejected() {
        assert!(toml::from_str::<EngineConfig>("max_dept = 3").is_err());
    }

    #[tokio::test]
    async fn test_load_from_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        std::fs::write(&path, "overwrite = false\n").unwrap();

        let config = EngineConfig::load_with_optional(path.to_str()).await.unwrap();
        assert!(!config.overwrite);
    }

    #[tokio::test]
    async fn test_explicit_missing_file_is_an_error() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nope.toml");
        let err = EngineConfig::load_with_optional(path.to_str()).await.unwrap_err();
        assert!(matches!(err.downcast_ref::<CardtplError>(), Some(CardtplError::ConfigError { .. })));
    }

    #[tokio::test]
    async fn test_zero_depth_rejected() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        std::fs::write(&path, "max_depth = 0\n").unwrap();
        let err = EngineConfig::load_from(&path).await.unwrap_err();
        assert!(err.to_string().contains("max_depth"));
    }

    #[test]
    fn test_resolve_path_expands_home() {
        let home = dirs::home_dir().unwrap();
        assert_eq!(resolve_path("~/x.toml").unwrap(), home.join("x.toml"));
        assert_eq!(resolve_path("plain.toml").unwrap(), PathBuf::from("plain.toml"));
    }
}
