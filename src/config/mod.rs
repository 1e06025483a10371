//! Persisted scoring configuration.
//!
//! Staff change these values through commands while the bot is running, so every crawl reads them
//! once through [`ConfigurationStore::snapshot`] and never again.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::instrument;

use crate::constants::{DEFAULT_MAX_XP, DEFAULT_THRESHOLD};
use crate::stats::xp::ScoringConfig;

#[inline]
const fn default_threshold() -> u32 {
    DEFAULT_THRESHOLD
}

#[inline]
const fn default_max_xp() -> u32 {
    DEFAULT_MAX_XP
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Configuration {
    #[serde(default = "default_threshold")]
    pub post_threshold: u32,

    /// Lowercased substrings; a channel is crawled when its category contains one of them.
    ///
    /// Older configuration files store these under `excluded_channels`.
    #[serde(default, alias = "excluded_channels")]
    pub included_categories: Vec<String>,

    #[serde(default = "default_max_xp")]
    pub max_xp: u32,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            post_threshold: DEFAULT_THRESHOLD,
            included_categories: Vec::new(),
            max_xp: DEFAULT_MAX_XP,
        }
    }
}

impl Configuration {
    pub fn scoring(&self) -> ScoringConfig {
        ScoringConfig {
            threshold: self.post_threshold,
            max_xp: self.max_xp,
        }
    }
}

#[async_trait]
pub trait ConfigurationStore: Send + Sync {
    /// Consistent copy of every value, taken once per crawl
    async fn snapshot(&self) -> Configuration;

    async fn set_threshold(&self, value: u32) -> ConfigResult<()>;

    async fn set_max_xp(&self, value: u32) -> ConfigResult<()>;

    /// Adds category patterns (lowercased), returning how many were new
    async fn include_categories(&self, patterns: &[String]) -> ConfigResult<usize>;

    async fn get_threshold(&self) -> u32 {
        self.snapshot().await.post_threshold
    }

    async fn get_max_xp(&self) -> u32 {
        self.snapshot().await.max_xp
    }

    /// The category include-patterns
    async fn get_excluded_categories(&self) -> BTreeSet<String> {
        self.snapshot()
            .await
            .included_categories
            .into_iter()
            .collect()
    }
}

/// Configuration kept in a JSON file, rewritten on every change
#[derive(Debug)]
pub struct JsonConfigStore {
    path: PathBuf,
    current: RwLock<Configuration>,
}

impl JsonConfigStore {
    /// Loads `path`, falling back to the defaults when the file is missing or unreadable
    #[instrument]
    pub async fn load(path: &Path) -> Self {
        let current = match read_config(path).await {
            Ok(Some(config)) => {
                tracing::info!(
                    threshold = config.post_threshold,
                    max_xp = config.max_xp,
                    categories = config.included_categories.len(),
                    "loaded configuration"
                );
                config
            }
            Ok(None) => {
                tracing::info!("no configuration file, using defaults");
                Configuration::default()
            }
            Err(e) => {
                tracing::warn!(error = %e, "configuration unreadable, using defaults");
                Configuration::default()
            }
        };

        Self {
            path: path.to_path_buf(),
            current: RwLock::new(current),
        }
    }

    /// Applies `change` to a copy, persists the copy, and only then makes it current
    async fn update<F, T>(&self, change: F) -> ConfigResult<T>
    where
        F: FnOnce(&mut Configuration) -> T + Send,
        T: Send,
    {
        let mut current = self.current.write().await;
        let mut next = current.clone();
        let result = change(&mut next);

        write_config(&self.path, &next).await?;
        tracing::debug!(config = ?next, "configuration saved");

        *current = next;
        Ok(result)
    }
}

#[async_trait]
impl ConfigurationStore for JsonConfigStore {
    async fn snapshot(&self) -> Configuration {
        self.current.read().await.clone()
    }

    #[instrument(skip(self))]
    async fn set_threshold(&self, value: u32) -> ConfigResult<()> {
        self.update(|config| config.post_threshold = value).await
    }

    #[instrument(skip(self))]
    async fn set_max_xp(&self, value: u32) -> ConfigResult<()> {
        self.update(|config| config.max_xp = value).await
    }

    #[instrument(skip(self))]
    async fn include_categories(&self, patterns: &[String]) -> ConfigResult<usize> {
        let patterns: Vec<String> = patterns.iter().map(|p| p.to_lowercase()).collect();

        self.update(move |config| {
            let mut added = 0;
            for pattern in patterns {
                if !config.included_categories.contains(&pattern) {
                    config.included_categories.push(pattern);
                    added += 1;
                }
            }
            added
        })
        .await
    }
}

async fn read_config(path: &Path) -> ConfigResult<Option<Configuration>> {
    let raw = match tokio::fs::read_to_string(path).await {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    Ok(Some(serde_json::from_str(&raw)?))
}

async fn write_config(path: &Path, config: &Configuration) -> ConfigResult<()> {
    let raw = serde_json::to_string_pretty(config)?;
    tokio::fs::write(path, raw).await?;
    Ok(())
}

pub type ConfigResult<T> = core::result::Result<T, ConfigError>;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("malformed configuration: {0}")]
    Json(#[from] serde_json::Error),
}
