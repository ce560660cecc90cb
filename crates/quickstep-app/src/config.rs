//! Runtime configuration.

use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

const CONFIG_DIR: &str = "quickstep";
const CONFIG_FILE: &str = "config.toml";

/// Top-level configuration loaded from `<config dir>/quickstep/config.toml`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuickstepConfig {
    /// Cache sizes.
    #[serde(default)]
    pub cache: CacheConfig,
    /// Thumbnail loading.
    #[serde(default)]
    pub thumbnails: ThumbnailConfig,
    /// Command queue limits.
    #[serde(default)]
    pub overview: OverviewConfig,
}

impl QuickstepConfig {
    /// Load configuration from `path`, or from the default location when
    /// `path` is `None`. A missing file yields defaults.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => match Self::default_path() {
                Some(path) => Self::from_file(path),
                None => Ok(Self::default()),
            },
        }
    }

    /// Load configuration from a known file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
        let config: Self =
            toml::from_str(&contents).with_context(|| format!("failed to parse {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// `<config dir>/quickstep/config.toml`, if the platform has a config dir.
    #[must_use]
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(CONFIG_DIR).join(CONFIG_FILE))
    }

    fn validate(&self) -> Result<()> {
        if self.cache.icon_capacity == 0 {
            bail!("cache.icon_capacity must be greater than zero");
        }
        if self.cache.thumbnail_capacity == 0 {
            bail!("cache.thumbnail_capacity must be greater than zero");
        }
        self.overview.validate()
    }
}

/// Cache sizing block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Icon entries kept in memory.
    pub icon_capacity: usize,
    /// Thumbnail entries kept in memory before the visible window resizes it.
    pub thumbnail_capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            icon_capacity: 12,
            thumbnail_capacity: 3,
        }
    }
}

/// Thumbnail loading block.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThumbnailConfig {
    /// Always load full-resolution thumbnails.
    pub force_high_res: bool,
}

/// Overview command queue block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OverviewConfig {
    /// Deadline for a single command, in milliseconds.
    pub command_timeout_ms: u64,
    /// Commands accepted before new ones are dropped.
    pub max_pending_commands: usize,
}

impl Default for OverviewConfig {
    fn default() -> Self {
        Self {
            command_timeout_ms: 5_000,
            max_pending_commands: 3,
        }
    }
}

impl OverviewConfig {
    /// Command deadline.
    #[must_use]
    pub const fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    fn validate(&self) -> Result<()> {
        if self.command_timeout_ms == 0 {
            bail!("overview.command_timeout_ms must be greater than zero");
        }
        if self.max_pending_commands == 0 {
            bail!("overview.max_pending_commands must be greater than zero");
        }
        Ok(())
    }
}
