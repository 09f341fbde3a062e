// Configuration loading.
// Reads config.toml from the platform config directory; every field has a default.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::api::client::DEFAULT_BASE_URL;
use crate::cache::{cache_dir, config_dir};
use crate::error::{GlitchError, Result};

const TOKEN_ENV: &str = "GLITCH_TOKEN";

const MINUTE: u64 = 60;
const HOUR: u64 = 60 * MINUTE;

/// Cache lifetimes, in seconds, for each kind of data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TtlConfig {
    pub skill_info: u64,
    pub street: u64,
    pub explore: u64,
    pub subways: u64,
    pub catalog: u64,
    pub auctions: u64,
}

impl Default for TtlConfig {
    fn default() -> Self {
        Self {
            skill_info: 3 * HOUR,
            street: 12 * HOUR,
            explore: 30 * MINUTE,
            subways: 7 * 24 * HOUR,
            catalog: 15 * MINUTE,
            auctions: 5 * MINUTE,
        }
    }
}

impl TtlConfig {
    pub fn skill_info(&self) -> Duration {
        Duration::from_secs(self.skill_info)
    }

    pub fn street(&self) -> Duration {
        Duration::from_secs(self.street)
    }

    pub fn explore(&self) -> Duration {
        Duration::from_secs(self.explore)
    }

    pub fn subways(&self) -> Duration {
        Duration::from_secs(self.subways)
    }

    pub fn catalog(&self) -> Duration {
        Duration::from_secs(self.catalog)
    }

    pub fn auctions(&self) -> Duration {
        Duration::from_secs(self.auctions)
    }
}

/// Application configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub base_url: String,
    pub character: String,
    /// Token file; defaults to `<character>.oauth2`.
    pub token_path: Option<PathBuf>,
    /// Target chains file; defaults to `<character>.targets`.
    pub targets_path: Option<PathBuf>,
    /// Cache root; defaults to the platform cache directory.
    pub cache_dir: Option<PathBuf>,
    pub max_in_flight: usize,
    pub timeout_secs: u64,
    pub page_size: u32,
    pub ttl: TtlConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            character: String::new(),
            token_path: None,
            targets_path: None,
            cache_dir: None,
            max_in_flight: 8,
            timeout_secs: 30,
            page_size: 200,
            ttl: TtlConfig::default(),
        }
    }
}

impl Config {
    /// Default location of the config file.
    pub fn default_path() -> Option<PathBuf> {
        config_dir().map(|dir| dir.join("config.toml"))
    }

    /// Load from `path`, or from the default location. A missing file yields
    /// the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => match Self::default_path() {
                Some(path) => path,
                None => return Ok(Self::default()),
            },
        };

        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(&path)?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn token_path(&self) -> PathBuf {
        self.token_path
            .clone()
            .unwrap_or_else(|| PathBuf::from(format!("{}.oauth2", self.character)))
    }

    pub fn targets_path(&self) -> PathBuf {
        self.targets_path
            .clone()
            .unwrap_or_else(|| PathBuf::from(format!("{}.targets", self.character)))
    }

    /// Cache root for this character.
    pub fn cache_root(&self) -> Result<PathBuf> {
        let base = match &self.cache_dir {
            Some(dir) => dir.clone(),
            None => cache_dir()
                .ok_or_else(|| GlitchError::Other("no cache directory available".to_string()))?,
        };
        if self.character.is_empty() {
            Ok(base)
        } else {
            Ok(base.join(&self.character))
        }
    }

    /// Read the bearer token from the environment or the token file.
    pub fn token(&self) -> Result<String> {
        self.token_from(std::env::var(TOKEN_ENV).ok())
    }

    /// Resolve the token given the value of `GLITCH_TOKEN`, if any. A blank
    /// value falls through to the token file.
    pub fn token_from(&self, env: Option<String>) -> Result<String> {
        if let Some(token) = env {
            let token = token.trim().to_string();
            if !token.is_empty() {
                return Ok(token);
            }
        }

        let path = self.token_path();
        if !path.exists() {
            return Err(GlitchError::MissingToken);
        }
        let token = fs::read_to_string(path)?.trim().to_string();
        if token.is_empty() {
            return Err(GlitchError::MissingToken);
        }
        Ok(token)
    }
}
