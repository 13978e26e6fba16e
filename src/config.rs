use std::{
    env,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use tap::Pipe;
use url::Url;

use crate::backend::BackendKind;

const ENV_PREFIX: &str = "MAGRELAY";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub general: GeneralConfig,
    pub trackers: TrackerConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub qbittorrent: Option<QbitConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transmission: Option<TransmissionConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub xunlei: Option<XunleiConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub telegram: Option<TelegramConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Backend used by `/dm` and `/magnet`.
    pub downloader: BackendKind,
    /// Custom save path, takes priority over `library_path`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub save_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub library_path: Option<String>,
    pub paused: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    pub tags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upload_limit_kib: Option<u32>,
    pub request_timeout_secs: u64,
    /// Queued magnet links, one per line, dispatched on startup and then cleared.
    pub magnet_urls: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            downloader: BackendKind::QBittorrent,
            save_path: None,
            library_path: None,
            paused: false,
            category: None,
            tags: Vec::new(),
            upload_limit_kib: None,
            request_timeout_secs: 30,
            magnet_urls: String::new(),
        }
    }
}

impl GeneralConfig {
    #[must_use]
    pub fn effective_save_path(&self) -> Option<&str> {
        self.save_path
            .as_deref()
            .filter(|p| !p.is_empty())
            .or_else(|| self.library_path.as_deref().filter(|p| !p.is_empty()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    pub custom: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recommended_url: Option<Url>,
    pub timeout_secs: u64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            custom: Vec::new(),
            recommended_url: None,
            timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QbitConfig {
    pub url: Url,
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransmissionConfig {
    pub url: Url,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct XunleiConfig {
    /// Address of the Xunlei container, e.g. `http://192.168.1.200:4321`.
    pub base_url: String,
    #[serde(default)]
    pub authorization: String,
    /// Session token; scraped from the web UI when empty.
    #[serde(default)]
    pub pan_auth: String,
    #[serde(default)]
    pub cookie: String,
    /// Files at or below this size (MiB) are skipped. Zero disables the filter.
    #[serde(default)]
    pub min_size_mb: u64,
    #[serde(default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_folder_id: Option<String>,
    #[serde(default)]
    pub magnet_urls: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    pub bot_token: String,
    pub chat_id: i64,
}

impl AppConfig {
    /// Parse a configuration from TOML text without any post-processing.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not a valid configuration.
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| anyhow!("Failed to parse config: {e}"))
    }

    /// Load the configuration from a TOML file, expand paths and apply environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or a path cannot be expanded.
    pub fn from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut config = Self::from_toml(&content)?;

        config.general.save_path = config.general.save_path.map(expand_path).transpose()?;
        config.general.library_path = config.general.library_path.map(expand_path).transpose()?;

        config.apply_env();

        Ok(config)
    }

    /// Override secrets from `MAGRELAY_*` environment variables.
    pub fn apply_env(&mut self) {
        let var = |key: &str| env::var(format!("{ENV_PREFIX}_{key}")).ok();

        if let (Some(qbit), Some(password)) = (self.qbittorrent.as_mut(), var("QBIT_PASSWORD")) {
            qbit.password = password;
        }
        if let (Some(tr), Some(password)) =
            (self.transmission.as_mut(), var("TRANSMISSION_PASSWORD"))
        {
            tr.password = Some(password);
        }
        if let Some(xunlei) = self.xunlei.as_mut() {
            if let Some(pan_auth) = var("XUNLEI_PAN_AUTH") {
                xunlei.pan_auth = pan_auth;
            }
            if let Some(authorization) = var("XUNLEI_AUTHORIZATION") {
                xunlei.authorization = authorization;
            }
            if let Some(cookie) = var("XUNLEI_COOKIE") {
                xunlei.cookie = cookie;
            }
        }
        if let (Some(telegram), Some(token)) = (self.telegram.as_mut(), var("TELEGRAM_BOT_TOKEN")) {
            telegram.bot_token = token;
        }
    }
}

fn expand_path(path: String) -> Result<String> {
    shellexpand::full(&path)
        .map(String::from)
        .map_err(|e| anyhow!("Failed to expand path {path}: {e}"))
}

/// Get the default configuration file path.
///
/// # Errors
///
/// Returns an error if the config directory cannot be determined.
pub fn default_config_path() -> Result<PathBuf> {
    let mut path =
        dirs::config_dir().ok_or_else(|| anyhow!("Failed to get config directory"))?;
    path.push("magrelay/config.toml");
    Ok(path)
}

/// Resolve the configuration path: env var > command line > default location.
///
/// # Errors
///
/// Returns an error if no path was given and the default location cannot be determined.
pub fn resolve_config_path(cli: Option<PathBuf>) -> Result<PathBuf> {
    env::var(format!("{ENV_PREFIX}_CONFIG_PATH"))
        .ok()
        .map(PathBuf::from)
        .or(cli)
        .map_or_else(default_config_path, Ok)?
        .to_string_lossy()
        .pipe(|s| expand_path(s.into_owned()))
        .map(PathBuf::from)
}

/// Persistence port for the configuration.
pub trait ConfigStore: Send + Sync {
    /// Load the stored configuration as written, without environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration cannot be read or parsed.
    fn load(&self) -> Result<AppConfig>;

    /// Replace the stored configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration cannot be serialized or written.
    fn save(&self, config: &AppConfig) -> Result<()>;
}

/// Configuration stored as a TOML file.
pub struct TomlConfigStore {
    path: PathBuf,
}

impl TomlConfigStore {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ConfigStore for TomlConfigStore {
    fn load(&self) -> Result<AppConfig> {
        let content = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read config from {}", self.path.display()))?;
        AppConfig::from_toml(&content)
    }

    fn save(&self, config: &AppConfig) -> Result<()> {
        let content = toml::to_string_pretty(config)
            .map_err(|e| anyhow!("Failed to serialize config: {e}"))?;
        std::fs::write(&self.path, content)
            .with_context(|| format!("Failed to write config to {}", self.path.display()))?;
        tracing::debug!(path = %self.path.display(), "Saved configuration");
        Ok(())
    }
}
