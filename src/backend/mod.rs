//! Download backends accepting magnet links.

mod qbit;
mod transmission;

use std::{fmt::Display, sync::Arc, time::Duration};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{
    config::AppConfig,
    task::{DownloadRequest, TaskHandle},
    xunlei::{Xunlei, XunleiError},
};

pub use qbit::QBittorrent;
pub use transmission::Transmission;

/// Capability shared by every download backend.
#[async_trait]
pub trait TorrentBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Forward a validated magnet link to the backend.
    async fn add_torrent(&self, request: &DownloadRequest) -> Result<TaskHandle, BackendError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[serde(alias = "qb")]
    #[value(name = "qbittorrent", alias = "qb")]
    QBittorrent,
    #[serde(alias = "tr")]
    #[value(name = "transmission", alias = "tr")]
    Transmission,
    #[serde(alias = "xl")]
    #[value(name = "xunlei", alias = "xl")]
    Xunlei,
}

impl Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::QBittorrent => "qbittorrent",
            Self::Transmission => "transmission",
            Self::Xunlei => "xunlei",
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("Backend {0} is not configured")]
    NotConfigured(BackendKind),
    #[error("Failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
    #[error("Magnet link is not a valid URL: {0}")]
    Url(#[from] url::ParseError),
    #[error("qBittorrent request failed: {0}")]
    Qbit(#[from] qbit_rs::Error),
    #[error("Request to {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{url} responded with {status}: {body}")]
    Status {
        url: String,
        status: reqwest::StatusCode,
        body: String,
    },
    #[error("Backend rejected the request: {0}")]
    Rejected(String),
    #[error(transparent)]
    Xunlei(#[from] XunleiError),
}

/// Construct the backend selected by `kind` from its configuration section.
///
/// # Errors
///
/// Returns `NotConfigured` if the section for `kind` is missing, or an error if
/// the backend client cannot be built.
pub fn build_backend(
    kind: BackendKind,
    config: &AppConfig,
) -> Result<Arc<dyn TorrentBackend>, BackendError> {
    let timeout = Duration::from_secs(config.general.request_timeout_secs);

    let backend: Arc<dyn TorrentBackend> = match kind {
        BackendKind::QBittorrent => {
            let section = config
                .qbittorrent
                .as_ref()
                .ok_or(BackendError::NotConfigured(kind))?;
            Arc::new(QBittorrent::from_config(section))
        }
        BackendKind::Transmission => {
            let section = config
                .transmission
                .as_ref()
                .ok_or(BackendError::NotConfigured(kind))?;
            Arc::new(Transmission::from_config(section, timeout)?)
        }
        BackendKind::Xunlei => {
            let section = config
                .xunlei
                .as_ref()
                .ok_or(BackendError::NotConfigured(kind))?;
            Arc::new(Xunlei::from_config(section, timeout)?)
        }
    };

    tracing::debug!(backend = %kind, "Constructed download backend");

    Ok(backend)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{QbitConfig, XunleiConfig};

    #[test]
    fn kind_accepts_aliases() {
        #[derive(Deserialize)]
        struct Wrapper {
            kind: BackendKind,
        }

        for (text, expected) in [
            ("qbittorrent", BackendKind::QBittorrent),
            ("qb", BackendKind::QBittorrent),
            ("transmission", BackendKind::Transmission),
            ("tr", BackendKind::Transmission),
            ("xl", BackendKind::Xunlei),
        ] {
            let parsed: Wrapper = toml::from_str(&format!("kind = \"{text}\"")).unwrap();
            assert_eq!(parsed.kind, expected);
        }
    }

    #[test]
    fn missing_section_is_reported() {
        let config = AppConfig::default();
        let err = build_backend(BackendKind::Transmission, &config)
            .err()
            .expect("transmission is not configured");
        assert!(matches!(
            err,
            BackendError::NotConfigured(BackendKind::Transmission)
        ));
    }

    #[test]
    fn builds_configured_backends() {
        let config = AppConfig {
            qbittorrent: Some(QbitConfig {
                url: "http://127.0.0.1:8080/".parse().unwrap(),
                username: "admin".into(),
                password: "adminadmin".into(),
            }),
            xunlei: Some(XunleiConfig {
                base_url: "http://127.0.0.1:4321".into(),
                authorization: String::new(),
                pan_auth: "token".into(),
                cookie: String::new(),
                min_size_mb: 0,
                parent_folder_id: None,
                magnet_urls: String::new(),
            }),
            ..AppConfig::default()
        };

        let qbit = build_backend(BackendKind::QBittorrent, &config).unwrap();
        assert_eq!(qbit.name(), "qbittorrent");

        let xunlei = build_backend(BackendKind::Xunlei, &config).unwrap();
        assert_eq!(xunlei.name(), "xunlei");
    }
}
