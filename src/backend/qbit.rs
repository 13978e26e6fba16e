use async_trait::async_trait;
use qbit_rs::model::{AddTorrentArg, Credential, TorrentSource};
use url::Url;

use super::{BackendError, TorrentBackend};
use crate::{
    config::QbitConfig,
    task::{DownloadRequest, TaskHandle},
};

pub struct QBittorrent {
    endpoint: qbit_rs::Qbit,
}

impl QBittorrent {
    pub fn from_config(config: &QbitConfig) -> Self {
        let credential = Credential::new(config.username.clone(), config.password.clone());
        let endpoint = qbit_rs::Qbit::new(config.url.clone(), credential);

        Self { endpoint }
    }
}

/// Translate a request into qBittorrent's `torrents/add` arguments.
fn add_torrent_arg(request: &DownloadRequest) -> Result<AddTorrentArg, BackendError> {
    let url = Url::parse(request.magnet.as_str())?;

    let tags = (!request.tags.is_empty()).then(|| request.tags.join(","));

    Ok(AddTorrentArg {
        source: TorrentSource::Urls {
            urls: vec![url].into(),
        },
        savepath: request.save_path.clone(),
        category: request.category.clone(),
        tags,
        paused: Some(request.paused.to_string()),
        // qBittorrent takes bytes per second.
        up_limit: request.upload_limit_kib.map(|kib| i64::from(kib) * 1024),
        ..AddTorrentArg::default()
    })
}

#[async_trait]
impl TorrentBackend for QBittorrent {
    fn name(&self) -> &'static str {
        "qbittorrent"
    }

    async fn add_torrent(&self, request: &DownloadRequest) -> Result<TaskHandle, BackendError> {
        let arg = add_torrent_arg(request)?;
        let hash = request.magnet.hash();

        tracing::debug!(
            hash = %hash,
            save_path = ?request.save_path,
            paused = request.paused,
            "Adding torrent to qBittorrent"
        );

        self.endpoint.add_torrent(arg).await?;

        tracing::info!(hash = %hash, "Torrent added to qBittorrent");

        Ok(TaskHandle {
            backend: self.name(),
            id: hash,
            name: request.magnet.info().name,
            location: request.save_path.clone(),
        })
    }
}
