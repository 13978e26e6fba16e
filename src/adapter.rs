use std::sync::Arc;

use crate::{
    backend::{BackendKind, TorrentBackend, build_backend},
    command::{InboundEvent, Route, route_for_action},
    config::{AppConfig, ConfigStore},
    error::DispatchError,
    magnet::MagnetLink,
    notify::{Notice, Notifier},
    task::{DownloadRequestBuilder, TaskHandle},
    tracker::TrackerSource,
};

/// Options applied to every request built by the adapter.
#[derive(Debug, Clone, Default)]
pub struct RequestDefaults {
    pub save_path: Option<String>,
    pub paused: bool,
    pub category: Option<String>,
    pub tags: Vec<String>,
    pub upload_limit_kib: Option<u32>,
}

impl RequestDefaults {
    #[must_use]
    pub fn from_config(config: &AppConfig) -> Self {
        let general = &config.general;
        Self {
            save_path: general.effective_save_path().map(String::from),
            paused: general.paused,
            category: general.category.clone(),
            tags: general.tags.clone(),
            upload_limit_kib: general.upload_limit_kib,
        }
    }
}

/// Backends reachable from the adapter, one per route.
#[derive(Default, Clone)]
pub struct Backends {
    pub torrent: Option<Arc<dyn TorrentBackend>>,
    pub xunlei: Option<Arc<dyn TorrentBackend>>,
}

impl Backends {
    /// Build every backend that has a configuration section.
    ///
    /// The torrent route uses `general.downloader`; a missing section leaves the route empty.
    ///
    /// # Errors
    ///
    /// Returns an error if a configured backend cannot be constructed.
    pub fn from_config(config: &AppConfig) -> anyhow::Result<Self> {
        let optional = |kind| match build_backend(kind, config) {
            Ok(backend) => Ok(Some(backend)),
            Err(crate::backend::BackendError::NotConfigured(kind)) => {
                tracing::warn!(backend = %kind, "Backend not configured, route disabled");
                Ok(None)
            }
            Err(e) => Err(e),
        };

        Ok(Self {
            torrent: optional(config.general.downloader)?,
            xunlei: optional(BackendKind::Xunlei)?,
        })
    }

    fn for_route(&self, route: Route) -> Option<&Arc<dyn TorrentBackend>> {
        match route {
            Route::Torrent => self.torrent.as_ref(),
            Route::Xunlei => self.xunlei.as_ref(),
        }
    }
}

/// Outcome of one magnet line.
#[derive(Debug)]
pub struct DispatchReport {
    pub input: String,
    pub result: Result<TaskHandle, DispatchError>,
}

impl DispatchReport {
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

/// Glue between user input, the download backends and the messaging port.
pub struct MagnetAdapter {
    backends: Backends,
    trackers: TrackerSource,
    defaults: RequestDefaults,
    notifier: Arc<dyn Notifier>,
}

impl MagnetAdapter {
    pub fn new(
        backends: Backends,
        trackers: TrackerSource,
        defaults: RequestDefaults,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            backends,
            trackers,
            defaults,
            notifier,
        }
    }

    /// Wire an adapter from the application configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if a backend or the tracker source cannot be constructed.
    pub fn from_config(config: &AppConfig, notifier: Arc<dyn Notifier>) -> anyhow::Result<Self> {
        Ok(Self::new(
            Backends::from_config(config)?,
            TrackerSource::from_config(&config.trackers)?,
            RequestDefaults::from_config(config),
            notifier,
        ))
    }

    /// Validate one line and forward it to the backend of `route`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidMagnet` without any network call if the line is not a magnet link.
    pub async fn dispatch(&self, route: Route, line: &str) -> Result<TaskHandle, DispatchError> {
        let magnet = MagnetLink::parse(line)?;
        let backend = self
            .backends
            .for_route(route)
            .ok_or(DispatchError::NoBackend(route))?;

        let magnet = self.trackers.decorate(&magnet).await;

        let mut builder = DownloadRequestBuilder::default();
        builder
            .magnet(magnet)
            .paused(self.defaults.paused)
            .tags(self.defaults.tags.clone());
        if let Some(save_path) = &self.defaults.save_path {
            builder.save_path(save_path);
        }
        if let Some(category) = &self.defaults.category {
            builder.category(category);
        }
        if let Some(limit) = self.defaults.upload_limit_kib {
            builder.upload_limit_kib(limit);
        }
        let request = builder.build()?;

        Ok(backend.add_torrent(&request).await?)
    }

    /// Dispatch every line of `text` in order and post one notice per line.
    ///
    /// A failing line never stops the lines after it.
    pub async fn dispatch_batch(
        &self,
        route: Route,
        text: &str,
        channel: Option<&str>,
        user: Option<&str>,
    ) -> Vec<DispatchReport> {
        let mut lines: Vec<&str> = text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .collect();
        if lines.is_empty() {
            lines.push(text.trim());
        }

        let mut reports = Vec::with_capacity(lines.len());

        for line in lines {
            let result = self.dispatch(route, line).await;

            let notice = match &result {
                Ok(handle) => {
                    tracing::info!(route = ?route, task = %handle, "Magnet dispatched");
                    Notice {
                        channel: channel.map(String::from),
                        title: "Download task added".to_string(),
                        message: Some(handle.to_string()),
                        user: user.map(String::from),
                    }
                }
                Err(e) => {
                    tracing::error!(
                        route = ?route,
                        input = %line,
                        error = %e,
                        "Failed to dispatch magnet"
                    );
                    Notice {
                        channel: channel.map(String::from),
                        title: "Failed to add download task".to_string(),
                        message: Some(e.to_string()),
                        user: user.map(String::from),
                    }
                }
            };

            if let Err(e) = self.notifier.post(&notice).await {
                tracing::warn!(error = %e, "Failed to post notification");
            }

            reports.push(DispatchReport {
                input: line.to_string(),
                result,
            });
        }

        reports
    }

    /// Handle an inbound event. Events raised by other commands are ignored.
    pub async fn handle_event(&self, event: &InboundEvent) -> Vec<DispatchReport> {
        let Some(route) = route_for_action(&event.action) else {
            tracing::trace!(action = %event.action, "Ignoring unrelated event");
            return Vec::new();
        };

        let Some(arg) = event.arg.as_deref() else {
            tracing::error!(action = %event.action, "Missing argument in event");
            return Vec::new();
        };

        self.dispatch_batch(route, arg, event.channel.as_deref(), event.user.as_deref())
            .await
    }

    /// Dispatch the magnet links queued in the stored configuration, then clear the queues.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration cannot be loaded or saved.
    pub async fn drain_queued(
        &self,
        store: &dyn ConfigStore,
    ) -> anyhow::Result<Vec<DispatchReport>> {
        let mut config = store.load()?;

        let torrent_queue = std::mem::take(&mut config.general.magnet_urls);
        let xunlei_queue = config
            .xunlei
            .as_mut()
            .map(|x| std::mem::take(&mut x.magnet_urls))
            .unwrap_or_default();

        if torrent_queue.trim().is_empty() && xunlei_queue.trim().is_empty() {
            return Ok(Vec::new());
        }

        let mut reports = Vec::new();
        if !torrent_queue.trim().is_empty() {
            tracing::info!("Dispatching queued magnet links");
            reports.extend(self.dispatch_batch(Route::Torrent, &torrent_queue, None, None).await);
        }
        if !xunlei_queue.trim().is_empty() {
            tracing::info!("Dispatching queued Xunlei magnet links");
            reports.extend(self.dispatch_batch(Route::Xunlei, &xunlei_queue, None, None).await);
        }

        store.save(&config)?;

        Ok(reports)
    }
}
