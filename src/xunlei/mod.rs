//! Offline download through the cloud drive of a Xunlei container.
//!
//! Creating a task is a linear sequence of calls: obtain the `pan_auth`
//! token, resolve the device target, resolve the parent folder, resolve the
//! magnet's resource tree, pick the files to keep and finally create the task.
//! Every step fails the whole flow; nothing is retried.

mod api;
mod auth;
mod resource;

use std::{fmt::Display, sync::Arc, time::Duration};

use async_trait::async_trait;

pub use api::{DEFAULT_DOWNLOAD_CATEGORY, XunleiApi};
pub use auth::{CredentialProvider, ScrapedCredential, StaticCredential, extract_pan_auth};
pub use resource::{FileSelection, LeafFile, Resource, flatten, select_files};

use crate::{
    backend::{BackendError, TorrentBackend},
    config::XunleiConfig,
    magnet::MagnetLink,
    task::{DownloadRequest, TaskHandle},
};

const TASK_KIND: &str = "user#download-url";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Auth,
    Device,
    Folder,
    Resource,
    Filter,
    CreateTask,
}

impl Display for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Auth => "authentication",
            Self::Device => "device lookup",
            Self::Folder => "folder lookup",
            Self::Resource => "resource lookup",
            Self::Filter => "file selection",
            Self::CreateTask => "task creation",
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum XunleiError {
    #[error("Failed to obtain pan_auth token: {0}")]
    Auth(String),
    #[error("Invalid URL {url} for {step}: {reason}")]
    InvalidUrl {
        step: Step,
        url: String,
        reason: String,
    },
    #[error("Request to {url} failed during {step}: {source}")]
    Http {
        step: Step,
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{step} failed, {url} responded with {status}: {body}")]
    Status {
        step: Step,
        url: String,
        status: reqwest::StatusCode,
        body: String,
    },
    #[error("Failed to resolve device target: {0}")]
    Device(String),
    #[error("Default download folder not found, cannot create task")]
    Folder,
    #[error("No resource information found for magnet")]
    Resource,
    #[error("No file larger than {min_size_mb} MB in resource")]
    NoEligibleFiles { min_size_mb: u64 },
}

impl XunleiError {
    /// The step of the flow that failed.
    #[must_use]
    pub fn step(&self) -> Step {
        match self {
            Self::Auth(_) => Step::Auth,
            Self::InvalidUrl { step, .. } | Self::Http { step, .. } | Self::Status { step, .. } => {
                *step
            }
            Self::Device(_) => Step::Device,
            Self::Folder => Step::Folder,
            Self::Resource => Step::Resource,
            Self::NoEligibleFiles { .. } => Step::Filter,
        }
    }

    /// Whether the service refused the session token.
    #[must_use]
    pub fn is_unauthorized(&self) -> bool {
        matches!(
            self,
            Self::Status { status, .. }
                if *status == reqwest::StatusCode::UNAUTHORIZED
                    || *status == reqwest::StatusCode::FORBIDDEN
        )
    }
}

/// A task accepted by the remote service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XunleiTask {
    pub name: String,
    pub task_id: Option<String>,
    pub target: String,
    pub folder_id: String,
    pub folder_name: String,
    pub selection: FileSelection,
}

pub struct Xunlei {
    api: XunleiApi,
    credential: Arc<dyn CredentialProvider>,
    min_size_mb: u64,
    parent_folder_id: Option<String>,
}

impl Xunlei {
    pub fn new(
        api: XunleiApi,
        credential: Arc<dyn CredentialProvider>,
        min_size_mb: u64,
        parent_folder_id: Option<String>,
    ) -> Self {
        Self {
            api,
            credential,
            min_size_mb,
            parent_folder_id,
        }
    }

    /// Build the backend from the `[xunlei]` section.
    ///
    /// A configured `pan_auth` is used as is; otherwise the token is scraped on first use.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn from_config(config: &XunleiConfig, timeout: Duration) -> Result<Self, BackendError> {
        let api = XunleiApi::new(
            &config.base_url,
            &config.authorization,
            &config.cookie,
            timeout,
        )
        .map_err(BackendError::Client)?;

        let credential: Arc<dyn CredentialProvider> = if config.pan_auth.is_empty() {
            Arc::new(ScrapedCredential::new())
        } else {
            Arc::new(StaticCredential::new(config.pan_auth.clone()))
        };

        Ok(Self::new(
            api,
            credential,
            config.min_size_mb,
            config.parent_folder_id.clone().filter(|id| !id.is_empty()),
        ))
    }

    async fn resolve_folder(
        &self,
        pan_auth: &str,
        target: &str,
    ) -> Result<(String, String), XunleiError> {
        if let Some(id) = &self.parent_folder_id {
            return Ok((id.clone(), id.clone()));
        }

        self.api
            .folders(pan_auth, target)
            .await?
            .into_iter()
            .find(api::Folder::is_default_download)
            .map(|folder| (folder.id, folder.name))
            .ok_or(XunleiError::Folder)
    }

    /// Run the whole task creation flow for `magnet`.
    ///
    /// A token refused with 401 or 403 is dropped from the credential cache, so the
    /// next submission obtains a fresh one.
    ///
    /// # Errors
    ///
    /// Returns the error of the first step that fails.
    pub async fn submit(&self, magnet: &MagnetLink) -> Result<XunleiTask, XunleiError> {
        let result = self.run_flow(magnet).await;

        if let Err(e) = &result
            && e.is_unauthorized()
        {
            tracing::warn!(step = %e.step(), "pan_auth token refused, dropping cached token");
            self.credential.invalidate().await;
        }

        result
    }

    async fn run_flow(&self, magnet: &MagnetLink) -> Result<XunleiTask, XunleiError> {
        let pan_auth = self.credential.pan_auth(&self.api).await?;

        let target = self.api.device_target(&pan_auth).await?;
        tracing::debug!(target = %target, "Resolved Xunlei device target");

        let (folder_id, folder_name) = self.resolve_folder(&pan_auth, &target).await?;
        tracing::debug!(folder = %folder_id, "Resolved Xunlei parent folder");

        let resources = self.api.resources(&pan_auth, magnet.as_str()).await?;
        let root = resources.first().ok_or(XunleiError::Resource)?;

        let leaves = flatten(std::slice::from_ref(root));
        let selection =
            select_files(&leaves, self.min_size_mb).ok_or(XunleiError::NoEligibleFiles {
                min_size_mb: self.min_size_mb,
            })?;

        tracing::debug!(
            selected = selection.indices.len(),
            total = selection.total_count,
            size = selection.total_size,
            "Selected files for Xunlei task"
        );

        let name = if root.name.is_empty() {
            magnet.hash()
        } else {
            root.name.clone()
        };

        let task = api::NewTask {
            kind: TASK_KIND,
            name: &name,
            file_name: &name,
            file_size: selection.total_size.to_string(),
            space: &target,
            params: api::NewTaskParams {
                target: &target,
                url: magnet.as_str(),
                total_file_count: selection.total_count.to_string(),
                parent_folder_id: &folder_id,
                sub_file_index: selection.sub_file_index(),
                mime_type: "",
                file_id: "",
            },
        };
        let task_id = self.api.create_task(&pan_auth, &task).await?;

        tracing::info!(name = %name, task_id = ?task_id, "Xunlei task created");

        Ok(XunleiTask {
            name,
            task_id,
            target,
            folder_id,
            folder_name,
            selection,
        })
    }
}

#[async_trait]
impl TorrentBackend for Xunlei {
    fn name(&self) -> &'static str {
        "xunlei"
    }

    async fn add_torrent(&self, request: &DownloadRequest) -> Result<TaskHandle, BackendError> {
        let task = self.submit(&request.magnet).await?;

        Ok(TaskHandle {
            backend: self.name(),
            id: task.task_id.unwrap_or_else(|| request.magnet.hash()),
            name: task.name,
            location: Some(task.folder_name).filter(|name| !name.is_empty()),
        })
    }
}

#[cfg(test)]
mod tests {
    use httpmock::prelude::*;
    use serde_json::json;

    use super::*;

    const MAGNET: &str = "magnet:?xt=urn:btih:0123456789abcdef0123456789abcdef&dn=Sample";
    const TOKEN: &str = "stub-token";
    const MB: u64 = 1024 * 1024;

    fn backend(
        server: &MockServer,
        credential: Arc<dyn CredentialProvider>,
        min_size_mb: u64,
    ) -> Xunlei {
        let api = XunleiApi::new(
            &server.base_url(),
            "Basic dXNlcjpwYXNz",
            "my_vms=1; PHPSID=abc",
            Duration::from_secs(5),
        )
        .unwrap();
        Xunlei::new(api, credential, min_size_mb, None)
    }

    fn stub() -> Arc<dyn CredentialProvider> {
        Arc::new(StaticCredential::new(TOKEN))
    }

    fn magnet() -> MagnetLink {
        MagnetLink::parse(MAGNET).unwrap()
    }

    fn path(endpoint: &str) -> String {
        format!("/webman/3rdparty/pan-xunlei-com/index.cgi/{endpoint}")
    }

    fn mock_device(server: &MockServer) -> httpmock::Mock<'_> {
        server.mock(|when, then| {
            when.method(GET)
                .path(path("drive/v1/tasks"))
                .query_param("pan_auth", TOKEN)
                .query_param("type", "user#runner")
                .header("pan-auth", TOKEN)
                .header("authorization", "Basic dXNlcjpwYXNz")
                .header("cookie", "my_vms=1; PHPSID=abc");
            then.status(200).json_body(json!({
                "tasks": [{ "params": { "target": "device-1" } }]
            }));
        })
    }

    fn mock_folders(server: &MockServer) -> httpmock::Mock<'_> {
        server.mock(|when, then| {
            when.method(GET)
                .path(path("drive/v1/files"))
                .query_param("space", "device-1");
            then.status(200).json_body(json!({
                "files": [
                    { "id": "other", "name": "Other", "params": { "category_name": "" } },
                    {
                        "id": "folder-9",
                        "name": "Downloads",
                        "params": { "category_name": DEFAULT_DOWNLOAD_CATEGORY }
                    }
                ]
            }));
        })
    }

    fn mock_resources(server: &MockServer) -> httpmock::Mock<'_> {
        server.mock(|when, then| {
            when.method(POST)
                .path(path("drive/v1/resource/list"))
                .json_body(json!({ "page_size": 1000, "urls": MAGNET }));
            then.status(200).json_body(json!({
                "list": { "resources": [{
                    "name": "Sample",
                    "file_size": (200 * MB).to_string(),
                    "file_count": 3,
                    "is_dir": true,
                    "dir": { "resources": [
                        {
                            "name": "sample.mkv",
                            "file_size": (150 * MB).to_string(),
                            "file_index": 0
                        },
                        { "name": "extras", "is_dir": true, "dir": { "resources": [
                            {
                                "name": "trailer.mkv",
                                "file_size": (50 * MB).to_string(),
                                "file_index": 1
                            }
                        ]}},
                        { "name": "sample.nfo", "file_size": "1024", "file_index": 2 }
                    ]}
                }]}
            }));
        })
    }

    #[tokio::test]
    async fn creates_task_with_filtered_files() {
        let server = MockServer::start_async().await;
        let device = mock_device(&server);
        let folders = mock_folders(&server);
        let resources = mock_resources(&server);
        let create = server.mock(|when, then| {
            when.method(POST)
                .path(path("drive/v1/task"))
                .query_param("pan_auth", TOKEN)
                .json_body(json!({
                    "type": "user#download-url",
                    "name": "Sample",
                    "file_name": "Sample",
                    "file_size": (150 * MB).to_string(),
                    "space": "device-1",
                    "params": {
                        "target": "device-1",
                        "url": MAGNET,
                        "total_file_count": "3",
                        "parent_folder_id": "folder-9",
                        "sub_file_index": "0",
                        "mime_type": "",
                        "file_id": ""
                    }
                }));
            then.status(200).json_body(json!({ "task": { "id": "task-42" } }));
        });

        let task = backend(&server, stub(), 100).submit(&magnet()).await.unwrap();

        device.assert();
        folders.assert();
        resources.assert();
        create.assert();
        assert_eq!(task.task_id.as_deref(), Some("task-42"));
        assert_eq!(task.folder_id, "folder-9");
        assert_eq!(task.selection.indices, vec![0]);
        assert_eq!(task.selection.total_size, 150 * MB);
    }

    #[tokio::test]
    async fn backend_reports_handle() {
        let server = MockServer::start_async().await;
        mock_device(&server);
        mock_folders(&server);
        mock_resources(&server);
        server.mock(|when, then| {
            when.method(POST).path(path("drive/v1/task"));
            then.status(200).json_body(json!({}));
        });

        let request = crate::task::DownloadRequestBuilder::default()
            .magnet(magnet())
            .build()
            .unwrap();
        let handle = backend(&server, stub(), 0).add_torrent(&request).await.unwrap();

        assert_eq!(handle.backend, "xunlei");
        assert_eq!(handle.id, "0123456789abcdef0123456789abcdef");
        assert_eq!(handle.location.as_deref(), Some("Downloads"));
    }

    #[tokio::test]
    async fn scrapes_token_when_not_configured() {
        let server = MockServer::start_async().await;
        let page = server.mock(|when, then| {
            when.method(GET).path(path(""));
            then.status(200)
                .body(format!("<script>function uiauth(value){{ return \"{TOKEN}\" }}</script>"));
        });
        let device = mock_device(&server);
        mock_folders(&server);
        mock_resources(&server);
        server.mock(|when, then| {
            when.method(POST).path(path("drive/v1/task"));
            then.status(200).json_body(json!({ "task": { "id": "task-1" } }));
        });

        let task = backend(&server, Arc::new(ScrapedCredential::new()), 0)
            .submit(&magnet())
            .await
            .unwrap();

        page.assert();
        device.assert();
        assert_eq!(task.selection.indices, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn missing_token_fails_authentication() {
        let server = MockServer::start_async().await;
        server.mock(|when, then| {
            when.method(GET).path(path(""));
            then.status(200).body("<html>please log in</html>");
        });

        let err = backend(&server, Arc::new(ScrapedCredential::new()), 0)
            .submit(&magnet())
            .await
            .unwrap_err();

        assert!(matches!(err, XunleiError::Auth(_)));
        assert_eq!(err.step(), Step::Auth);
    }

    #[tokio::test]
    async fn page_failure_fails_authentication() {
        let server = MockServer::start_async().await;
        server.mock(|when, then| {
            when.method(GET).path(path(""));
            then.status(502);
        });

        let err = backend(&server, Arc::new(ScrapedCredential::new()), 0)
            .submit(&magnet())
            .await
            .unwrap_err();

        assert!(matches!(err, XunleiError::Status { step: Step::Auth, .. }));
    }

    #[tokio::test]
    async fn empty_task_list_fails_device_lookup() {
        let server = MockServer::start_async().await;
        server.mock(|when, then| {
            when.method(GET).path(path("drive/v1/tasks"));
            then.status(200).json_body(json!({ "tasks": [] }));
        });

        let err = backend(&server, stub(), 0).submit(&magnet()).await.unwrap_err();
        assert!(matches!(err, XunleiError::Device(_)));
    }

    #[tokio::test]
    async fn missing_default_folder_fails() {
        let server = MockServer::start_async().await;
        mock_device(&server);
        server.mock(|when, then| {
            when.method(GET).path(path("drive/v1/files"));
            then.status(200).json_body(json!({ "files": [] }));
        });

        let err = backend(&server, stub(), 0).submit(&magnet()).await.unwrap_err();
        assert!(matches!(err, XunleiError::Folder));
    }

    #[tokio::test]
    async fn configured_folder_skips_lookup() {
        let server = MockServer::start_async().await;
        mock_device(&server);
        mock_resources(&server);
        let create = server.mock(|when, then| {
            when.method(POST).path(path("drive/v1/task"));
            then.status(200).json_body(json!({ "task": { "id": "t" } }));
        });

        let api = XunleiApi::new(&server.base_url(), "", "", Duration::from_secs(5)).unwrap();
        let xunlei = Xunlei::new(api, stub(), 0, Some("fixed".to_string()));
        let task = xunlei.submit(&magnet()).await.unwrap();

        create.assert();
        assert_eq!(task.folder_id, "fixed");
    }

    #[tokio::test]
    async fn empty_resource_list_fails() {
        let server = MockServer::start_async().await;
        mock_device(&server);
        mock_folders(&server);
        server.mock(|when, then| {
            when.method(POST).path(path("drive/v1/resource/list"));
            then.status(200).json_body(json!({ "list": { "resources": [] } }));
        });

        let err = backend(&server, stub(), 0).submit(&magnet()).await.unwrap_err();
        assert!(matches!(err, XunleiError::Resource));
    }

    #[tokio::test]
    async fn filter_without_survivors_fails_before_creation() {
        let server = MockServer::start_async().await;
        mock_device(&server);
        mock_folders(&server);
        mock_resources(&server);

        let err = backend(&server, stub(), 1024).submit(&magnet()).await.unwrap_err();
        assert!(matches!(
            err,
            XunleiError::NoEligibleFiles { min_size_mb: 1024 }
        ));
        assert_eq!(err.step(), Step::Filter);
    }

    #[tokio::test]
    async fn refused_token_is_scraped_again() {
        let server = MockServer::start_async().await;
        let page = server.mock(|when, then| {
            when.method(GET).path(path(""));
            then.status(200)
                .body(format!("<script>function uiauth(value){{ return \"{TOKEN}\" }}</script>"));
        });
        server.mock(|when, then| {
            when.method(GET).path(path("drive/v1/tasks"));
            then.status(401).body("token expired");
        });

        let xunlei = backend(&server, Arc::new(ScrapedCredential::new()), 0);
        for _ in 0..2 {
            let err = xunlei.submit(&magnet()).await.unwrap_err();
            assert!(err.is_unauthorized());
            assert_eq!(err.step(), Step::Device);
        }

        page.assert_hits(2);
    }

    #[tokio::test]
    async fn scraped_token_is_cached_between_submissions() {
        let server = MockServer::start_async().await;
        let page = server.mock(|when, then| {
            when.method(GET).path(path(""));
            then.status(200)
                .body(format!("<script>function uiauth(value){{ return \"{TOKEN}\" }}</script>"));
        });
        server.mock(|when, then| {
            when.method(GET).path(path("drive/v1/tasks"));
            then.status(200).json_body(json!({ "tasks": [] }));
        });

        let xunlei = backend(&server, Arc::new(ScrapedCredential::new()), 0);
        for _ in 0..2 {
            let err = xunlei.submit(&magnet()).await.unwrap_err();
            assert!(matches!(err, XunleiError::Device(_)));
        }

        page.assert_hits(1);
    }

    #[tokio::test]
    async fn unreadable_creation_response_still_succeeds() {
        let server = MockServer::start_async().await;
        mock_device(&server);
        mock_folders(&server);
        mock_resources(&server);
        let create = server.mock(|when, then| {
            when.method(POST).path(path("drive/v1/task"));
            then.status(200).body("<html>ok</html>");
        });

        let task = backend(&server, stub(), 0).submit(&magnet()).await.unwrap();

        create.assert();
        assert!(task.task_id.is_none());
        assert_eq!(task.folder_name, "Downloads");
    }

    #[tokio::test]
    async fn task_creation_error_is_reported() {
        let server = MockServer::start_async().await;
        mock_device(&server);
        mock_folders(&server);
        mock_resources(&server);
        server.mock(|when, then| {
            when.method(POST).path(path("drive/v1/task"));
            then.status(500).body("internal");
        });

        let err = backend(&server, stub(), 0).submit(&magnet()).await.unwrap_err();
        assert_eq!(err.step(), Step::CreateTask);
        assert!(err.to_string().contains("internal"));
    }
}
