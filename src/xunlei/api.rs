use std::time::Duration;

use reqwest::{Method, RequestBuilder, header};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use url::Url;

use super::{Step, XunleiError, resource::Resource};

const APP_PATH: &str = "/webman/3rdparty/pan-xunlei-com/index.cgi/";
const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                          (KHTML, like Gecko) Chrome/135.0.0.0 Safari/537.36";

/// Category name of the default download folder.
pub const DEFAULT_DOWNLOAD_CATEGORY: &str = "默认下载目录";

/// HTTP client for the Xunlei container's cloud-drive API.
pub struct XunleiApi {
    client: reqwest::Client,
    base: String,
    authorization: String,
    cookie: String,
}

#[derive(Debug, Deserialize)]
struct TaskList {
    #[serde(default)]
    tasks: Vec<RemoteTask>,
}

#[derive(Debug, Deserialize)]
struct RemoteTask {
    #[serde(default)]
    params: TaskParams,
}

#[derive(Debug, Default, Deserialize)]
struct TaskParams {
    #[serde(default)]
    target: String,
}

#[derive(Debug, Deserialize)]
struct FileList {
    #[serde(default)]
    files: Vec<Folder>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Folder {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    params: FolderParams,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FolderParams {
    #[serde(default)]
    category_name: String,
}

#[derive(Debug, Deserialize)]
struct ResourceResponse {
    #[serde(default)]
    list: ResourceList,
}

#[derive(Debug, Default, Deserialize)]
struct ResourceList {
    #[serde(default)]
    resources: Vec<Resource>,
}

#[derive(Serialize)]
struct ResourceQuery<'a> {
    page_size: u32,
    urls: &'a str,
}

/// Body of the task creation call.
#[derive(Debug, Serialize)]
pub struct NewTask<'a> {
    #[serde(rename = "type")]
    pub kind: &'a str,
    pub name: &'a str,
    pub file_name: &'a str,
    pub file_size: String,
    pub space: &'a str,
    pub params: NewTaskParams<'a>,
}

#[derive(Debug, Serialize)]
pub struct NewTaskParams<'a> {
    pub target: &'a str,
    pub url: &'a str,
    pub total_file_count: String,
    pub parent_folder_id: &'a str,
    pub sub_file_index: String,
    pub mime_type: &'a str,
    pub file_id: &'a str,
}

#[derive(Debug, Default, Deserialize)]
struct CreatedTaskResponse {
    task: Option<CreatedTask>,
}

#[derive(Debug, Deserialize)]
struct CreatedTask {
    #[serde(default)]
    id: String,
}

impl XunleiApi {
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(
        base_url: &str,
        authorization: &str,
        cookie: &str,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            base: base_url.trim_end_matches('/').to_string(),
            authorization: authorization.to_string(),
            cookie: cookie.to_string(),
        })
    }

    fn endpoint(&self, step: Step, path: &str, pan_auth: Option<&str>) -> Result<Url, XunleiError> {
        let raw = format!("{}{APP_PATH}{path}", self.base);
        let mut url = Url::parse(&raw).map_err(|e| XunleiError::InvalidUrl {
            step,
            url: raw.clone(),
            reason: e.to_string(),
        })?;

        if let Some(pan_auth) = pan_auth {
            url.query_pairs_mut()
                .append_pair("pan_auth", pan_auth)
                .append_pair("device_space", "");
        }

        Ok(url)
    }

    fn request(&self, method: Method, url: Url, pan_auth: Option<&str>) -> RequestBuilder {
        let mut builder = self
            .client
            .request(method, url)
            .header(header::ACCEPT, "*/*")
            .header(header::USER_AGENT, USER_AGENT)
            .header(header::ORIGIN, &self.base)
            .header(header::REFERER, format!("{}{APP_PATH}", self.base))
            .header("device-space", "");

        if !self.authorization.is_empty() {
            builder = builder.header(header::AUTHORIZATION, &self.authorization);
        }
        if !self.cookie.is_empty() {
            builder = builder.header(header::COOKIE, &self.cookie);
        }
        if let Some(pan_auth) = pan_auth {
            builder = builder.header("pan-auth", pan_auth);
        }

        builder
    }

    async fn send(
        &self,
        step: Step,
        builder: RequestBuilder,
        url: &Url,
    ) -> Result<reqwest::Response, XunleiError> {
        let response = builder.send().await.map_err(|source| {
            tracing::warn!(url = %url, step = %step, error = %source, "Xunlei request failed");
            XunleiError::Http {
                step,
                url: url.to_string(),
                source,
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(url = %url, step = %step, status = %status, "Xunlei request rejected");
            return Err(XunleiError::Status {
                step,
                url: url.to_string(),
                status,
                body,
            });
        }

        Ok(response)
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        step: Step,
        builder: RequestBuilder,
        url: &Url,
    ) -> Result<T, XunleiError> {
        self.send(step, builder, url)
            .await?
            .json()
            .await
            .map_err(|source| XunleiError::Http {
                step,
                url: url.to_string(),
                source,
            })
    }

    /// Fetch the web UI entry page, which embeds the session token.
    pub(super) async fn index_page(&self) -> Result<String, XunleiError> {
        let url = self.endpoint(Step::Auth, "", None)?;
        let builder = self.request(Method::GET, url.clone(), None);

        self.send(Step::Auth, builder, &url)
            .await?
            .text()
            .await
            .map_err(|source| XunleiError::Http {
                step: Step::Auth,
                url: url.to_string(),
                source,
            })
    }

    /// Device target id taken from the first task known to the container.
    pub(super) async fn device_target(&self, pan_auth: &str) -> Result<String, XunleiError> {
        let mut url = self.endpoint(Step::Device, "drive/v1/tasks", Some(pan_auth))?;
        url.query_pairs_mut().append_pair("type", "user#runner");

        let builder = self.request(Method::GET, url.clone(), Some(pan_auth));
        let list: TaskList = self.send_json(Step::Device, builder, &url).await?;

        let task = list
            .tasks
            .into_iter()
            .next()
            .ok_or_else(|| XunleiError::Device("no task entries returned".to_string()))?;

        if task.params.target.is_empty() {
            return Err(XunleiError::Device(
                "first task carries no target".to_string(),
            ));
        }

        Ok(task.params.target)
    }

    /// List the folders of `space`.
    pub(super) async fn folders(
        &self,
        pan_auth: &str,
        space: &str,
    ) -> Result<Vec<Folder>, XunleiError> {
        let mut url = self.endpoint(Step::Folder, "drive/v1/files", Some(pan_auth))?;
        url.query_pairs_mut()
            .append_pair("space", space)
            .append_pair("limit", "200")
            .append_pair("parent_id", "")
            .append_pair("filters", r#"{"kind":{"eq":"drive#folder"}}"#)
            .append_pair("page_token", "")
            .append_pair("with", "withCategoryDiskMountPath")
            .append_pair("with", "withCategoryDownloadPath");

        let builder = self.request(Method::GET, url.clone(), Some(pan_auth));
        let list: FileList = self.send_json(Step::Folder, builder, &url).await?;

        Ok(list.files)
    }

    /// Resolve a magnet link into its resource tree.
    pub(super) async fn resources(
        &self,
        pan_auth: &str,
        magnet: &str,
    ) -> Result<Vec<Resource>, XunleiError> {
        let url = self.endpoint(Step::Resource, "drive/v1/resource/list", Some(pan_auth))?;
        let builder = self
            .request(Method::POST, url.clone(), Some(pan_auth))
            .json(&ResourceQuery {
                page_size: 1000,
                urls: magnet,
            });

        let response: ResourceResponse = self.send_json(Step::Resource, builder, &url).await?;

        Ok(response.list.resources)
    }

    /// Create the download task, returning the remote task id if the response carries one.
    pub(super) async fn create_task(
        &self,
        pan_auth: &str,
        task: &NewTask<'_>,
    ) -> Result<Option<String>, XunleiError> {
        let url = self.endpoint(Step::CreateTask, "drive/v1/task", Some(pan_auth))?;
        let builder = self
            .request(Method::POST, url.clone(), Some(pan_auth))
            .json(task);

        let response = self.send(Step::CreateTask, builder, &url).await?;

        // The task exists once the call succeeded; the id is informational only.
        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => {
                tracing::warn!(url = %url, error = %e, "Failed to read Xunlei task response");
                return Ok(None);
            }
        };
        let created: CreatedTaskResponse = match serde_json::from_str(&body) {
            Ok(created) => created,
            Err(e) => {
                tracing::warn!(
                    url = %url,
                    error = %e,
                    body = %body,
                    "Unexpected Xunlei task response"
                );
                return Ok(None);
            }
        };

        Ok(created.task.map(|t| t.id).filter(|id| !id.is_empty()))
    }
}

impl Folder {
    #[must_use]
    pub fn is_default_download(&self) -> bool {
        self.params.category_name == DEFAULT_DOWNLOAD_CATEGORY
    }
}
