use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tokio::sync::Mutex;
use url::Url;

use super::{BackendError, TorrentBackend};
use crate::{
    config::TransmissionConfig,
    task::{DownloadRequest, TaskHandle},
};

const RPC_PATH: &str = "transmission/rpc";
const SESSION_HEADER: &str = "X-Transmission-Session-Id";

/// Transmission JSON-RPC client.
pub struct Transmission {
    client: reqwest::Client,
    rpc_url: Url,
    credential: Option<(String, Option<String>)>,
    session_id: Mutex<Option<String>>,
}

#[derive(Serialize)]
struct RpcRequest<'a, A> {
    method: &'a str,
    arguments: A,
}

#[derive(Deserialize)]
struct RpcResponse<T> {
    result: String,
    arguments: Option<T>,
}

#[derive(Serialize)]
struct TorrentAdd<'a> {
    filename: &'a str,
    #[serde(rename = "download-dir", skip_serializing_if = "Option::is_none")]
    download_dir: Option<&'a str>,
    paused: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    labels: Vec<&'a str>,
}

#[derive(Deserialize)]
struct TorrentAdded {
    #[serde(rename = "torrent-added")]
    added: Option<AddedTorrent>,
    #[serde(rename = "torrent-duplicate")]
    duplicate: Option<AddedTorrent>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AddedTorrent {
    id: i64,
    hash_string: String,
    #[serde(default)]
    name: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TorrentSet {
    ids: [i64; 1],
    upload_limit: u32,
    upload_limited: bool,
}

impl Transmission {
    /// Create a client for the daemon at `config.url`.
    ///
    /// # Errors
    ///
    /// Returns an error if the RPC URL is invalid or the HTTP client cannot be built.
    pub fn from_config(
        config: &TransmissionConfig,
        timeout: Duration,
    ) -> Result<Self, BackendError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(BackendError::Client)?;
        let rpc_url = config.url.join(RPC_PATH)?;
        let credential = config
            .username
            .clone()
            .map(|user| (user, config.password.clone()));

        Ok(Self {
            client,
            rpc_url,
            credential,
            session_id: Mutex::new(None),
        })
    }

    /// Perform one RPC call, completing the session-id handshake if the daemon asks for it.
    async fn call<A, T>(&self, method: &str, arguments: A) -> Result<T, BackendError>
    where
        A: Serialize + Send + Sync,
        T: DeserializeOwned,
    {
        let body = RpcRequest { method, arguments };
        let url = self.rpc_url.to_string();

        let mut handshake_done = false;
        let response = loop {
            let mut builder = self.client.post(self.rpc_url.clone()).json(&body);
            if let Some((user, password)) = &self.credential {
                builder = builder.basic_auth(user, password.as_ref());
            }
            if let Some(session_id) = self.session_id.lock().await.as_ref() {
                builder = builder.header(SESSION_HEADER, session_id);
            }

            let response = builder
                .send()
                .await
                .map_err(|source| BackendError::Http {
                    url: url.clone(),
                    source,
                })?;

            if response.status() != reqwest::StatusCode::CONFLICT || handshake_done {
                break response;
            }

            let session_id = response
                .headers()
                .get(SESSION_HEADER)
                .and_then(|v| v.to_str().ok())
                .ok_or_else(|| {
                    BackendError::Rejected("409 response without a session id".to_string())
                })?;
            tracing::debug!("Refreshing Transmission session id");
            *self.session_id.lock().await = Some(session_id.to_string());
            handshake_done = true;
        };

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::Status { url, status, body });
        }

        let rpc: RpcResponse<T> = response
            .json()
            .await
            .map_err(|source| BackendError::Http { url, source })?;

        if rpc.result != "success" {
            return Err(BackendError::Rejected(rpc.result));
        }

        rpc.arguments
            .ok_or_else(|| BackendError::Rejected(format!("{method} returned no arguments")))
    }
}

#[async_trait]
impl TorrentBackend for Transmission {
    fn name(&self) -> &'static str {
        "transmission"
    }

    async fn add_torrent(&self, request: &DownloadRequest) -> Result<TaskHandle, BackendError> {
        let arguments = TorrentAdd {
            filename: request.magnet.as_str(),
            download_dir: request.save_path.as_deref(),
            paused: request.paused,
            labels: request.tags.iter().map(String::as_str).collect(),
        };

        let result: TorrentAdded = self.call("torrent-add", arguments).await?;

        let torrent = match (result.added, result.duplicate) {
            (Some(torrent), _) => torrent,
            (None, Some(torrent)) => {
                tracing::info!(
                    hash = %torrent.hash_string,
                    "Torrent already present in Transmission"
                );
                torrent
            }
            (None, None) => {
                return Err(BackendError::Rejected(
                    "torrent-add returned no torrent".to_string(),
                ));
            }
        };

        if let Some(limit) = request.upload_limit_kib {
            let arguments = TorrentSet {
                ids: [torrent.id],
                upload_limit: limit,
                upload_limited: true,
            };
            self.call::<_, serde::de::IgnoredAny>("torrent-set", arguments)
                .await?;
        }

        tracing::info!(
            hash = %torrent.hash_string,
            id = torrent.id,
            "Torrent added to Transmission"
        );

        Ok(TaskHandle {
            backend: self.name(),
            id: torrent.hash_string,
            name: torrent.name,
            location: request.save_path.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use httpmock::prelude::*;
    use serde_json::json;

    use super::*;
    use crate::{magnet::MagnetLink, task::DownloadRequestBuilder};

    const MAGNET: &str = "magnet:?xt=urn:btih:0123456789abcdef0123456789abcdef&dn=Sample";

    fn backend(server: &MockServer, username: Option<&str>) -> Transmission {
        let config = TransmissionConfig {
            url: server.base_url().parse().unwrap(),
            username: username.map(String::from),
            password: username.map(|_| "secret".to_string()),
        };
        Transmission::from_config(&config, Duration::from_secs(5)).unwrap()
    }

    fn request() -> DownloadRequest {
        DownloadRequestBuilder::default()
            .magnet(MagnetLink::parse(MAGNET).unwrap())
            .save_path("/downloads")
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn adds_torrent_after_session_handshake() {
        let server = MockServer::start_async().await;

        let handshake = server.mock(|when, then| {
            when.method(POST)
                .path("/transmission/rpc")
                .header_missing(SESSION_HEADER);
            then.status(409).header(SESSION_HEADER, "session-1");
        });
        let add = server.mock(|when, then| {
            when.method(POST)
                .path("/transmission/rpc")
                .header(SESSION_HEADER, "session-1")
                .json_body(json!({
                    "method": "torrent-add",
                    "arguments": {
                        "filename": MAGNET,
                        "download-dir": "/downloads",
                        "paused": false
                    }
                }));
            then.status(200).json_body(json!({
                "result": "success",
                "arguments": {
                    "torrent-added": {
                        "id": 7,
                        "hashString": "0123456789abcdef0123456789abcdef",
                        "name": "Sample"
                    }
                }
            }));
        });

        let handle = backend(&server, None).add_torrent(&request()).await.unwrap();

        handshake.assert();
        add.assert();
        assert_eq!(handle.id, "0123456789abcdef0123456789abcdef");
        assert_eq!(handle.location.as_deref(), Some("/downloads"));
        assert_eq!(handle.backend, "transmission");
    }

    #[tokio::test]
    async fn duplicate_torrent_is_success() {
        let server = MockServer::start_async().await;
        server.mock(|when, then| {
            when.method(POST).path("/transmission/rpc");
            then.status(200).json_body(json!({
                "result": "success",
                "arguments": {
                    "torrent-duplicate": {
                        "id": 3,
                        "hashString": "0123456789abcdef0123456789abcdef",
                        "name": "Sample"
                    }
                }
            }));
        });

        let handle = backend(&server, Some("admin"))
            .add_torrent(&request())
            .await
            .unwrap();
        assert_eq!(handle.name, "Sample");
    }

    #[tokio::test]
    async fn rpc_failure_result_is_rejected() {
        let server = MockServer::start_async().await;
        server.mock(|when, then| {
            when.method(POST).path("/transmission/rpc");
            then.status(200).json_body(json!({
                "result": "invalid or corrupt torrent file",
                "arguments": {}
            }));
        });

        let err = backend(&server, None)
            .add_torrent(&request())
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::Rejected(ref reason) if reason.contains("corrupt")));
    }

    #[tokio::test]
    async fn unauthorized_is_status_error() {
        let server = MockServer::start_async().await;
        server.mock(|when, then| {
            when.method(POST).path("/transmission/rpc");
            then.status(401).body("Unauthorized User");
        });

        let err = backend(&server, None)
            .add_torrent(&request())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            BackendError::Status { status, .. } if status == reqwest::StatusCode::UNAUTHORIZED
        ));
    }
}
