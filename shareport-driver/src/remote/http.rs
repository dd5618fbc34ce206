//! HTTP client for the remote storage API.
//!
//! URLs are built as `{storage_api_url}/{backend}/...`:
//!
//! | Call          | Method | Path                       |
//! |---------------|--------|----------------------------|
//! | activate      | POST   | `activate`                 |
//! | create        | POST   | `volumes`                  |
//! | remove        | DELETE | `volumes/{name}`           |
//! | get           | GET    | `volumes/{name}`           |
//! | list          | GET    | `volumes`                  |
//! | mark attached | PUT    | `volumes/{name}/attach`    |
//! | mark detached | PUT    | `volumes/{name}/detach`    |
//!
//! Failed calls carry the server's `Err` message when the body has one.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;
use tracing::{debug, info, instrument, warn};

use super::RemoteVolumeService;
use crate::error::{DriverError, Result};
use crate::share::ShareLocator;
use crate::types::{RemoteConfig, VolumeConfig, VolumeMetadata, VolumeOptions};

/// Option key carrying the NFS client export specification on create.
pub const CLIENT_CONFIG_OPTION: &str = "nfsClientConfig";

#[derive(Debug, Serialize)]
struct CreateRequest<'a> {
    name: &'a str,
    opts: VolumeOptions,
}

#[derive(Debug, Serialize)]
struct RemoveRequest<'a> {
    name: &'a str,
    #[serde(rename = "forceDelete")]
    force_delete: bool,
}

#[derive(Debug, Deserialize)]
struct GetResponse {
    #[serde(alias = "Volume")]
    volume: VolumeMetadata,
    #[serde(default, alias = "Config")]
    config: VolumeConfig,
}

#[derive(Debug, Deserialize)]
struct ListResponse {
    #[serde(default, alias = "Volumes")]
    volumes: Vec<VolumeMetadata>,
}

#[derive(Debug, Deserialize)]
struct AttachResponse {
    #[serde(default, alias = "Mountpoint")]
    mountpoint: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    #[serde(alias = "err", alias = "error")]
    #[serde(rename = "Err")]
    err: String,
}

/// Storage API client.
///
/// Activation state belongs to the instance: `activate` reaches the server at
/// most once per successful activation, even with concurrent callers.
pub struct HttpVolumeService {
    http_client: Client,
    base_url: Url,
    backend: String,
    client_config: String,
    request_timeout: Duration,
    activated: OnceCell<()>,
}

impl HttpVolumeService {
    /// Create a client from configuration.
    pub fn new(config: &RemoteConfig) -> Result<Self> {
        config.validate()?;

        let base_url = Url::parse(&config.storage_api_url).map_err(|e| {
            DriverError::InvalidConfig(format!("invalid storage_api_url '{}': {}", config.storage_api_url, e))
        })?;
        if base_url.cannot_be_a_base() {
            return Err(DriverError::InvalidConfig(format!(
                "storage_api_url '{}' cannot be used as a base URL",
                config.storage_api_url
            )));
        }

        let request_timeout = config.request_timeout();
        let http_client = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| DriverError::InvalidConfig(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            base_url,
            backend: config.backend.clone(),
            client_config: config.client_config.clone(),
            request_timeout,
            activated: OnceCell::new(),
        })
    }

    /// Whether `activate` has succeeded on this instance.
    pub fn is_activated(&self) -> bool {
        self.activated.initialized()
    }

    /// Build `{base}/{backend}/{segments...}` with each segment percent-encoded.
    pub fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().push(&self.backend).extend(segments);
        }
        url
    }

    fn request(&self, method: Method, segments: &[&str]) -> RequestBuilder {
        let url = self.url(segments);
        debug!(method = %method, url = %url, "Sending storage API request");
        self.http_client.request(method, url)
    }

    /// Send a request and require a 200 response.
    async fn execute(&self, operation: &'static str, request: RequestBuilder) -> Result<Response> {
        let response = request
            .send()
            .await
            .map_err(|e| self.transport_error(operation, e))?;

        if response.status() == StatusCode::OK {
            return Ok(response);
        }

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorResponse>(&body)
            .ok()
            .map(|e| e.err)
            .filter(|m| !m.is_empty())
            .unwrap_or(body);

        warn!(operation, status = %status, message = %message, "Storage API call failed");
        Err(DriverError::RemoteCall {
            operation,
            status: status.as_u16(),
            message,
        })
    }

    async fn decode<T: DeserializeOwned>(&self, operation: &'static str, response: Response) -> Result<T> {
        let body = response
            .bytes()
            .await
            .map_err(|e| self.transport_error(operation, e))?;

        serde_json::from_slice(&body).map_err(|e| {
            warn!(operation, error = %e, "Failed to decode storage API response");
            DriverError::MalformedMetadata(format!("{} response: {}", operation, e))
        })
    }

    fn transport_error(&self, operation: &'static str, err: reqwest::Error) -> DriverError {
        if err.is_timeout() {
            DriverError::Timeout {
                operation: operation.to_string(),
                after: self.request_timeout,
            }
        } else {
            DriverError::Transport {
                operation,
                message: err.to_string(),
            }
        }
    }
}

#[async_trait]
impl RemoteVolumeService for HttpVolumeService {
    #[instrument(skip(self), fields(backend = %self.backend))]
    async fn activate(&self) -> Result<()> {
        self.activated
            .get_or_try_init(|| async {
                info!("Activating storage backend");
                self.execute("activate", self.request(Method::POST, &["activate"]))
                    .await?;
                info!("Storage backend activated");
                Ok::<(), DriverError>(())
            })
            .await
            .map(|_| ())
    }

    #[instrument(skip(self, opts), fields(volume = %name))]
    async fn create_volume(&self, name: &str, opts: VolumeOptions) -> Result<()> {
        let mut opts = opts;
        opts.insert(
            CLIENT_CONFIG_OPTION.to_string(),
            serde_json::Value::String(self.client_config.clone()),
        );

        let request = self
            .request(Method::POST, &["volumes"])
            .json(&CreateRequest { name, opts });
        self.execute("create volume", request).await?;

        info!("Volume created");
        Ok(())
    }

    #[instrument(skip(self), fields(volume = %name, force = force))]
    async fn remove_volume(&self, name: &str, force: bool) -> Result<()> {
        let request = self
            .request(Method::DELETE, &["volumes", name])
            .json(&RemoveRequest {
                name,
                force_delete: force,
            });
        self.execute("remove volume", request).await?;

        info!("Volume removed");
        Ok(())
    }

    #[instrument(skip(self), fields(volume = %name))]
    async fn get_volume(&self, name: &str) -> Result<(VolumeMetadata, VolumeConfig)> {
        let response = self
            .execute("get volume", self.request(Method::GET, &["volumes", name]))
            .await?;
        let get: GetResponse = self.decode("get volume", response).await?;
        Ok((get.volume, get.config))
    }

    #[instrument(skip(self))]
    async fn list_volumes(&self) -> Result<Vec<VolumeMetadata>> {
        let response = self
            .execute("list volumes", self.request(Method::GET, &["volumes"]))
            .await?;
        let list: ListResponse = self.decode("list volumes", response).await?;
        debug!(count = list.volumes.len(), "Listed volumes");
        Ok(list.volumes)
    }

    #[instrument(skip(self), fields(volume = %name))]
    async fn mark_attached(&self, name: &str) -> Result<ShareLocator> {
        let response = self
            .execute("attach volume", self.request(Method::PUT, &["volumes", name, "attach"]))
            .await?;
        let attach: AttachResponse = self.decode("attach volume", response).await?;

        let share = attach
            .mountpoint
            .filter(|m| !m.is_empty())
            .ok_or_else(|| {
                DriverError::MalformedMetadata(format!("attach response for '{}' has no share locator", name))
            })?;
        ShareLocator::parse(&share)
    }

    #[instrument(skip(self), fields(volume = %name))]
    async fn mark_detached(&self, name: &str) -> Result<()> {
        self.execute("detach volume", self.request(Method::PUT, &["volumes", name, "detach"]))
            .await?;
        Ok(())
    }
}
