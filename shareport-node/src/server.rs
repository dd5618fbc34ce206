//! Docker volume plugin server.
//!
//! Exposes the controller over the Docker volume plugin protocol:
//! JSON bodies with PascalCase keys, `POST` on every endpoint, and failures
//! reported in an `Err` field.
//!
//! Docker may mount one volume into several containers. Every Mount carries
//! a caller `ID` and goes through `attach`, which finds an existing mount in
//! the live mount table. The volume is detached when the last caller is
//! released.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use axum::{
    extract::State,
    http::StatusCode,
    response::Json,
    routing::post,
    Router,
};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

use shareport_driver::{DriverError, VolumeAttachmentController, VolumeOptions};

use crate::config::ServerConfig;

/// Shared state for plugin handlers
pub struct PluginState {
    /// Volume controller
    pub controller: VolumeAttachmentController,
    /// Per-volume serialization and mount bookkeeping
    pub locks: VolumeLocks,
}

impl PluginState {
    pub fn new(controller: VolumeAttachmentController) -> Self {
        Self {
            controller,
            locks: VolumeLocks::default(),
        }
    }
}

/// Callers of one volume, guarded by its lock.
///
/// Only decides when the last caller is gone. Whether the share is mounted
/// is always read from the live mount table by `attach`.
#[derive(Debug, Default)]
pub struct VolumeMount {
    /// Caller IDs currently using the mount
    pub ids: HashSet<String>,
}

/// One async mutex per volume name.
///
/// Holding a volume's guard serializes Mount, Unmount and Remove for that
/// name while other volumes proceed.
#[derive(Default)]
pub struct VolumeLocks {
    inner: Mutex<HashMap<String, Arc<tokio::sync::Mutex<VolumeMount>>>>,
}

impl VolumeLocks {
    /// Lock `name`, creating its entry on first use.
    pub async fn lock(&self, name: &str) -> tokio::sync::OwnedMutexGuard<VolumeMount> {
        let entry = {
            let mut map = match self.inner.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            map.entry(name.to_string()).or_default().clone()
        };
        entry.lock_owned().await
    }
}

// ============================================================================
// Protocol Types
// ============================================================================

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct ActivateResponse {
    implements: Vec<&'static str>,
}

/// Error body. Successful responses carry an empty `Err`.
#[derive(Debug, Serialize)]
pub struct PluginError {
    #[serde(rename = "Err")]
    err: String,
}

impl PluginError {
    fn new(message: impl Into<String>) -> Self {
        Self { err: message.into() }
    }
}

type PluginResult<T> = Result<Json<T>, (StatusCode, Json<PluginError>)>;

fn plugin_error(operation: &str, name: &str, e: DriverError) -> (StatusCode, Json<PluginError>) {
    error!(operation, volume = %name, error = %e, "Plugin request failed");
    (StatusCode::INTERNAL_SERVER_ERROR, Json(PluginError::new(e.to_string())))
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CreateRequest {
    name: String,
    #[serde(default)]
    opts: Option<VolumeOptions>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct NameRequest {
    name: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct MountRequest {
    name: String,
    #[serde(rename = "ID", default)]
    id: String,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct EmptyResponse {
    err: String,
}

impl EmptyResponse {
    fn ok() -> Self {
        Self { err: String::new() }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct MountpointResponse {
    mountpoint: String,
    err: String,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct PluginVolume {
    name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    mountpoint: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct GetResponse {
    volume: PluginVolume,
    err: String,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct ListResponse {
    volumes: Vec<PluginVolume>,
    err: String,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct Capabilities {
    scope: &'static str,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct CapabilitiesResponse {
    capabilities: Capabilities,
}

// ============================================================================
// Router
// ============================================================================

/// Build the plugin router.
pub fn router(state: Arc<PluginState>) -> Router {
    Router::new()
        .route("/Plugin.Activate", post(activate))
        .route("/VolumeDriver.Create", post(create))
        .route("/VolumeDriver.Remove", post(remove))
        .route("/VolumeDriver.Mount", post(mount))
        .route("/VolumeDriver.Unmount", post(unmount))
        .route("/VolumeDriver.Path", post(path))
        .route("/VolumeDriver.Get", post(get))
        .route("/VolumeDriver.List", post(list))
        .route("/VolumeDriver.Capabilities", post(capabilities))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the plugin protocol until the listener fails.
pub async fn run(config: &ServerConfig, controller: VolumeAttachmentController) -> anyhow::Result<()> {
    let addr: SocketAddr = config.server_addr()?;
    let app = router(Arc::new(PluginState::new(controller)));

    info!(address = %addr, "Starting volume plugin server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /Plugin.Activate
async fn activate(State(state): State<Arc<PluginState>>) -> PluginResult<ActivateResponse> {
    state
        .controller
        .activate()
        .await
        .map_err(|e| plugin_error("activate", "", e))?;

    Ok(Json(ActivateResponse {
        implements: vec!["VolumeDriver"],
    }))
}

/// POST /VolumeDriver.Create
async fn create(
    State(state): State<Arc<PluginState>>,
    Json(req): Json<CreateRequest>,
) -> PluginResult<EmptyResponse> {
    debug!(volume = %req.name, "Create requested");
    state
        .controller
        .create(&req.name, req.opts.unwrap_or_default())
        .await
        .map_err(|e| plugin_error("create", &req.name, e))?;
    Ok(Json(EmptyResponse::ok()))
}

/// POST /VolumeDriver.Remove
async fn remove(
    State(state): State<Arc<PluginState>>,
    Json(req): Json<NameRequest>,
) -> PluginResult<EmptyResponse> {
    let guard = state.locks.lock(&req.name).await;

    if !guard.ids.is_empty() {
        warn!(volume = %req.name, users = guard.ids.len(), "Refusing to remove mounted volume");
        return Err((
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(PluginError::new(format!(
                "volume '{}' is mounted by {} container(s)",
                req.name,
                guard.ids.len()
            ))),
        ));
    }

    state
        .controller
        .remove(&req.name, false)
        .await
        .map_err(|e| plugin_error("remove", &req.name, e))?;
    Ok(Json(EmptyResponse::ok()))
}

/// POST /VolumeDriver.Mount
async fn mount(
    State(state): State<Arc<PluginState>>,
    Json(req): Json<MountRequest>,
) -> PluginResult<MountpointResponse> {
    let mut guard = state.locks.lock(&req.name).await;

    let mountpoint = state
        .controller
        .attach(&req.name)
        .await
        .map_err(|e| plugin_error("mount", &req.name, e))?;
    guard.ids.insert(req.id);

    Ok(Json(MountpointResponse {
        mountpoint: mountpoint.display().to_string(),
        err: String::new(),
    }))
}

/// POST /VolumeDriver.Unmount
async fn unmount(
    State(state): State<Arc<PluginState>>,
    Json(req): Json<MountRequest>,
) -> PluginResult<EmptyResponse> {
    let mut guard = state.locks.lock(&req.name).await;

    let registered = guard.ids.remove(&req.id);
    if !guard.ids.is_empty() {
        debug!(volume = %req.name, users = guard.ids.len(), "Volume still in use, keeping mount");
        return Ok(Json(EmptyResponse::ok()));
    }

    if let Err(e) = state.controller.detach(&req.name).await {
        // A retried Unmount from a known caller must still find it registered
        if registered {
            guard.ids.insert(req.id.clone());
        }
        return Err(plugin_error("unmount", &req.name, e));
    }

    Ok(Json(EmptyResponse::ok()))
}

/// POST /VolumeDriver.Path
async fn path(
    State(state): State<Arc<PluginState>>,
    Json(req): Json<NameRequest>,
) -> PluginResult<MountpointResponse> {
    let mountpoint = state
        .controller
        .path(&req.name)
        .await
        .map_err(|e| plugin_error("path", &req.name, e))?;

    Ok(Json(MountpointResponse {
        mountpoint: mountpoint.display().to_string(),
        err: String::new(),
    }))
}

/// POST /VolumeDriver.Get
async fn get(
    State(state): State<Arc<PluginState>>,
    Json(req): Json<NameRequest>,
) -> PluginResult<GetResponse> {
    let (metadata, config) = state
        .controller
        .get(&req.name)
        .await
        .map_err(|e| plugin_error("get", &req.name, e))?;

    let mountpoint = config
        .share
        .map(|share| share.local_path(state.controller.mount_root()).display().to_string())
        .or(metadata.mountpoint);

    Ok(Json(GetResponse {
        volume: PluginVolume {
            name: metadata.name,
            mountpoint,
        },
        err: String::new(),
    }))
}

/// POST /VolumeDriver.List
async fn list(State(state): State<Arc<PluginState>>) -> PluginResult<ListResponse> {
    let volumes = state
        .controller
        .list()
        .await
        .map_err(|e| plugin_error("list", "", e))?;

    Ok(Json(ListResponse {
        volumes: volumes
            .into_iter()
            .map(|v| PluginVolume {
                name: v.name,
                mountpoint: v.mountpoint,
            })
            .collect(),
        err: String::new(),
    }))
}

/// POST /VolumeDriver.Capabilities
async fn capabilities() -> Json<CapabilitiesResponse> {
    Json(CapabilitiesResponse {
        capabilities: Capabilities { scope: "global" },
    })
}
