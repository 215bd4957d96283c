//! REST API Handlers
//!
//! Exposes the storage driver to hosts that do not link it in. The API keeps
//! the volume descriptors a host would persist, so callers address volumes by
//! name only.

use crate::catalog::{convert_size_to_bytes, StoragePool};
use crate::domain::ports::{Protocol, StorageDriverRef};
use crate::domain::volume::{
    Snapshot, SnapshotConfig, VolumeConfig, VolumeExternal, VolumeExternalWrapper,
    VolumePublishInfo,
};
use crate::error::Error;
use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Router,
};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

// =============================================================================
// Request/Response Types
// =============================================================================

/// Volume create request
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CreateVolumeRequest {
    pub name: String,
    /// Storage pool; the backend's first pool if unset
    pub pool: Option<String>,
    /// e.g. "100Gi"; pool default if unset
    pub size: String,
    pub service_level: Option<String>,
    pub snapshot_dir: Option<String>,
    pub unix_permissions: Option<String>,
    pub export_rule: Option<String>,
    pub mount_options: Option<String>,
}

/// Clone request
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CloneVolumeRequest {
    pub name: String,
    pub source: String,
    /// Existing source snapshot; a new one is taken if unset
    pub snapshot: Option<String>,
    pub read_only: bool,
    pub pool: Option<String>,
}

/// Import request
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ImportVolumeRequest {
    pub name: String,
    /// Creation token of the volume on the service
    pub original_name: String,
    pub not_managed: bool,
    pub unix_permissions: Option<String>,
    pub snapshot_dir: Option<String>,
}

/// Resize request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResizeVolumeRequest {
    pub size: String,
}

/// Snapshot create request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSnapshotRequest {
    pub name: String,
}

/// Backend summary
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendResponse {
    pub name: String,
    pub driver: String,
    pub protocol: Protocol,
    pub initialized: bool,
    pub pools: Vec<String>,
    pub config: serde_json::Value,
}

/// Backend volumes visible to this driver, with per-item errors
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalVolumesResponse {
    pub volumes: Vec<VolumeExternal>,
    pub errors: Vec<String>,
}

/// API error response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiErrorResponse {
    pub error: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

// =============================================================================
// REST Router
// =============================================================================

/// REST API router builder
pub struct RestRouter {
    driver: StorageDriverRef,
}

impl RestRouter {
    pub fn new(driver: StorageDriverRef) -> Self {
        Self { driver }
    }

    /// Build the Axum router
    pub fn build(self) -> Router {
        let state = AppState::new(self.driver);

        Router::new()
            // Volume endpoints
            .route("/v1/volumes", post(create_volume).get(list_volumes))
            .route("/v1/volumes/clone", post(clone_volume))
            .route("/v1/volumes/import", post(import_volume))
            .route("/v1/volumes/external", get(list_external_volumes))
            .route("/v1/volumes/:name", get(get_volume).delete(delete_volume))
            .route("/v1/volumes/:name/size", put(resize_volume))
            .route("/v1/volumes/:name/publish", post(publish_volume))
            // Snapshot endpoints
            .route(
                "/v1/volumes/:name/snapshots",
                get(list_snapshots).post(create_snapshot),
            )
            .route(
                "/v1/volumes/:name/snapshots/:snapshot",
                get(get_snapshot).delete(delete_snapshot),
            )
            .route(
                "/v1/volumes/:name/snapshots/:snapshot/restore",
                post(restore_snapshot),
            )
            // Backend endpoints
            .route("/v1/backend", get(get_backend))
            .route("/v1/pools", get(list_pools))
            // Health endpoint
            .route("/health", get(health_check))
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }
}

/// Shared application state
#[derive(Clone)]
struct AppState {
    driver: StorageDriverRef,
    /// Volume descriptors by external name, as a host would persist them
    volumes: Arc<DashMap<String, VolumeConfig>>,
}

impl AppState {
    fn new(driver: StorageDriverRef) -> Self {
        Self {
            driver,
            volumes: Arc::new(DashMap::new()),
        }
    }

    fn volume(&self, name: &str) -> std::result::Result<VolumeConfig, Response> {
        self.volumes
            .get(name)
            .map(|v| v.clone())
            .ok_or_else(|| error_response(Error::not_found("volume", name)))
    }
}

// =============================================================================
// Error Mapping
// =============================================================================

fn error_status(e: &Error) -> (StatusCode, &'static str) {
    match e {
        Error::Validation(_) => (StatusCode::BAD_REQUEST, "invalid_request"),
        Error::SizeLimit { .. } => (StatusCode::BAD_REQUEST, "size_limit"),
        Error::ImportRejected { .. } => (StatusCode::BAD_REQUEST, "import_rejected"),
        Error::Entitlement { .. } => (StatusCode::FORBIDDEN, "not_entitled"),
        Error::NotFound { .. } => (StatusCode::NOT_FOUND, "not_found"),
        Error::VolumeExists { .. } => (StatusCode::CONFLICT, "already_exists"),
        Error::VolumeCreating { .. } => (StatusCode::ACCEPTED, "in_progress"),
        _ => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
    }
}

fn error_response(e: Error) -> Response {
    let (status, code) = error_status(&e);
    if status.is_server_error() {
        error!("Request failed: {}", e);
    } else {
        warn!("Request rejected: {}", e);
    }
    let details = e
        .is_retryable()
        .then(|| format!("retry: {:?}", e.action()));
    (
        status,
        Json(ApiErrorResponse {
            error: code.into(),
            message: e.to_string(),
            details,
        }),
    )
        .into_response()
}

// =============================================================================
// Volume Handlers
// =============================================================================

async fn create_volume(
    State(state): State<AppState>,
    Json(request): Json<CreateVolumeRequest>,
) -> Response {
    info!("Creating volume: {}", request.name);

    let pool = match request.pool {
        Some(pool) => pool,
        None => match state.driver.storage_pools().first() {
            Some(pool) => pool.name.clone(),
            None => return error_response(Error::Internal("backend has no pools".into())),
        },
    };

    let mut volume = VolumeConfig::new(&request.name, "").with_size(request.size);
    volume.service_level = request.service_level;
    volume.snapshot_dir = request.snapshot_dir;
    volume.unix_permissions = request.unix_permissions;
    volume.export_rule = request.export_rule;
    volume.mount_options = request.mount_options;
    if let Some(known) = state.volumes.get(&request.name) {
        // Retry of an in-progress create keeps the original internal name
        volume.internal_name = known.internal_name.clone();
    } else {
        state.driver.create_prepare(&mut volume);
    }

    if let Err(e) = state.driver.create(&mut volume, &pool).await {
        // An in-progress create is retried under the same internal name
        if e.is_volume_creating() {
            state.volumes.insert(request.name, volume);
        }
        return error_response(e);
    }

    if let Err(e) = state.driver.create_followup(&mut volume).await {
        return error_response(e);
    }
    state.volumes.insert(request.name, volume.clone());
    (StatusCode::CREATED, Json(volume)).into_response()
}

async fn clone_volume(
    State(state): State<AppState>,
    Json(request): Json<CloneVolumeRequest>,
) -> Response {
    info!("Cloning volume {} from {}", request.name, request.source);

    let source = match state.volume(&request.source) {
        Ok(source) => source,
        Err(response) => return response,
    };

    let mut clone = VolumeConfig::new(&request.name, "");
    clone.clone_source_volume = Some(source.name.clone());
    clone.clone_source_volume_internal = Some(source.internal_name.clone());
    clone.clone_source_snapshot = request.snapshot.clone();
    clone.clone_source_snapshot_internal = request.snapshot;
    clone.read_only_clone = request.read_only;
    state.driver.create_prepare(&mut clone);

    if let Err(e) = state
        .driver
        .create_clone(&source, &mut clone, request.pool.as_deref())
        .await
    {
        return error_response(e);
    }
    if let Err(e) = state.driver.create_followup(&mut clone).await {
        return error_response(e);
    }

    state.volumes.insert(request.name, clone.clone());
    (StatusCode::CREATED, Json(clone)).into_response()
}

async fn import_volume(
    State(state): State<AppState>,
    Json(request): Json<ImportVolumeRequest>,
) -> Response {
    info!("Importing volume {} as {}", request.original_name, request.name);

    let mut volume = VolumeConfig::new(&request.name, "");
    volume.import_not_managed = request.not_managed;
    volume.unix_permissions = request.unix_permissions;
    volume.snapshot_dir = request.snapshot_dir;

    if let Err(e) = state.driver.import(&mut volume, &request.original_name).await {
        return error_response(e);
    }
    if let Err(e) = state.driver.create_followup(&mut volume).await {
        return error_response(e);
    }

    state.volumes.insert(request.name, volume.clone());
    (StatusCode::CREATED, Json(volume)).into_response()
}

async fn list_volumes(State(state): State<AppState>) -> Response {
    match state.driver.list().await {
        Ok(names) => (StatusCode::OK, Json(names)).into_response(),
        Err(e) => error_response(e),
    }
}

async fn list_external_volumes(State(state): State<AppState>) -> Response {
    let (tx, mut rx) = mpsc::channel::<VolumeExternalWrapper>(16);

    let collect = async move {
        let mut response = ExternalVolumesResponse::default();
        while let Some(wrapper) = rx.recv().await {
            if let Some(volume) = wrapper.volume {
                response.volumes.push(volume);
            }
            if let Some(e) = wrapper.error {
                response.errors.push(e.to_string());
            }
        }
        response
    };

    // The driver closes the channel when it returns
    let ((), response) = futures::join!(state.driver.volume_external_wrappers(tx), collect);
    (StatusCode::OK, Json(response)).into_response()
}

async fn get_volume(State(state): State<AppState>, Path(name): Path<String>) -> Response {
    if let Some(volume) = state.volumes.get(&name).map(|v| v.clone()) {
        return match state.driver.get(&volume.internal_name).await {
            Ok(()) => (StatusCode::OK, Json(volume)).into_response(),
            Err(e) => error_response(e),
        };
    }

    // Not created through this API; look for it on the backend
    match state.driver.volume_external(&name).await {
        Ok(external) => (StatusCode::OK, Json(external)).into_response(),
        Err(e) => error_response(e),
    }
}

async fn delete_volume(State(state): State<AppState>, Path(name): Path<String>) -> Response {
    let volume = match state.volume(&name) {
        Ok(volume) => volume,
        Err(response) => return response,
    };

    match state.driver.destroy(&volume).await {
        Ok(()) => {
            state.volumes.remove(&name);
            StatusCode::NO_CONTENT.into_response()
        }
        Err(e) => error_response(e),
    }
}

async fn resize_volume(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(request): Json<ResizeVolumeRequest>,
) -> Response {
    let mut volume = match state.volume(&name) {
        Ok(volume) => volume,
        Err(response) => return response,
    };
    let size_bytes = match convert_size_to_bytes(&request.size) {
        Ok(bytes) => bytes,
        Err(e) => return error_response(e),
    };

    let result = state.driver.resize(&mut volume, size_bytes).await;
    state.volumes.insert(name, volume.clone());
    match result {
        Ok(()) => (StatusCode::OK, Json(volume)).into_response(),
        Err(e) => error_response(e),
    }
}

async fn publish_volume(State(state): State<AppState>, Path(name): Path<String>) -> Response {
    let mut volume = match state.volume(&name) {
        Ok(volume) => volume,
        Err(response) => return response,
    };

    let result: crate::error::Result<VolumePublishInfo> = state.driver.publish(&mut volume).await;
    state.volumes.insert(name, volume);
    match result {
        Ok(info) => (StatusCode::OK, Json(info)).into_response(),
        Err(e) => error_response(e),
    }
}

// =============================================================================
// Snapshot Handlers
// =============================================================================

async fn list_snapshots(State(state): State<AppState>, Path(name): Path<String>) -> Response {
    let volume = match state.volume(&name) {
        Ok(volume) => volume,
        Err(response) => return response,
    };
    match state.driver.get_snapshots(&volume).await {
        Ok(snapshots) => (StatusCode::OK, Json(snapshots)).into_response(),
        Err(e) => error_response(e),
    }
}

async fn create_snapshot(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(request): Json<CreateSnapshotRequest>,
) -> Response {
    let volume = match state.volume(&name) {
        Ok(volume) => volume,
        Err(response) => return response,
    };
    let config = SnapshotConfig::new(request.name, &volume);

    if let Err(e) = state.driver.can_snapshot(&config, &volume).await {
        return error_response(e);
    }
    match state.driver.create_snapshot(&config, &volume).await {
        Ok(snapshot) => (StatusCode::CREATED, Json(snapshot)).into_response(),
        Err(e) => error_response(e),
    }
}

async fn get_snapshot(
    State(state): State<AppState>,
    Path((name, snapshot)): Path<(String, String)>,
) -> Response {
    let volume = match state.volume(&name) {
        Ok(volume) => volume,
        Err(response) => return response,
    };
    let config = SnapshotConfig::new(&snapshot, &volume);

    match state.driver.get_snapshot(&config, &volume).await {
        Ok(Some(found)) => (StatusCode::OK, Json::<Snapshot>(found)).into_response(),
        Ok(None) => error_response(Error::not_found("snapshot", snapshot)),
        Err(e) => error_response(e),
    }
}

async fn delete_snapshot(
    State(state): State<AppState>,
    Path((name, snapshot)): Path<(String, String)>,
) -> Response {
    let volume = match state.volume(&name) {
        Ok(volume) => volume,
        Err(response) => return response,
    };
    let config = SnapshotConfig::new(snapshot, &volume);

    match state.driver.delete_snapshot(&config, &volume).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => error_response(e),
    }
}

async fn restore_snapshot(
    State(state): State<AppState>,
    Path((name, snapshot)): Path<(String, String)>,
) -> Response {
    let volume = match state.volume(&name) {
        Ok(volume) => volume,
        Err(response) => return response,
    };
    let config = SnapshotConfig::new(snapshot, &volume);

    match state.driver.restore_snapshot(&config, &volume).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => error_response(e),
    }
}

// =============================================================================
// Backend Handlers
// =============================================================================

async fn get_backend(State(state): State<AppState>) -> Response {
    let driver = &state.driver;
    (
        StatusCode::OK,
        Json(BackendResponse {
            name: driver.backend_name(),
            driver: driver.name().to_string(),
            protocol: driver.protocol(),
            initialized: driver.initialized(),
            pools: driver.storage_pools().into_iter().map(|p| p.name).collect(),
            config: driver.external_config(),
        }),
    )
        .into_response()
}

async fn list_pools(State(state): State<AppState>) -> Response {
    let pools: Vec<StoragePool> = state.driver.storage_pools();
    (StatusCode::OK, Json(pools)).into_response()
}

/// Health check
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    if state.driver.initialized() {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "driver not initialized")
    }
}
