//! HTTP routes.

use std::sync::Arc;
use std::time::Duration;

use assetuploader_scheduler::{Job, JobStatus, JobStoreHandle};
use axum::{
    Router,
    extract::{Path, Query, State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::{get, post},
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::AssetError;
use crate::manager::AssetManager;
use crate::storage::ObjectStorage;

/// Download URL lifetime when the request does not set one.
const DEFAULT_DOWNLOAD_TIMEOUT_SECS: u64 = 60;

/// Shared state for the web server.
pub struct AppState {
    pub manager: AssetManager,
    pub storage: Arc<dyn ObjectStorage>,
    pub store: JobStoreHandle,
    pub bucket: String,
    /// Fired on server shutdown; aborts requests waiting on the job store.
    pub shutdown: CancellationToken,
}

/// Create the web router.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/asset", post(create_asset))
        .route("/asset/{asset_id}", get(get_asset).put(put_asset))
        .route("/jobs", get(list_jobs))
        .route("/healthcheck", get(healthcheck))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PostAssetResponse {
    pub upload_url: String,
    pub id: String,
}

async fn create_asset(
    State(state): State<Arc<AppState>>,
) -> Result<Json<PostAssetResponse>, AssetError> {
    let asset_id = Uuid::new_v4();
    let upload_url = state.manager.put_url(&state.bucket, asset_id).await?;
    Ok(Json(PostAssetResponse {
        upload_url,
        id: asset_id.to_string(),
    }))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StatusBody {
    #[serde(rename = "Status")]
    pub status: String,
}

async fn put_asset(
    State(state): State<Arc<AppState>>,
    Path(asset_id): Path<Uuid>,
    body: Result<Json<StatusBody>, JsonRejection>,
) -> Result<impl IntoResponse, AssetError> {
    let Json(body) = body.map_err(|e| AssetError::BadInput(e.body_text()))?;
    if body.status != "uploaded" {
        return Err(AssetError::BadInput(format!(
            "expected status uploaded, not {}",
            body.status
        )));
    }

    state
        .manager
        .uploaded(&state.bucket, asset_id, &state.shutdown)
        .await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(StatusBody {
            status: "Accepted".to_string(),
        }),
    ))
}

#[derive(Debug, Deserialize)]
pub struct GetAssetParams {
    pub timeout: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GetAssetResponse {
    #[serde(rename = "Download_url")]
    pub download_url: String,
}

async fn get_asset(
    State(state): State<Arc<AppState>>,
    Path(asset_id): Path<Uuid>,
    Query(params): Query<GetAssetParams>,
) -> Result<Json<GetAssetResponse>, AssetError> {
    let timeout = Duration::from_secs(params.timeout.unwrap_or(DEFAULT_DOWNLOAD_TIMEOUT_SECS));
    let download_url = state
        .manager
        .get_url(&state.bucket, asset_id, timeout)
        .await?;
    Ok(Json(GetAssetResponse { download_url }))
}

#[derive(Debug, Deserialize)]
pub struct JobsParams {
    pub status: Option<String>,
}

/// Jobs due now, optionally filtered by status.
async fn list_jobs(
    State(state): State<Arc<AppState>>,
    Query(params): Query<JobsParams>,
) -> Result<Json<Vec<Job>>, AssetError> {
    let status = params
        .status
        .map(|s| s.parse::<JobStatus>())
        .transpose()
        .map_err(AssetError::BadInput)?;

    let jobs = state
        .store
        .query(
            Utc::now(),
            move |job| status.is_none_or(|s| job.status() == s),
            &state.shutdown,
        )
        .await?;
    Ok(Json(jobs))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    #[serde(rename = "Status")]
    pub status: String,
}

async fn healthcheck(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let (code, status) = if state.storage.bucket_exists(&state.bucket).await {
        (StatusCode::OK, "UP")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "DOWN")
    };
    (
        code,
        Json(HealthResponse {
            status: status.to_string(),
        }),
    )
}
