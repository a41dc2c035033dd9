use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde_json::json;

use crate::cluster::ClusterRef;
use crate::errors::AppError;
use crate::jobs::{JobRecord, JobStatus, JobView};
use crate::state::AppState;

// ── Clusters ─────────────────────────────────────────────────

fn cluster_ref(
    username: &str,
    product: &str,
    version: &str,
    id: &str,
) -> Result<ClusterRef, AppError> {
    // a non-numeric id can never have been allocated
    let id = id.parse::<u64>().map_err(|_| {
        AppError::KeyNotFound(format!(
            "Key instances/{}/{}/{}/{} does not exist",
            username, product, version, id
        ))
    })?;
    ClusterRef::new(username, product, version, id)
}

/// GET /clusters/:username/:product/:version/:id
pub async fn get_cluster(
    State(state): State<Arc<AppState>>,
    Path((username, product, version, id)): Path<(String, String, String, String)>,
) -> Result<impl IntoResponse, AppError> {
    let cluster = cluster_ref(&username, &product, &version, &id)?;
    let data = state.registry.describe(&cluster).await?;
    Ok(Json(json!({
        "result": "success",
        "uri": cluster.dn(),
        "data": data,
    })))
}

/// DELETE /clusters/:username/:product/:version/:id
///
/// Removes the cluster from the scheduler. Its registry record is kept.
pub async fn destroy_cluster(
    State(state): State<Arc<AppState>>,
    Path((username, product, version, id)): Path<(String, String, String, String)>,
) -> Result<impl IntoResponse, AppError> {
    let cluster = cluster_ref(&username, &product, &version, &id)?;
    state.registry.describe(&cluster).await?;
    state.scheduler.remove(&cluster.full_name()).await?;

    tracing::info!(dn = %cluster.dn(), "cluster destroyed");
    Ok(Json(json!({ "message": "success" })))
}

// ── Async jobs ───────────────────────────────────────────────

/// GET /queue/:id
pub async fn get_job_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<JobView, AppError> {
    let record = JobRecord::load(state.store.as_ref(), &id).await?;
    Ok(JobView::from(record))
}

/// DELETE /queue/:id
pub async fn delete_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    match JobRecord::delete(state.store.as_ref(), &id).await? {
        JobStatus::Pending => Err(AppError::JobPending(id)),
        _ => {
            tracing::info!(job_id = %id, "job record deleted");
            Ok(StatusCode::NO_CONTENT)
        }
    }
}

pub async fn healthz() -> &'static str {
    "ok"
}
