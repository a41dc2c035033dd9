//! Cluster provisioning: the one slow operation exposed through the async
//! job protocol.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Extension, Json,
};
use serde_json::{json, Map, Value};

use crate::cluster::validate_segment;
use crate::errors::AppError;
use crate::jobs::Accepted;
use crate::middleware::auth::Identity;
use crate::state::AppState;

/// Status recorded on a cluster as soon as it is handed to the scheduler.
pub const REGISTERED_STATUS: &str = "registered";

/// Everything the background job needs, copied out of the request.
#[derive(Debug, Clone, PartialEq)]
pub struct LaunchRequest {
    pub owner: String,
    pub product: String,
    pub version: String,
    pub options: Value,
}

/// POST /products/:product/:version
///
/// Validates synchronously, then answers 202 and provisions in the background.
pub async fn launch_cluster(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Path((product, version)): Path<(String, String)>,
    body: Bytes,
) -> Result<Accepted, AppError> {
    validate_segment("username", &identity.subject)?;
    validate_segment("product", &product)?;
    validate_segment("version", &version)?;

    let request = LaunchRequest {
        owner: identity.subject.clone(),
        product,
        version,
        options: parse_options(&body)?,
    };
    tracing::info!(
        owner = %request.owner,
        product = %request.product,
        version = %request.version,
        "cluster launch requested"
    );

    let worker = state.clone();
    let accepted = state
        .jobs
        .dispatch(async move { provision(&worker, request).await })
        .await?;
    Ok(accepted)
}

/// Register, schedule and start watching a new cluster. Answers `201` with
/// the cluster's location on success.
pub async fn provision(state: &AppState, request: LaunchRequest) -> Result<Response, AppError> {
    let cluster = state
        .registry
        .instantiate(
            &request.owner,
            &request.product,
            &request.version,
            &request.options,
        )
        .await?;
    let dn = cluster.dn();

    state.registry.set_status(&dn, REGISTERED_STATUS).await?;
    state.scheduler.submit(&dn).await?;
    state.watcher.spawn(dn.clone());

    let location = format!("{}{}", state.api_base, cluster.path());
    Ok((
        StatusCode::CREATED,
        [(header::LOCATION, location)],
        Json(json!({ "result": "success", "uri": dn })),
    )
        .into_response())
}

/// Launch options are a JSON object. An empty body means no options.
pub fn parse_options(body: &[u8]) -> Result<Value, AppError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Object(Map::new()));
    }
    match serde_json::from_slice::<Value>(body) {
        Ok(v @ Value::Object(_)) => Ok(v),
        Ok(_) => Err(AppError::BadRequest(
            "launch options must be a JSON object".into(),
        )),
        Err(e) => Err(AppError::BadRequest(format!("malformed JSON body: {}", e))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_body_is_no_options() {
        assert_eq!(parse_options(b"").unwrap(), json!({}));
        assert_eq!(parse_options(b"  \n").unwrap(), json!({}));
    }

    #[test]
    fn test_options_must_be_object() {
        assert_eq!(
            parse_options(br#"{"slaves.number": 4}"#).unwrap(),
            json!({ "slaves.number": 4 })
        );
        assert!(matches!(parse_options(b"[1,2]"), Err(AppError::BadRequest(_))));
        assert!(matches!(parse_options(b"{oops"), Err(AppError::BadRequest(_))));
    }
}
