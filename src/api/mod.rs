use std::sync::Arc;

use axum::{
    extract::DefaultBodyLimit,
    http::{header, HeaderName, Method, StatusCode},
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::middleware::auth::{require_user, AUTH_HEADER};
use crate::middleware::headers::{request_id, security_headers, REQUEST_ID};
use crate::state::AppState;

pub mod handlers;
pub mod provision;

/// Mount point of the versioned API.
pub const API_PREFIX: &str = "/bigdata/api/v1";

/// Launch options are small JSON documents.
const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Build the protected API router.
/// All routes are relative; `app` mounts this under `API_PREFIX`.
pub fn api_router(state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route("/products/:product/:version", post(provision::launch_cluster))
        .route(
            "/clusters/:username/:product/:version/:id",
            get(handlers::get_cluster).delete(handlers::destroy_cluster),
        )
        .route(
            "/queue/:id",
            get(handlers::get_job_status).delete(handlers::delete_job),
        )
        .layer(middleware::from_fn_with_state(state, require_user))
        .fallback(fallback_404)
}

/// The complete service: health check, protected API and the response
/// headers every reply carries.
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(handlers::healthz))
        .nest(API_PREFIX, api_router(state.clone()))
        .with_state(state)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(request_id))
        .layer(middleware::from_fn(security_headers))
}

/// CORS for browser clients. `origin` is the configured dashboard; local
/// development origins are always allowed.
pub fn cors_layer(origin: Option<String>) -> CorsLayer {
    CorsLayer::new()
        .allow_origin(AllowOrigin::predicate(move |candidate, _| {
            let candidate = candidate.to_str().unwrap_or("");
            origin.as_deref() == Some(candidate)
                || candidate.starts_with("http://localhost:")
                || candidate.starts_with("http://127.0.0.1:")
        }))
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            HeaderName::from_static(AUTH_HEADER),
            REQUEST_ID,
        ])
        .expose_headers([header::LOCATION, REQUEST_ID])
}

async fn fallback_404() -> StatusCode {
    StatusCode::NOT_FOUND
}
