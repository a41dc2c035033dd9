//! Async Job Dispatcher.
//!
//! Turns a slow handler into `202 Accepted` + a tracking URL. The handler's
//! future runs on its own task and owns every value it needs; when it
//! finishes, its response is folded into the job record:
//!
//! 1. `queue/{id}/status = pending` is written before the 202 goes out.
//! 2. The task writes `status_code` and `url`, then the terminal `status`.
//!
//! Writing the terminal status last means a poller that sees `registered`
//! or `error` can always read the result keys.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use tracing::Instrument;
use uuid::Uuid;

use super::status::{status_code_key, status_key, url_key, JobStatus};
use crate::store::{KvStore, StoreError};

/// Back-off before each attempt at the terminal status write.
const RESOLVE_BACKOFF_MS: &[u64] = &[0, 200, 1000, 5000];

/// The immediate answer to a dispatched request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Accepted {
    pub job_id: String,
    pub location: String,
}

impl IntoResponse for Accepted {
    fn into_response(self) -> Response {
        (StatusCode::ACCEPTED, [(header::LOCATION, self.location)]).into_response()
    }
}

/// What the finished work produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobOutcome {
    pub status_code: u16,
    pub location: Option<String>,
}

impl JobOutcome {
    fn from_response(resp: &Response) -> Self {
        Self {
            status_code: resp.status().as_u16(),
            location: resp
                .headers()
                .get(header::LOCATION)
                .and_then(|v| v.to_str().ok())
                .map(String::from),
        }
    }

    fn failed() -> Self {
        Self {
            status_code: StatusCode::INTERNAL_SERVER_ERROR.as_u16(),
            location: None,
        }
    }

    pub fn status(&self) -> JobStatus {
        JobStatus::from_result_code(self.status_code)
    }
}

#[derive(Clone)]
pub struct JobDispatcher {
    store: Arc<dyn KvStore>,
    queue_url: String,
}

impl JobDispatcher {
    /// `queue_url` is the public base of the job status endpoint,
    /// e.g. `/bigdata/api/v1/queue`.
    pub fn new(store: Arc<dyn KvStore>, queue_url: impl Into<String>) -> Self {
        Self {
            store,
            queue_url: queue_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Register a pending job and run `work` in the background.
    ///
    /// Only the pending write is awaited. `work` must own its inputs: it
    /// outlives the request that submitted it.
    pub async fn dispatch<F, R>(&self, work: F) -> Result<Accepted, StoreError>
    where
        F: Future<Output = R> + Send + 'static,
        R: IntoResponse + Send + 'static,
    {
        let job_id = Uuid::new_v4().simple().to_string();
        self.store
            .set(&status_key(&job_id), JobStatus::Pending.as_str())
            .await?;

        let store = self.store.clone();
        let id = job_id.clone();
        let span = tracing::info_span!("job", job_id = %job_id);

        tokio::spawn(
            async move {
                // The work runs on its own task so a panic surfaces as a JoinError
                // instead of taking the resolver down with it.
                let handler = tokio::spawn(
                    async move { work.await.into_response() }.instrument(tracing::Span::current()),
                );
                let outcome = match handler.await {
                    Ok(resp) => JobOutcome::from_response(&resp),
                    Err(e) => {
                        if e.is_panic() {
                            tracing::error!("job handler panicked: {}", e);
                        } else {
                            tracing::error!("job handler cancelled: {}", e);
                        }
                        JobOutcome::failed()
                    }
                };
                resolve(store.as_ref(), &id, &outcome).await;
            }
            .instrument(span),
        );

        tracing::info!(job_id = %job_id, "job accepted");
        Ok(Accepted {
            location: format!("{}/{}", self.queue_url, job_id),
            job_id,
        })
    }
}

/// Record the outcome of a job. Called exactly once per job, by the task
/// that owns it.
pub async fn resolve(store: &dyn KvStore, id: &str, outcome: &JobOutcome) {
    let status = outcome.status();

    if let Err(e) = store
        .set(&status_code_key(id), &outcome.status_code.to_string())
        .await
    {
        tracing::warn!(error = %e, "failed to record job status code");
    }
    if let Some(location) = &outcome.location {
        if let Err(e) = store.set(&url_key(id), location).await {
            tracing::warn!(error = %e, "failed to record job location");
        }
    }

    for (attempt, &delay) in RESOLVE_BACKOFF_MS.iter().enumerate() {
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        match store.set(&status_key(id), status.as_str()).await {
            Ok(()) => {
                tracing::info!(
                    status = status.as_str(),
                    status_code = outcome.status_code,
                    location = ?outcome.location,
                    "job resolved"
                );
                return;
            }
            Err(e) => {
                tracing::warn!(attempt, error = %e, "failed to record terminal job status, will retry");
            }
        }
    }

    tracing::error!(
        status = status.as_str(),
        "could not record terminal job status after all retries"
    );
}
