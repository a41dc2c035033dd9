//! Job records in the coordination store and their wire rendering.
//!
//! Key layout:
//!
//! ```text
//! queue/{job_id}/status       pending | registered | error
//! queue/{job_id}/status_code  HTTP status of the finished work
//! queue/{job_id}/url          Location of the created resource, if any
//! ```

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::store::{KvStore, StoreError};

pub const QUEUE_PREFIX: &str = "queue";

pub fn job_prefix(id: &str) -> String {
    format!("{}/{}/", QUEUE_PREFIX, id)
}

pub fn status_key(id: &str) -> String {
    format!("{}/{}/status", QUEUE_PREFIX, id)
}

pub fn status_code_key(id: &str) -> String {
    format!("{}/{}/status_code", QUEUE_PREFIX, id)
}

pub fn url_key(id: &str) -> String {
    format!("{}/{}/url", QUEUE_PREFIX, id)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Registered,
    Error,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Registered => "registered",
            JobStatus::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(JobStatus::Pending),
            "registered" => Some(JobStatus::Registered),
            "error" => Some(JobStatus::Error),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobStatus::Pending)
    }

    /// Terminal status for finished work: only `201 Created` counts as success.
    pub fn from_result_code(code: u16) -> Self {
        if code == StatusCode::CREATED.as_u16() {
            JobStatus::Registered
        } else {
            JobStatus::Error
        }
    }
}

/// Job ids are generated as hex; anything else cannot name a job and must
/// not be spliced into a store key.
pub fn is_valid_job_id(id: &str) -> bool {
    !id.is_empty() && id.len() <= 64 && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobRecord {
    pub id: String,
    pub status: JobStatus,
    pub status_code: Option<u16>,
    pub location: Option<String>,
}

impl JobRecord {
    pub async fn load(store: &dyn KvStore, id: &str) -> Result<Self, StoreError> {
        if !is_valid_job_id(id) {
            return Err(StoreError::KeyNotFound(status_key(id)));
        }

        let raw = store.get(&status_key(id)).await?;
        let status = JobStatus::parse(&raw)
            .ok_or_else(|| StoreError::Decode(format!("unknown job status '{}'", raw)))?;

        if !status.is_terminal() {
            return Ok(Self {
                id: id.to_string(),
                status,
                status_code: None,
                location: None,
            });
        }

        let status_code = store
            .get_opt(&status_code_key(id))
            .await?
            .and_then(|c| c.trim().parse().ok());
        let location = store.get_opt(&url_key(id)).await?.filter(|u| !u.is_empty());

        Ok(Self {
            id: id.to_string(),
            status,
            status_code,
            location,
        })
    }

    /// Remove a resolved job. Pending jobs still belong to their background task.
    pub async fn delete(store: &dyn KvStore, id: &str) -> Result<JobStatus, StoreError> {
        let record = Self::load(store, id).await?;
        if record.status.is_terminal() {
            store.delete(&job_prefix(id), true).await?;
        }
        Ok(record.status)
    }
}

/// What `GET /queue/{id}` answers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobView {
    Pending,
    Resolved {
        status: JobStatus,
        url: Option<String>,
    },
}

impl From<JobRecord> for JobView {
    fn from(record: JobRecord) -> Self {
        if record.status.is_terminal() {
            JobView::Resolved {
                status: record.status,
                url: record.location,
            }
        } else {
            JobView::Pending
        }
    }
}

impl IntoResponse for JobView {
    fn into_response(self) -> Response {
        match self {
            JobView::Pending => (StatusCode::OK, Json(json!({ "status": "pending" }))).into_response(),
            JobView::Resolved { status, url } => {
                let body = Json(json!({ "status": status.as_str(), "url": url.clone() }));
                let mut resp = (StatusCode::SEE_OTHER, body).into_response();
                // A failed job may have produced nothing to point at.
                if let Some(value) = url.and_then(|u| header::HeaderValue::from_str(&u).ok()) {
                    resp.headers_mut().insert(header::LOCATION, value);
                }
                resp
            }
        }
    }
}
