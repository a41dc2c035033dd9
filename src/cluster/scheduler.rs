//! Client for the resource-manager framework that runs cluster nodes.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::json;

use super::Scheduler;
use crate::errors::AppError;

#[derive(Clone)]
pub struct HttpScheduler {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpScheduler {
    pub fn new(endpoint: &str) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .use_rustls_tls()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(5))
            .user_agent(concat!("provisioner/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("failed to build scheduler HTTP client")?;
        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl Scheduler for HttpScheduler {
    async fn submit(&self, dn: &str) -> Result<(), AppError> {
        let resp = self
            .client
            .post(&self.endpoint)
            .json(&json!({ "clusterdn": dn }))
            .send()
            .await
            .map_err(|e| {
                tracing::warn!(dn, error = %e, "scheduler unreachable");
                AppError::Upstream(format!("scheduler request failed: {}", e))
            })?;

        if resp.status() != StatusCode::OK {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            tracing::error!(dn, %status, body = %body, "scheduler rejected cluster");
            return Err(AppError::Upstream(format!(
                "scheduler returned {} for {}",
                status.as_u16(),
                dn
            )));
        }

        tracing::info!(dn, "cluster submitted to scheduler");
        Ok(())
    }

    async fn remove(&self, full_name: &str) -> Result<(), AppError> {
        let url = format!("{}/{}", self.endpoint, urlencoding::encode(full_name));
        let resp = self.client.delete(&url).send().await.map_err(|e| {
            tracing::warn!(full_name, error = %e, "scheduler unreachable");
            AppError::Upstream(format!("scheduler request failed: {}", e))
        })?;

        if resp.status() != StatusCode::NO_CONTENT {
            let status = resp.status();
            tracing::error!(full_name, %status, "scheduler refused teardown");
            return Err(AppError::Upstream(format!(
                "scheduler returned {} removing {}",
                status.as_u16(),
                full_name
            )));
        }

        tracing::info!(full_name, "cluster removed from scheduler");
        Ok(())
    }
}
