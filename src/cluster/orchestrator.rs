//! Client for the orchestration service that configures running clusters.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use serde_json::json;

use super::Orchestrator;

#[derive(Clone)]
pub struct HttpOrchestrator {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpOrchestrator {
    pub fn new(endpoint: &str) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .use_rustls_tls()
            .timeout(Duration::from_secs(60))
            .connect_timeout(Duration::from_secs(5))
            .user_agent(concat!("provisioner/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("failed to build orchestrator HTTP client")?;
        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl Orchestrator for HttpOrchestrator {
    /// One attempt only. The caller decides what a failure means.
    async fn launch(&self, dn: &str) -> anyhow::Result<()> {
        let resp = self
            .client
            .post(&self.endpoint)
            .json(&json!({ "clusterdn": dn }))
            .send()
            .await
            .with_context(|| format!("orchestrator request for {} failed", dn))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("orchestrator returned {} for {}: {}", status.as_u16(), dn, body);
        }
        Ok(())
    }
}
