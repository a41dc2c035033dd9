//! Consul KV HTTP client.
//!
//! Reads return a JSON array of entries whose `Value` is base64; the
//! `X-Consul-Index` response header carries the index used for blocking
//! queries. Writes answer a bare `true`.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use reqwest::StatusCode;
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};
use serde::Deserialize;

use super::{normalize_key, KvStore, StoreError, Versioned};

const INDEX_HEADER: &str = "x-consul-index";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct KvEntry {
    key: String,
    value: Option<String>,
    #[serde(default)]
    modify_index: u64,
}

pub struct ConsulStore {
    endpoint: String,
    client: ClientWithMiddleware,
}

impl ConsulStore {
    /// `endpoint` is the KV API root, e.g. `http://consul:8500/v1/kv`.
    pub fn new(endpoint: &str) -> anyhow::Result<Self> {
        // No overall timeout: blocking queries legitimately hold the
        // connection for the whole wait period.
        let reqwest_client = reqwest::Client::builder()
            .use_rustls_tls()
            .pool_max_idle_per_host(16)
            .connect_timeout(Duration::from_secs(5))
            .build()?;

        let retry_policy = ExponentialBackoff::builder().build_with_max_retries(3);

        let client = ClientBuilder::new(reqwest_client)
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build();

        Ok(Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            client,
        })
    }

    fn url(&self, key: &str) -> String {
        let path = normalize_key(key)
            .split('/')
            .map(|segment| urlencoding::encode(segment).into_owned())
            .collect::<Vec<_>>()
            .join("/");
        format!("{}/{}", self.endpoint, path)
    }

    async fn read(
        &self,
        key: &str,
        query: &[(&str, String)],
    ) -> Result<(Vec<KvEntry>, u64), StoreError> {
        let resp = self
            .client
            .get(self.url(key))
            .query(query)
            .send()
            .await
            .map_err(|e| StoreError::Http(e.to_string()))?;

        if resp.status() == StatusCode::NOT_FOUND {
            return Err(StoreError::KeyNotFound(normalize_key(key).to_string()));
        }
        if !resp.status().is_success() {
            return Err(StoreError::Status {
                operation: "GET",
                status: resp.status().as_u16(),
            });
        }

        let index = resp
            .headers()
            .get(INDEX_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);

        let entries: Vec<KvEntry> = resp
            .json()
            .await
            .map_err(|e| StoreError::Decode(e.to_string()))?;
        Ok((entries, index))
    }

    fn first_value(key: &str, entries: Vec<KvEntry>, index: u64) -> Result<Versioned, StoreError> {
        let entry = entries
            .into_iter()
            .next()
            .ok_or_else(|| StoreError::KeyNotFound(normalize_key(key).to_string()))?;
        let value = decode_value(entry.value.as_deref())?;
        let index = if entry.modify_index > 0 {
            entry.modify_index
        } else {
            index
        };
        Ok(Versioned { value, index })
    }
}

fn decode_value(raw: Option<&str>) -> Result<String, StoreError> {
    let Some(raw) = raw else {
        return Ok(String::new());
    };
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(raw)
        .map_err(|e| StoreError::Decode(format!("invalid base64 value: {}", e)))?;
    String::from_utf8(bytes).map_err(|e| StoreError::Decode(e.to_string()))
}

/// Consul wait durations are expressed as e.g. `300s`.
fn wait_param(timeout: Duration) -> String {
    format!("{}s", timeout.as_secs().max(1))
}

#[async_trait]
impl KvStore for ConsulStore {
    async fn get_versioned(&self, key: &str) -> Result<Versioned, StoreError> {
        let (entries, index) = self.read(key, &[]).await?;
        Self::first_value(key, entries, index)
    }

    async fn wait(
        &self,
        key: &str,
        index: u64,
        timeout: Duration,
    ) -> Result<Versioned, StoreError> {
        let query = [("index", index.to_string()), ("wait", wait_param(timeout))];
        let (entries, header_index) = self.read(key, &query).await?;
        Self::first_value(key, entries, header_index)
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let resp = self
            .client
            .put(self.url(key))
            .body(value.to_string())
            .send()
            .await
            .map_err(|e| StoreError::Http(e.to_string()))?;

        if resp.status() != StatusCode::OK {
            return Err(StoreError::Status {
                operation: "PUT",
                status: resp.status().as_u16(),
            });
        }
        let accepted: bool = resp
            .json()
            .await
            .map_err(|e| StoreError::Decode(e.to_string()))?;
        if !accepted {
            return Err(StoreError::Http(format!(
                "PUT {} was not applied",
                normalize_key(key)
            )));
        }
        Ok(())
    }

    async fn delete(&self, key: &str, recursive: bool) -> Result<(), StoreError> {
        let mut req = self.client.delete(self.url(key));
        if recursive {
            req = req.query(&[("recurse", "true")]);
        }
        let resp = req
            .send()
            .await
            .map_err(|e| StoreError::Http(e.to_string()))?;

        if resp.status() != StatusCode::OK {
            return Err(StoreError::Status {
                operation: "DELETE",
                status: resp.status().as_u16(),
            });
        }
        Ok(())
    }

    async fn recurse(&self, prefix: &str) -> Result<BTreeMap<String, String>, StoreError> {
        let (entries, _) = self.read(prefix, &[("recurse", "true".into())]).await?;
        let mut tree = BTreeMap::new();
        for entry in entries {
            let value = decode_value(entry.value.as_deref())?;
            tree.insert(entry.key, value);
        }
        if tree.is_empty() {
            return Err(StoreError::KeyNotFound(normalize_key(prefix).to_string()));
        }
        Ok(tree)
    }
}
