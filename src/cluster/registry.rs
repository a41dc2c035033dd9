//! Cluster records in the coordination store.
//!
//! A product template lives under `products/{product}/{version}/` and each
//! instance under its distinguished path `instances/{user}/{product}/{version}/{id}/`.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{Map, Value};

use super::{ClusterRef, INSTANCES_PREFIX, PRODUCTS_PREFIX};
use crate::errors::AppError;
use crate::store::{KvStore, StoreError};

#[derive(Clone)]
pub struct ClusterRegistry {
    store: Arc<dyn KvStore>,
}

impl ClusterRegistry {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    /// Create a new instance of `product`/`version` owned by `user`.
    ///
    /// Ids are allocated as one past the highest existing id for the same
    /// owner and product. Two concurrent launches can race for the same id.
    pub async fn instantiate(
        &self,
        user: &str,
        product: &str,
        version: &str,
        options: &Value,
    ) -> Result<ClusterRef, AppError> {
        let template = format!("{}/{}/{}/", PRODUCTS_PREFIX, product, version);
        self.store.recurse(&template).await.map_err(|e| match e {
            StoreError::KeyNotFound(_) => AppError::KeyNotFound(format!(
                "product {} version {} does not exist",
                product, version
            )),
            other => other.into(),
        })?;

        let id = self.next_id(user, product, version).await?;
        let cluster = ClusterRef::new(user, product, version, id)?;
        let dn = cluster.dn();

        let fields = [
            ("name", cluster.full_name()),
            ("user", cluster.user.clone()),
            ("product", cluster.product.clone()),
            ("version", cluster.version.clone()),
            ("id", id.to_string()),
            ("options", options.to_string()),
            ("dn", dn.clone()),
        ];
        for (field, value) in fields {
            self.store.set(&format!("{}/{}", dn, field), &value).await?;
        }

        tracing::info!(dn = %dn, "cluster instantiated");
        Ok(cluster)
    }

    async fn next_id(&self, user: &str, product: &str, version: &str) -> Result<u64, AppError> {
        let prefix = format!("{}/{}/{}/{}/", INSTANCES_PREFIX, user, product, version);
        let existing = match self.store.recurse(&prefix).await {
            Ok(entries) => entries,
            Err(StoreError::KeyNotFound(_)) => return Ok(1),
            Err(e) => return Err(e.into()),
        };

        let highest = existing
            .keys()
            .filter_map(|k| k.strip_prefix(&prefix))
            .filter_map(|rest| rest.split('/').next())
            .filter_map(|id| id.parse::<u64>().ok())
            .max()
            .unwrap_or(0);
        Ok(highest + 1)
    }

    pub async fn set_status(&self, dn: &str, status: &str) -> Result<(), AppError> {
        self.store.set(&status_key(dn), status).await?;
        Ok(())
    }

    /// Current `status` of the cluster at `dn`; `KeyNotFound` until one is set.
    pub async fn status(&self, dn: &str) -> Result<String, AppError> {
        Ok(self.store.get(&status_key(dn)).await?)
    }

    /// Everything recorded below the cluster's dn, folded into nested JSON.
    pub async fn describe(&self, cluster: &ClusterRef) -> Result<Value, AppError> {
        let dn = cluster.dn();
        let prefix = format!("{}/", dn);
        let entries = self.store.recurse(&prefix).await.map_err(|e| match e {
            StoreError::KeyNotFound(_) => {
                AppError::KeyNotFound(format!("Key {} does not exist", dn))
            }
            other => other.into(),
        })?;
        Ok(treeify(&prefix, &entries))
    }
}

/// Fold flat `a/b/c = v` entries into `{"a": {"b": {"c": v}}}`. Values that
/// hold a JSON object or array are embedded as JSON.
pub fn treeify(prefix: &str, entries: &BTreeMap<String, String>) -> Value {
    let mut root = Map::new();
    for (key, raw) in entries {
        let relative = key.strip_prefix(prefix).unwrap_or(key);
        let parts: Vec<&str> = relative.split('/').filter(|p| !p.is_empty()).collect();
        let Some((leaf, parents)) = parts.split_last() else {
            continue;
        };

        let mut node = &mut root;
        for part in parents {
            let child = node
                .entry(part.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !child.is_object() {
                *child = Value::Object(Map::new());
            }
            node = match child {
                Value::Object(map) => map,
                _ => unreachable!(),
            };
        }
        node.insert(leaf.to_string(), leaf_value(raw));
    }
    Value::Object(root)
}

fn leaf_value(raw: &str) -> Value {
    let trimmed = raw.trim_start();
    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        if let Ok(v) = serde_json::from_str(raw) {
            return v;
        }
    }
    Value::String(raw.to_string())
}

fn status_key(dn: &str) -> String {
    format!("{}/status", dn.trim_end_matches('/'))
}
