//! Clusters and the external services that run them.
//!
//! The registry lives in the coordination store; the scheduler places a
//! cluster on the resource manager and the orchestrator configures it once
//! it is running.

pub mod orchestrator;
pub mod registry;
pub mod scheduler;

use async_trait::async_trait;

use crate::errors::AppError;

pub use orchestrator::HttpOrchestrator;
pub use registry::ClusterRegistry;
pub use scheduler::HttpScheduler;

pub const INSTANCES_PREFIX: &str = "instances";
pub const PRODUCTS_PREFIX: &str = "products";

/// Address of one cluster instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterRef {
    pub user: String,
    pub product: String,
    pub version: String,
    pub id: u64,
}

impl ClusterRef {
    /// Build a reference from path segments, rejecting anything that could
    /// escape its own key prefix.
    pub fn new(user: &str, product: &str, version: &str, id: u64) -> Result<Self, AppError> {
        Ok(Self {
            user: validate_segment("username", user)?.to_string(),
            product: validate_segment("product", product)?.to_string(),
            version: validate_segment("version", version)?.to_string(),
            id,
        })
    }

    /// Distinguished path: the cluster's key prefix in the store, also the
    /// payload handed to the scheduler and orchestrator.
    pub fn dn(&self) -> String {
        format!(
            "{}/{}/{}/{}/{}",
            INSTANCES_PREFIX, self.user, self.product, self.version, self.id
        )
    }

    /// Flat name the scheduler knows the cluster by.
    pub fn full_name(&self) -> String {
        format!("{}-{}-{}-{}", self.user, self.product, self.version, self.id)
    }

    /// Path of the cluster resource below the API base.
    pub fn path(&self) -> String {
        format!(
            "/clusters/{}/{}/{}/{}",
            self.user, self.product, self.version, self.id
        )
    }
}

pub fn validate_segment<'a>(name: &str, value: &'a str) -> Result<&'a str, AppError> {
    if value.is_empty() || value.contains('/') || value == "." || value == ".." {
        return Err(AppError::BadRequest(format!("invalid {}: '{}'", name, value)));
    }
    Ok(value)
}

/// Resource manager that runs cluster nodes.
#[async_trait]
pub trait Scheduler: Send + Sync {
    /// Ask the scheduler to start the cluster at `dn`.
    async fn submit(&self, dn: &str) -> Result<(), AppError>;

    /// Tear down the cluster the scheduler knows as `full_name`.
    async fn remove(&self, full_name: &str) -> Result<(), AppError>;
}

/// Service that configures a cluster once its nodes are running.
#[async_trait]
pub trait Orchestrator: Send + Sync {
    async fn launch(&self, dn: &str) -> anyhow::Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names() {
        let c = ClusterRef::new("alice", "spark", "2.1", 3).unwrap();
        assert_eq!(c.dn(), "instances/alice/spark/2.1/3");
        assert_eq!(c.full_name(), "alice-spark-2.1-3");
        assert_eq!(c.path(), "/clusters/alice/spark/2.1/3");
    }

    #[test]
    fn test_rejects_path_escapes() {
        assert!(ClusterRef::new("..", "spark", "2.1", 1).is_err());
        assert!(ClusterRef::new("alice", "a/b", "2.1", 1).is_err());
        assert!(ClusterRef::new("alice", "spark", "", 1).is_err());
    }
}
