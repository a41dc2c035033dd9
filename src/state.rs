use std::sync::Arc;

use tokio::sync::watch;

use crate::cluster::{ClusterRegistry, HttpOrchestrator, HttpScheduler, Orchestrator, Scheduler};
use crate::config::{Config, ReadinessConfig, StoreBackend};
use crate::jobs::{JobDispatcher, ReadinessWatcher};
use crate::middleware::auth::{AuthConfig, Authenticator};
use crate::store::{ConsulStore, KvStore, MemoryStore};

/// Shared by every handler. Holds no mutable state of its own: jobs and
/// clusters live in the coordination store.
pub struct AppState {
    pub store: Arc<dyn KvStore>,
    pub auth: Authenticator,
    pub jobs: JobDispatcher,
    pub registry: ClusterRegistry,
    pub scheduler: Arc<dyn Scheduler>,
    pub watcher: ReadinessWatcher,
    /// Public base of the versioned API, used to build `Location` headers.
    pub api_base: String,
}

impl AppState {
    pub fn new(
        store: Arc<dyn KvStore>,
        auth: AuthConfig,
        scheduler: Arc<dyn Scheduler>,
        orchestrator: Arc<dyn Orchestrator>,
        readiness: ReadinessConfig,
        api_base: &str,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let api_base = api_base.trim_end_matches('/').to_string();
        let registry = ClusterRegistry::new(store.clone());
        Self {
            auth: Authenticator::new(auth),
            jobs: JobDispatcher::new(store.clone(), format!("{}/queue", api_base)),
            watcher: ReadinessWatcher::new(registry.clone(), orchestrator, readiness, shutdown),
            registry,
            scheduler,
            store,
            api_base,
        }
    }

    pub fn from_config(cfg: &Config, shutdown: watch::Receiver<bool>) -> anyhow::Result<Self> {
        let store = build_store(cfg)?;
        let scheduler: Arc<dyn Scheduler> = Arc::new(HttpScheduler::new(&cfg.scheduler_endpoint)?);
        let orchestrator: Arc<dyn Orchestrator> =
            Arc::new(HttpOrchestrator::new(&cfg.orchestrator_endpoint)?);

        Ok(Self::new(
            store,
            AuthConfig::from_config(cfg)?,
            scheduler,
            orchestrator,
            cfg.readiness.clone(),
            &cfg.api_base(),
            shutdown,
        ))
    }
}

pub fn build_store(cfg: &Config) -> anyhow::Result<Arc<dyn KvStore>> {
    Ok(match cfg.store {
        StoreBackend::Consul => Arc::new(ConsulStore::new(&cfg.consul_endpoint)?),
        StoreBackend::Memory => {
            tracing::warn!("using in-process store: job state will not survive a restart");
            Arc::new(MemoryStore::new())
        }
    })
}
