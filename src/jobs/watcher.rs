//! Readiness Watcher: waits for a freshly scheduled cluster to come up, then
//! hands it to the orchestration service exactly once.
//!
//! The loop is a small state machine (`Waiting` → `Ready`) bounded by
//! `ReadinessConfig::max_polls`. It ends in one of four outcomes and never
//! retries the follow-on call: a failed hand-off is logged and left to the
//! operator.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::Instrument;

use crate::cluster::{ClusterRegistry, Orchestrator};
use crate::config::ReadinessConfig;
use crate::errors::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchPhase {
    Waiting { attempt: u32 },
    Ready,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchOutcome {
    /// The cluster became ready and the follow-on call succeeded.
    Orchestrated,
    /// `max_polls` reads never saw the target status.
    TimedOut { attempts: u32 },
    /// The follow-on call failed. Not retried.
    Failed { reason: String },
    /// Shutdown was signalled while waiting.
    Cancelled,
}

impl WatchOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            WatchOutcome::Orchestrated => "orchestrated",
            WatchOutcome::TimedOut { .. } => "timed_out",
            WatchOutcome::Failed { .. } => "failed",
            WatchOutcome::Cancelled => "cancelled",
        }
    }
}

#[derive(Clone)]
pub struct ReadinessWatcher {
    registry: ClusterRegistry,
    orchestrator: Arc<dyn Orchestrator>,
    config: ReadinessConfig,
    shutdown: watch::Receiver<bool>,
}

impl ReadinessWatcher {
    pub fn new(
        registry: ClusterRegistry,
        orchestrator: Arc<dyn Orchestrator>,
        config: ReadinessConfig,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            registry,
            orchestrator,
            config,
            shutdown,
        }
    }

    /// Start watching `dn` on a detached task.
    pub fn spawn(&self, dn: String) -> JoinHandle<WatchOutcome> {
        let watcher = self.clone();
        let span = tracing::info_span!("readiness", dn = %dn);
        tokio::spawn(async move { watcher.run(dn).await }.instrument(span))
    }

    pub async fn run(mut self, dn: String) -> WatchOutcome {
        let mut phase = WatchPhase::Waiting { attempt: 1 };
        tracing::info!(target_status = %self.config.target_status, "watching cluster readiness");

        let outcome = loop {
            phase = match phase {
                WatchPhase::Waiting { attempt } => {
                    if self.is_ready(&dn).await {
                        tracing::info!(attempt, "cluster is ready");
                        WatchPhase::Ready
                    } else if self.config.max_polls.is_some_and(|max| attempt >= max) {
                        break WatchOutcome::TimedOut { attempts: attempt };
                    } else if !self.pause(self.config.poll_interval).await {
                        break WatchOutcome::Cancelled;
                    } else {
                        WatchPhase::Waiting {
                            attempt: attempt + 1,
                        }
                    }
                }
                WatchPhase::Ready => {
                    // let the cluster's own services finish booting
                    if !self.pause(self.config.grace_period).await {
                        break WatchOutcome::Cancelled;
                    }
                    break match self.orchestrator.launch(&dn).await {
                        Ok(()) => WatchOutcome::Orchestrated,
                        Err(e) => WatchOutcome::Failed {
                            reason: format!("{:#}", e),
                        },
                    };
                }
            };
        };

        match &outcome {
            WatchOutcome::Orchestrated => tracing::info!("cluster handed to orchestrator"),
            WatchOutcome::TimedOut { attempts } => {
                tracing::warn!(attempts, "cluster never became ready, giving up")
            }
            WatchOutcome::Failed { reason } => {
                tracing::error!(reason = %reason, "orchestrator call failed, not retrying")
            }
            WatchOutcome::Cancelled => tracing::info!("readiness watch cancelled"),
        }
        outcome
    }

    async fn is_ready(&self, dn: &str) -> bool {
        match self.registry.status(dn).await {
            Ok(status) => status == self.config.target_status,
            Err(AppError::KeyNotFound(_)) => {
                tracing::debug!("cluster has no status yet");
                false
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to read cluster status");
                false
            }
        }
    }

    /// Sleep for `period` unless shutdown is signalled first.
    /// Returns `false` when the watch should stop.
    async fn pause(&mut self, period: Duration) -> bool {
        if *self.shutdown.borrow() {
            return false;
        }
        if period.is_zero() {
            return true;
        }

        let sleep = tokio::time::sleep(period);
        tokio::pin!(sleep);
        tokio::select! {
            _ = &mut sleep => true,
            changed = self.shutdown.changed() => match changed {
                Ok(()) if *self.shutdown.borrow() => false,
                // sender gone or flag cleared: nothing left to cancel us
                _ => {
                    sleep.await;
                    true
                }
            },
        }
    }
}
