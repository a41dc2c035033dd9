use std::time::Duration;

use serde::Deserialize;

/// Development default for `PAAS_SECRET_KEY`. A well-formed key so local
/// runs work without setup; refused in production.
pub const PLACEHOLDER_SECRET_KEY: &str =
    "0000000000000000000000000000000000000000000000000000000000000000";

/// Which coordination store backs jobs and cluster records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Consul,
    /// Single-process substitute. Job state does not survive a restart.
    Memory,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub production: bool,
    pub secret_key: String,
    /// Skip credential validation and run every request as the fixed test identity.
    pub ignore_auth: bool,
    pub store: StoreBackend,
    pub consul_endpoint: String,
    pub scheduler_endpoint: String,
    pub orchestrator_endpoint: String,
    /// Absolute base used in `Location` headers. Relative paths are emitted when unset.
    pub public_url: Option<String>,
    /// Browser origin allowed by CORS besides localhost.
    pub dashboard_origin: Option<String>,
    pub readiness: ReadinessConfig,
}

/// Readiness Watcher tuning.
#[derive(Debug, Clone)]
pub struct ReadinessConfig {
    /// Cluster `status` value that counts as ready.
    pub target_status: String,
    pub poll_interval: Duration,
    /// `None` polls forever.
    pub max_polls: Option<u32>,
    /// Pause between readiness and the follow-on orchestration call.
    pub grace_period: Duration,
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            target_status: "executing".into(),
            poll_interval: Duration::from_secs(5),
            max_polls: Some(360),
            grace_period: Duration::from_secs(10),
        }
    }
}

impl ReadinessConfig {
    /// A zero interval would turn the watcher into a busy loop.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.poll_interval.is_zero() {
            anyhow::bail!("PAAS_READY_POLL_SECS must be at least 1");
        }
        Ok(())
    }
}

impl Config {
    /// Base URL of the versioned API, e.g. `https://paas.example.org/bigdata/api/v1`.
    pub fn api_base(&self) -> String {
        let origin = self
            .public_url
            .as_deref()
            .unwrap_or("")
            .trim_end_matches('/');
        format!("{}{}", origin, crate::api::API_PREFIX)
    }
}

pub fn load() -> anyhow::Result<Config> {
    dotenvy::dotenv().ok();

    let env_mode = std::env::var("PAAS_ENV")
        .or_else(|_| std::env::var("RUST_ENV"))
        .unwrap_or_default();
    let production = env_mode == "production";

    let secret_key =
        std::env::var("PAAS_SECRET_KEY").unwrap_or_else(|_| PLACEHOLDER_SECRET_KEY.into());
    let ignore_auth = env_flag("PAAS_IGNORE_AUTH");

    check_security(production, &secret_key, ignore_auth)?;
    if !production {
        if secret_key == PLACEHOLDER_SECRET_KEY {
            eprintln!("⚠️  PAAS_SECRET_KEY is unset: using the all-zero development key.");
        }
        if ignore_auth {
            eprintln!("⚠️  PAAS_IGNORE_AUTH is set: every request runs as the fixed test identity.");
        }
    }

    let store = match std::env::var("PAAS_STORE")
        .unwrap_or_else(|_| "consul".into())
        .to_lowercase()
        .as_str()
    {
        "consul" => StoreBackend::Consul,
        "memory" => StoreBackend::Memory,
        other => anyhow::bail!("invalid PAAS_STORE: {}. Must be 'consul' or 'memory'", other),
    };

    let defaults = ReadinessConfig::default();
    let max_polls = env_parse("PAAS_READY_MAX_POLLS", 360u32);

    let readiness = ReadinessConfig {
        target_status: std::env::var("PAAS_READY_STATUS").unwrap_or(defaults.target_status),
        poll_interval: Duration::from_secs(env_parse("PAAS_READY_POLL_SECS", 5)),
        // 0 keeps the legacy poll-forever behaviour
        max_polls: (max_polls > 0).then_some(max_polls),
        grace_period: Duration::from_secs(env_parse("PAAS_READY_GRACE_SECS", 10)),
    };
    readiness.validate()?;

    Ok(Config {
        port: env_parse("PAAS_PORT", 6000),
        production,
        secret_key,
        ignore_auth,
        store,
        consul_endpoint: std::env::var("CONSUL_ENDPOINT")
            .unwrap_or_else(|_| "http://consul:8500/v1/kv".into()),
        scheduler_endpoint: std::env::var("MESOS_FRAMEWORK_ENDPOINT").unwrap_or_else(|_| {
            "http://framework:5000/bigdata/mesos_framework/v1/clusters".into()
        }),
        orchestrator_endpoint: std::env::var("ORCHESTRATOR_ENDPOINT")
            .unwrap_or_else(|_| "http://orchestrator:5005/orchestrator/v1/clusters".into()),
        public_url: std::env::var("PAAS_PUBLIC_URL")
            .ok()
            .filter(|s| !s.trim().is_empty()),
        dashboard_origin: std::env::var("PAAS_DASHBOARD_ORIGIN")
            .ok()
            .filter(|s| !s.trim().is_empty()),
        readiness,
    })
}

/// Production refuses the development key and the auth bypass.
pub fn check_security(production: bool, secret_key: &str, ignore_auth: bool) -> anyhow::Result<()> {
    if !production {
        return Ok(());
    }
    if secret_key == PLACEHOLDER_SECRET_KEY {
        anyhow::bail!(
            "PAAS_SECRET_KEY is still the insecure placeholder. \
             Set a proper 64-char hex key before running in production."
        );
    }
    if ignore_auth {
        anyhow::bail!("PAAS_IGNORE_AUTH cannot be enabled in production");
    }
    Ok(())
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .map(|v| matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(false)
}
