use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use provisioner::jobs::status::status_key;
use provisioner::jobs::{JobRecord, JobStatus, JobView};
use provisioner::middleware::auth::{AuthConfig, Authenticator, Role};
use provisioner::middleware::cipher::SharedKey;
use provisioner::middleware::credential::Credential;
use provisioner::store::{KvStore, StoreError};
use provisioner::{api, cli, config, state, AppState};

/// Longest single blocking read while waiting on a job.
const MAX_WAIT_SLICE: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    use opentelemetry::KeyValue;
    use opentelemetry_sdk::{trace as sdktrace, Resource};

    let telemetry_layer = if std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").is_ok() {
        let tracer = opentelemetry_otlp::new_pipeline()
            .tracing()
            .with_exporter(opentelemetry_otlp::new_exporter().tonic())
            .with_trace_config(sdktrace::config().with_resource(Resource::new(vec![
                KeyValue::new("service.name", "provisioner"),
            ])))
            .install_batch(opentelemetry_sdk::runtime::Tokio)
            .context("failed to install OpenTelemetry tracer")?;
        Some(tracing_opentelemetry::layer().with_tracer(tracer))
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "provisioner=debug,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .with(telemetry_layer)
        .init();

    let args = cli::Cli::parse();
    let cfg = config::load()?;

    let result = match args.command {
        Some(cli::Commands::Serve { port }) => run_server(cfg, port).await,
        Some(cli::Commands::Token { command }) => handle_token_command(&cfg, command),
        Some(cli::Commands::Job { command }) => handle_job_command(&cfg, command).await,
        None => run_server(cfg, None).await,
    };

    if let Err(ref e) = result {
        eprintln!("Error: {:?}", e);
    }
    opentelemetry::global::shutdown_tracer_provider();
    result
}

async fn run_server(cfg: config::Config, port: Option<u16>) -> anyhow::Result<()> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let state = Arc::new(AppState::from_config(&cfg, shutdown_rx)?);
    if state.auth.is_bypassed() {
        tracing::warn!("authentication is bypassed: every request runs as the test identity");
    }

    let app = api::app(state).layer(api::cors_layer(cfg.dashboard_origin.clone()));

    let addr = SocketAddr::from(([0, 0, 0, 0], port.unwrap_or(cfg.port)));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    tracing::info!(
        store = ?cfg.store,
        api = %cfg.api_base(),
        "provisioner listening on {}",
        addr
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // stop readiness watchers between polls
    let _ = shutdown_tx.send(true);
    tracing::info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to listen for ctrl-c: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::warn!("received shutdown signal, draining connections");
}

fn handle_token_command(cfg: &config::Config, cmd: cli::TokenCommands) -> anyhow::Result<()> {
    let key = SharedKey::from_hex(&cfg.secret_key).context("invalid PAAS_SECRET_KEY")?;

    match cmd {
        cli::TokenCommands::Issue {
            subject,
            secret,
            role,
            ttl_secs,
        } => {
            let ttl_ms = i64::try_from(ttl_secs.saturating_mul(1000)).context("ttl too large")?;
            let expires_at = chrono::Utc::now().timestamp_millis().saturating_add(ttl_ms);
            let token = Credential::issue(&key, &subject, &secret, &Role::from(role.as_str()), expires_at)?;
            println!("{}", token);
        }
        cli::TokenCommands::Verify { token, role } => {
            let auth = Authenticator::new(AuthConfig::enforce(key));
            let identity = auth
                .authenticate(Some(token.trim()), &Role::from(role.as_str()))
                .map_err(|e| anyhow::anyhow!("credential rejected: {}", e))?;
            println!(
                "Valid credential:\n  Subject: {}\n  Role:    {}",
                identity.subject, identity.role
            );
        }
    }
    Ok(())
}

async fn handle_job_command(cfg: &config::Config, cmd: cli::JobCommands) -> anyhow::Result<()> {
    let store = state::build_store(cfg)?;

    match cmd {
        cli::JobCommands::Status { id } => {
            let record = JobRecord::load(store.as_ref(), &id)
                .await
                .with_context(|| format!("job {} not found", id))?;
            print_job(&record);
        }
        cli::JobCommands::Wait { id, timeout_secs } => {
            let record = wait_for_job(store.as_ref(), &id, Duration::from_secs(timeout_secs)).await?;
            print_job(&record);
            if record.status == JobStatus::Error {
                anyhow::bail!("job {} failed", id);
            }
        }
    }
    Ok(())
}

/// Long-poll the job's status key until it leaves `pending` or `timeout` elapses.
async fn wait_for_job(
    store: &dyn KvStore,
    id: &str,
    timeout: Duration,
) -> anyhow::Result<JobRecord> {
    let deadline = tokio::time::Instant::now() + timeout;
    let key = status_key(id);
    let mut current = store
        .get_versioned(&key)
        .await
        .map_err(|e| match e {
            StoreError::KeyNotFound(_) => anyhow::anyhow!("job {} not found", id),
            other => other.into(),
        })?;

    loop {
        if current.value != JobStatus::Pending.as_str() {
            return Ok(JobRecord::load(store, id).await?);
        }
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            anyhow::bail!("job {} still pending after {:?}", id, timeout);
        }
        current = store
            .wait(&key, current.index, remaining.min(MAX_WAIT_SLICE))
            .await?;
    }
}

fn print_job(record: &JobRecord) {
    match JobView::from(record.clone()) {
        JobView::Pending => println!("Job {}: pending", record.id),
        JobView::Resolved { status, url } => {
            println!("Job {}: {}", record.id, status.as_str());
            if let Some(code) = record.status_code {
                println!("  Status code: {}", code);
            }
            if let Some(url) = url {
                println!("  Location:    {}", url);
            }
        }
    }
}
