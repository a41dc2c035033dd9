//! End-to-end tests of the HTTP surface against an in-process store.
//!
//! The scheduler and orchestrator are replaced by recording doubles; the
//! router is driven with `tower::ServiceExt::oneshot`.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::response::Response;
use axum::Router;
use serde_json::{json, Value};
use tokio::sync::watch;
use tower::ServiceExt;

use provisioner::api;
use provisioner::cluster::{Orchestrator, Scheduler};
use provisioner::config::ReadinessConfig;
use provisioner::errors::AppError;
use provisioner::middleware::auth::{AuthConfig, Identity, Role, AUTH_HEADER};
use provisioner::middleware::cipher::SharedKey;
use provisioner::middleware::credential::Credential;
use provisioner::store::{KvStore, MemoryStore};
use provisioner::AppState;

const KEY: &str = "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f";
const BASE: &str = "/bigdata/api/v1";

// ── Test doubles ─────────────────────────────────────────────

#[derive(Default)]
struct RecordingScheduler {
    submitted: Mutex<Vec<String>>,
    removed: Mutex<Vec<String>>,
    delay: Duration,
    fail: bool,
}

#[async_trait]
impl Scheduler for RecordingScheduler {
    async fn submit(&self, dn: &str) -> Result<(), AppError> {
        tokio::time::sleep(self.delay).await;
        if self.fail {
            return Err(AppError::Upstream("scheduler returned 500".into()));
        }
        self.submitted.lock().unwrap().push(dn.to_string());
        Ok(())
    }

    async fn remove(&self, full_name: &str) -> Result<(), AppError> {
        self.removed.lock().unwrap().push(full_name.to_string());
        Ok(())
    }
}

#[derive(Default)]
struct RecordingOrchestrator {
    launched: Mutex<Vec<String>>,
}

#[async_trait]
impl Orchestrator for RecordingOrchestrator {
    async fn launch(&self, dn: &str) -> anyhow::Result<()> {
        self.launched.lock().unwrap().push(dn.to_string());
        Ok(())
    }
}

struct Harness {
    app: Router,
    store: Arc<MemoryStore>,
    scheduler: Arc<RecordingScheduler>,
    orchestrator: Arc<RecordingOrchestrator>,
    _shutdown: watch::Sender<bool>,
}

fn harness_with(auth: AuthConfig, scheduler: RecordingScheduler) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let scheduler = Arc::new(scheduler);
    let orchestrator = Arc::new(RecordingOrchestrator::default());
    let (tx, rx) = watch::channel(false);

    let state = AppState::new(
        store.clone(),
        auth,
        scheduler.clone(),
        orchestrator.clone(),
        ReadinessConfig {
            target_status: "executing".into(),
            poll_interval: Duration::from_millis(10),
            max_polls: Some(500),
            grace_period: Duration::ZERO,
        },
        BASE,
        rx,
    );

    Harness {
        app: api::app(Arc::new(state)),
        store,
        scheduler,
        orchestrator,
        _shutdown: tx,
    }
}

fn bypass() -> Harness {
    harness_with(
        AuthConfig::bypass(Identity::test_user()),
        RecordingScheduler::default(),
    )
}

fn enforced() -> Harness {
    harness_with(
        AuthConfig::enforce(SharedKey::from_hex(KEY).unwrap()),
        RecordingScheduler::default(),
    )
}

fn token(role: &Role, ttl_ms: i64) -> String {
    let key = SharedKey::from_hex(KEY).unwrap();
    let expires = chrono::Utc::now().timestamp_millis() + ttl_ms;
    Credential::issue(&key, "alice", "s3cret", role, expires).unwrap()
}

async fn send(app: &Router, req: Request<Body>) -> Response {
    app.clone().oneshot(req).await.unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::get(uri).body(Body::empty()).unwrap()
}

fn get_with_token(uri: &str, token: &str) -> Request<Body> {
    Request::get(uri)
        .header(AUTH_HEADER, token)
        .body(Body::empty())
        .unwrap()
}

fn post_json(uri: &str, body: &str) -> Request<Body> {
    Request::post(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn delete(uri: &str) -> Request<Body> {
    Request::delete(uri).body(Body::empty()).unwrap()
}

async fn json_body(resp: Response) -> Value {
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn location(resp: &Response) -> String {
    resp.headers()[header::LOCATION]
        .to_str()
        .unwrap()
        .to_string()
}

/// Poll a job until it stops answering 200 pending.
async fn poll_until_resolved(app: &Router, job_url: &str) -> Response {
    for _ in 0..200 {
        let resp = send(app, get(job_url)).await;
        if resp.status() != StatusCode::OK {
            return resp;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("job {} never resolved", job_url);
}

async fn seed_product(store: &MemoryStore) {
    store
        .set("products/spark/2.1/description", "Apache Spark")
        .await
        .unwrap();
}

// ── Authentication gate ──────────────────────────────────────

mod auth_tests {
    use super::*;

    async fn rejected(resp: Response, message: &str) {
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            json_body(resp).await,
            json!({ "status": 401, "error": "unauthorized", "message": message })
        );
    }

    #[tokio::test]
    async fn test_missing_token() {
        let h = enforced();
        let resp = send(&h.app, get(&format!("{}/queue/abc", BASE))).await;
        rejected(resp, "no token has been provided").await;
    }

    #[tokio::test]
    async fn test_garbage_token() {
        let h = enforced();
        let resp = send(&h.app, get_with_token(&format!("{}/queue/abc", BASE), "a:b:c:d:e")).await;
        rejected(resp, "please provide a valid authentication token").await;
    }

    #[tokio::test]
    async fn test_wrong_role() {
        let h = enforced();
        let t = token(&Role::Admin, 60_000);
        let resp = send(&h.app, get_with_token(&format!("{}/queue/abc", BASE), &t)).await;
        rejected(resp, "invalid role").await;
    }

    #[tokio::test]
    async fn test_expired_token() {
        let h = enforced();
        let t = token(&Role::User, -1_000);
        let resp = send(&h.app, get_with_token(&format!("{}/queue/abc", BASE), &t)).await;
        rejected(resp, "token has expired").await;
    }

    #[tokio::test]
    async fn test_valid_token_reaches_handler() {
        let h = enforced();
        let t = token(&Role::User, 60_000);
        let resp = send(&h.app, get_with_token(&format!("{}/queue/abc", BASE), &t)).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        let body = json_body(resp).await;
        assert_eq!(body["status"], 404);
        assert_eq!(body["error"], "Key not found");
    }

    #[tokio::test]
    async fn test_healthz_needs_no_token() {
        let h = enforced();
        let resp = send(&h.app, get("/healthz")).await;
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_every_response_carries_headers() {
        let h = enforced();
        let resp = send(&h.app, get(&format!("{}/queue/abc", BASE))).await;
        assert!(resp.headers().contains_key("x-request-id"));
        assert_eq!(resp.headers()["x-content-type-options"], "nosniff");
        assert_eq!(resp.headers()[header::CACHE_CONTROL], "no-store");
    }
}

// ── Provisioning through the async job protocol ──────────────

mod provisioning_tests {
    use super::*;

    #[tokio::test]
    async fn test_launch_flow() {
        let h = bypass();
        seed_product(&h.store).await;

        let resp = send(
            &h.app,
            post_json(&format!("{}/products/spark/2.1", BASE), r#"{"slaves.number": 2}"#),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::ACCEPTED);
        let job_url = location(&resp);
        assert!(job_url.starts_with(&format!("{}/queue/", BASE)));

        let resolved = poll_until_resolved(&h.app, &job_url).await;
        assert_eq!(resolved.status(), StatusCode::SEE_OTHER);
        let cluster_url = format!("{}/clusters/test/spark/2.1/1", BASE);
        assert_eq!(location(&resolved), cluster_url);
        assert_eq!(
            json_body(resolved).await,
            json!({ "status": "registered", "url": cluster_url })
        );

        // resolution is stable
        let again = send(&h.app, get(&job_url)).await;
        assert_eq!(again.status(), StatusCode::SEE_OTHER);

        assert_eq!(
            *h.scheduler.submitted.lock().unwrap(),
            vec!["instances/test/spark/2.1/1".to_string()]
        );
        assert_eq!(
            h.store.get("instances/test/spark/2.1/1/status").await.unwrap(),
            "registered"
        );

        let cluster = send(&h.app, get(&cluster_url)).await;
        assert_eq!(cluster.status(), StatusCode::OK);
        let body = json_body(cluster).await;
        assert_eq!(body["uri"], "instances/test/spark/2.1/1");
        assert_eq!(body["data"]["options"], json!({ "slaves.number": 2 }));
    }

    #[tokio::test]
    async fn test_watcher_hands_ready_cluster_to_orchestrator_once() {
        let h = bypass();
        seed_product(&h.store).await;

        let resp = send(&h.app, post_json(&format!("{}/products/spark/2.1", BASE), "")).await;
        poll_until_resolved(&h.app, &location(&resp)).await;
        assert!(h.orchestrator.launched.lock().unwrap().is_empty());

        h.store
            .set("instances/test/spark/2.1/1/status", "executing")
            .await
            .unwrap();

        for _ in 0..100 {
            if !h.orchestrator.launched.lock().unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(
            *h.orchestrator.launched.lock().unwrap(),
            vec!["instances/test/spark/2.1/1".to_string()]
        );
    }

    #[tokio::test]
    async fn test_malformed_options_rejected_synchronously() {
        let h = bypass();
        seed_product(&h.store).await;

        let resp = send(&h.app, post_json(&format!("{}/products/spark/2.1", BASE), "{oops")).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(resp).await["status"], 400);
        assert!(h.store.recurse("queue/").await.is_err());
    }

    #[tokio::test]
    async fn test_unknown_product_resolves_to_error() {
        let h = bypass();

        let resp = send(&h.app, post_json(&format!("{}/products/hadoop/9", BASE), "{}")).await;
        assert_eq!(resp.status(), StatusCode::ACCEPTED);

        let resolved = poll_until_resolved(&h.app, &location(&resp)).await;
        assert_eq!(resolved.status(), StatusCode::SEE_OTHER);
        assert!(!resolved.headers().contains_key(header::LOCATION));
        assert_eq!(
            json_body(resolved).await,
            json!({ "status": "error", "url": null })
        );
        assert!(h.scheduler.submitted.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_scheduler_failure_resolves_to_error() {
        let h = harness_with(
            AuthConfig::bypass(Identity::test_user()),
            RecordingScheduler {
                fail: true,
                ..Default::default()
            },
        );
        seed_product(&h.store).await;

        let resp = send(&h.app, post_json(&format!("{}/products/spark/2.1", BASE), "{}")).await;
        let job_url = location(&resp);
        let resolved = poll_until_resolved(&h.app, &job_url).await;
        assert_eq!(json_body(resolved).await["status"], "error");

        let id = job_url.rsplit('/').next().unwrap();
        assert_eq!(
            h.store.get(&format!("queue/{}/status_code", id)).await.unwrap(),
            "502"
        );
        assert!(h.orchestrator.launched.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_slow_work_still_accepted_immediately() {
        let h = harness_with(
            AuthConfig::bypass(Identity::test_user()),
            RecordingScheduler {
                delay: Duration::from_secs(30),
                ..Default::default()
            },
        );
        seed_product(&h.store).await;

        let resp = tokio::time::timeout(
            Duration::from_millis(500),
            send(&h.app, post_json(&format!("{}/products/spark/2.1", BASE), "{}")),
        )
        .await
        .expect("202 must not wait for the scheduler");
        assert_eq!(resp.status(), StatusCode::ACCEPTED);

        let job_url = location(&resp);
        for _ in 0..3 {
            let poll = send(&h.app, get(&job_url)).await;
            assert_eq!(poll.status(), StatusCode::OK);
            assert_eq!(json_body(poll).await, json!({ "status": "pending" }));
        }
    }
}

// ── Job and cluster housekeeping ─────────────────────────────

mod housekeeping_tests {
    use super::*;

    #[tokio::test]
    async fn test_delete_job_lifecycle() {
        let h = harness_with(
            AuthConfig::bypass(Identity::test_user()),
            RecordingScheduler {
                delay: Duration::from_millis(200),
                ..Default::default()
            },
        );
        seed_product(&h.store).await;

        let resp = send(&h.app, post_json(&format!("{}/products/spark/2.1", BASE), "{}")).await;
        let job_url = location(&resp);

        let pending = send(&h.app, delete(&job_url)).await;
        assert_eq!(pending.status(), StatusCode::CONFLICT);

        poll_until_resolved(&h.app, &job_url).await;
        let deleted = send(&h.app, delete(&job_url)).await;
        assert_eq!(deleted.status(), StatusCode::NO_CONTENT);

        let gone = send(&h.app, get(&job_url)).await;
        assert_eq!(gone.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_destroy_cluster() {
        let h = bypass();
        seed_product(&h.store).await;

        let resp = send(&h.app, post_json(&format!("{}/products/spark/2.1", BASE), "{}")).await;
        poll_until_resolved(&h.app, &location(&resp)).await;

        let resp = send(&h.app, delete(&format!("{}/clusters/test/spark/2.1/1", BASE))).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(json_body(resp).await, json!({ "message": "success" }));
        assert_eq!(
            *h.scheduler.removed.lock().unwrap(),
            vec!["test-spark-2.1-1".to_string()]
        );
    }

    #[tokio::test]
    async fn test_unknown_cluster_is_not_found() {
        let h = bypass();
        for uri in [
            format!("{}/clusters/test/spark/2.1/7", BASE),
            format!("{}/clusters/test/spark/2.1/seven", BASE),
        ] {
            let resp = send(&h.app, get(&uri)).await;
            assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        }
        let resp = send(&h.app, delete(&format!("{}/clusters/test/spark/2.1/7", BASE))).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        assert!(h.scheduler.removed.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_route() {
        let h = bypass();
        let resp = send(&h.app, get(&format!("{}/nope", BASE))).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
