//! End-to-end request flows through the router, with the subprocess layer
//! replaced by a spy runner so no kubectl binary is needed.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use tower::ServiceExt;

use kube_portal::auth::{PasswordVerifier, Sha256Verifier};
use kube_portal::config::AppConfig;
use kube_portal::error::PortalError;
use kube_portal::kube::context::ContextHandle;
use kube_portal::kube::executor::{CommandRunner, ExecutionResult};
use kube_portal::store::audit::{AuditFilter, AuditStatus};
use kube_portal::store::Database;
use kube_portal::{build_router, AppState};

#[derive(Debug, Clone)]
enum MockCall {
    Run(Vec<String>),
    Apply {
        manifest: String,
        namespace: Option<String>,
    },
}

/// Records every invocation the handlers would have spawned and answers with
/// a canned success.
#[derive(Default)]
struct MockRunner {
    calls: Mutex<Vec<MockCall>>,
}

impl MockRunner {
    fn calls(&self) -> Vec<MockCall> {
        self.calls.lock().unwrap().clone()
    }

    fn ok() -> ExecutionResult {
        ExecutionResult {
            success: true,
            stdout: "ok".to_string(),
            stderr: String::new(),
            exit_code: Some(0),
            duration_ms: 1,
            timed_out: false,
        }
    }
}

#[async_trait]
impl CommandRunner for MockRunner {
    async fn run(
        &self,
        _ctx: &ContextHandle,
        args: &[String],
        _timeout: Duration,
    ) -> Result<ExecutionResult, PortalError> {
        self.calls.lock().unwrap().push(MockCall::Run(args.to_vec()));
        Ok(Self::ok())
    }

    async fn apply(
        &self,
        _ctx: &ContextHandle,
        manifest: &str,
        namespace: Option<&str>,
        _timeout: Duration,
    ) -> Result<ExecutionResult, PortalError> {
        self.calls.lock().unwrap().push(MockCall::Apply {
            manifest: manifest.to_string(),
            namespace: namespace.map(str::to_string),
        });
        Ok(Self::ok())
    }
}

struct Harness {
    router: Router,
    state: AppState,
    runner: Arc<MockRunner>,
}

fn harness_with_db(db: Database) -> Harness {
    let config = AppConfig {
        bind_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
        database_url: ":memory:".to_string(),
        session_secret: "test-secret".to_string(),
        command_timeout: Duration::from_secs(30),
        apply_timeout: Duration::from_secs(60),
        audit_snapshot_max_bytes: 8 * 1024,
        audit_page_size: 50,
    };
    let runner = Arc::new(MockRunner::default());
    let verifier = Sha256Verifier;

    let state = AppState::new(config, db, runner.clone(), Arc::new(Sha256Verifier));
    state
        .users
        .ensure_admin("admin", "admin@example.com", &verifier.hash("admin-pass"))
        .unwrap();
    state
        .users
        .create("alice", "alice@example.com", &verifier.hash("alice-pass"), false)
        .unwrap();

    Harness {
        router: build_router(state.clone()),
        state,
        runner,
    }
}

fn harness() -> Harness {
    harness_with_db(Database::open_in_memory().unwrap())
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

async fn post_json(
    router: &Router,
    uri: &str,
    token: Option<&str>,
    body: serde_json::Value,
) -> axum::response::Response {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json");
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {token}"));
    }
    router
        .clone()
        .oneshot(builder.body(Body::from(body.to_string())).unwrap())
        .await
        .unwrap()
}

async fn get(router: &Router, uri: &str, token: &str) -> axum::response::Response {
    router
        .clone()
        .oneshot(
            Request::builder()
                .method("GET")
                .uri(uri)
                .header("authorization", format!("Bearer {token}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap()
}

async fn login(router: &Router, username: &str, password: &str) -> String {
    let response = post_json(
        router,
        "/api/login",
        None,
        serde_json::json!({ "username": username, "password": password }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    body["token"].as_str().unwrap().to_string()
}

async fn connect(router: &Router, token: &str) {
    let response = post_json(
        router,
        "/api/cluster/connect",
        Some(token),
        serde_json::json!({
            "endpoint": "https://api.example.com:6443",
            "alias": "demo",
            "token": "abc123",
        }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn login_rejects_bad_credentials_and_audits_the_attempt() {
    let h = harness();
    let response = post_json(
        &h.router,
        "/api/login",
        None,
        serde_json::json!({ "username": "alice", "password": "wrong" }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let page = h.state.audit.list(&AuditFilter::default(), 1).unwrap();
    assert_eq!(page.total, 1);
    assert_eq!(page.records[0].action, "login_failed");
    assert_eq!(page.records[0].status, AuditStatus::Failed);
    assert!(page.records[0].user_id.is_none());
}

#[tokio::test]
async fn connect_probes_the_cluster_and_audits_success() {
    let h = harness();
    let token = login(&h.router, "alice", "alice-pass").await;
    connect(&h.router, &token).await;

    // The verification probe is the only invocation so far.
    let calls = h.runner.calls();
    assert_eq!(calls.len(), 1);
    match &calls[0] {
        MockCall::Run(args) => assert_eq!(args, &["get", "namespaces"]),
        other => panic!("expected a run call, got {other:?}"),
    }

    let page = h
        .state
        .audit
        .list(
            &AuditFilter {
                action: Some("connect".into()),
                ..Default::default()
            },
            1,
        )
        .unwrap();
    assert_eq!(page.total, 1);
    assert_eq!(page.records[0].status, AuditStatus::Success);
    assert_eq!(page.records[0].cluster_alias, "demo");
    // The bearer credential never lands in the trail.
    assert!(!page.records[0].command.contains("abc123"));
}

#[tokio::test]
async fn mutations_while_disconnected_are_rejected_without_spawning() {
    let h = harness();
    let token = login(&h.router, "alice", "alice-pass").await;

    let response = post_json(
        &h.router,
        "/api/deployments",
        Some(&token),
        serde_json::json!({ "name": "web", "image": "nginx:1.27" }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert!(h.runner.calls().is_empty());

    let page = h
        .state
        .audit
        .list(
            &AuditFilter {
                status: Some(AuditStatus::Rejected),
                ..Default::default()
            },
            1,
        )
        .unwrap();
    assert_eq!(page.total, 1);
    assert_eq!(page.records[0].action, "create_deployment");
}

#[tokio::test]
async fn deployment_manifest_is_applied_in_the_target_namespace() {
    let h = harness();
    let token = login(&h.router, "alice", "alice-pass").await;
    connect(&h.router, &token).await;

    let response = post_json(
        &h.router,
        "/api/deployments",
        Some(&token),
        serde_json::json!({
            "name": "web",
            "image": "nginx:1.27",
            "replicas": 3,
            "port": 8080,
            "namespace": "staging",
        }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["audit_recorded"], true);

    let calls = h.runner.calls();
    assert_eq!(calls.len(), 2);
    match &calls[1] {
        MockCall::Apply {
            manifest,
            namespace,
        } => {
            assert!(manifest.contains("name: web"));
            assert!(manifest.contains("image: nginx:1.27"));
            assert!(manifest.contains("replicas: 3"));
            assert_eq!(namespace.as_deref(), Some("staging"));
        }
        other => panic!("expected an apply call, got {other:?}"),
    }
}

#[tokio::test]
async fn non_kubectl_commands_are_rejected_and_audited_verbatim() {
    let h = harness();
    let token = login(&h.router, "alice", "alice-pass").await;
    connect(&h.router, &token).await;

    let response = post_json(
        &h.router,
        "/api/command",
        Some(&token),
        serde_json::json!({ "command": "rm -rf /" }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    // Only the connect probe ever reached the runner.
    assert_eq!(h.runner.calls().len(), 1);

    let page = h
        .state
        .audit
        .list(
            &AuditFilter {
                status: Some(AuditStatus::Rejected),
                ..Default::default()
            },
            1,
        )
        .unwrap();
    assert_eq!(page.total, 1);
    assert_eq!(page.records[0].command, "rm -rf /");
}

#[tokio::test]
async fn custom_kubectl_commands_run_with_the_prefix_stripped() {
    let h = harness();
    let token = login(&h.router, "alice", "alice-pass").await;
    connect(&h.router, &token).await;

    let response = post_json(
        &h.router,
        "/api/command",
        Some(&token),
        serde_json::json!({ "command": "kubectl get pods -n staging" }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);

    let calls = h.runner.calls();
    match &calls[1] {
        MockCall::Run(args) => assert_eq!(args, &["get", "pods", "-n", "staging"]),
        other => panic!("expected a run call, got {other:?}"),
    }
}

#[tokio::test]
async fn audit_listing_is_admin_only() {
    let h = harness();
    let alice = login(&h.router, "alice", "alice-pass").await;
    let admin = login(&h.router, "admin", "admin-pass").await;

    let response = get(&h.router, "/api/audit", &alice).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = get(&h.router, "/api/audit?action=login&page=1", &admin).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["page"], 1);
    assert_eq!(body["total"], 2);

    let response = get(&h.router, "/api/audit/stats", &admin).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["total_actions"], 2);
}

#[tokio::test]
async fn connect_keeps_its_audit_record_when_the_connection_log_is_broken() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("portal.db");
    let h = harness_with_db(Database::open(path.to_str().unwrap()).unwrap());

    // Break the connection history table out from under the handler; the
    // audit table stays intact.
    rusqlite::Connection::open(&path)
        .unwrap()
        .execute_batch("DROP TABLE cluster_connections")
        .unwrap();

    let token = login(&h.router, "alice", "alice-pass").await;
    connect(&h.router, &token).await;

    let page = h
        .state
        .audit
        .list(
            &AuditFilter {
                action: Some("connect".into()),
                ..Default::default()
            },
            1,
        )
        .unwrap();
    assert_eq!(page.total, 1);
    assert_eq!(page.records[0].status, AuditStatus::Success);

    // The session really is Connected: a follow-up mutation goes through.
    let response = post_json(
        &h.router,
        "/api/deployments",
        Some(&token),
        serde_json::json!({ "name": "web", "image": "nginx:1.27" }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn registration_creates_a_login_capable_account_and_audits_it() {
    let h = harness();
    let response = post_json(
        &h.router,
        "/api/register",
        None,
        serde_json::json!({
            "username": "carol",
            "email": "carol@example.com",
            "password": "carol-pass",
        }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);

    let page = h
        .state
        .audit
        .list(
            &AuditFilter {
                action: Some("register".into()),
                ..Default::default()
            },
            1,
        )
        .unwrap();
    assert_eq!(page.total, 1);
    assert_eq!(page.records[0].status, AuditStatus::Success);
    assert_eq!(page.records[0].username.as_deref(), Some("carol"));

    // New accounts are not admins.
    let token = login(&h.router, "carol", "carol-pass").await;
    let response = get(&h.router, "/api/audit", &token).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn registration_rejects_duplicates_and_weak_input() {
    let h = harness();
    for body in [
        // Username taken by the seeded account.
        serde_json::json!({ "username": "alice", "email": "new@example.com", "password": "longenough" }),
        // Email taken by the seeded account.
        serde_json::json!({ "username": "newuser", "email": "alice@example.com", "password": "longenough" }),
        serde_json::json!({ "username": "ab", "email": "ab@example.com", "password": "longenough" }),
        serde_json::json!({ "username": "carol", "email": "not-an-email", "password": "longenough" }),
        serde_json::json!({ "username": "carol", "email": "carol@example.com", "password": "short" }),
    ] {
        let response = post_json(&h.router, "/api/register", None, body.clone()).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{body}");
    }
}

#[tokio::test]
async fn tampered_session_tokens_are_rejected() {
    let h = harness();
    let token = login(&h.router, "alice", "alice-pass").await;

    // Flip the last signature character ('x' is never a hex digit).
    let tampered = format!("{}x", &token[..token.len() - 1]);
    let response = get(&h.router, "/api/cluster/recent", &tampered).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    // The uuid alone, stripped of its signature, is just as dead.
    let bare = token.split('.').next().unwrap().to_string();
    let response = get(&h.router, "/api/cluster/recent", &bare).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    // The untampered token still works.
    let response = get(&h.router, "/api/cluster/recent", &token).await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn server_redirect_flags_are_rejected_in_custom_commands() {
    let h = harness();
    let token = login(&h.router, "alice", "alice-pass").await;
    connect(&h.router, &token).await;

    let response = post_json(
        &h.router,
        "/api/command",
        Some(&token),
        serde_json::json!({ "command": "kubectl get pods -s https://evil.example:6443" }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    // Only the connect probe ever reached the runner.
    assert_eq!(h.runner.calls().len(), 1);
}

#[tokio::test]
async fn logout_invalidates_the_session_token() {
    let h = harness();
    let token = login(&h.router, "alice", "alice-pass").await;

    let response = post_json(&h.router, "/api/logout", Some(&token), serde_json::json!({})).await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = get(&h.router, "/api/cluster/recent", &token).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}
