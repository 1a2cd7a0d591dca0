//! End-to-end tests for the admin area and the client portal.
//!
//! Each test starts a real Axum server on a random port backed by a fresh
//! libSQL database and drives it over HTTP:
//! - login for both roles and role-based redirects
//! - page guards (303) versus API guards (401/403 JSON)
//! - tenant isolation between two clients
//! - task, chat, resource and request flows end to end
//! - the change feed closing with the session that opened it

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use reqwest::StatusCode;
use serde_json::{Value, json};
use tempfile::TempDir;

use clientdesk::auth::NewAccount;
use clientdesk::config::{
    Config, DatabaseBackend, DatabaseConfig, PortalConfig, ServerConfig,
};
use clientdesk::db::{self, Role};
use clientdesk::web::server::{AppState, start_server};

const ADMIN_EMAIL: &str = "admin@agency.test";
const ADMIN_PASSWORD: &str = "admin-password-1";
const CLIENT_PASSWORD: &str = "client-password-1";
const TIMEOUT: Duration = Duration::from_secs(10);

struct TestServer {
    base: String,
    state: Arc<AppState>,
    _tmp: TempDir,
}

impl TestServer {
    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }
}

async fn start_test_server() -> TestServer {
    let tmp = tempfile::tempdir().expect("tempdir");
    let config = Config {
        database: DatabaseConfig {
            backend: DatabaseBackend::LibSql,
            url: None,
            pool_size: 1,
            libsql_path: Some(tmp.path().join("portal.db").to_string_lossy().into_owned()),
            libsql_url: None,
            libsql_auth_token: None,
        },
        server: ServerConfig {
            host: "127.0.0.1".parse().expect("host"),
            port: 0,
            allowed_origins: Vec::new(),
            body_limit_bytes: 1024 * 1024,
            login_attempts_per_minute: 1000,
        },
        portal: PortalConfig::for_storage_root(tmp.path().join("storage")),
    };

    let db = db::connect_from_config(&config.database)
        .await
        .expect("open database");
    let state = Arc::new(AppState::new(db, &config, tmp.path()));
    state
        .auth
        .bootstrap_admin(ADMIN_EMAIL, "Agency Admin", ADMIN_PASSWORD)
        .await
        .expect("bootstrap admin")
        .expect("first admin is created");

    let addr: SocketAddr = start_server(&config.server, state.clone())
        .await
        .expect("Failed to start test server");

    TestServer {
        base: format!("http://{addr}"),
        state,
        _tmp: tmp,
    }
}

fn http() -> reqwest::Client {
    reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .timeout(TIMEOUT)
        .build()
        .expect("client")
}

async fn login(server: &TestServer, email: &str, password: &str) -> Value {
    let resp = http()
        .post(server.url("/api/auth/login"))
        .json(&json!({ "email": email, "password": password }))
        .send()
        .await
        .expect("login request");
    assert_eq!(resp.status(), StatusCode::OK, "login for {email}");
    resp.json().await.expect("login body")
}

async fn admin_token(server: &TestServer) -> String {
    login(server, ADMIN_EMAIL, ADMIN_PASSWORD).await["token"]
        .as_str()
        .expect("token")
        .to_string()
}

/// Create a client plus a portal login for it, returning (client_id, token).
async fn client_with_login(server: &TestServer, admin: &str, name: &str) -> (String, String) {
    let client: Value = http()
        .post(server.url("/api/admin/clients"))
        .bearer_auth(admin)
        .json(&json!({ "name": name, "status": "active" }))
        .send()
        .await
        .expect("create client")
        .json()
        .await
        .expect("client body");
    let client_id = client["id"].as_str().expect("client id").to_string();

    let email = format!("{}@clients.test", name.to_lowercase().replace(' ', "-"));
    server
        .state
        .auth
        .create_account(NewAccount {
            email: email.clone(),
            display_name: name.to_string(),
            password: CLIENT_PASSWORD.to_string(),
            role: Role::Client,
            client_id: Some(client_id.parse().expect("uuid")),
        })
        .await
        .expect("create client account");

    let token = login(server, &email, CLIENT_PASSWORD).await["token"]
        .as_str()
        .expect("token")
        .to_string();
    (client_id, token)
}

#[tokio::test]
async fn health_is_public() {
    let server = start_test_server().await;
    let body: Value = http()
        .get(server.url("/api/health"))
        .send()
        .await
        .expect("health")
        .json()
        .await
        .expect("json");
    assert_eq!(body["status"], "healthy");
    server.state.shutdown().await;
}

#[tokio::test]
async fn login_redirects_each_role_to_its_area() {
    let server = start_test_server().await;
    let admin = login(&server, ADMIN_EMAIL, ADMIN_PASSWORD).await;
    assert_eq!(admin["redirect"], "/admin");
    assert_eq!(admin["principal"]["role"], "admin");

    let admin_token = admin["token"].as_str().expect("token");
    let (_, client_token) = client_with_login(&server, admin_token, "Acme").await;
    let session: Value = http()
        .get(server.url("/api/auth/session"))
        .bearer_auth(&client_token)
        .send()
        .await
        .expect("session")
        .json()
        .await
        .expect("json");
    assert_eq!(session["principal"]["role"], "client");
    assert_eq!(session["home"], "/portal");
    server.state.shutdown().await;
}

#[tokio::test]
async fn login_rejects_bad_password_and_sets_cookie_on_success() {
    let server = start_test_server().await;
    let resp = http()
        .post(server.url("/api/auth/login"))
        .json(&json!({ "email": ADMIN_EMAIL, "password": "wrong-password-x" }))
        .send()
        .await
        .expect("login");
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let resp = http()
        .post(server.url("/api/auth/login"))
        .json(&json!({ "email": ADMIN_EMAIL, "password": ADMIN_PASSWORD }))
        .send()
        .await
        .expect("login");
    let cookie = resp
        .headers()
        .get(reqwest::header::SET_COOKIE)
        .and_then(|v| v.to_str().ok())
        .expect("session cookie")
        .to_string();
    assert!(cookie.starts_with("clientdesk_session="));
    assert!(cookie.contains("HttpOnly"));
    server.state.shutdown().await;
}

#[tokio::test]
async fn cookie_session_reaches_admin_page() {
    let server = start_test_server().await;
    let browser = reqwest::Client::builder()
        .cookie_store(true)
        .redirect(reqwest::redirect::Policy::none())
        .timeout(TIMEOUT)
        .build()
        .expect("client");
    let resp = browser
        .post(server.url("/api/auth/login"))
        .json(&json!({ "email": ADMIN_EMAIL, "password": ADMIN_PASSWORD }))
        .send()
        .await
        .expect("login");
    assert_eq!(resp.status(), StatusCode::OK);

    let page = browser
        .get(server.url("/admin/clients"))
        .send()
        .await
        .expect("admin page");
    assert_eq!(page.status(), StatusCode::OK);
    assert!(
        page.headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.starts_with("text/html"))
    );

    let resp = browser
        .post(server.url("/api/auth/logout"))
        .send()
        .await
        .expect("logout");
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);
    let page = browser
        .get(server.url("/admin"))
        .send()
        .await
        .expect("admin page");
    assert_eq!(page.status(), StatusCode::SEE_OTHER);
    server.state.shutdown().await;
}

#[tokio::test]
async fn anonymous_requests_are_turned_away() {
    let server = start_test_server().await;

    let page = http().get(server.url("/admin")).send().await.expect("page");
    assert_eq!(page.status(), StatusCode::SEE_OTHER);
    assert_eq!(
        page.headers().get(reqwest::header::LOCATION).unwrap(),
        "/login?next=/admin"
    );

    let page = http().get(server.url("/portal")).send().await.expect("page");
    assert_eq!(
        page.headers().get(reqwest::header::LOCATION).unwrap(),
        "/login?next=/portal"
    );

    let api = http()
        .get(server.url("/api/admin/clients"))
        .send()
        .await
        .expect("api");
    assert_eq!(api.status(), StatusCode::UNAUTHORIZED);
    let body: Value = api.json().await.expect("json");
    assert_eq!(body["redirect"], "/login?next=/admin");
    server.state.shutdown().await;
}

#[tokio::test]
async fn roles_are_sent_to_their_own_area() {
    let server = start_test_server().await;
    let admin = admin_token(&server).await;
    let (_, client) = client_with_login(&server, &admin, "Acme").await;

    let resp = http()
        .get(server.url("/api/admin/clients"))
        .bearer_auth(&client)
        .send()
        .await
        .expect("api");
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    let body: Value = resp.json().await.expect("json");
    assert_eq!(body["redirect"], "/portal");

    let page = http()
        .get(server.url("/portal"))
        .bearer_auth(&admin)
        .send()
        .await
        .expect("page");
    assert_eq!(page.status(), StatusCode::SEE_OTHER);
    assert_eq!(page.headers().get(reqwest::header::LOCATION).unwrap(), "/admin");
    server.state.shutdown().await;
}

#[tokio::test]
async fn clients_only_see_their_own_tasks() {
    let server = start_test_server().await;
    let admin = admin_token(&server).await;
    let (acme_id, acme) = client_with_login(&server, &admin, "Acme").await;
    let (globex_id, globex) = client_with_login(&server, &admin, "Globex").await;

    let mut globex_task = String::new();
    for (client_id, title) in [(&acme_id, "Acme logo"), (&globex_id, "Globex site")] {
        let task: Value = http()
            .post(server.url("/api/admin/tasks"))
            .bearer_auth(&admin)
            .json(&json!({ "client_id": client_id, "title": title, "priority": "high" }))
            .send()
            .await
            .expect("create task")
            .json()
            .await
            .expect("json");
        if client_id == &globex_id {
            globex_task = task["id"].as_str().expect("id").to_string();
        }
    }

    let tasks: Vec<Value> = http()
        .get(server.url("/api/portal/tasks"))
        .bearer_auth(&acme)
        .send()
        .await
        .expect("list")
        .json()
        .await
        .expect("json");
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0]["title"], "Acme logo");

    // Another tenant's task is indistinguishable from a missing one.
    let resp = http()
        .get(server.url(&format!("/api/portal/tasks/{globex_task}")))
        .bearer_auth(&acme)
        .send()
        .await
        .expect("get");
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    let resp = http()
        .get(server.url(&format!("/api/portal/tasks/{globex_task}")))
        .bearer_auth(&globex)
        .send()
        .await
        .expect("get");
    assert_eq!(resp.status(), StatusCode::OK);
    server.state.shutdown().await;
}

#[tokio::test]
async fn task_completion_stamps_completed_at() {
    let server = start_test_server().await;
    let admin = admin_token(&server).await;
    let (acme_id, _) = client_with_login(&server, &admin, "Acme").await;

    let task: Value = http()
        .post(server.url("/api/admin/tasks"))
        .bearer_auth(&admin)
        .json(&json!({ "client_id": acme_id, "title": "Brochure" }))
        .send()
        .await
        .expect("create")
        .json()
        .await
        .expect("json");
    assert_eq!(task["status"], "todo");
    assert!(task["completed_at"].is_null());

    let id = task["id"].as_str().expect("id");
    let done: Value = http()
        .put(server.url(&format!("/api/admin/tasks/{id}")))
        .bearer_auth(&admin)
        .json(&json!({ "status": "done" }))
        .send()
        .await
        .expect("update")
        .json()
        .await
        .expect("json");
    assert_eq!(done["status"], "done");
    assert!(done["completed_at"].is_string());

    let resp = http()
        .delete(server.url(&format!("/api/admin/tasks/{id}")))
        .bearer_auth(&admin)
        .send()
        .await
        .expect("delete");
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);
    server.state.shutdown().await;
}

#[tokio::test]
async fn chat_round_trip_tracks_unread() {
    let server = start_test_server().await;
    let admin = admin_token(&server).await;
    let (acme_id, acme) = client_with_login(&server, &admin, "Acme").await;

    let resp = http()
        .post(server.url(&format!("/api/admin/chat/{acme_id}/messages")))
        .bearer_auth(&admin)
        .json(&json!({ "body": "Your proofs are ready" }))
        .send()
        .await
        .expect("send");
    assert_eq!(resp.status(), StatusCode::CREATED);

    let unread: Value = http()
        .get(server.url("/api/portal/chat/unread"))
        .bearer_auth(&acme)
        .send()
        .await
        .expect("unread")
        .json()
        .await
        .expect("json");
    assert_eq!(unread["unread"], 1);

    let history: Vec<Value> = http()
        .get(server.url("/api/portal/chat/messages"))
        .bearer_auth(&acme)
        .send()
        .await
        .expect("history")
        .json()
        .await
        .expect("json");
    assert_eq!(history.len(), 1);
    assert_eq!(history[0]["body"], "Your proofs are ready");

    let read: Value = http()
        .post(server.url("/api/portal/chat/read"))
        .bearer_auth(&acme)
        .send()
        .await
        .expect("read")
        .json()
        .await
        .expect("json");
    assert_eq!(read["marked"], 1);

    let blank = http()
        .post(server.url("/api/portal/chat/messages"))
        .bearer_auth(&acme)
        .json(&json!({ "body": "   " }))
        .send()
        .await
        .expect("send");
    assert_eq!(blank.status(), StatusCode::UNPROCESSABLE_ENTITY);
    server.state.shutdown().await;
}

#[tokio::test]
async fn private_resources_stay_with_their_client() {
    let server = start_test_server().await;
    let admin = admin_token(&server).await;
    let (acme_id, acme) = client_with_login(&server, &admin, "Acme").await;
    let (_, globex) = client_with_login(&server, &admin, "Globex").await;

    for body in [
        json!({ "title": "Brand guide", "url": "https://agency.test/brand" }),
        json!({ "title": "Acme contract", "url": "https://agency.test/acme", "client_id": acme_id }),
    ] {
        let resp = http()
            .post(server.url("/api/admin/resources"))
            .bearer_auth(&admin)
            .json(&body)
            .send()
            .await
            .expect("create resource");
        assert_eq!(resp.status(), StatusCode::CREATED);
    }

    let acme_view: Vec<Value> = http()
        .get(server.url("/api/portal/resources"))
        .bearer_auth(&acme)
        .send()
        .await
        .expect("list")
        .json()
        .await
        .expect("json");
    assert_eq!(acme_view.len(), 2);

    let globex_view: Vec<Value> = http()
        .get(server.url("/api/portal/resources"))
        .bearer_auth(&globex)
        .send()
        .await
        .expect("list")
        .json()
        .await
        .expect("json");
    assert_eq!(globex_view.len(), 1);
    assert_eq!(globex_view[0]["title"], "Brand guide");
    server.state.shutdown().await;
}

#[tokio::test]
async fn client_request_lifecycle() {
    let server = start_test_server().await;
    let admin = admin_token(&server).await;
    let (_, acme) = client_with_login(&server, &admin, "Acme").await;

    let created: Value = http()
        .post(server.url("/api/portal/requests"))
        .bearer_auth(&acme)
        .json(&json!({
            "kind": "support",
            "subject": "Website down",
            "body": "The contact form returns an error."
        }))
        .send()
        .await
        .expect("create")
        .json()
        .await
        .expect("json");
    assert_eq!(created["status"], "pending");
    let id = created["id"].as_str().expect("id").to_string();

    let detail: Value = http()
        .get(server.url(&format!("/api/admin/requests/{id}")))
        .bearer_auth(&admin)
        .send()
        .await
        .expect("detail")
        .json()
        .await
        .expect("json");
    assert!(
        detail["next_statuses"]
            .as_array()
            .expect("array")
            .iter()
            .any(|s| s == "in_review")
    );

    let cancelled: Value = http()
        .post(server.url(&format!("/api/portal/requests/{id}/cancel")))
        .bearer_auth(&acme)
        .send()
        .await
        .expect("cancel")
        .json()
        .await
        .expect("json");
    assert_eq!(cancelled["status"], "cancelled");

    // Terminal requests cannot be reopened.
    let resp = http()
        .put(server.url(&format!("/api/admin/requests/{id}")))
        .bearer_auth(&admin)
        .json(&json!({ "status": "in_review" }))
        .send()
        .await
        .expect("update");
    assert_eq!(resp.status(), StatusCode::CONFLICT);

    let again = http()
        .post(server.url(&format!("/api/portal/requests/{id}/cancel")))
        .bearer_auth(&acme)
        .send()
        .await
        .expect("cancel");
    assert_eq!(again.status(), StatusCode::CONFLICT);
    server.state.shutdown().await;
}

#[tokio::test]
async fn deleting_a_client_revokes_its_logins() {
    let server = start_test_server().await;
    let admin = admin_token(&server).await;
    let (acme_id, acme) = client_with_login(&server, &admin, "Acme").await;

    let resp = http()
        .delete(server.url(&format!("/api/admin/clients/{acme_id}")))
        .bearer_auth(&admin)
        .send()
        .await
        .expect("delete");
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);

    let resp = http()
        .get(server.url("/api/portal/me"))
        .bearer_auth(&acme)
        .send()
        .await
        .expect("me");
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    server.state.shutdown().await;
}

/// Read an SSE body until the text contains `needle`, or to its end when
/// `needle` is `None`.
async fn read_events(resp: &mut reqwest::Response, needle: Option<&str>) -> String {
    let mut seen = String::new();
    while needle.is_none_or(|n| !seen.contains(n)) {
        match resp.chunk().await.expect("event chunk") {
            Some(chunk) => seen.push_str(&String::from_utf8_lossy(&chunk)),
            None => break,
        }
    }
    seen
}

#[tokio::test]
async fn event_stream_closes_when_its_session_logs_out() {
    let server = start_test_server().await;
    let admin = admin_token(&server).await;
    let (acme_id, acme) = client_with_login(&server, &admin, "Acme").await;

    let mut events = http()
        .get(server.url("/api/portal/events"))
        .bearer_auth(&acme)
        .send()
        .await
        .expect("open events");
    assert_eq!(events.status(), StatusCode::OK);
    let seen = read_events(&mut events, Some("ready")).await;
    assert!(seen.contains("event: ready"), "got {seen:?}");

    let resp = http()
        .post(server.url("/api/auth/logout"))
        .bearer_auth(&acme)
        .send()
        .await
        .expect("logout");
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);

    let resp = http()
        .post(server.url("/api/admin/tasks"))
        .bearer_auth(&admin)
        .json(&json!({ "client_id": acme_id, "title": "After logout", "priority": "low" }))
        .send()
        .await
        .expect("create task");
    assert_eq!(resp.status(), StatusCode::CREATED);

    let rest = read_events(&mut events, None).await;
    assert!(rest.contains("event: signed_out"), "got {rest:?}");
    assert!(!rest.contains("\"table\":\"tasks\""), "got {rest:?}");

    let resp = http()
        .get(server.url("/api/portal/events"))
        .bearer_auth(&acme)
        .send()
        .await
        .expect("reopen events");
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    server.state.shutdown().await;
}
