//! Axum HTTP server for the admin area and the client portal.
//!
//! Route layout:
//! - public: health, login, static assets
//! - session: any signed-in account (session info, logout, password change)
//! - `/admin`, `/api/admin/*`: administrators only
//! - `/portal`, `/api/portal/*`: client accounts only

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use axum::{
    Router,
    extract::DefaultBodyLimit,
    http::{HeaderValue, Method, header},
    middleware,
    routing::{delete, get, post, put},
};
use tokio::sync::{RwLock, oneshot};
use tower_http::cors::{AllowHeaders, CorsLayer};
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;

use crate::auth::AuthService;
use crate::config::{Config, PortalConfig, ServerConfig};
use crate::db::Database;
use crate::error::ServerError;
use crate::portal::audit;
use crate::storage::FileStore;
use crate::web::auth::{area_middleware, session_middleware};
use crate::web::handlers::{
    accounts::*, auth::*, chat::*, clients::*, content::*, dashboard::*, pages::*, requests::*,
    resources::*, settings::*, tasks::*,
};
use crate::web::sse::ChangeFeed;

/// Fixed-window rate limiter.
///
/// Counts requests in the current window and resets once the window expires.
pub struct RateLimiter {
    remaining: AtomicU64,
    /// Epoch second when the current window started.
    window_start: AtomicU64,
    max_requests: u64,
    window_secs: u64,
}

fn epoch_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

impl RateLimiter {
    pub fn new(max_requests: u64, window_secs: u64) -> Self {
        Self::starting_at(max_requests, window_secs, epoch_secs())
    }

    fn starting_at(max_requests: u64, window_secs: u64, now: u64) -> Self {
        Self {
            remaining: AtomicU64::new(max_requests),
            window_start: AtomicU64::new(now),
            max_requests,
            window_secs,
        }
    }

    fn window_expired(&self, now: u64) -> bool {
        now.saturating_sub(self.window_start.load(Ordering::Relaxed)) >= self.window_secs
    }

    /// Consume one request. Returns `false` when the window is exhausted.
    pub fn check(&self) -> bool {
        self.check_at(epoch_secs())
    }

    fn check_at(&self, now: u64) -> bool {
        if self.max_requests == 0 {
            return false;
        }
        if self.window_expired(now) {
            self.window_start.store(now, Ordering::Relaxed);
            self.remaining.store(self.max_requests - 1, Ordering::Relaxed);
            return true;
        }

        loop {
            let current = self.remaining.load(Ordering::Relaxed);
            if current == 0 {
                return false;
            }
            if self
                .remaining
                .compare_exchange_weak(current, current - 1, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
            {
                return true;
            }
        }
    }
}

/// Buckets kept before idle ones are swept.
const LIMITER_SWEEP_AT: usize = 1024;

/// One [`RateLimiter`] window per peer address.
pub struct PeerRateLimiter {
    buckets: Mutex<HashMap<IpAddr, RateLimiter>>,
    max_requests: u64,
    window_secs: u64,
}

impl PeerRateLimiter {
    pub fn new(max_requests: u64, window_secs: u64) -> Self {
        Self {
            buckets: Mutex::new(HashMap::new()),
            max_requests,
            window_secs,
        }
    }

    /// Consume one request for `peer`. Returns `false` when its window is
    /// exhausted.
    pub fn check(&self, peer: IpAddr) -> bool {
        self.check_at(peer, epoch_secs())
    }

    fn check_at(&self, peer: IpAddr, now: u64) -> bool {
        let mut buckets = self.buckets.lock().unwrap_or_else(PoisonError::into_inner);
        if buckets.len() >= LIMITER_SWEEP_AT {
            buckets.retain(|_, bucket| !bucket.window_expired(now));
        }
        buckets
            .entry(peer)
            .or_insert_with(|| RateLimiter::starting_at(self.max_requests, self.window_secs, now))
            .check_at(now)
    }
}

/// Shared state for all handlers.
pub struct AppState {
    pub db: Arc<dyn Database>,
    pub auth: AuthService,
    /// Uploaded resource files.
    pub files: FileStore,
    /// Live change notifications for SSE subscribers.
    pub feed: ChangeFeed,
    pub portal: PortalConfig,
    /// Login attempts per peer address.
    pub login_limiter: PeerRateLimiter,
    /// Audit log location when auditing is enabled.
    pub audit_path: Option<PathBuf>,
    /// Fires graceful shutdown of the running server.
    pub shutdown_tx: RwLock<Option<oneshot::Sender<()>>>,
    pub startup_time: std::time::Instant,
}

impl AppState {
    /// Build state for a resolved configuration. `home` anchors the audit log.
    pub fn new(db: Arc<dyn Database>, config: &Config, home: &std::path::Path) -> Self {
        let audit_path = config
            .portal
            .audit
            .enabled
            .then(|| audit::log_path(&config.portal.audit, home));
        Self {
            auth: AuthService::new(Arc::clone(&db), config.portal.session_ttl_hours),
            files: FileStore::new(
                config.portal.storage_root.clone(),
                config.portal.upload_limit_bytes,
            ),
            feed: ChangeFeed::new(),
            portal: config.portal.clone(),
            login_limiter: PeerRateLimiter::new(config.server.login_attempts_per_minute, 60),
            audit_path,
            shutdown_tx: RwLock::new(None),
            startup_time: std::time::Instant::now(),
            db,
        }
    }

    /// Signal the server spawned by [`start_server`] to stop.
    pub async fn shutdown(&self) {
        if let Some(tx) = self.shutdown_tx.write().await.take() {
            let _ = tx.send(());
        }
    }
}

const CONTENT_SECURITY_POLICY: &str = "default-src 'self'; script-src 'self'; style-src 'self'; img-src 'self' data:; connect-src 'self'; object-src 'none'; frame-ancestors 'none'; base-uri 'self'; form-action 'self'";

fn admin_routes(upload_limit: usize) -> Router<Arc<AppState>> {
    Router::new()
        .route("/admin", get(admin_page_handler))
        .route("/admin/{*rest}", get(admin_page_handler))
        .route("/api/admin/dashboard", get(admin_dashboard_handler))
        .route("/api/admin/events", get(events_handler))
        // Clients
        .route(
            "/api/admin/clients",
            get(clients_list_handler).post(clients_create_handler),
        )
        .route("/api/admin/clients/export", get(clients_export_handler))
        .route(
            "/api/admin/clients/{id}",
            get(clients_get_handler)
                .put(clients_update_handler)
                .delete(clients_delete_handler),
        )
        // Accounts
        .route(
            "/api/admin/accounts",
            get(accounts_list_handler).post(accounts_create_handler),
        )
        .route(
            "/api/admin/accounts/{id}/disable",
            post(accounts_disable_handler),
        )
        .route(
            "/api/admin/accounts/{id}/password",
            post(accounts_reset_password_handler),
        )
        .route("/api/admin/accounts/{id}", delete(accounts_delete_handler))
        // Tasks
        .route(
            "/api/admin/tasks",
            get(tasks_list_handler).post(tasks_create_handler),
        )
        .route("/api/admin/tasks/export", get(tasks_export_handler))
        .route(
            "/api/admin/tasks/{id}",
            get(tasks_get_handler)
                .put(tasks_update_handler)
                .delete(tasks_delete_handler),
        )
        // Chat
        .route("/api/admin/chat/conversations", get(conversations_handler))
        .route(
            "/api/admin/chat/{client_id}/messages",
            get(admin_history_handler).post(admin_send_handler),
        )
        .route("/api/admin/chat/{client_id}/read", post(admin_read_handler))
        .route(
            "/api/admin/chat/messages/{id}",
            delete(admin_delete_message_handler),
        )
        // Resources
        .route(
            "/api/admin/resources",
            get(resources_list_handler).post(resources_create_handler),
        )
        .route(
            "/api/admin/resources/upload",
            post(resources_upload_handler).layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route(
            "/api/admin/resources/{id}",
            get(resources_get_handler)
                .put(resources_update_handler)
                .delete(resources_delete_handler),
        )
        .route(
            "/api/admin/resources/{id}/file",
            get(resources_download_handler)
                .put(resources_replace_file_handler)
                .layer(DefaultBodyLimit::max(upload_limit)),
        )
        // Offers, updates, weekly products
        .route(
            "/api/admin/offers",
            get(offers_list_handler).post(offers_create_handler),
        )
        .route(
            "/api/admin/offers/{id}",
            get(offers_get_handler)
                .put(offers_update_handler)
                .delete(offers_delete_handler),
        )
        .route(
            "/api/admin/updates",
            get(updates_list_handler).post(updates_create_handler),
        )
        .route(
            "/api/admin/updates/{id}",
            get(updates_get_handler)
                .put(updates_update_handler)
                .delete(updates_delete_handler),
        )
        .route(
            "/api/admin/weekly",
            get(weekly_list_handler).post(weekly_create_handler),
        )
        .route(
            "/api/admin/weekly/{id}",
            get(weekly_get_handler)
                .put(weekly_update_handler)
                .delete(weekly_delete_handler),
        )
        // Requests
        .route("/api/admin/requests", get(requests_list_handler))
        .route(
            "/api/admin/requests/{id}",
            get(requests_get_handler)
                .put(requests_update_handler)
                .delete(requests_delete_handler),
        )
        // Settings and audit
        .route("/api/admin/settings", get(settings_list_handler))
        .route(
            "/api/admin/settings/{key}",
            get(settings_get_handler)
                .put(settings_set_handler)
                .delete(settings_delete_handler),
        )
        .route("/api/admin/audit", get(audit_list_handler))
}

fn portal_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/portal", get(portal_page_handler))
        .route("/portal/{*rest}", get(portal_page_handler))
        .route("/api/portal/me", get(portal_me_handler))
        .route("/api/portal/profile", put(portal_profile_update_handler))
        .route("/api/portal/dashboard", get(portal_dashboard_handler))
        .route("/api/portal/events", get(events_handler))
        .route("/api/portal/tasks", get(portal_tasks_list_handler))
        .route("/api/portal/tasks/{id}", get(portal_tasks_get_handler))
        .route(
            "/api/portal/chat/messages",
            get(portal_history_handler).post(portal_send_handler),
        )
        .route("/api/portal/chat/read", post(portal_read_handler))
        .route("/api/portal/chat/unread", get(portal_unread_handler))
        .route("/api/portal/resources", get(portal_resources_list_handler))
        .route(
            "/api/portal/resources/{id}",
            get(portal_resources_get_handler),
        )
        .route(
            "/api/portal/resources/{id}/file",
            get(portal_resources_download_handler),
        )
        .route("/api/portal/offers", get(portal_offers_handler))
        .route("/api/portal/updates", get(portal_updates_handler))
        .route("/api/portal/weekly", get(portal_weekly_handler))
        .route(
            "/api/portal/requests",
            get(portal_requests_list_handler).post(portal_requests_create_handler),
        )
        .route(
            "/api/portal/requests/{id}",
            get(portal_requests_get_handler),
        )
        .route(
            "/api/portal/requests/{id}/cancel",
            post(portal_requests_cancel_handler),
        )
}

fn cors_layer(addr: SocketAddr, extra_origins: &[String]) -> CorsLayer {
    let mut origins: Vec<HeaderValue> = vec![
        format!("http://{}:{}", addr.ip(), addr.port())
            .parse()
            .expect("valid origin"),
        format!("http://localhost:{}", addr.port())
            .parse()
            .expect("valid origin"),
    ];
    for origin in extra_origins {
        match origin.trim_end_matches('/').parse::<HeaderValue>() {
            Ok(value) => origins.push(value),
            Err(e) => tracing::warn!("Ignoring allowed origin '{}': {}", origin, e),
        }
    }
    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers(AllowHeaders::list([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
        ]))
        .allow_credentials(true)
}

/// Build the full application router for `state`.
pub fn router(state: Arc<AppState>, addr: SocketAddr, config: &ServerConfig) -> Router {
    let public = Router::new()
        .route("/", get(root_handler))
        .route("/api/health", get(health_handler))
        .route("/api/auth/login", post(login_handler))
        .route("/login", get(login_page_handler))
        .route("/style.css", get(css_handler))
        .route("/app.js", get(js_handler));

    let session = Router::new()
        .route("/api/auth/session", get(session_handler))
        .route("/api/auth/logout", post(logout_handler))
        .route("/api/auth/password", post(change_password_handler))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            session_middleware,
        ));

    let areas = admin_routes(state.portal.upload_limit_bytes)
        .merge(portal_routes())
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            area_middleware,
        ));

    Router::new()
        .merge(public)
        .merge(session)
        .merge(areas)
        .layer(DefaultBodyLimit::max(config.body_limit_bytes))
        .layer(cors_layer(addr, &config.allowed_origins))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::CONTENT_SECURITY_POLICY,
            HeaderValue::from_static(CONTENT_SECURITY_POLICY),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::X_FRAME_OPTIONS,
            HeaderValue::from_static("DENY"),
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the HTTP server in the background.
///
/// Returns the actual bound `SocketAddr` (useful when binding to port 0).
pub async fn start_server(
    config: &ServerConfig,
    state: Arc<AppState>,
) -> Result<SocketAddr, ServerError> {
    let addr = config.socket_addr();
    let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
        ServerError::StartupFailed {
            reason: format!("Failed to bind to {}: {}", addr, e),
        }
    })?;
    let bound_addr = listener
        .local_addr()
        .map_err(|e| ServerError::StartupFailed {
            reason: format!("Failed to get local addr: {}", e),
        })?;

    let app = router(state.clone(), bound_addr, config)
        .into_make_service_with_connect_info::<SocketAddr>();

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    *state.shutdown_tx.write().await = Some(shutdown_tx);

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
                tracing::info!("Web server shutting down");
            })
            .await
        {
            tracing::error!("Web server error: {}", e);
        }
    });

    tracing::info!("Listening on http://{}", bound_addr);
    Ok(bound_addr)
}
