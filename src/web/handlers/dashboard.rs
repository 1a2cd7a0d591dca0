use std::sync::Arc;

use axum::{
    Extension, Json,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{
        IntoResponse,
        sse::{KeepAlive, Sse},
    },
};

use crate::auth::Principal;
use crate::portal::dashboard::{self, AdminDashboard, ClientDashboard};
use crate::web::handlers::{ApiError, db_error, own_client, today};
use crate::web::auth::extract_token;
use crate::web::server::AppState;
use crate::web::sse::SessionWatch;

pub async fn admin_dashboard_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<AdminDashboard>, ApiError> {
    let dashboard = dashboard::admin_dashboard(state.db.as_ref(), today())
        .await
        .map_err(|e| db_error("Load dashboard", e))?;
    Ok(Json(dashboard))
}

pub async fn portal_dashboard_handler(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
) -> Result<Json<ClientDashboard>, ApiError> {
    let client_id = own_client(&principal)?;
    let dashboard = dashboard::client_dashboard(state.db.as_ref(), client_id, today())
        .await
        .map_err(|e| db_error("Load dashboard", e))?;
    Ok(Json(dashboard))
}

/// Change feed for the caller. Mounted under both areas; what arrives is
/// filtered by the principal's role and client, and the stream ends once the
/// session that opened it does.
pub async fn events_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let token = extract_token(&headers).ok_or((
        StatusCode::UNAUTHORIZED,
        "Sign in required".to_string(),
    ))?;
    let active = state
        .auth
        .resolve_session(&token)
        .await
        .map_err(|e| {
            tracing::error!("Failed to resolve session: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Session lookup failed".to_string())
        })?
        .ok_or((StatusCode::UNAUTHORIZED, "Sign in required".to_string()))?;

    let watch = SessionWatch::new(state.auth.clone(), token, active.expires_at);
    let stream = state.feed.stream_for(active.principal, watch);
    Ok((
        [("X-Accel-Buffering", "no"), ("Cache-Control", "no-cache")],
        Sse::new(stream).keep_alive(
            KeepAlive::new()
                .interval(std::time::Duration::from_secs(30))
                .text(""),
        ),
    ))
}
