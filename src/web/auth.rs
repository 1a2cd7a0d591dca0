//! Session resolution and role gating for pages and API routes.

use std::sync::Arc;

use axum::{
    Json,
    extract::{Request, State},
    http::{HeaderMap, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};
use chrono::{DateTime, Utc};

use crate::auth::Principal;
use crate::auth::access::{self, Area, DenyReason, RouteDecision};
use crate::auth::session::{SESSION_COOKIE, looks_like_token};
use crate::portal::audit;
use crate::web::server::AppState;
use crate::web::types::AuthErrorResponse;

/// Bearer token from the `Authorization` header, else the session cookie.
pub fn extract_token(headers: &HeaderMap) -> Option<String> {
    if let Some(value) = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        && let Some(token) = value.strip_prefix("Bearer ")
    {
        return Some(token.trim().to_string());
    }

    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|raw| raw.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, value)| value.trim().to_string())
}

/// `Set-Cookie` value carrying a fresh session token.
pub fn session_cookie(token: &str, expires_at: DateTime<Utc>) -> String {
    let max_age = (expires_at - Utc::now()).num_seconds().max(0);
    format!("{SESSION_COOKIE}={token}; Path=/; HttpOnly; SameSite=Lax; Max-Age={max_age}")
}

/// `Set-Cookie` value that removes the session cookie.
pub fn clear_session_cookie() -> String {
    format!("{SESSION_COOKIE}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0")
}

async fn resolve_principal(state: &AppState, headers: &HeaderMap) -> Option<Principal> {
    let token = extract_token(headers).filter(|t| looks_like_token(t))?;
    match state.auth.resolve(&token).await {
        Ok(principal) => principal,
        Err(e) => {
            tracing::error!("Failed to resolve session: {}", e);
            None
        }
    }
}

fn is_api_path(path: &str) -> bool {
    path.starts_with("/api/")
}

fn denied(path: &str, to: String, reason: DenyReason) -> Response {
    audit::inc_denied_request();
    tracing::debug!(path, redirect = %to, ?reason, "Request turned away");
    if !is_api_path(path) {
        return Redirect::to(&to).into_response();
    }
    let (status, error) = match reason {
        DenyReason::Unauthenticated => (StatusCode::UNAUTHORIZED, "Sign in required"),
        DenyReason::WrongRole => (StatusCode::FORBIDDEN, "Not allowed for this role"),
    };
    (
        status,
        Json(AuthErrorResponse {
            error: error.to_string(),
            redirect: to,
        }),
    )
        .into_response()
}

/// Gate the admin and client areas.
///
/// The area is derived from the request path. Allowed requests carry the
/// resolved [`Principal`] as an extension.
pub async fn area_middleware(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();
    let area = Area::for_path(&path);
    let principal = resolve_principal(&state, request.headers()).await;

    match access::decide(principal.as_ref(), area) {
        RouteDecision::Allow => {
            if let Some(principal) = principal {
                request.extensions_mut().insert(principal);
            }
            next.run(request).await
        }
        RouteDecision::Redirect { to, reason } => denied(&path, to, reason),
    }
}

/// Require any signed-in principal, whatever its role.
pub async fn session_middleware(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Response {
    match resolve_principal(&state, request.headers()).await {
        Some(principal) => {
            request.extensions_mut().insert(principal);
            next.run(request).await
        }
        None => {
            let path = request.uri().path().to_string();
            denied(&path, "/login".to_string(), DenyReason::Unauthenticated)
        }
    }
}
