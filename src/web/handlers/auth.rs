use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Extension, Json,
    extract::{ConnectInfo, State},
    http::{HeaderMap, StatusCode, header},
    response::IntoResponse,
};

use crate::auth::Principal;
use crate::auth::access::{home_path, post_login_path};
use crate::error::AuthError;
use crate::portal::audit;
use crate::web::auth::{clear_session_cookie, extract_token, session_cookie};
use crate::web::handlers::ApiError;
use crate::web::server::AppState;
use crate::web::types::*;

fn auth_error(context: &str, err: AuthError) -> ApiError {
    match err {
        AuthError::InvalidCredentials | AuthError::AccountDisabled => (
            StatusCode::UNAUTHORIZED,
            AuthError::InvalidCredentials.to_string(),
        ),
        AuthError::SessionInvalid => (StatusCode::UNAUTHORIZED, err.to_string()),
        AuthError::WeakPassword(_) | AuthError::InvalidAccount(_) => {
            (StatusCode::UNPROCESSABLE_ENTITY, err.to_string())
        }
        AuthError::Database(e) => super::db_error(context, e),
        AuthError::Hashing(e) => {
            tracing::error!("{}: password hashing failed: {}", context, e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("{context} failed"),
            )
        }
    }
}

pub async fn login_handler(
    State(state): State<Arc<AppState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    Json(body): Json<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if !state.login_limiter.check(peer.ip()) {
        tracing::debug!(peer = %peer.ip(), "Login attempt rate limited");
        return Err((
            StatusCode::TOO_MANY_REQUESTS,
            "Too many login attempts. Try again in a minute.".to_string(),
        ));
    }

    let session = match state.auth.login(&body.email, &body.password).await {
        Ok(session) => session,
        Err(e) => {
            if matches!(e, AuthError::InvalidCredentials | AuthError::AccountDisabled) {
                audit::inc_failed_login();
                audit::record(
                    "auth.login_failed",
                    serde_json::json!({ "email": body.email.trim().to_lowercase() }),
                );
            }
            return Err(auth_error("Login", e));
        }
    };

    audit::record(
        "auth.login",
        serde_json::json!({
            "account_id": session.principal.account_id,
            "role": session.principal.role.as_str(),
        }),
    );
    let redirect = post_login_path(session.principal.role, body.next.as_deref());
    let cookie = session_cookie(&session.token, session.expires_at);
    Ok((
        [(header::SET_COOKIE, cookie)],
        Json(LoginResponse {
            token: session.token,
            expires_at: session.expires_at,
            principal: session.principal,
            redirect,
        }),
    ))
}

pub async fn logout_handler(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    if let Some(token) = extract_token(&headers) {
        state
            .auth
            .logout(&token)
            .await
            .map_err(|e| auth_error("Logout", e))?;
    }
    audit::record(
        "auth.logout",
        serde_json::json!({ "account_id": principal.account_id }),
    );
    Ok((
        StatusCode::NO_CONTENT,
        [(header::SET_COOKIE, clear_session_cookie())],
    ))
}

pub async fn session_handler(Extension(principal): Extension<Principal>) -> Json<SessionResponse> {
    let home = home_path(principal.role);
    Json(SessionResponse { principal, home })
}

/// Change the caller's password. All other sessions are revoked and a new
/// one is issued.
pub async fn change_password_handler(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Json(body): Json<ChangePasswordRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let session = state
        .auth
        .change_password(&principal, &body.current_password, &body.new_password)
        .await
        .map_err(|e| match e {
            AuthError::InvalidCredentials => (
                StatusCode::FORBIDDEN,
                "Current password is incorrect".to_string(),
            ),
            other => auth_error("Change password", other),
        })?;

    audit::record(
        "auth.password_changed",
        serde_json::json!({ "account_id": principal.account_id }),
    );
    let cookie = session_cookie(&session.token, session.expires_at);
    Ok((
        [(header::SET_COOKIE, cookie)],
        Json(LoginResponse {
            token: session.token,
            expires_at: session.expires_at,
            redirect: home_path(session.principal.role).to_string(),
            principal: session.principal,
        }),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_accounts_look_like_bad_credentials() {
        let (status, body) = auth_error("Login", AuthError::AccountDisabled);
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body, "Invalid email or password");
    }

    #[test]
    fn weak_passwords_are_unprocessable() {
        let (status, _) = auth_error("Change password", AuthError::WeakPassword("short".into()));
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    }
}
