use std::sync::Arc;

use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use uuid::Uuid;

use crate::auth::{NewAccount, Principal};
use crate::db::AccountRecord;
use crate::error::AuthError;
use crate::web::handlers::{ApiError, audit_admin, db_error, not_found, publish};
use crate::web::server::AppState;
use crate::web::sse::{ChangeAction, ChangeTable};
use crate::web::types::*;

fn account_error(context: &str, err: AuthError) -> ApiError {
    match err {
        AuthError::WeakPassword(_) | AuthError::InvalidAccount(_) => {
            (StatusCode::UNPROCESSABLE_ENTITY, err.to_string())
        }
        AuthError::Database(e) => db_error(context, e),
        other => {
            tracing::error!("{}: {}", context, other);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("{context} failed"),
            )
        }
    }
}

fn refuse_self(principal: &Principal, id: Uuid, what: &str) -> Result<(), ApiError> {
    if principal.account_id == id {
        return Err((
            StatusCode::CONFLICT,
            format!("You cannot {what} your own account"),
        ));
    }
    Ok(())
}

pub async fn accounts_list_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<AccountListQuery>,
) -> Result<Json<Vec<AccountRecord>>, ApiError> {
    let accounts = state
        .db
        .list_accounts(query.client_id)
        .await
        .map_err(|e| db_error("List accounts", e))?;
    Ok(Json(accounts))
}

/// Create an admin or client login. Client logins must name an existing
/// client; admin logins must not name one.
pub async fn accounts_create_handler(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Json(body): Json<AccountCreateRequest>,
) -> Result<(StatusCode, Json<AccountRecord>), ApiError> {
    let account = state
        .auth
        .create_account(NewAccount {
            email: body.email,
            display_name: body.display_name,
            password: body.password,
            role: body.role,
            client_id: body.client_id,
        })
        .await
        .map_err(|e| account_error("Create account", e))?;

    publish(
        &state,
        ChangeTable::Accounts,
        ChangeAction::Insert,
        account.id,
        account.client_id,
    );
    audit_admin(
        &principal,
        "account.created",
        serde_json::json!({
            "account_id": account.id,
            "role": account.role.as_str(),
            "client_id": account.client_id,
        }),
    );
    Ok((StatusCode::CREATED, Json(account)))
}

pub async fn accounts_disable_handler(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<Uuid>,
    Json(body): Json<AccountDisableRequest>,
) -> Result<StatusCode, ApiError> {
    if body.disabled {
        refuse_self(&principal, id, "disable")?;
    }
    if !state
        .auth
        .set_disabled(id, body.disabled)
        .await
        .map_err(|e| account_error("Disable account", e))?
    {
        return Err(not_found("Account"));
    }
    publish(&state, ChangeTable::Accounts, ChangeAction::Update, id, None);
    audit_admin(
        &principal,
        if body.disabled {
            "account.disabled"
        } else {
            "account.enabled"
        },
        serde_json::json!({ "account_id": id }),
    );
    Ok(StatusCode::NO_CONTENT)
}

pub async fn accounts_reset_password_handler(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<Uuid>,
    Json(body): Json<PasswordResetRequest>,
) -> Result<StatusCode, ApiError> {
    if !state
        .auth
        .reset_password(id, &body.password)
        .await
        .map_err(|e| account_error("Reset password", e))?
    {
        return Err(not_found("Account"));
    }
    audit_admin(
        &principal,
        "account.password_reset",
        serde_json::json!({ "account_id": id }),
    );
    Ok(StatusCode::NO_CONTENT)
}

pub async fn accounts_delete_handler(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    refuse_self(&principal, id, "delete")?;
    if !state
        .db
        .delete_account(id)
        .await
        .map_err(|e| db_error("Delete account", e))?
    {
        return Err(not_found("Account"));
    }
    publish(&state, ChangeTable::Accounts, ChangeAction::Delete, id, None);
    audit_admin(&principal, "account.deleted", serde_json::json!({ "account_id": id }));
    Ok(StatusCode::NO_CONTENT)
}
