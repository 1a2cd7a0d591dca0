use std::sync::Arc;

use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use chrono::Utc;
use uuid::Uuid;

use crate::auth::Principal;
use crate::db::{
    ChatHistoryQuery, ChatMessageRecord, ConversationSummary, CreateChatMessageParams, Role,
};
use crate::portal::chat;
use crate::web::handlers::{
    ApiError, audit_admin, db_error, invalid, not_found, own_client, publish,
};
use crate::web::server::AppState;
use crate::web::sse::{ChangeAction, ChangeTable};
use crate::web::types::*;

const DEFAULT_HISTORY: usize = 50;

async fn history(
    state: &AppState,
    client_id: Uuid,
    params: ChatHistoryParams,
) -> Result<Vec<ChatMessageRecord>, ApiError> {
    let query = ChatHistoryQuery {
        before: params.before,
        limit: params
            .limit
            .unwrap_or(DEFAULT_HISTORY)
            .clamp(1, state.portal.page_size_limit),
    };
    state
        .db
        .list_chat_messages(client_id, &query)
        .await
        .map_err(|e| db_error("Load chat history", e))
}

async fn send(
    state: &AppState,
    principal: &Principal,
    client_id: Uuid,
    body: &str,
) -> Result<ChatMessageRecord, ApiError> {
    let body = chat::validate_body(body, state.portal.chat_max_length).map_err(invalid)?;
    let message = state
        .db
        .create_chat_message(&CreateChatMessageParams {
            client_id,
            sender_role: principal.role,
            sender_account_id: Some(principal.account_id),
            body,
        })
        .await
        .map_err(|e| db_error("Send message", e))?;
    publish(
        state,
        ChangeTable::ChatMessages,
        ChangeAction::Insert,
        message.id,
        Some(client_id),
    );
    Ok(message)
}

async fn mark_read(state: &AppState, client_id: Uuid, reader: Role) -> Result<u64, ApiError> {
    let marked = state
        .db
        .mark_chat_read(client_id, reader, Utc::now())
        .await
        .map_err(|e| db_error("Mark chat read", e))?;
    if marked > 0 {
        // Read receipts concern the conversation, not a single message.
        publish(
            state,
            ChangeTable::ChatMessages,
            ChangeAction::Update,
            client_id,
            Some(client_id),
        );
    }
    Ok(marked)
}

// --- Admin ---

/// Inbox: unread conversations first, then most recent.
pub async fn conversations_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<ConversationSummary>>, ApiError> {
    let mut conversations = state
        .db
        .list_conversations()
        .await
        .map_err(|e| db_error("List conversations", e))?;
    chat::sort_conversations(&mut conversations);
    Ok(Json(conversations))
}

pub async fn admin_history_handler(
    State(state): State<Arc<AppState>>,
    Path(client_id): Path<Uuid>,
    Query(params): Query<ChatHistoryParams>,
) -> Result<Json<Vec<ChatMessageRecord>>, ApiError> {
    Ok(Json(history(&state, client_id, params).await?))
}

pub async fn admin_send_handler(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Path(client_id): Path<Uuid>,
    Json(body): Json<SendChatRequest>,
) -> Result<(StatusCode, Json<ChatMessageRecord>), ApiError> {
    let message = send(&state, &principal, client_id, &body.body).await?;
    Ok((StatusCode::CREATED, Json(message)))
}

pub async fn admin_read_handler(
    State(state): State<Arc<AppState>>,
    Path(client_id): Path<Uuid>,
) -> Result<Json<ChatReadResponse>, ApiError> {
    let marked = mark_read(&state, client_id, Role::Admin).await?;
    Ok(Json(ChatReadResponse { marked }))
}

pub async fn admin_delete_message_handler(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Path(message_id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    let message = state
        .db
        .get_chat_message(message_id)
        .await
        .map_err(|e| db_error("Delete message", e))?
        .ok_or_else(|| not_found("Message"))?;
    state
        .db
        .delete_chat_message(message_id)
        .await
        .map_err(|e| db_error("Delete message", e))?;
    publish(
        &state,
        ChangeTable::ChatMessages,
        ChangeAction::Delete,
        message_id,
        Some(message.client_id),
    );
    audit_admin(
        &principal,
        "chat.message_deleted",
        serde_json::json!({ "message_id": message_id, "client_id": message.client_id }),
    );
    Ok(StatusCode::NO_CONTENT)
}

// --- Client portal ---

pub async fn portal_history_handler(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Query(params): Query<ChatHistoryParams>,
) -> Result<Json<Vec<ChatMessageRecord>>, ApiError> {
    let client_id = own_client(&principal)?;
    Ok(Json(history(&state, client_id, params).await?))
}

pub async fn portal_send_handler(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Json(body): Json<SendChatRequest>,
) -> Result<(StatusCode, Json<ChatMessageRecord>), ApiError> {
    let client_id = own_client(&principal)?;
    let message = send(&state, &principal, client_id, &body.body).await?;
    Ok((StatusCode::CREATED, Json(message)))
}

pub async fn portal_read_handler(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
) -> Result<Json<ChatReadResponse>, ApiError> {
    let client_id = own_client(&principal)?;
    let marked = mark_read(&state, client_id, Role::Client).await?;
    Ok(Json(ChatReadResponse { marked }))
}

pub async fn portal_unread_handler(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
) -> Result<Json<UnreadResponse>, ApiError> {
    let client_id = own_client(&principal)?;
    let unread = state
        .db
        .count_unread_chat(client_id, Role::Client)
        .await
        .map_err(|e| db_error("Count unread", e))?;
    Ok(Json(UnreadResponse { unread }))
}
