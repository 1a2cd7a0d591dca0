//! Request and response DTOs for the HTTP API.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

use crate::auth::Principal;
use crate::db::{
    ClientRecord, ClientStatus, RequestKind, RequestStatus, TaskPriority, TaskSort, TaskStatus,
    WeeklyProductRecord,
};
use crate::portal::weekly::LinkInput;

/// Distinguishes an absent field (`None`) from an explicit `null`
/// (`Some(None)`) in partial updates.
fn double_option<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

// --- Health ---

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub uptime_secs: u64,
}

// --- Auth ---

#[derive(Debug, Serialize, Deserialize)]
pub struct AuthErrorResponse {
    pub error: String,
    /// Where a browser should go instead.
    pub redirect: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
    /// Page the user originally asked for.
    pub next: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub principal: Principal,
    pub redirect: String,
}

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub principal: Principal,
    pub home: &'static str,
}

#[derive(Debug, Deserialize)]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
}

// --- Accounts ---

#[derive(Debug, Deserialize)]
pub struct AccountListQuery {
    pub client_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct AccountCreateRequest {
    pub email: String,
    pub display_name: String,
    pub password: String,
    pub role: crate::db::Role,
    pub client_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct AccountDisableRequest {
    pub disabled: bool,
}

#[derive(Debug, Deserialize)]
pub struct PasswordResetRequest {
    pub password: String,
}

// --- Clients ---

#[derive(Debug, Default, Deserialize)]
pub struct ClientListQuery {
    pub q: Option<String>,
    pub status: Option<ClientStatus>,
}

#[derive(Debug, Deserialize)]
pub struct ClientCreateRequest {
    pub name: String,
    pub company: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub website: Option<String>,
    pub status: Option<ClientStatus>,
    pub notes: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ClientPatchRequest {
    pub name: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub company: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub email: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub phone: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub website: Option<Option<String>>,
    pub status: Option<ClientStatus>,
    #[serde(default, deserialize_with = "double_option")]
    pub notes: Option<Option<String>>,
}

/// Contact details a client may edit on its own record.
#[derive(Debug, Default, Deserialize)]
pub struct ProfilePatchRequest {
    #[serde(default, deserialize_with = "double_option")]
    pub email: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub phone: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub website: Option<Option<String>>,
}

#[derive(Debug, Serialize)]
pub struct MeResponse {
    pub principal: Principal,
    pub client: ClientRecord,
}

// --- Tasks ---

#[derive(Debug, Default, Deserialize)]
pub struct TaskListQuery {
    pub client_id: Option<Uuid>,
    pub status: Option<TaskStatus>,
    pub priority: Option<TaskPriority>,
    pub sort: Option<TaskSort>,
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct TaskCreateRequest {
    pub client_id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub status: Option<TaskStatus>,
    pub priority: Option<TaskPriority>,
    pub due_date: Option<NaiveDate>,
}

#[derive(Debug, Default, Deserialize)]
pub struct TaskPatchRequest {
    pub title: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub description: Option<Option<String>>,
    pub status: Option<TaskStatus>,
    pub priority: Option<TaskPriority>,
    #[serde(default, deserialize_with = "double_option")]
    pub due_date: Option<Option<NaiveDate>>,
}

// --- Chat ---

#[derive(Debug, Default, Deserialize)]
pub struct ChatHistoryParams {
    pub before: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct SendChatRequest {
    pub body: String,
}

#[derive(Debug, Serialize)]
pub struct ChatReadResponse {
    pub marked: u64,
}

#[derive(Debug, Serialize)]
pub struct UnreadResponse {
    pub unread: i64,
}

// --- Resources ---

#[derive(Debug, Default, Deserialize)]
pub struct ResourceListQuery {
    pub category: Option<String>,
    /// Admin only: resources visible to this client.
    pub client_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct ResourceCreateRequest {
    pub title: String,
    pub description: Option<String>,
    pub category: Option<String>,
    pub url: Option<String>,
    pub client_id: Option<Uuid>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ResourcePatchRequest {
    pub title: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub description: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub category: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub url: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub client_id: Option<Option<Uuid>>,
    /// Drop the attached file.
    #[serde(default)]
    pub remove_file: bool,
}

// --- Offers ---

#[derive(Debug, Deserialize)]
pub struct OfferCreateRequest {
    pub title: String,
    pub description: Option<String>,
    pub price: Option<Decimal>,
    pub discount_percent: Option<i32>,
    pub valid_from: Option<NaiveDate>,
    pub valid_until: Option<NaiveDate>,
    pub active: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
pub struct OfferPatchRequest {
    pub title: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub description: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub price: Option<Option<Decimal>>,
    #[serde(default, deserialize_with = "double_option")]
    pub discount_percent: Option<Option<i32>>,
    #[serde(default, deserialize_with = "double_option")]
    pub valid_from: Option<Option<NaiveDate>>,
    #[serde(default, deserialize_with = "double_option")]
    pub valid_until: Option<Option<NaiveDate>>,
    pub active: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
pub struct OfferListQuery {
    /// Admin only: restrict to offers available today.
    #[serde(default)]
    pub available: bool,
}

// --- Agency updates ---

#[derive(Debug, Deserialize)]
pub struct UpdateCreateRequest {
    pub title: String,
    pub body: String,
    #[serde(default)]
    pub pinned: bool,
    #[serde(default)]
    pub published: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdatePatchRequest {
    pub title: Option<String>,
    pub body: Option<String>,
    pub pinned: Option<bool>,
    pub published: Option<bool>,
}

// --- Weekly products ---

#[derive(Debug, Deserialize)]
pub struct WeeklyCreateRequest {
    pub title: String,
    pub description: Option<String>,
    pub image_url: Option<String>,
    /// Any day of the featured week.
    pub week_start: NaiveDate,
    #[serde(default)]
    pub links: Vec<LinkInput>,
}

#[derive(Debug, Default, Deserialize)]
pub struct WeeklyPatchRequest {
    pub title: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub description: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub image_url: Option<Option<String>>,
    pub week_start: Option<NaiveDate>,
    pub links: Option<Vec<LinkInput>>,
}

#[derive(Debug, Default, Deserialize)]
pub struct WeeklyListQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct WeeklyPortalResponse {
    pub featured: Option<WeeklyProductRecord>,
    pub previous: Vec<WeeklyProductRecord>,
}

// --- Requests ---

#[derive(Debug, Default, Deserialize)]
pub struct RequestListQuery {
    pub client_id: Option<Uuid>,
    pub status: Option<RequestStatus>,
}

#[derive(Debug, Deserialize)]
pub struct RequestCreateRequest {
    pub kind: RequestKind,
    pub subject: String,
    pub body: String,
    pub offer_id: Option<Uuid>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RequestPatchRequest {
    pub status: Option<RequestStatus>,
    #[serde(default, deserialize_with = "double_option")]
    pub admin_response: Option<Option<String>>,
}

#[derive(Debug, Serialize)]
pub struct RequestDetailResponse {
    pub request: crate::db::RequestRecord,
    /// Statuses the admin may move the request to next.
    pub next_statuses: Vec<RequestStatus>,
}

// --- Settings ---

#[derive(Debug, Deserialize)]
pub struct SettingWriteRequest {
    pub value: serde_json::Value,
}

#[derive(Debug, Serialize)]
pub struct SettingResponse {
    pub key: String,
    pub value: serde_json::Value,
}

// --- Audit ---

#[derive(Debug, Default, Deserialize)]
pub struct AuditQuery {
    pub event_type: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct AuditListResponse {
    pub enabled: bool,
    pub events: Vec<crate::portal::audit::AuditEntry>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn patch_distinguishes_absent_from_null() {
        let patch: ClientPatchRequest =
            serde_json::from_str(r#"{"company": null, "phone": "+1 555 0100"}"#).expect("json");
        assert_eq!(patch.company, Some(None));
        assert_eq!(patch.phone, Some(Some("+1 555 0100".to_string())));
        assert_eq!(patch.email, None);
        assert_eq!(patch.name, None);
    }

    #[test]
    fn enums_use_wire_names() {
        let query: TaskListQuery =
            serde_json::from_str(r#"{"status": "in_progress", "sort": "priority"}"#).expect("json");
        assert_eq!(query.status, Some(TaskStatus::InProgress));
        assert_eq!(query.sort, Some(TaskSort::Priority));
    }
}
