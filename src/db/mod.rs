//! Database abstraction layer.
//!
//! Provides a backend-agnostic `Database` trait that unifies all persistence
//! operations. Two implementations exist behind feature flags:
//!
//! - `postgres` (default): Uses `deadpool-postgres` + `tokio-postgres`
//! - `libsql`: Uses libSQL (Turso's SQLite fork) for embedded/edge deployment
//!
//! Records mirror the tables one-to-one. Invariants that a hosted database
//! would otherwise enforce through constraints or row-level security (name
//! uniqueness, task completion stamps, request status transitions) are
//! enforced by both backends identically.

#[cfg(feature = "postgres")]
pub mod postgres;

#[cfg(feature = "libsql")]
pub mod libsql;

#[cfg(feature = "libsql")]
pub mod libsql_migrations;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DatabaseError;

/// Create a database backend from configuration, run migrations, and return it.
pub async fn connect_from_config(
    config: &crate::config::DatabaseConfig,
) -> Result<Arc<dyn Database>, DatabaseError> {
    match config.backend {
        #[cfg(feature = "libsql")]
        crate::config::DatabaseBackend::LibSql => {
            use secrecy::ExposeSecret as _;

            let default_path = crate::config::default_libsql_path();
            let db_path = config.libsql_path.as_deref().unwrap_or(&default_path);

            let backend = if let Some(ref url) = config.libsql_url {
                let token = config.libsql_auth_token.as_ref().ok_or_else(|| {
                    DatabaseError::Pool(
                        "LIBSQL_AUTH_TOKEN required when LIBSQL_URL is set".to_string(),
                    )
                })?;
                libsql::LibSqlBackend::new_remote_replica(db_path, url, token.expose_secret())
                    .await?
            } else {
                libsql::LibSqlBackend::new_local(db_path).await?
            };
            backend.run_migrations().await?;
            tracing::info!(path = db_path, "Connected to libSQL database");
            Ok(Arc::new(backend))
        }
        #[cfg(feature = "postgres")]
        crate::config::DatabaseBackend::Postgres => {
            let pg = postgres::PgBackend::new(config).await?;
            pg.run_migrations().await?;
            tracing::info!("Connected to PostgreSQL database");
            Ok(Arc::new(pg))
        }
        #[allow(unreachable_patterns)]
        other => Err(DatabaseError::Pool(format!(
            "Database backend '{}' is not compiled in. Enable the '{}' feature.",
            other.as_str(),
            other.as_str()
        ))),
    }
}

// ==================== Enumerations ====================

/// Which portal an account belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Client,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Client => "client",
        }
    }

    pub fn from_db_value(value: &str) -> Option<Self> {
        match value {
            "admin" => Some(Self::Admin),
            "client" => Some(Self::Client),
            _ => None,
        }
    }

    /// The role on the other side of a chat conversation.
    pub fn counterpart(self) -> Self {
        match self {
            Self::Admin => Self::Client,
            Self::Client => Self::Admin,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientStatus {
    Lead,
    Active,
    Paused,
    Archived,
}

impl ClientStatus {
    pub const ALL: [Self; 4] = [Self::Lead, Self::Active, Self::Paused, Self::Archived];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Lead => "lead",
            Self::Active => "active",
            Self::Paused => "paused",
            Self::Archived => "archived",
        }
    }

    pub fn from_db_value(value: &str) -> Option<Self> {
        match value {
            "lead" => Some(Self::Lead),
            "active" => Some(Self::Active),
            "paused" => Some(Self::Paused),
            "archived" => Some(Self::Archived),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Todo,
    InProgress,
    Done,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Todo => "todo",
            Self::InProgress => "in_progress",
            Self::Done => "done",
        }
    }

    pub fn from_db_value(value: &str) -> Option<Self> {
        match value {
            "todo" => Some(Self::Todo),
            "in_progress" => Some(Self::InProgress),
            "done" => Some(Self::Done),
            _ => None,
        }
    }

    pub fn is_open(self) -> bool {
        !matches!(self, Self::Done)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskPriority {
    Low,
    Medium,
    High,
    Urgent,
}

impl TaskPriority {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Urgent => "urgent",
        }
    }

    pub fn from_db_value(value: &str) -> Option<Self> {
        match value {
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            "urgent" => Some(Self::Urgent),
            _ => None,
        }
    }
}

/// Ordering for task listings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskSort {
    /// Soonest due first, undated tasks last.
    #[default]
    DueDate,
    /// Urgent first.
    Priority,
    /// Newest first.
    Created,
}

impl TaskSort {
    /// SQL `ORDER BY` clause shared by both backends.
    pub(crate) fn order_by_sql(self) -> &'static str {
        match self {
            Self::DueDate => "due_date IS NULL, due_date ASC, created_at DESC",
            Self::Priority => {
                "CASE priority WHEN 'urgent' THEN 0 WHEN 'high' THEN 1 WHEN 'medium' THEN 2 ELSE 3 END, \
                 due_date IS NULL, due_date ASC, created_at DESC"
            }
            Self::Created => "created_at DESC",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestKind {
    General,
    Offer,
    Resource,
    Support,
}

impl RequestKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::General => "general",
            Self::Offer => "offer",
            Self::Resource => "resource",
            Self::Support => "support",
        }
    }

    pub fn from_db_value(value: &str) -> Option<Self> {
        match value {
            "general" => Some(Self::General),
            "offer" => Some(Self::Offer),
            "resource" => Some(Self::Resource),
            "support" => Some(Self::Support),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    InReview,
    Approved,
    Rejected,
    Completed,
    Cancelled,
}

impl RequestStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InReview => "in_review",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn from_db_value(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "in_review" => Some(Self::InReview),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            "completed" => Some(Self::Completed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Rejected | Self::Completed | Self::Cancelled)
    }

    /// Statuses in which the requesting client may still cancel.
    pub fn is_cancellable(self) -> bool {
        matches!(self, Self::Pending | Self::InReview)
    }

    pub fn can_transition_to(self, next: Self) -> bool {
        use RequestStatus::*;
        matches!(
            (self, next),
            (Pending, InReview | Approved | Rejected | Cancelled)
                | (InReview, Approved | Rejected | Cancelled)
                | (Approved, Completed)
        )
    }
}

// ==================== Records ====================

#[derive(Debug, Clone, Serialize)]
pub struct AccountRecord {
    pub id: Uuid,
    pub email: String,
    pub display_name: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub role: Role,
    pub client_id: Option<Uuid>,
    pub disabled: bool,
    pub last_login_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CreateAccountParams {
    pub email: String,
    pub display_name: String,
    pub password_hash: String,
    pub role: Role,
    pub client_id: Option<Uuid>,
}

#[derive(Debug, Clone)]
pub struct SessionRecord {
    pub id: Uuid,
    pub account_id: Uuid,
    pub token_hash: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientRecord {
    pub id: Uuid,
    pub name: String,
    pub name_normalized: String,
    pub company: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub website: Option<String>,
    pub status: ClientStatus,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CreateClientParams {
    pub name: String,
    pub company: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub website: Option<String>,
    pub status: ClientStatus,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct UpdateClientParams {
    pub name: Option<String>,
    pub company: Option<Option<String>>,
    pub email: Option<Option<String>>,
    pub phone: Option<Option<String>>,
    pub website: Option<Option<String>>,
    pub status: Option<ClientStatus>,
    pub notes: Option<Option<String>>,
}

#[derive(Debug, Clone, Default)]
pub struct ClientListFilter {
    pub query: Option<String>,
    pub status: Option<ClientStatus>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: Uuid,
    pub client_id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub status: TaskStatus,
    pub priority: TaskPriority,
    pub due_date: Option<NaiveDate>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TaskRecord {
    pub fn is_overdue(&self, today: NaiveDate) -> bool {
        self.status.is_open() && self.due_date.is_some_and(|due| due < today)
    }
}

#[derive(Debug, Clone)]
pub struct CreateTaskParams {
    pub client_id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub status: TaskStatus,
    pub priority: TaskPriority,
    pub due_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Default)]
pub struct UpdateTaskParams {
    pub title: Option<String>,
    pub description: Option<Option<String>>,
    pub status: Option<TaskStatus>,
    pub priority: Option<TaskPriority>,
    pub due_date: Option<Option<NaiveDate>>,
}

#[derive(Debug, Clone, Default)]
pub struct TaskListFilter {
    pub client_id: Option<Uuid>,
    pub status: Option<TaskStatus>,
    pub priority: Option<TaskPriority>,
    pub sort: TaskSort,
    pub limit: Option<usize>,
}

/// Completion stamp for a task moving from `previous` to `next`.
///
/// Entering `done` stamps `now`, staying in `done` keeps the old stamp, and
/// leaving `done` clears it.
pub fn task_completed_at(
    previous: Option<(TaskStatus, Option<DateTime<Utc>>)>,
    next: TaskStatus,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    match (previous, next) {
        (_, TaskStatus::Todo | TaskStatus::InProgress) => None,
        (Some((TaskStatus::Done, Some(stamp))), TaskStatus::Done) => Some(stamp),
        (_, TaskStatus::Done) => Some(now),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessageRecord {
    pub id: Uuid,
    pub client_id: Uuid,
    pub sender_role: Role,
    pub sender_account_id: Option<Uuid>,
    pub body: String,
    pub read_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CreateChatMessageParams {
    pub client_id: Uuid,
    pub sender_role: Role,
    pub sender_account_id: Option<Uuid>,
    pub body: String,
}

#[derive(Debug, Clone)]
pub struct ChatHistoryQuery {
    /// Only messages strictly older than this timestamp.
    pub before: Option<DateTime<Utc>>,
    pub limit: usize,
}

/// One row of the admin chat inbox.
#[derive(Debug, Clone, Serialize)]
pub struct ConversationSummary {
    pub client_id: Uuid,
    pub client_name: String,
    pub last_message: Option<ChatMessageRecord>,
    pub unread_count: i64,
}

/// Reference to an object held by the file store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredFileRef {
    pub key: String,
    pub file_name: String,
    pub content_type: String,
    pub size_bytes: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceRecord {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub category: Option<String>,
    pub url: Option<String>,
    pub file: Option<StoredFileRef>,
    /// `None` means the resource is shared with every client.
    pub client_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ResourceRecord {
    pub fn is_visible_to(&self, client_id: Uuid) -> bool {
        self.client_id.is_none_or(|owner| owner == client_id)
    }
}

#[derive(Debug, Clone)]
pub struct CreateResourceParams {
    pub title: String,
    pub description: Option<String>,
    pub category: Option<String>,
    pub url: Option<String>,
    pub file: Option<StoredFileRef>,
    pub client_id: Option<Uuid>,
}

#[derive(Debug, Clone, Default)]
pub struct UpdateResourceParams {
    pub title: Option<String>,
    pub description: Option<Option<String>>,
    pub category: Option<Option<String>>,
    pub url: Option<Option<String>>,
    pub file: Option<Option<StoredFileRef>>,
    pub client_id: Option<Option<Uuid>>,
}

#[derive(Debug, Clone, Default)]
pub struct ResourceListFilter {
    /// Restrict to resources shared with everyone or owned by this client.
    pub visible_to: Option<Uuid>,
    pub category: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OfferRecord {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub price: Option<Decimal>,
    pub discount_percent: Option<i32>,
    pub valid_from: Option<NaiveDate>,
    pub valid_until: Option<NaiveDate>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OfferRecord {
    /// Active and inside its validity window on `date`.
    pub fn is_available_on(&self, date: NaiveDate) -> bool {
        self.active
            && self.valid_from.is_none_or(|from| from <= date)
            && self.valid_until.is_none_or(|until| until >= date)
    }
}

#[derive(Debug, Clone)]
pub struct CreateOfferParams {
    pub title: String,
    pub description: Option<String>,
    pub price: Option<Decimal>,
    pub discount_percent: Option<i32>,
    pub valid_from: Option<NaiveDate>,
    pub valid_until: Option<NaiveDate>,
    pub active: bool,
}

#[derive(Debug, Clone, Default)]
pub struct UpdateOfferParams {
    pub title: Option<String>,
    pub description: Option<Option<String>>,
    pub price: Option<Option<Decimal>>,
    pub discount_percent: Option<Option<i32>>,
    pub valid_from: Option<Option<NaiveDate>>,
    pub valid_until: Option<Option<NaiveDate>>,
    pub active: Option<bool>,
}

#[derive(Debug, Clone, Default)]
pub struct OfferListFilter {
    /// Only offers available on this date.
    pub available_on: Option<NaiveDate>,
}

/// Validate the offer invariants: discount within 0..=100 and a window whose
/// end does not precede its start.
pub fn validate_offer_terms(
    discount_percent: Option<i32>,
    valid_from: Option<NaiveDate>,
    valid_until: Option<NaiveDate>,
    price: Option<Decimal>,
) -> Result<(), DatabaseError> {
    if let Some(discount) = discount_percent
        && !(0..=100).contains(&discount)
    {
        return Err(DatabaseError::Constraint(format!(
            "discount_percent must be between 0 and 100, got {discount}"
        )));
    }
    if let (Some(from), Some(until)) = (valid_from, valid_until)
        && until < from
    {
        return Err(DatabaseError::Constraint(format!(
            "valid_until {until} precedes valid_from {from}"
        )));
    }
    if let Some(price) = price
        && price.is_sign_negative()
    {
        return Err(DatabaseError::Constraint(
            "price must not be negative".to_string(),
        ));
    }
    Ok(())
}

/// An agency announcement shown on the client portal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgencyUpdateRecord {
    pub id: Uuid,
    pub title: String,
    pub body: String,
    pub pinned: bool,
    pub published: bool,
    pub published_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CreateAgencyUpdateParams {
    pub title: String,
    pub body: String,
    pub pinned: bool,
    pub published: bool,
}

#[derive(Debug, Clone, Default)]
pub struct UpdateAgencyUpdateParams {
    pub title: Option<String>,
    pub body: Option<String>,
    pub pinned: Option<bool>,
    pub published: Option<bool>,
}

/// Publication stamp when `published` changes: first publish stamps `now`,
/// staying published keeps the stamp, unpublishing clears it.
pub fn update_published_at(
    previous: Option<(bool, Option<DateTime<Utc>>)>,
    published: bool,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    if !published {
        return None;
    }
    match previous {
        Some((true, Some(stamp))) => Some(stamp),
        _ => Some(now),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeeklyProductLinkRecord {
    pub id: Uuid,
    pub product_id: Uuid,
    pub label: String,
    pub url: String,
    pub position: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeeklyProductRecord {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub image_url: Option<String>,
    /// Monday of the featured week.
    pub week_start: NaiveDate,
    pub links: Vec<WeeklyProductLinkRecord>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WeeklyProductLinkParams {
    pub label: String,
    pub url: String,
}

#[derive(Debug, Clone)]
pub struct CreateWeeklyProductParams {
    pub title: String,
    pub description: Option<String>,
    pub image_url: Option<String>,
    pub week_start: NaiveDate,
    pub links: Vec<WeeklyProductLinkParams>,
}

#[derive(Debug, Clone, Default)]
pub struct UpdateWeeklyProductParams {
    pub title: Option<String>,
    pub description: Option<Option<String>>,
    pub image_url: Option<Option<String>>,
    pub week_start: Option<NaiveDate>,
    /// Replaces the full link list when present.
    pub links: Option<Vec<WeeklyProductLinkParams>>,
}

#[derive(Debug, Clone, Default)]
pub struct WeeklyProductFilter {
    /// Hide products scheduled for weeks starting after this date.
    pub up_to: Option<NaiveDate>,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestRecord {
    pub id: Uuid,
    pub client_id: Uuid,
    pub kind: RequestKind,
    pub subject: String,
    pub body: String,
    pub offer_id: Option<Uuid>,
    pub status: RequestStatus,
    pub admin_response: Option<String>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CreateRequestParams {
    pub client_id: Uuid,
    pub kind: RequestKind,
    pub subject: String,
    pub body: String,
    pub offer_id: Option<Uuid>,
}

#[derive(Debug, Clone, Default)]
pub struct UpdateRequestParams {
    pub status: Option<RequestStatus>,
    pub admin_response: Option<Option<String>>,
}

#[derive(Debug, Clone, Default)]
pub struct RequestListFilter {
    pub client_id: Option<Uuid>,
    pub status: Option<RequestStatus>,
}

/// Resolve a requested status change against the transition table.
///
/// Returns the status to persist and the `resolved_at` stamp.
pub fn resolve_request_transition(
    existing: &RequestRecord,
    requested: Option<RequestStatus>,
    now: DateTime<Utc>,
) -> Result<(RequestStatus, Option<DateTime<Utc>>), DatabaseError> {
    let Some(next) = requested.filter(|next| *next != existing.status) else {
        return Ok((existing.status, existing.resolved_at));
    };
    if !existing.status.can_transition_to(next) {
        return Err(DatabaseError::Constraint(format!(
            "request cannot move from {} to {}",
            existing.status.as_str(),
            next.as_str()
        )));
    }
    let resolved_at = if next.is_terminal() { Some(now) } else { None };
    Ok((next, resolved_at))
}

#[derive(Debug, Clone, Serialize)]
pub struct SettingRow {
    pub key: String,
    pub value: serde_json::Value,
    pub updated_at: DateTime<Utc>,
}

/// Aggregates for the admin dashboard.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AdminDashboardCounts {
    pub clients_by_status: BTreeMap<String, i64>,
    pub open_tasks: i64,
    pub overdue_tasks: i64,
    pub tasks_completed_last_7_days: i64,
    pub pending_requests: i64,
    pub unread_messages: i64,
}

/// Aggregates for one client's portal home.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ClientDashboardCounts {
    pub open_tasks: i64,
    pub overdue_tasks: i64,
    pub unread_messages: i64,
    pub open_requests: i64,
}

/// Normalize client names for uniqueness and search.
pub fn normalize_client_name(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut prev_sep = true;

    for ch in raw.chars() {
        if ch.is_alphanumeric() {
            out.extend(ch.to_lowercase());
            prev_sep = false;
        } else if !prev_sep {
            out.push(' ');
            prev_sep = true;
        }
    }

    out.trim().to_string()
}

/// Normalize week dates to the Monday of their ISO week.
pub fn week_start_of(date: NaiveDate) -> NaiveDate {
    use chrono::Datelike;
    date - chrono::Duration::days(i64::from(date.weekday().num_days_from_monday()))
}

/// Cap a caller-supplied page size.
pub(crate) fn clamp_limit(limit: Option<usize>, max: usize) -> usize {
    limit.unwrap_or(max).clamp(1, max)
}

// ==================== Sub-traits ====================
//
// Each sub-trait groups related persistence methods. The `Database` supertrait
// combines them all; leaf consumers can depend on a specific sub-trait instead.

#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn create_account(
        &self,
        input: &CreateAccountParams,
    ) -> Result<AccountRecord, DatabaseError>;
    async fn get_account(&self, account_id: Uuid) -> Result<Option<AccountRecord>, DatabaseError>;
    async fn get_account_by_email(
        &self,
        email: &str,
    ) -> Result<Option<AccountRecord>, DatabaseError>;
    async fn list_accounts(
        &self,
        client_id: Option<Uuid>,
    ) -> Result<Vec<AccountRecord>, DatabaseError>;
    async fn set_account_password(
        &self,
        account_id: Uuid,
        password_hash: &str,
    ) -> Result<bool, DatabaseError>;
    async fn set_account_disabled(
        &self,
        account_id: Uuid,
        disabled: bool,
    ) -> Result<bool, DatabaseError>;
    async fn touch_account_login(
        &self,
        account_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<(), DatabaseError>;
    async fn delete_account(&self, account_id: Uuid) -> Result<bool, DatabaseError>;
    async fn count_admin_accounts(&self) -> Result<i64, DatabaseError>;
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn create_session(
        &self,
        account_id: Uuid,
        token_hash: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<SessionRecord, DatabaseError>;
    /// Look up a session that has not expired at `now`.
    async fn get_live_session(
        &self,
        token_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<SessionRecord>, DatabaseError>;
    async fn delete_session(&self, token_hash: &str) -> Result<bool, DatabaseError>;
    async fn delete_sessions_for_account(&self, account_id: Uuid) -> Result<u64, DatabaseError>;
    async fn purge_expired_sessions(&self, now: DateTime<Utc>) -> Result<u64, DatabaseError>;
}

#[async_trait]
pub trait ClientStore: Send + Sync {
    async fn create_client(&self, input: &CreateClientParams)
    -> Result<ClientRecord, DatabaseError>;
    async fn list_clients(
        &self,
        filter: &ClientListFilter,
    ) -> Result<Vec<ClientRecord>, DatabaseError>;
    async fn get_client(&self, client_id: Uuid) -> Result<Option<ClientRecord>, DatabaseError>;
    async fn update_client(
        &self,
        client_id: Uuid,
        input: &UpdateClientParams,
    ) -> Result<Option<ClientRecord>, DatabaseError>;
    async fn delete_client(&self, client_id: Uuid) -> Result<bool, DatabaseError>;
}

#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn create_task(&self, input: &CreateTaskParams) -> Result<TaskRecord, DatabaseError>;
    async fn list_tasks(&self, filter: &TaskListFilter) -> Result<Vec<TaskRecord>, DatabaseError>;
    async fn get_task(&self, task_id: Uuid) -> Result<Option<TaskRecord>, DatabaseError>;
    async fn update_task(
        &self,
        task_id: Uuid,
        input: &UpdateTaskParams,
    ) -> Result<Option<TaskRecord>, DatabaseError>;
    async fn delete_task(&self, task_id: Uuid) -> Result<bool, DatabaseError>;
}

#[async_trait]
pub trait ChatStore: Send + Sync {
    async fn create_chat_message(
        &self,
        input: &CreateChatMessageParams,
    ) -> Result<ChatMessageRecord, DatabaseError>;
    /// Messages of one conversation, oldest first.
    async fn list_chat_messages(
        &self,
        client_id: Uuid,
        query: &ChatHistoryQuery,
    ) -> Result<Vec<ChatMessageRecord>, DatabaseError>;
    async fn get_chat_message(
        &self,
        message_id: Uuid,
    ) -> Result<Option<ChatMessageRecord>, DatabaseError>;
    /// Mark every message sent by the counterpart of `reader` as read.
    async fn mark_chat_read(
        &self,
        client_id: Uuid,
        reader: Role,
        at: DateTime<Utc>,
    ) -> Result<u64, DatabaseError>;
    async fn count_unread_chat(&self, client_id: Uuid, reader: Role) -> Result<i64, DatabaseError>;
    /// One summary per client, for the admin inbox.
    async fn list_conversations(&self) -> Result<Vec<ConversationSummary>, DatabaseError>;
    async fn delete_chat_message(&self, message_id: Uuid) -> Result<bool, DatabaseError>;
}

#[async_trait]
pub trait ResourceStore: Send + Sync {
    async fn create_resource(
        &self,
        input: &CreateResourceParams,
    ) -> Result<ResourceRecord, DatabaseError>;
    async fn list_resources(
        &self,
        filter: &ResourceListFilter,
    ) -> Result<Vec<ResourceRecord>, DatabaseError>;
    async fn get_resource(&self, resource_id: Uuid)
    -> Result<Option<ResourceRecord>, DatabaseError>;
    async fn update_resource(
        &self,
        resource_id: Uuid,
        input: &UpdateResourceParams,
    ) -> Result<Option<ResourceRecord>, DatabaseError>;
    async fn delete_resource(&self, resource_id: Uuid) -> Result<bool, DatabaseError>;
}

#[async_trait]
pub trait OfferStore: Send + Sync {
    async fn create_offer(&self, input: &CreateOfferParams) -> Result<OfferRecord, DatabaseError>;
    async fn list_offers(&self, filter: &OfferListFilter)
    -> Result<Vec<OfferRecord>, DatabaseError>;
    async fn get_offer(&self, offer_id: Uuid) -> Result<Option<OfferRecord>, DatabaseError>;
    async fn update_offer(
        &self,
        offer_id: Uuid,
        input: &UpdateOfferParams,
    ) -> Result<Option<OfferRecord>, DatabaseError>;
    async fn delete_offer(&self, offer_id: Uuid) -> Result<bool, DatabaseError>;
}

#[async_trait]
pub trait AgencyUpdateStore: Send + Sync {
    async fn create_agency_update(
        &self,
        input: &CreateAgencyUpdateParams,
    ) -> Result<AgencyUpdateRecord, DatabaseError>;
    /// Pinned first, then newest.
    async fn list_agency_updates(
        &self,
        published_only: bool,
    ) -> Result<Vec<AgencyUpdateRecord>, DatabaseError>;
    async fn get_agency_update(
        &self,
        update_id: Uuid,
    ) -> Result<Option<AgencyUpdateRecord>, DatabaseError>;
    async fn update_agency_update(
        &self,
        update_id: Uuid,
        input: &UpdateAgencyUpdateParams,
    ) -> Result<Option<AgencyUpdateRecord>, DatabaseError>;
    async fn delete_agency_update(&self, update_id: Uuid) -> Result<bool, DatabaseError>;
}

#[async_trait]
pub trait WeeklyProductStore: Send + Sync {
    async fn create_weekly_product(
        &self,
        input: &CreateWeeklyProductParams,
    ) -> Result<WeeklyProductRecord, DatabaseError>;
    /// Newest week first.
    async fn list_weekly_products(
        &self,
        filter: &WeeklyProductFilter,
    ) -> Result<Vec<WeeklyProductRecord>, DatabaseError>;
    async fn get_weekly_product(
        &self,
        product_id: Uuid,
    ) -> Result<Option<WeeklyProductRecord>, DatabaseError>;
    async fn get_weekly_product_for_week(
        &self,
        week_start: NaiveDate,
    ) -> Result<Option<WeeklyProductRecord>, DatabaseError>;
    async fn update_weekly_product(
        &self,
        product_id: Uuid,
        input: &UpdateWeeklyProductParams,
    ) -> Result<Option<WeeklyProductRecord>, DatabaseError>;
    async fn delete_weekly_product(&self, product_id: Uuid) -> Result<bool, DatabaseError>;
}

#[async_trait]
pub trait RequestStore: Send + Sync {
    async fn create_request(
        &self,
        input: &CreateRequestParams,
    ) -> Result<RequestRecord, DatabaseError>;
    /// Newest first.
    async fn list_requests(
        &self,
        filter: &RequestListFilter,
    ) -> Result<Vec<RequestRecord>, DatabaseError>;
    async fn get_request(&self, request_id: Uuid) -> Result<Option<RequestRecord>, DatabaseError>;
    /// Apply a partial update; status changes must follow the transition table.
    async fn update_request(
        &self,
        request_id: Uuid,
        input: &UpdateRequestParams,
    ) -> Result<Option<RequestRecord>, DatabaseError>;
    async fn delete_request(&self, request_id: Uuid) -> Result<bool, DatabaseError>;
}

#[async_trait]
pub trait SettingsStore: Send + Sync {
    async fn get_setting(&self, key: &str) -> Result<Option<serde_json::Value>, DatabaseError>;
    async fn set_setting(&self, key: &str, value: &serde_json::Value)
    -> Result<(), DatabaseError>;
    async fn delete_setting(&self, key: &str) -> Result<bool, DatabaseError>;
    async fn list_settings(&self) -> Result<Vec<SettingRow>, DatabaseError>;
}

#[async_trait]
pub trait DashboardStore: Send + Sync {
    async fn admin_dashboard_counts(
        &self,
        today: NaiveDate,
    ) -> Result<AdminDashboardCounts, DatabaseError>;
    async fn client_dashboard_counts(
        &self,
        client_id: Uuid,
        today: NaiveDate,
    ) -> Result<ClientDashboardCounts, DatabaseError>;
}

/// Backend-agnostic database supertrait.
#[async_trait]
pub trait Database:
    AccountStore
    + SessionStore
    + ClientStore
    + TaskStore
    + ChatStore
    + ResourceStore
    + OfferStore
    + AgencyUpdateStore
    + WeeklyProductStore
    + RequestStore
    + SettingsStore
    + DashboardStore
    + Send
    + Sync
{
    /// Run schema migrations for this backend.
    async fn run_migrations(&self) -> Result<(), DatabaseError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(status: RequestStatus) -> RequestRecord {
        let now = Utc::now();
        RequestRecord {
            id: Uuid::new_v4(),
            client_id: Uuid::new_v4(),
            kind: RequestKind::General,
            subject: "Logo refresh".to_string(),
            body: "Could we get a new logo?".to_string(),
            offer_id: None,
            status,
            admin_response: None,
            resolved_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn normalize_client_name_collapses_punctuation() {
        assert_eq!(normalize_client_name("  Acme, Inc. "), "acme inc");
        assert_eq!(normalize_client_name("Café--Nord"), "café nord");
        assert_eq!(normalize_client_name("!!!"), "");
    }

    #[test]
    fn week_start_is_monday() {
        let sunday = NaiveDate::from_ymd_opt(2026, 3, 15).expect("date");
        let monday = NaiveDate::from_ymd_opt(2026, 3, 9).expect("date");
        assert_eq!(week_start_of(sunday), monday);
        assert_eq!(week_start_of(monday), monday);
    }

    #[test]
    fn task_completion_stamp_follows_status() {
        let earlier = Utc::now() - chrono::Duration::days(2);
        let now = Utc::now();

        assert_eq!(task_completed_at(None, TaskStatus::Done, now), Some(now));
        assert_eq!(task_completed_at(None, TaskStatus::Todo, now), None);
        assert_eq!(
            task_completed_at(Some((TaskStatus::Done, Some(earlier))), TaskStatus::Done, now),
            Some(earlier)
        );
        assert_eq!(
            task_completed_at(Some((TaskStatus::Done, Some(earlier))), TaskStatus::InProgress, now),
            None
        );
        assert_eq!(
            task_completed_at(Some((TaskStatus::Todo, None)), TaskStatus::Done, now),
            Some(now)
        );
    }

    #[test]
    fn request_transitions_follow_table() {
        use RequestStatus::*;
        assert!(Pending.can_transition_to(InReview));
        assert!(Pending.can_transition_to(Cancelled));
        assert!(InReview.can_transition_to(Approved));
        assert!(Approved.can_transition_to(Completed));
        assert!(!Pending.can_transition_to(Completed));
        assert!(!Approved.can_transition_to(Cancelled));
        for terminal in [Rejected, Completed, Cancelled] {
            for next in [Pending, InReview, Approved, Rejected, Completed, Cancelled] {
                assert!(!terminal.can_transition_to(next), "{terminal:?} -> {next:?}");
            }
        }
    }

    #[test]
    fn resolve_request_transition_stamps_terminal_states() {
        let now = Utc::now();
        let pending = request(RequestStatus::Pending);

        let (status, resolved) =
            resolve_request_transition(&pending, Some(RequestStatus::Rejected), now)
                .expect("allowed");
        assert_eq!(status, RequestStatus::Rejected);
        assert_eq!(resolved, Some(now));

        let (status, resolved) =
            resolve_request_transition(&pending, Some(RequestStatus::InReview), now)
                .expect("allowed");
        assert_eq!(status, RequestStatus::InReview);
        assert_eq!(resolved, None);

        let err = resolve_request_transition(&pending, Some(RequestStatus::Completed), now)
            .expect_err("pending cannot complete");
        assert!(matches!(err, DatabaseError::Constraint(_)));
    }

    #[test]
    fn resolve_request_transition_same_status_is_noop() {
        let mut done = request(RequestStatus::Completed);
        let stamp = Utc::now() - chrono::Duration::hours(3);
        done.resolved_at = Some(stamp);
        let (status, resolved) =
            resolve_request_transition(&done, Some(RequestStatus::Completed), Utc::now())
                .expect("no-op");
        assert_eq!(status, RequestStatus::Completed);
        assert_eq!(resolved, Some(stamp));
    }

    #[test]
    fn offer_terms_are_validated() {
        let d = |day| NaiveDate::from_ymd_opt(2026, 5, day).expect("date");
        assert!(validate_offer_terms(Some(15), Some(d(1)), Some(d(31)), None).is_ok());
        assert!(validate_offer_terms(Some(101), None, None, None).is_err());
        assert!(validate_offer_terms(Some(-1), None, None, None).is_err());
        assert!(validate_offer_terms(None, Some(d(10)), Some(d(9)), None).is_err());
        assert!(validate_offer_terms(None, None, None, Some(Decimal::new(-100, 2))).is_err());
    }

    #[test]
    fn offer_availability_window() {
        let d = |day| NaiveDate::from_ymd_opt(2026, 5, day).expect("date");
        let now = Utc::now();
        let offer = OfferRecord {
            id: Uuid::new_v4(),
            title: "Spring audit".to_string(),
            description: None,
            price: None,
            discount_percent: Some(20),
            valid_from: Some(d(10)),
            valid_until: Some(d(20)),
            active: true,
            created_at: now,
            updated_at: now,
        };
        assert!(!offer.is_available_on(d(9)));
        assert!(offer.is_available_on(d(10)));
        assert!(offer.is_available_on(d(20)));
        assert!(!offer.is_available_on(d(21)));

        let inactive = OfferRecord {
            active: false,
            ..offer
        };
        assert!(!inactive.is_available_on(d(15)));
    }

    #[test]
    fn published_at_follows_publication() {
        let earlier = Utc::now() - chrono::Duration::days(1);
        let now = Utc::now();
        assert_eq!(update_published_at(None, true, now), Some(now));
        assert_eq!(update_published_at(None, false, now), None);
        assert_eq!(
            update_published_at(Some((true, Some(earlier))), true, now),
            Some(earlier)
        );
        assert_eq!(update_published_at(Some((true, Some(earlier))), false, now), None);
    }

    #[test]
    fn clamp_limit_bounds() {
        assert_eq!(clamp_limit(None, 200), 200);
        assert_eq!(clamp_limit(Some(0), 200), 1);
        assert_eq!(clamp_limit(Some(50), 200), 50);
        assert_eq!(clamp_limit(Some(5000), 200), 200);
    }
}
