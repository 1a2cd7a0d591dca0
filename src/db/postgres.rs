//! PostgreSQL backend for the Database trait.
//!
//! Uses a `deadpool-postgres` pool. Schema migrations are embedded from
//! `migrations/` at compile time and applied with refinery.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use deadpool_postgres::{GenericClient, Pool};
use secrecy::ExposeSecret;
use tokio_postgres::types::ToSql;
use uuid::Uuid;

use crate::config::DatabaseConfig;
use crate::db::{
    AccountRecord, AccountStore, AdminDashboardCounts, AgencyUpdateRecord, AgencyUpdateStore,
    ChatHistoryQuery, ChatMessageRecord, ChatStore, ClientDashboardCounts, ClientListFilter,
    ClientRecord, ClientStatus, ClientStore, ConversationSummary, CreateAccountParams,
    CreateAgencyUpdateParams, CreateChatMessageParams, CreateClientParams, CreateOfferParams,
    CreateRequestParams, CreateResourceParams, CreateTaskParams, CreateWeeklyProductParams,
    DashboardStore, Database, OfferListFilter, OfferRecord, OfferStore, RequestKind,
    RequestListFilter, RequestRecord, RequestStatus, RequestStore, ResourceListFilter,
    ResourceRecord, ResourceStore, Role, SessionRecord, SessionStore, SettingRow, SettingsStore,
    StoredFileRef, TaskListFilter, TaskPriority, TaskRecord, TaskStatus, TaskStore,
    UpdateAgencyUpdateParams, UpdateClientParams, UpdateOfferParams, UpdateRequestParams,
    UpdateResourceParams, UpdateTaskParams, UpdateWeeklyProductParams, WeeklyProductFilter,
    WeeklyProductLinkParams, WeeklyProductLinkRecord, WeeklyProductRecord, WeeklyProductStore,
    normalize_client_name, resolve_request_transition, task_completed_at, update_published_at,
    validate_offer_terms, week_start_of,
};
use crate::error::DatabaseError;

mod embedded {
    refinery::embed_migrations!("migrations");
}

/// PostgreSQL database backend.
pub struct PgBackend {
    pool: Pool,
}

impl PgBackend {
    /// Create a new PostgreSQL backend from configuration.
    pub async fn new(config: &DatabaseConfig) -> Result<Self, DatabaseError> {
        let url = config
            .url
            .as_ref()
            .ok_or_else(|| DatabaseError::Pool("DATABASE_URL is not set".to_string()))?;

        let mut cfg = deadpool_postgres::Config::new();
        cfg.url = Some(url.expose_secret().to_string());
        cfg.pool = Some(deadpool_postgres::PoolConfig::new(config.pool_size));

        let pool = cfg
            .create_pool(
                Some(deadpool_postgres::Runtime::Tokio1),
                tokio_postgres::NoTls,
            )
            .map_err(|e| DatabaseError::Pool(e.to_string()))?;

        // Fail fast on bad credentials instead of on the first request.
        let _conn = pool.get().await?;
        Ok(Self { pool })
    }

    /// Get a clone of the connection pool.
    pub fn pool(&self) -> Pool {
        self.pool.clone()
    }

    async fn conn(&self) -> Result<deadpool_postgres::Object, DatabaseError> {
        Ok(self.pool.get().await?)
    }
}

// ==================== Row mapping ====================

fn parse_enum<T>(raw: &str, what: &str, parse: fn(&str) -> Option<T>) -> Result<T, DatabaseError> {
    parse(raw).ok_or_else(|| DatabaseError::Serialization(format!("invalid {what} '{raw}'")))
}

fn row_to_account_record(row: &tokio_postgres::Row) -> Result<AccountRecord, DatabaseError> {
    Ok(AccountRecord {
        id: row.get("id"),
        email: row.get("email"),
        display_name: row.get("display_name"),
        password_hash: row.get("password_hash"),
        role: parse_enum(row.get("role"), "account role", Role::from_db_value)?,
        client_id: row.get("client_id"),
        disabled: row.get("disabled"),
        last_login_at: row.get("last_login_at"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn row_to_session_record(row: &tokio_postgres::Row) -> SessionRecord {
    SessionRecord {
        id: row.get("id"),
        account_id: row.get("account_id"),
        token_hash: row.get("token_hash"),
        expires_at: row.get("expires_at"),
        created_at: row.get("created_at"),
    }
}

fn row_to_client_record(row: &tokio_postgres::Row) -> Result<ClientRecord, DatabaseError> {
    Ok(ClientRecord {
        id: row.get("id"),
        name: row.get("name"),
        name_normalized: row.get("name_normalized"),
        company: row.get("company"),
        email: row.get("email"),
        phone: row.get("phone"),
        website: row.get("website"),
        status: parse_enum(row.get("status"), "client status", ClientStatus::from_db_value)?,
        notes: row.get("notes"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn row_to_task_record(row: &tokio_postgres::Row) -> Result<TaskRecord, DatabaseError> {
    Ok(TaskRecord {
        id: row.get("id"),
        client_id: row.get("client_id"),
        title: row.get("title"),
        description: row.get("description"),
        status: parse_enum(row.get("status"), "task status", TaskStatus::from_db_value)?,
        priority: parse_enum(row.get("priority"), "task priority", TaskPriority::from_db_value)?,
        due_date: row.get("due_date"),
        completed_at: row.get("completed_at"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn row_to_chat_message(row: &tokio_postgres::Row) -> Result<ChatMessageRecord, DatabaseError> {
    Ok(ChatMessageRecord {
        id: row.get("id"),
        client_id: row.get("client_id"),
        sender_role: parse_enum(row.get("sender_role"), "sender role", Role::from_db_value)?,
        sender_account_id: row.get("sender_account_id"),
        body: row.get("body"),
        read_at: row.get("read_at"),
        created_at: row.get("created_at"),
    })
}

fn row_to_resource_record(row: &tokio_postgres::Row) -> ResourceRecord {
    let file_key: Option<String> = row.get("file_key");
    ResourceRecord {
        id: row.get("id"),
        title: row.get("title"),
        description: row.get("description"),
        category: row.get("category"),
        url: row.get("url"),
        file: file_key.map(|key| StoredFileRef {
            key,
            file_name: row.get::<_, Option<String>>("file_name").unwrap_or_default(),
            content_type: row
                .get::<_, Option<String>>("file_content_type")
                .unwrap_or_else(|| "application/octet-stream".to_string()),
            size_bytes: row.get::<_, Option<i64>>("file_size").unwrap_or_default(),
        }),
        client_id: row.get("client_id"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn row_to_offer_record(row: &tokio_postgres::Row) -> OfferRecord {
    OfferRecord {
        id: row.get("id"),
        title: row.get("title"),
        description: row.get("description"),
        price: row.get("price"),
        discount_percent: row.get("discount_percent"),
        valid_from: row.get("valid_from"),
        valid_until: row.get("valid_until"),
        active: row.get("active"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn row_to_agency_update(row: &tokio_postgres::Row) -> AgencyUpdateRecord {
    AgencyUpdateRecord {
        id: row.get("id"),
        title: row.get("title"),
        body: row.get("body"),
        pinned: row.get("pinned"),
        published: row.get("published"),
        published_at: row.get("published_at"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn row_to_weekly_product(row: &tokio_postgres::Row) -> WeeklyProductRecord {
    WeeklyProductRecord {
        id: row.get("id"),
        title: row.get("title"),
        description: row.get("description"),
        image_url: row.get("image_url"),
        week_start: row.get("week_start"),
        links: Vec::new(),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn row_to_request_record(row: &tokio_postgres::Row) -> Result<RequestRecord, DatabaseError> {
    Ok(RequestRecord {
        id: row.get("id"),
        client_id: row.get("client_id"),
        kind: parse_enum(row.get("kind"), "request kind", RequestKind::from_db_value)?,
        subject: row.get("subject"),
        body: row.get("body"),
        offer_id: row.get("offer_id"),
        status: parse_enum(row.get("status"), "request status", RequestStatus::from_db_value)?,
        admin_response: row.get("admin_response"),
        resolved_at: row.get("resolved_at"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

async fn count<C>(
    conn: &C,
    sql: &str,
    params: &[&(dyn ToSql + Sync)],
) -> Result<i64, DatabaseError>
where
    C: GenericClient + Sync,
{
    let row = conn.query_one(sql, params).await?;
    Ok(row.get(0))
}

async fn insert_links<C>(
    conn: &C,
    product_id: Uuid,
    links: &[WeeklyProductLinkParams],
) -> Result<(), DatabaseError>
where
    C: GenericClient + Sync,
{
    for (position, link) in links.iter().enumerate() {
        let position = position as i32;
        conn.execute(
            "INSERT INTO weekly_product_links (id, product_id, label, url, position) \
             VALUES ($1, $2, $3, $4, $5)",
            &[
                &Uuid::new_v4(),
                &product_id,
                &link.label.trim(),
                &link.url.trim(),
                &position,
            ],
        )
        .await?;
    }
    Ok(())
}

async fn load_links<C>(conn: &C, product: &mut WeeklyProductRecord) -> Result<(), DatabaseError>
where
    C: GenericClient + Sync,
{
    let rows = conn
        .query(
            "SELECT id, product_id, label, url, position FROM weekly_product_links \
             WHERE product_id = $1 ORDER BY position",
            &[&product.id],
        )
        .await?;
    product.links = rows
        .iter()
        .map(|row| WeeklyProductLinkRecord {
            id: row.get("id"),
            product_id: row.get("product_id"),
            label: row.get("label"),
            url: row.get("url"),
            position: row.get("position"),
        })
        .collect();
    Ok(())
}

// ==================== Database ====================

#[async_trait]
impl Database for PgBackend {
    async fn run_migrations(&self) -> Result<(), DatabaseError> {
        let mut client = self.conn().await?;
        let report = embedded::migrations::runner()
            .run_async(&mut **client)
            .await
            .map_err(|e| DatabaseError::Migration(e.to_string()))?;
        for migration in report.applied_migrations() {
            tracing::debug!(
                version = migration.version(),
                name = migration.name(),
                "Applied PostgreSQL migration"
            );
        }
        Ok(())
    }
}

// ==================== Accounts & sessions ====================

const ACCOUNT_COLUMNS: &str = "id, email, display_name, password_hash, role, client_id, disabled, \
                               last_login_at, created_at, updated_at";

#[async_trait]
impl AccountStore for PgBackend {
    async fn create_account(
        &self,
        input: &CreateAccountParams,
    ) -> Result<AccountRecord, DatabaseError> {
        match (input.role, input.client_id) {
            (Role::Admin, Some(_)) => {
                return Err(DatabaseError::Constraint(
                    "admin accounts cannot be linked to a client".to_string(),
                ));
            }
            (Role::Client, None) => {
                return Err(DatabaseError::Constraint(
                    "client accounts must be linked to a client".to_string(),
                ));
            }
            _ => {}
        }

        let conn = self.conn().await?;
        let row = conn
            .query_one(
                &format!(
                    "INSERT INTO accounts (id, email, display_name, password_hash, role, client_id) \
                     VALUES ($1, $2, $3, $4, $5, $6) RETURNING {ACCOUNT_COLUMNS}"
                ),
                &[
                    &Uuid::new_v4(),
                    &input.email.trim().to_lowercase(),
                    &input.display_name.trim(),
                    &input.password_hash,
                    &input.role.as_str(),
                    &input.client_id,
                ],
            )
            .await?;
        row_to_account_record(&row)
    }

    async fn get_account(&self, account_id: Uuid) -> Result<Option<AccountRecord>, DatabaseError> {
        let conn = self.conn().await?;
        let row = conn
            .query_opt(
                &format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = $1"),
                &[&account_id],
            )
            .await?;
        row.map(|row| row_to_account_record(&row)).transpose()
    }

    async fn get_account_by_email(
        &self,
        email: &str,
    ) -> Result<Option<AccountRecord>, DatabaseError> {
        let conn = self.conn().await?;
        let row = conn
            .query_opt(
                &format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE email = $1"),
                &[&email.trim().to_lowercase()],
            )
            .await?;
        row.map(|row| row_to_account_record(&row)).transpose()
    }

    async fn list_accounts(
        &self,
        client_id: Option<Uuid>,
    ) -> Result<Vec<AccountRecord>, DatabaseError> {
        let conn = self.conn().await?;
        let rows = match client_id {
            Some(client_id) => {
                conn.query(
                    &format!(
                        "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE client_id = $1 ORDER BY email"
                    ),
                    &[&client_id],
                )
                .await?
            }
            None => {
                conn.query(
                    &format!("SELECT {ACCOUNT_COLUMNS} FROM accounts ORDER BY role, email"),
                    &[],
                )
                .await?
            }
        };
        rows.iter().map(row_to_account_record).collect()
    }

    async fn set_account_password(
        &self,
        account_id: Uuid,
        password_hash: &str,
    ) -> Result<bool, DatabaseError> {
        let conn = self.conn().await?;
        let updated = conn
            .execute(
                "UPDATE accounts SET password_hash = $2, updated_at = NOW() WHERE id = $1",
                &[&account_id, &password_hash],
            )
            .await?;
        Ok(updated > 0)
    }

    async fn set_account_disabled(
        &self,
        account_id: Uuid,
        disabled: bool,
    ) -> Result<bool, DatabaseError> {
        let conn = self.conn().await?;
        let updated = conn
            .execute(
                "UPDATE accounts SET disabled = $2, updated_at = NOW() WHERE id = $1",
                &[&account_id, &disabled],
            )
            .await?;
        Ok(updated > 0)
    }

    async fn touch_account_login(
        &self,
        account_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<(), DatabaseError> {
        let conn = self.conn().await?;
        conn.execute(
            "UPDATE accounts SET last_login_at = $2 WHERE id = $1",
            &[&account_id, &at],
        )
        .await?;
        Ok(())
    }

    async fn delete_account(&self, account_id: Uuid) -> Result<bool, DatabaseError> {
        let conn = self.conn().await?;
        let deleted = conn
            .execute("DELETE FROM accounts WHERE id = $1", &[&account_id])
            .await?;
        Ok(deleted > 0)
    }

    async fn count_admin_accounts(&self) -> Result<i64, DatabaseError> {
        let conn = self.conn().await?;
        count(
            &conn,
            "SELECT COUNT(*) FROM accounts WHERE role = 'admin' AND NOT disabled",
            &[],
        )
        .await
    }
}

#[async_trait]
impl SessionStore for PgBackend {
    async fn create_session(
        &self,
        account_id: Uuid,
        token_hash: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<SessionRecord, DatabaseError> {
        let conn = self.conn().await?;
        let row = conn
            .query_one(
                "INSERT INTO sessions (id, account_id, token_hash, expires_at) \
                 VALUES ($1, $2, $3, $4) \
                 RETURNING id, account_id, token_hash, expires_at, created_at",
                &[&Uuid::new_v4(), &account_id, &token_hash, &expires_at],
            )
            .await?;
        Ok(row_to_session_record(&row))
    }

    async fn get_live_session(
        &self,
        token_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<SessionRecord>, DatabaseError> {
        let conn = self.conn().await?;
        let row = conn
            .query_opt(
                "SELECT id, account_id, token_hash, expires_at, created_at \
                 FROM sessions WHERE token_hash = $1 AND expires_at > $2",
                &[&token_hash, &now],
            )
            .await?;
        Ok(row.map(|row| row_to_session_record(&row)))
    }

    async fn delete_session(&self, token_hash: &str) -> Result<bool, DatabaseError> {
        let conn = self.conn().await?;
        let deleted = conn
            .execute("DELETE FROM sessions WHERE token_hash = $1", &[&token_hash])
            .await?;
        Ok(deleted > 0)
    }

    async fn delete_sessions_for_account(&self, account_id: Uuid) -> Result<u64, DatabaseError> {
        let conn = self.conn().await?;
        Ok(conn
            .execute("DELETE FROM sessions WHERE account_id = $1", &[&account_id])
            .await?)
    }

    async fn purge_expired_sessions(&self, now: DateTime<Utc>) -> Result<u64, DatabaseError> {
        let conn = self.conn().await?;
        Ok(conn
            .execute("DELETE FROM sessions WHERE expires_at <= $1", &[&now])
            .await?)
    }
}

// ==================== Clients & tasks ====================

const CLIENT_COLUMNS: &str = "id, name, name_normalized, company, email, phone, website, status, \
                              notes, created_at, updated_at";

const TASK_COLUMNS: &str = "id, client_id, title, description, status, priority, due_date, \
                            completed_at, created_at, updated_at";

fn require_client_name(raw: &str) -> Result<String, DatabaseError> {
    let normalized = normalize_client_name(raw);
    if normalized.is_empty() {
        return Err(DatabaseError::Constraint(
            "client name cannot be empty".to_string(),
        ));
    }
    Ok(normalized)
}

#[async_trait]
impl ClientStore for PgBackend {
    async fn create_client(
        &self,
        input: &CreateClientParams,
    ) -> Result<ClientRecord, DatabaseError> {
        let normalized_name = require_client_name(&input.name)?;
        let conn = self.conn().await?;
        let row = conn
            .query_one(
                &format!(
                    "INSERT INTO clients (id, name, name_normalized, company, email, phone, website, status, notes) \
                     VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) RETURNING {CLIENT_COLUMNS}"
                ),
                &[
                    &Uuid::new_v4(),
                    &input.name.trim(),
                    &normalized_name,
                    &input.company,
                    &input.email,
                    &input.phone,
                    &input.website,
                    &input.status.as_str(),
                    &input.notes,
                ],
            )
            .await?;
        row_to_client_record(&row)
    }

    async fn list_clients(
        &self,
        filter: &ClientListFilter,
    ) -> Result<Vec<ClientRecord>, DatabaseError> {
        let like = filter
            .query
            .as_deref()
            .map(normalize_client_name)
            .filter(|search| !search.is_empty())
            .map(|search| format!("%{search}%"));
        let status = filter.status.map(ClientStatus::as_str);

        let mut clauses = Vec::new();
        let mut params: Vec<&(dyn ToSql + Sync)> = Vec::new();
        if let Some(like) = &like {
            params.push(like);
            clauses.push(format!(
                "(name_normalized LIKE ${n} OR lower(coalesce(company, '')) LIKE ${n} \
                 OR lower(coalesce(email, '')) LIKE ${n})",
                n = params.len()
            ));
        }
        if let Some(status) = &status {
            params.push(status);
            clauses.push(format!("status = ${}", params.len()));
        }
        let where_sql = if clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", clauses.join(" AND "))
        };

        let conn = self.conn().await?;
        let rows = conn
            .query(
                &format!("SELECT {CLIENT_COLUMNS} FROM clients{where_sql} ORDER BY lower(name) ASC"),
                &params,
            )
            .await?;
        rows.iter().map(row_to_client_record).collect()
    }

    async fn get_client(&self, client_id: Uuid) -> Result<Option<ClientRecord>, DatabaseError> {
        let conn = self.conn().await?;
        let row = conn
            .query_opt(
                &format!("SELECT {CLIENT_COLUMNS} FROM clients WHERE id = $1"),
                &[&client_id],
            )
            .await?;
        row.map(|row| row_to_client_record(&row)).transpose()
    }

    async fn update_client(
        &self,
        client_id: Uuid,
        input: &UpdateClientParams,
    ) -> Result<Option<ClientRecord>, DatabaseError> {
        let Some(existing) = self.get_client(client_id).await? else {
            return Ok(None);
        };

        let merged_name = input
            .name
            .as_deref()
            .unwrap_or(existing.name.as_str())
            .trim();
        let normalized_name = require_client_name(merged_name)?;
        let merged_company = input.company.clone().unwrap_or(existing.company);
        let merged_email = input.email.clone().unwrap_or(existing.email);
        let merged_phone = input.phone.clone().unwrap_or(existing.phone);
        let merged_website = input.website.clone().unwrap_or(existing.website);
        let merged_status = input.status.unwrap_or(existing.status);
        let merged_notes = input.notes.clone().unwrap_or(existing.notes);

        let conn = self.conn().await?;
        let row = conn
            .query_opt(
                &format!(
                    "UPDATE clients SET \
                        name = $2, name_normalized = $3, company = $4, email = $5, \
                        phone = $6, website = $7, status = $8, notes = $9, updated_at = NOW() \
                     WHERE id = $1 RETURNING {CLIENT_COLUMNS}"
                ),
                &[
                    &client_id,
                    &merged_name,
                    &normalized_name,
                    &merged_company,
                    &merged_email,
                    &merged_phone,
                    &merged_website,
                    &merged_status.as_str(),
                    &merged_notes,
                ],
            )
            .await?;
        row.map(|row| row_to_client_record(&row)).transpose()
    }

    async fn delete_client(&self, client_id: Uuid) -> Result<bool, DatabaseError> {
        let conn = self.conn().await?;
        let deleted = conn
            .execute("DELETE FROM clients WHERE id = $1", &[&client_id])
            .await?;
        Ok(deleted > 0)
    }
}

#[async_trait]
impl TaskStore for PgBackend {
    async fn create_task(&self, input: &CreateTaskParams) -> Result<TaskRecord, DatabaseError> {
        let completed_at = task_completed_at(None, input.status, Utc::now());
        let conn = self.conn().await?;
        let row = conn
            .query_one(
                &format!(
                    "INSERT INTO tasks (id, client_id, title, description, status, priority, due_date, completed_at) \
                     VALUES ($1, $2, $3, $4, $5, $6, $7, $8) RETURNING {TASK_COLUMNS}"
                ),
                &[
                    &Uuid::new_v4(),
                    &input.client_id,
                    &input.title.trim(),
                    &input.description,
                    &input.status.as_str(),
                    &input.priority.as_str(),
                    &input.due_date,
                    &completed_at,
                ],
            )
            .await?;
        row_to_task_record(&row)
    }

    async fn list_tasks(&self, filter: &TaskListFilter) -> Result<Vec<TaskRecord>, DatabaseError> {
        let status = filter.status.map(TaskStatus::as_str);
        let priority = filter.priority.map(TaskPriority::as_str);
        let limit = filter.limit.map(|limit| limit as i64);

        let mut clauses = Vec::new();
        let mut params: Vec<&(dyn ToSql + Sync)> = Vec::new();
        if let Some(client_id) = &filter.client_id {
            params.push(client_id);
            clauses.push(format!("client_id = ${}", params.len()));
        }
        if let Some(status) = &status {
            params.push(status);
            clauses.push(format!("status = ${}", params.len()));
        }
        if let Some(priority) = &priority {
            params.push(priority);
            clauses.push(format!("priority = ${}", params.len()));
        }

        let mut sql = format!("SELECT {TASK_COLUMNS} FROM tasks");
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(" ORDER BY ");
        sql.push_str(filter.sort.order_by_sql());
        if let Some(limit) = &limit {
            params.push(limit);
            sql.push_str(&format!(" LIMIT ${}", params.len()));
        }

        let conn = self.conn().await?;
        let rows = conn.query(&sql, &params).await?;
        rows.iter().map(row_to_task_record).collect()
    }

    async fn get_task(&self, task_id: Uuid) -> Result<Option<TaskRecord>, DatabaseError> {
        let conn = self.conn().await?;
        let row = conn
            .query_opt(
                &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = $1"),
                &[&task_id],
            )
            .await?;
        row.map(|row| row_to_task_record(&row)).transpose()
    }

    async fn update_task(
        &self,
        task_id: Uuid,
        input: &UpdateTaskParams,
    ) -> Result<Option<TaskRecord>, DatabaseError> {
        let Some(existing) = self.get_task(task_id).await? else {
            return Ok(None);
        };

        let merged_title = input
            .title
            .as_deref()
            .unwrap_or(existing.title.as_str())
            .trim();
        let merged_description = input
            .description
            .clone()
            .unwrap_or(existing.description.clone());
        let merged_status = input.status.unwrap_or(existing.status);
        let merged_priority = input.priority.unwrap_or(existing.priority);
        let merged_due_date = input.due_date.unwrap_or(existing.due_date);
        let completed_at = task_completed_at(
            Some((existing.status, existing.completed_at)),
            merged_status,
            Utc::now(),
        );

        let conn = self.conn().await?;
        let row = conn
            .query_opt(
                &format!(
                    "UPDATE tasks SET \
                        title = $2, description = $3, status = $4, priority = $5, \
                        due_date = $6, completed_at = $7, updated_at = NOW() \
                     WHERE id = $1 RETURNING {TASK_COLUMNS}"
                ),
                &[
                    &task_id,
                    &merged_title,
                    &merged_description,
                    &merged_status.as_str(),
                    &merged_priority.as_str(),
                    &merged_due_date,
                    &completed_at,
                ],
            )
            .await?;
        row.map(|row| row_to_task_record(&row)).transpose()
    }

    async fn delete_task(&self, task_id: Uuid) -> Result<bool, DatabaseError> {
        let conn = self.conn().await?;
        let deleted = conn
            .execute("DELETE FROM tasks WHERE id = $1", &[&task_id])
            .await?;
        Ok(deleted > 0)
    }
}

// ==================== Chat ====================

const MESSAGE_COLUMNS: &str =
    "id, client_id, sender_role, sender_account_id, body, read_at, created_at";

#[async_trait]
impl ChatStore for PgBackend {
    async fn create_chat_message(
        &self,
        input: &CreateChatMessageParams,
    ) -> Result<ChatMessageRecord, DatabaseError> {
        let conn = self.conn().await?;
        let row = conn
            .query_one(
                &format!(
                    "INSERT INTO chat_messages (id, client_id, sender_role, sender_account_id, body) \
                     VALUES ($1, $2, $3, $4, $5) RETURNING {MESSAGE_COLUMNS}"
                ),
                &[
                    &Uuid::new_v4(),
                    &input.client_id,
                    &input.sender_role.as_str(),
                    &input.sender_account_id,
                    &input.body,
                ],
            )
            .await?;
        row_to_chat_message(&row)
    }

    async fn list_chat_messages(
        &self,
        client_id: Uuid,
        query: &ChatHistoryQuery,
    ) -> Result<Vec<ChatMessageRecord>, DatabaseError> {
        let limit = query.limit as i64;
        let conn = self.conn().await?;
        let rows = match query.before {
            Some(before) => {
                conn.query(
                    &format!(
                        "SELECT {MESSAGE_COLUMNS} FROM chat_messages \
                         WHERE client_id = $1 AND created_at < $2 \
                         ORDER BY created_at DESC, id DESC LIMIT $3"
                    ),
                    &[&client_id, &before, &limit],
                )
                .await?
            }
            None => {
                conn.query(
                    &format!(
                        "SELECT {MESSAGE_COLUMNS} FROM chat_messages \
                         WHERE client_id = $1 ORDER BY created_at DESC, id DESC LIMIT $2"
                    ),
                    &[&client_id, &limit],
                )
                .await?
            }
        };
        let mut out = rows
            .iter()
            .map(row_to_chat_message)
            .collect::<Result<Vec<_>, _>>()?;
        out.reverse();
        Ok(out)
    }

    async fn get_chat_message(
        &self,
        message_id: Uuid,
    ) -> Result<Option<ChatMessageRecord>, DatabaseError> {
        let conn = self.conn().await?;
        let row = conn
            .query_opt(
                &format!("SELECT {MESSAGE_COLUMNS} FROM chat_messages WHERE id = $1"),
                &[&message_id],
            )
            .await?;
        row.map(|row| row_to_chat_message(&row)).transpose()
    }

    async fn mark_chat_read(
        &self,
        client_id: Uuid,
        reader: Role,
        at: DateTime<Utc>,
    ) -> Result<u64, DatabaseError> {
        let conn = self.conn().await?;
        Ok(conn
            .execute(
                "UPDATE chat_messages SET read_at = $3 \
                 WHERE client_id = $1 AND sender_role = $2 AND read_at IS NULL",
                &[&client_id, &reader.counterpart().as_str(), &at],
            )
            .await?)
    }

    async fn count_unread_chat(&self, client_id: Uuid, reader: Role) -> Result<i64, DatabaseError> {
        let conn = self.conn().await?;
        count(
            &conn,
            "SELECT COUNT(*) FROM chat_messages \
             WHERE client_id = $1 AND sender_role = $2 AND read_at IS NULL",
            &[&client_id, &reader.counterpart().as_str()],
        )
        .await
    }

    async fn list_conversations(&self) -> Result<Vec<ConversationSummary>, DatabaseError> {
        let conn = self.conn().await?;
        let rows = conn
            .query(
                "SELECT c.id AS conversation_client_id, c.name AS client_name, \
                        (SELECT COUNT(*) FROM chat_messages u \
                          WHERE u.client_id = c.id AND u.sender_role = 'client' AND u.read_at IS NULL) AS unread_count, \
                        m.id, m.client_id, m.sender_role, m.sender_account_id, m.body, m.read_at, m.created_at \
                 FROM clients c \
                 LEFT JOIN LATERAL ( \
                     SELECT * FROM chat_messages cm WHERE cm.client_id = c.id \
                     ORDER BY cm.created_at DESC, cm.id DESC LIMIT 1 \
                 ) m ON TRUE \
                 WHERE c.status <> 'archived' OR m.id IS NOT NULL \
                 ORDER BY lower(c.name)",
                &[],
            )
            .await?;

        rows.iter()
            .map(|row| {
                let message_id: Option<Uuid> = row.get("id");
                let last_message = match message_id {
                    Some(_) => Some(row_to_chat_message(row)?),
                    None => None,
                };
                Ok(ConversationSummary {
                    client_id: row.get("conversation_client_id"),
                    client_name: row.get("client_name"),
                    last_message,
                    unread_count: row.get("unread_count"),
                })
            })
            .collect()
    }

    async fn delete_chat_message(&self, message_id: Uuid) -> Result<bool, DatabaseError> {
        let conn = self.conn().await?;
        let deleted = conn
            .execute("DELETE FROM chat_messages WHERE id = $1", &[&message_id])
            .await?;
        Ok(deleted > 0)
    }
}

// ==================== Resources ====================

const RESOURCE_COLUMNS: &str = "id, title, description, category, url, file_key, file_name, \
                                file_content_type, file_size, client_id, created_at, updated_at";

#[async_trait]
impl ResourceStore for PgBackend {
    async fn create_resource(
        &self,
        input: &CreateResourceParams,
    ) -> Result<ResourceRecord, DatabaseError> {
        let file = input.file.as_ref();
        let conn = self.conn().await?;
        let row = conn
            .query_one(
                &format!(
                    "INSERT INTO resources (id, title, description, category, url, file_key, file_name, file_content_type, file_size, client_id) \
                     VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) RETURNING {RESOURCE_COLUMNS}"
                ),
                &[
                    &Uuid::new_v4(),
                    &input.title.trim(),
                    &input.description,
                    &input.category,
                    &input.url,
                    &file.map(|f| f.key.as_str()),
                    &file.map(|f| f.file_name.as_str()),
                    &file.map(|f| f.content_type.as_str()),
                    &file.map(|f| f.size_bytes),
                    &input.client_id,
                ],
            )
            .await?;
        Ok(row_to_resource_record(&row))
    }

    async fn list_resources(
        &self,
        filter: &ResourceListFilter,
    ) -> Result<Vec<ResourceRecord>, DatabaseError> {
        let mut clauses = Vec::new();
        let mut params: Vec<&(dyn ToSql + Sync)> = Vec::new();
        if let Some(client_id) = &filter.visible_to {
            params.push(client_id);
            clauses.push(format!("(client_id IS NULL OR client_id = ${})", params.len()));
        }
        if let Some(category) = &filter.category {
            params.push(category);
            clauses.push(format!("category = ${}", params.len()));
        }
        let mut sql = format!("SELECT {RESOURCE_COLUMNS} FROM resources");
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(" ORDER BY created_at DESC");

        let conn = self.conn().await?;
        let rows = conn.query(&sql, &params).await?;
        Ok(rows.iter().map(row_to_resource_record).collect())
    }

    async fn get_resource(
        &self,
        resource_id: Uuid,
    ) -> Result<Option<ResourceRecord>, DatabaseError> {
        let conn = self.conn().await?;
        let row = conn
            .query_opt(
                &format!("SELECT {RESOURCE_COLUMNS} FROM resources WHERE id = $1"),
                &[&resource_id],
            )
            .await?;
        Ok(row.map(|row| row_to_resource_record(&row)))
    }

    async fn update_resource(
        &self,
        resource_id: Uuid,
        input: &UpdateResourceParams,
    ) -> Result<Option<ResourceRecord>, DatabaseError> {
        let Some(existing) = self.get_resource(resource_id).await? else {
            return Ok(None);
        };

        let merged_title = input.title.as_deref().unwrap_or(&existing.title).trim();
        let merged_description = input.description.clone().unwrap_or(existing.description.clone());
        let merged_category = input.category.clone().unwrap_or(existing.category.clone());
        let merged_url = input.url.clone().unwrap_or(existing.url.clone());
        let merged_file = input.file.clone().unwrap_or(existing.file.clone());
        let merged_client = input.client_id.unwrap_or(existing.client_id);
        let file = merged_file.as_ref();

        let conn = self.conn().await?;
        let row = conn
            .query_opt(
                &format!(
                    "UPDATE resources SET \
                        title = $2, description = $3, category = $4, url = $5, \
                        file_key = $6, file_name = $7, file_content_type = $8, file_size = $9, \
                        client_id = $10, updated_at = NOW() \
                     WHERE id = $1 RETURNING {RESOURCE_COLUMNS}"
                ),
                &[
                    &resource_id,
                    &merged_title,
                    &merged_description,
                    &merged_category,
                    &merged_url,
                    &file.map(|f| f.key.as_str()),
                    &file.map(|f| f.file_name.as_str()),
                    &file.map(|f| f.content_type.as_str()),
                    &file.map(|f| f.size_bytes),
                    &merged_client,
                ],
            )
            .await?;
        Ok(row.map(|row| row_to_resource_record(&row)))
    }

    async fn delete_resource(&self, resource_id: Uuid) -> Result<bool, DatabaseError> {
        let conn = self.conn().await?;
        let deleted = conn
            .execute("DELETE FROM resources WHERE id = $1", &[&resource_id])
            .await?;
        Ok(deleted > 0)
    }
}

// ==================== Offers ====================

const OFFER_COLUMNS: &str = "id, title, description, price, discount_percent, valid_from, \
                             valid_until, active, created_at, updated_at";

#[async_trait]
impl OfferStore for PgBackend {
    async fn create_offer(&self, input: &CreateOfferParams) -> Result<OfferRecord, DatabaseError> {
        validate_offer_terms(
            input.discount_percent,
            input.valid_from,
            input.valid_until,
            input.price,
        )?;

        let conn = self.conn().await?;
        let row = conn
            .query_one(
                &format!(
                    "INSERT INTO offers (id, title, description, price, discount_percent, valid_from, valid_until, active) \
                     VALUES ($1, $2, $3, $4, $5, $6, $7, $8) RETURNING {OFFER_COLUMNS}"
                ),
                &[
                    &Uuid::new_v4(),
                    &input.title.trim(),
                    &input.description,
                    &input.price,
                    &input.discount_percent,
                    &input.valid_from,
                    &input.valid_until,
                    &input.active,
                ],
            )
            .await?;
        Ok(row_to_offer_record(&row))
    }

    async fn list_offers(
        &self,
        filter: &OfferListFilter,
    ) -> Result<Vec<OfferRecord>, DatabaseError> {
        let conn = self.conn().await?;
        let rows = match filter.available_on {
            Some(date) => {
                conn.query(
                    &format!(
                        "SELECT {OFFER_COLUMNS} FROM offers \
                         WHERE active \
                           AND (valid_from IS NULL OR valid_from <= $1) \
                           AND (valid_until IS NULL OR valid_until >= $1) \
                         ORDER BY valid_until ASC NULLS LAST, created_at DESC"
                    ),
                    &[&date],
                )
                .await?
            }
            None => {
                conn.query(
                    &format!("SELECT {OFFER_COLUMNS} FROM offers ORDER BY created_at DESC"),
                    &[],
                )
                .await?
            }
        };
        Ok(rows.iter().map(row_to_offer_record).collect())
    }

    async fn get_offer(&self, offer_id: Uuid) -> Result<Option<OfferRecord>, DatabaseError> {
        let conn = self.conn().await?;
        let row = conn
            .query_opt(
                &format!("SELECT {OFFER_COLUMNS} FROM offers WHERE id = $1"),
                &[&offer_id],
            )
            .await?;
        Ok(row.map(|row| row_to_offer_record(&row)))
    }

    async fn update_offer(
        &self,
        offer_id: Uuid,
        input: &UpdateOfferParams,
    ) -> Result<Option<OfferRecord>, DatabaseError> {
        let Some(existing) = self.get_offer(offer_id).await? else {
            return Ok(None);
        };

        let merged_title = input.title.as_deref().unwrap_or(&existing.title).trim();
        let merged_description = input.description.clone().unwrap_or(existing.description.clone());
        let merged_price = input.price.unwrap_or(existing.price);
        let merged_discount = input.discount_percent.unwrap_or(existing.discount_percent);
        let merged_from = input.valid_from.unwrap_or(existing.valid_from);
        let merged_until = input.valid_until.unwrap_or(existing.valid_until);
        let merged_active = input.active.unwrap_or(existing.active);
        validate_offer_terms(merged_discount, merged_from, merged_until, merged_price)?;

        let conn = self.conn().await?;
        let row = conn
            .query_opt(
                &format!(
                    "UPDATE offers SET \
                        title = $2, description = $3, price = $4, discount_percent = $5, \
                        valid_from = $6, valid_until = $7, active = $8, updated_at = NOW() \
                     WHERE id = $1 RETURNING {OFFER_COLUMNS}"
                ),
                &[
                    &offer_id,
                    &merged_title,
                    &merged_description,
                    &merged_price,
                    &merged_discount,
                    &merged_from,
                    &merged_until,
                    &merged_active,
                ],
            )
            .await?;
        Ok(row.map(|row| row_to_offer_record(&row)))
    }

    async fn delete_offer(&self, offer_id: Uuid) -> Result<bool, DatabaseError> {
        let conn = self.conn().await?;
        let deleted = conn
            .execute("DELETE FROM offers WHERE id = $1", &[&offer_id])
            .await?;
        Ok(deleted > 0)
    }
}

// ==================== Updates ====================

const UPDATE_COLUMNS: &str =
    "id, title, body, pinned, published, published_at, created_at, updated_at";

#[async_trait]
impl AgencyUpdateStore for PgBackend {
    async fn create_agency_update(
        &self,
        input: &CreateAgencyUpdateParams,
    ) -> Result<AgencyUpdateRecord, DatabaseError> {
        let published_at = update_published_at(None, input.published, Utc::now());
        let conn = self.conn().await?;
        let row = conn
            .query_one(
                &format!(
                    "INSERT INTO updates (id, title, body, pinned, published, published_at) \
                     VALUES ($1, $2, $3, $4, $5, $6) RETURNING {UPDATE_COLUMNS}"
                ),
                &[
                    &Uuid::new_v4(),
                    &input.title.trim(),
                    &input.body,
                    &input.pinned,
                    &input.published,
                    &published_at,
                ],
            )
            .await?;
        Ok(row_to_agency_update(&row))
    }

    async fn list_agency_updates(
        &self,
        published_only: bool,
    ) -> Result<Vec<AgencyUpdateRecord>, DatabaseError> {
        let conn = self.conn().await?;
        let rows = conn
            .query(
                &format!(
                    "SELECT {UPDATE_COLUMNS} FROM updates \
                     WHERE published OR NOT $1 \
                     ORDER BY pinned DESC, coalesce(published_at, created_at) DESC"
                ),
                &[&published_only],
            )
            .await?;
        Ok(rows.iter().map(row_to_agency_update).collect())
    }

    async fn get_agency_update(
        &self,
        update_id: Uuid,
    ) -> Result<Option<AgencyUpdateRecord>, DatabaseError> {
        let conn = self.conn().await?;
        let row = conn
            .query_opt(
                &format!("SELECT {UPDATE_COLUMNS} FROM updates WHERE id = $1"),
                &[&update_id],
            )
            .await?;
        Ok(row.map(|row| row_to_agency_update(&row)))
    }

    async fn update_agency_update(
        &self,
        update_id: Uuid,
        input: &UpdateAgencyUpdateParams,
    ) -> Result<Option<AgencyUpdateRecord>, DatabaseError> {
        let Some(existing) = self.get_agency_update(update_id).await? else {
            return Ok(None);
        };

        let merged_published = input.published.unwrap_or(existing.published);
        let published_at = update_published_at(
            Some((existing.published, existing.published_at)),
            merged_published,
            Utc::now(),
        );

        let conn = self.conn().await?;
        let row = conn
            .query_opt(
                &format!(
                    "UPDATE updates SET \
                        title = $2, body = $3, pinned = $4, published = $5, published_at = $6, \
                        updated_at = NOW() \
                     WHERE id = $1 RETURNING {UPDATE_COLUMNS}"
                ),
                &[
                    &update_id,
                    &input.title.as_deref().unwrap_or(&existing.title).trim(),
                    &input.body.as_deref().unwrap_or(&existing.body),
                    &input.pinned.unwrap_or(existing.pinned),
                    &merged_published,
                    &published_at,
                ],
            )
            .await?;
        Ok(row.map(|row| row_to_agency_update(&row)))
    }

    async fn delete_agency_update(&self, update_id: Uuid) -> Result<bool, DatabaseError> {
        let conn = self.conn().await?;
        let deleted = conn
            .execute("DELETE FROM updates WHERE id = $1", &[&update_id])
            .await?;
        Ok(deleted > 0)
    }
}

// ==================== Weekly products ====================

const PRODUCT_COLUMNS: &str =
    "id, title, description, image_url, week_start, created_at, updated_at";

#[async_trait]
impl WeeklyProductStore for PgBackend {
    async fn create_weekly_product(
        &self,
        input: &CreateWeeklyProductParams,
    ) -> Result<WeeklyProductRecord, DatabaseError> {
        let mut conn = self.conn().await?;
        let tx = conn.transaction().await?;
        let row = tx
            .query_one(
                &format!(
                    "INSERT INTO weekly_products (id, title, description, image_url, week_start) \
                     VALUES ($1, $2, $3, $4, $5) RETURNING {PRODUCT_COLUMNS}"
                ),
                &[
                    &Uuid::new_v4(),
                    &input.title.trim(),
                    &input.description,
                    &input.image_url,
                    &week_start_of(input.week_start),
                ],
            )
            .await?;
        let mut product = row_to_weekly_product(&row);
        insert_links(&tx, product.id, &input.links).await?;
        load_links(&tx, &mut product).await?;
        tx.commit().await?;
        Ok(product)
    }

    async fn list_weekly_products(
        &self,
        filter: &WeeklyProductFilter,
    ) -> Result<Vec<WeeklyProductRecord>, DatabaseError> {
        let limit = filter.limit.map(|limit| limit as i64);
        let mut params: Vec<&(dyn ToSql + Sync)> = Vec::new();
        let mut sql = format!("SELECT {PRODUCT_COLUMNS} FROM weekly_products");
        if let Some(up_to) = &filter.up_to {
            params.push(up_to);
            sql.push_str(" WHERE week_start <= $1");
        }
        sql.push_str(" ORDER BY week_start DESC");
        if let Some(limit) = &limit {
            params.push(limit);
            sql.push_str(&format!(" LIMIT ${}", params.len()));
        }

        let conn = self.conn().await?;
        let rows = conn.query(&sql, &params).await?;
        let mut out: Vec<WeeklyProductRecord> = rows.iter().map(row_to_weekly_product).collect();
        for product in &mut out {
            load_links(&conn, product).await?;
        }
        Ok(out)
    }

    async fn get_weekly_product(
        &self,
        product_id: Uuid,
    ) -> Result<Option<WeeklyProductRecord>, DatabaseError> {
        let conn = self.conn().await?;
        let Some(row) = conn
            .query_opt(
                &format!("SELECT {PRODUCT_COLUMNS} FROM weekly_products WHERE id = $1"),
                &[&product_id],
            )
            .await?
        else {
            return Ok(None);
        };
        let mut product = row_to_weekly_product(&row);
        load_links(&conn, &mut product).await?;
        Ok(Some(product))
    }

    async fn get_weekly_product_for_week(
        &self,
        week_start: NaiveDate,
    ) -> Result<Option<WeeklyProductRecord>, DatabaseError> {
        let conn = self.conn().await?;
        let Some(row) = conn
            .query_opt(
                &format!("SELECT {PRODUCT_COLUMNS} FROM weekly_products WHERE week_start = $1"),
                &[&week_start_of(week_start)],
            )
            .await?
        else {
            return Ok(None);
        };
        let mut product = row_to_weekly_product(&row);
        load_links(&conn, &mut product).await?;
        Ok(Some(product))
    }

    async fn update_weekly_product(
        &self,
        product_id: Uuid,
        input: &UpdateWeeklyProductParams,
    ) -> Result<Option<WeeklyProductRecord>, DatabaseError> {
        let Some(existing) = self.get_weekly_product(product_id).await? else {
            return Ok(None);
        };

        let mut conn = self.conn().await?;
        let tx = conn.transaction().await?;
        let row = tx
            .query_one(
                &format!(
                    "UPDATE weekly_products SET \
                        title = $2, description = $3, image_url = $4, week_start = $5, updated_at = NOW() \
                     WHERE id = $1 RETURNING {PRODUCT_COLUMNS}"
                ),
                &[
                    &product_id,
                    &input.title.as_deref().unwrap_or(&existing.title).trim(),
                    &input.description.clone().unwrap_or(existing.description),
                    &input.image_url.clone().unwrap_or(existing.image_url),
                    &week_start_of(input.week_start.unwrap_or(existing.week_start)),
                ],
            )
            .await?;
        if let Some(links) = &input.links {
            tx.execute(
                "DELETE FROM weekly_product_links WHERE product_id = $1",
                &[&product_id],
            )
            .await?;
            insert_links(&tx, product_id, links).await?;
        }
        let mut product = row_to_weekly_product(&row);
        load_links(&tx, &mut product).await?;
        tx.commit().await?;
        Ok(Some(product))
    }

    async fn delete_weekly_product(&self, product_id: Uuid) -> Result<bool, DatabaseError> {
        let conn = self.conn().await?;
        let deleted = conn
            .execute("DELETE FROM weekly_products WHERE id = $1", &[&product_id])
            .await?;
        Ok(deleted > 0)
    }
}

// ==================== Requests ====================

const REQUEST_COLUMNS: &str = "id, client_id, kind, subject, body, offer_id, status, \
                               admin_response, resolved_at, created_at, updated_at";

#[async_trait]
impl RequestStore for PgBackend {
    async fn create_request(
        &self,
        input: &CreateRequestParams,
    ) -> Result<RequestRecord, DatabaseError> {
        let conn = self.conn().await?;
        let row = conn
            .query_one(
                &format!(
                    "INSERT INTO requests (id, client_id, kind, subject, body, offer_id, status) \
                     VALUES ($1, $2, $3, $4, $5, $6, 'pending') RETURNING {REQUEST_COLUMNS}"
                ),
                &[
                    &Uuid::new_v4(),
                    &input.client_id,
                    &input.kind.as_str(),
                    &input.subject.trim(),
                    &input.body,
                    &input.offer_id,
                ],
            )
            .await?;
        row_to_request_record(&row)
    }

    async fn list_requests(
        &self,
        filter: &RequestListFilter,
    ) -> Result<Vec<RequestRecord>, DatabaseError> {
        let status = filter.status.map(RequestStatus::as_str);
        let mut clauses = Vec::new();
        let mut params: Vec<&(dyn ToSql + Sync)> = Vec::new();
        if let Some(client_id) = &filter.client_id {
            params.push(client_id);
            clauses.push(format!("client_id = ${}", params.len()));
        }
        if let Some(status) = &status {
            params.push(status);
            clauses.push(format!("status = ${}", params.len()));
        }
        let mut sql = format!("SELECT {REQUEST_COLUMNS} FROM requests");
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(" ORDER BY created_at DESC");

        let conn = self.conn().await?;
        let rows = conn.query(&sql, &params).await?;
        rows.iter().map(row_to_request_record).collect()
    }

    async fn get_request(&self, request_id: Uuid) -> Result<Option<RequestRecord>, DatabaseError> {
        let conn = self.conn().await?;
        let row = conn
            .query_opt(
                &format!("SELECT {REQUEST_COLUMNS} FROM requests WHERE id = $1"),
                &[&request_id],
            )
            .await?;
        row.map(|row| row_to_request_record(&row)).transpose()
    }

    async fn update_request(
        &self,
        request_id: Uuid,
        input: &UpdateRequestParams,
    ) -> Result<Option<RequestRecord>, DatabaseError> {
        let Some(existing) = self.get_request(request_id).await? else {
            return Ok(None);
        };

        let (status, resolved_at) =
            resolve_request_transition(&existing, input.status, Utc::now())?;
        let admin_response = input
            .admin_response
            .clone()
            .unwrap_or(existing.admin_response.clone());

        let conn = self.conn().await?;
        let row = conn
            .query_opt(
                &format!(
                    "UPDATE requests SET \
                        status = $3, admin_response = $4, resolved_at = $5, updated_at = NOW() \
                     WHERE id = $1 AND status = $2 RETURNING {REQUEST_COLUMNS}"
                ),
                &[
                    &request_id,
                    &existing.status.as_str(),
                    &status.as_str(),
                    &admin_response,
                    &resolved_at,
                ],
            )
            .await?;
        match row {
            Some(row) => row_to_request_record(&row).map(Some),
            None => Err(DatabaseError::Constraint(
                "request status changed concurrently; reload and retry".to_string(),
            )),
        }
    }

    async fn delete_request(&self, request_id: Uuid) -> Result<bool, DatabaseError> {
        let conn = self.conn().await?;
        let deleted = conn
            .execute("DELETE FROM requests WHERE id = $1", &[&request_id])
            .await?;
        Ok(deleted > 0)
    }
}

// ==================== Settings ====================

#[async_trait]
impl SettingsStore for PgBackend {
    async fn get_setting(&self, key: &str) -> Result<Option<serde_json::Value>, DatabaseError> {
        let conn = self.conn().await?;
        let row = conn
            .query_opt("SELECT value FROM settings WHERE key = $1", &[&key])
            .await?;
        Ok(row.map(|row| row.get("value")))
    }

    async fn set_setting(
        &self,
        key: &str,
        value: &serde_json::Value,
    ) -> Result<(), DatabaseError> {
        let conn = self.conn().await?;
        conn.execute(
            "INSERT INTO settings (key, value, updated_at) VALUES ($1, $2, NOW()) \
             ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value, updated_at = NOW()",
            &[&key, value],
        )
        .await?;
        Ok(())
    }

    async fn delete_setting(&self, key: &str) -> Result<bool, DatabaseError> {
        let conn = self.conn().await?;
        let deleted = conn
            .execute("DELETE FROM settings WHERE key = $1", &[&key])
            .await?;
        Ok(deleted > 0)
    }

    async fn list_settings(&self) -> Result<Vec<SettingRow>, DatabaseError> {
        let conn = self.conn().await?;
        let rows = conn
            .query("SELECT key, value, updated_at FROM settings ORDER BY key", &[])
            .await?;
        Ok(rows
            .iter()
            .map(|row| SettingRow {
                key: row.get("key"),
                value: row.get("value"),
                updated_at: row.get("updated_at"),
            })
            .collect())
    }
}

// ==================== Dashboard ====================

#[async_trait]
impl DashboardStore for PgBackend {
    async fn admin_dashboard_counts(
        &self,
        today: NaiveDate,
    ) -> Result<AdminDashboardCounts, DatabaseError> {
        let conn = self.conn().await?;
        let mut clients_by_status = BTreeMap::new();
        for row in conn
            .query("SELECT status, COUNT(*) AS n FROM clients GROUP BY status", &[])
            .await?
        {
            clients_by_status.insert(row.get::<_, String>("status"), row.get::<_, i64>("n"));
        }

        let week_ago = (today - chrono::Duration::days(7))
            .and_hms_opt(0, 0, 0)
            .map(|dt| dt.and_utc())
            .unwrap_or_else(Utc::now);

        Ok(AdminDashboardCounts {
            clients_by_status,
            open_tasks: count(&conn, "SELECT COUNT(*) FROM tasks WHERE status <> 'done'", &[])
                .await?,
            overdue_tasks: count(
                &conn,
                "SELECT COUNT(*) FROM tasks WHERE status <> 'done' AND due_date < $1",
                &[&today],
            )
            .await?,
            tasks_completed_last_7_days: count(
                &conn,
                "SELECT COUNT(*) FROM tasks WHERE status = 'done' AND completed_at >= $1",
                &[&week_ago],
            )
            .await?,
            pending_requests: count(
                &conn,
                "SELECT COUNT(*) FROM requests WHERE status IN ('pending', 'in_review')",
                &[],
            )
            .await?,
            unread_messages: count(
                &conn,
                "SELECT COUNT(*) FROM chat_messages WHERE sender_role = 'client' AND read_at IS NULL",
                &[],
            )
            .await?,
        })
    }

    async fn client_dashboard_counts(
        &self,
        client_id: Uuid,
        today: NaiveDate,
    ) -> Result<ClientDashboardCounts, DatabaseError> {
        let conn = self.conn().await?;
        Ok(ClientDashboardCounts {
            open_tasks: count(
                &conn,
                "SELECT COUNT(*) FROM tasks WHERE client_id = $1 AND status <> 'done'",
                &[&client_id],
            )
            .await?,
            overdue_tasks: count(
                &conn,
                "SELECT COUNT(*) FROM tasks WHERE client_id = $1 AND status <> 'done' AND due_date < $2",
                &[&client_id, &today],
            )
            .await?,
            unread_messages: count(
                &conn,
                "SELECT COUNT(*) FROM chat_messages \
                 WHERE client_id = $1 AND sender_role = 'admin' AND read_at IS NULL",
                &[&client_id],
            )
            .await?,
            open_requests: count(
                &conn,
                "SELECT COUNT(*) FROM requests \
                 WHERE client_id = $1 AND status IN ('pending', 'in_review', 'approved')",
                &[&client_id],
            )
            .await?,
        })
    }
}

/// Store behavior against a throwaway PostgreSQL container. Needs Docker:
/// `cargo test --features integration`.
#[cfg(all(test, feature = "integration"))]
mod tests {
    use pretty_assertions::assert_eq;
    use secrecy::SecretString;
    use testcontainers_modules::postgres::Postgres;
    use testcontainers_modules::testcontainers::ContainerAsync;
    use testcontainers_modules::testcontainers::runners::AsyncRunner;

    use super::*;
    use crate::config::DatabaseBackend;

    /// A migrated backend. Keep the container alive for as long as it is used.
    async fn backend() -> (PgBackend, ContainerAsync<Postgres>) {
        let container = Postgres::default().start().await.expect("start postgres");
        let host = container.get_host().await.expect("host");
        let port = container.get_host_port_ipv4(5432).await.expect("port");
        let config = DatabaseConfig {
            backend: DatabaseBackend::Postgres,
            url: Some(SecretString::from(format!(
                "postgres://postgres:postgres@{host}:{port}/postgres"
            ))),
            pool_size: 2,
            libsql_path: None,
            libsql_url: None,
            libsql_auth_token: None,
        };
        let db = PgBackend::new(&config).await.expect("connect");
        db.run_migrations().await.expect("migrations");
        (db, container)
    }

    async fn client(db: &PgBackend, name: &str) -> ClientRecord {
        db.create_client(&CreateClientParams {
            name: name.to_string(),
            company: None,
            email: None,
            phone: None,
            website: None,
            status: ClientStatus::Active,
            notes: None,
        })
        .await
        .expect("client")
    }

    fn task(client_id: Uuid, title: &str) -> CreateTaskParams {
        CreateTaskParams {
            client_id,
            title: title.to_string(),
            description: None,
            status: TaskStatus::Todo,
            priority: TaskPriority::Medium,
            due_date: None,
        }
    }

    fn message(client_id: Uuid, body: &str) -> CreateChatMessageParams {
        CreateChatMessageParams {
            client_id,
            sender_role: Role::Client,
            sender_account_id: None,
            body: body.to_string(),
        }
    }

    #[tokio::test]
    async fn deleting_a_client_cascades_to_owned_rows() {
        let (db, _pg) = backend().await;
        let owner = client(&db, "Harbor Coffee").await;
        let bystander = client(&db, "Alpine Outfitters").await;

        let account = db
            .create_account(&CreateAccountParams {
                email: "owner@harbor.test".to_string(),
                display_name: "Harbor Owner".to_string(),
                password_hash: "not-a-real-hash".to_string(),
                role: Role::Client,
                client_id: Some(owner.id),
            })
            .await
            .expect("account");
        let owned_task = db.create_task(&task(owner.id, "Signage")).await.expect("task");
        let kept_task = db.create_task(&task(bystander.id, "Catalog")).await.expect("task");
        let owned_message = db
            .create_chat_message(&message(owner.id, "hello"))
            .await
            .expect("message");

        assert!(db.delete_client(owner.id).await.expect("delete"));
        assert!(db.get_account(account.id).await.expect("get").is_none());
        assert!(db.get_task(owned_task.id).await.expect("get").is_none());
        assert!(
            db.get_chat_message(owned_message.id)
                .await
                .expect("get")
                .is_none()
        );
        assert!(db.get_task(kept_task.id).await.expect("get").is_some());

        let err = db
            .create_task(&task(owner.id, "orphan"))
            .await
            .expect_err("foreign key");
        assert!(matches!(err, DatabaseError::Constraint(_)));
    }

    #[tokio::test]
    async fn task_completion_is_stamped_and_cleared() {
        let (db, _pg) = backend().await;
        let owner = client(&db, "Harbor Coffee").await;
        let created = db.create_task(&task(owner.id, "Menu")).await.expect("task");
        assert!(created.completed_at.is_none());

        let done = db
            .update_task(
                created.id,
                &UpdateTaskParams {
                    status: Some(TaskStatus::Done),
                    ..Default::default()
                },
            )
            .await
            .expect("update")
            .expect("exists");
        let stamp = done.completed_at.expect("completed_at set");

        let retitled = db
            .update_task(
                created.id,
                &UpdateTaskParams {
                    title: Some("Menu v2".to_string()),
                    ..Default::default()
                },
            )
            .await
            .expect("update")
            .expect("exists");
        assert_eq!(retitled.completed_at, Some(stamp));

        let reopened = db
            .update_task(
                created.id,
                &UpdateTaskParams {
                    status: Some(TaskStatus::InProgress),
                    ..Default::default()
                },
            )
            .await
            .expect("update")
            .expect("exists");
        assert!(reopened.completed_at.is_none());
    }

    #[tokio::test]
    async fn requests_follow_the_transition_table() {
        let (db, _pg) = backend().await;
        let owner = client(&db, "Riverside Vets").await;
        let created = db
            .create_request(&CreateRequestParams {
                client_id: owner.id,
                kind: RequestKind::Support,
                subject: "Broken contact form".to_string(),
                body: "Submissions go nowhere.".to_string(),
                offer_id: None,
            })
            .await
            .expect("create");
        assert_eq!(created.status, RequestStatus::Pending);

        let move_to = |status| UpdateRequestParams {
            status: Some(status),
            admin_response: None,
        };
        let reviewing = db
            .update_request(created.id, &move_to(RequestStatus::InReview))
            .await
            .expect("update")
            .expect("exists");
        assert_eq!(reviewing.status, RequestStatus::InReview);
        assert!(reviewing.resolved_at.is_none());

        let err = db
            .update_request(created.id, &move_to(RequestStatus::Completed))
            .await
            .expect_err("in_review cannot complete");
        assert!(matches!(err, DatabaseError::Constraint(_)));

        let rejected = db
            .update_request(created.id, &move_to(RequestStatus::Rejected))
            .await
            .expect("update")
            .expect("exists");
        assert!(rejected.resolved_at.is_some());

        let err = db
            .update_request(created.id, &move_to(RequestStatus::Pending))
            .await
            .expect_err("terminal");
        assert!(matches!(err, DatabaseError::Constraint(_)));
    }

    #[tokio::test]
    async fn chat_history_pages_backwards_from_cursor() {
        let (db, _pg) = backend().await;
        let owner = client(&db, "Juniper Studio").await;
        for body in ["one", "two", "three", "four"] {
            db.create_chat_message(&message(owner.id, body))
                .await
                .expect("send");
        }

        let latest = db
            .list_chat_messages(
                owner.id,
                &ChatHistoryQuery {
                    before: None,
                    limit: 2,
                },
            )
            .await
            .expect("history");
        assert_eq!(
            latest.iter().map(|m| m.body.as_str()).collect::<Vec<_>>(),
            vec!["three", "four"]
        );

        let earlier = db
            .list_chat_messages(
                owner.id,
                &ChatHistoryQuery {
                    before: Some(latest[0].created_at),
                    limit: 10,
                },
            )
            .await
            .expect("history");
        assert_eq!(
            earlier.iter().map(|m| m.body.as_str()).collect::<Vec<_>>(),
            vec!["one", "two"]
        );
        assert_eq!(db.count_unread_chat(owner.id, Role::Admin).await.expect("count"), 4);
    }

    #[tokio::test]
    async fn admin_count_excludes_disabled_accounts() {
        let (db, _pg) = backend().await;
        let admin = db
            .create_account(&CreateAccountParams {
                email: "owner@agency.test".to_string(),
                display_name: "Owner".to_string(),
                password_hash: "not-a-real-hash".to_string(),
                role: Role::Admin,
                client_id: None,
            })
            .await
            .expect("admin");
        assert_eq!(db.count_admin_accounts().await.expect("count"), 1);
        db.set_account_disabled(admin.id, true).await.expect("disable");
        assert_eq!(db.count_admin_accounts().await.expect("count"), 0);
    }
}
