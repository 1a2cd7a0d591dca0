//! libSQL backend for the Database trait.
//!
//! Opens a local file database or a Turso embedded replica. Each store call
//! takes a fresh connection from the shared `libsql::Database` handle and
//! enables foreign keys on it, since SQLite scopes that pragma per connection.

mod accounts;
mod chat;
mod clients;
mod content;
mod requests;

use std::collections::BTreeMap;
use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use libsql::{Connection, Value, params};
use uuid::Uuid;

use crate::db::libsql_migrations::MIGRATIONS;
use crate::db::{
    AdminDashboardCounts, ClientDashboardCounts, DashboardStore, Database, SettingRow,
    SettingsStore,
};
use crate::error::DatabaseError;

/// libSQL database backend.
pub struct LibSqlBackend {
    db: libsql::Database,
}

impl LibSqlBackend {
    /// Open (or create) a local database file.
    pub async fn new_local(path: &str) -> Result<Self, DatabaseError> {
        if let Some(parent) = Path::new(path).parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("failed to create database directory: {e}"))
            })?;
        }
        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(e.to_string()))?;
        Ok(Self { db })
    }

    /// Open an embedded replica that syncs with a remote libSQL server.
    pub async fn new_remote_replica(
        path: &str,
        url: &str,
        auth_token: &str,
    ) -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_remote_replica(path, url.to_string(), auth_token.to_string())
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(e.to_string()))?;
        Ok(Self { db })
    }

    pub(crate) async fn connect(&self) -> Result<Connection, DatabaseError> {
        let conn = self
            .db
            .connect()
            .map_err(|e| DatabaseError::Pool(e.to_string()))?;
        conn.execute("PRAGMA foreign_keys = ON", ()).await?;
        Ok(conn)
    }

    async fn applied_migrations(&self, conn: &Connection) -> Result<Vec<i64>, DatabaseError> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS _migrations (\
               version INTEGER PRIMARY KEY, \
               name TEXT NOT NULL, \
               applied_at TEXT NOT NULL)",
            (),
        )
        .await?;
        let mut rows = conn
            .query("SELECT version FROM _migrations ORDER BY version", ())
            .await?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().await? {
            out.push(get_i64(&row, 0));
        }
        Ok(out)
    }
}

// ==================== Row helpers ====================

pub(crate) fn fmt_ts(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, DatabaseError> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc));
    }
    chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
        .map(|naive| naive.and_utc())
        .map_err(|e| DatabaseError::Serialization(format!("invalid timestamp '{raw}': {e}")))
}

pub(crate) fn parse_opt_timestamp(
    raw: Option<String>,
) -> Result<Option<DateTime<Utc>>, DatabaseError> {
    raw.map(|value| parse_timestamp(&value)).transpose()
}

pub(crate) fn fmt_date(date: &NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

pub(crate) fn parse_opt_date(raw: Option<String>) -> Result<Option<NaiveDate>, DatabaseError> {
    raw.map(|value| parse_date(&value)).transpose()
}

pub(crate) fn parse_date(raw: &str) -> Result<NaiveDate, DatabaseError> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|e| DatabaseError::Serialization(format!("invalid date '{raw}': {e}")))
}

pub(crate) fn parse_uuid(raw: &str, field: &str) -> Result<Uuid, DatabaseError> {
    Uuid::parse_str(raw)
        .map_err(|e| DatabaseError::Serialization(format!("invalid {} uuid: {}", field, e)))
}

pub(crate) fn parse_opt_uuid(raw: Option<String>, field: &str) -> Result<Option<Uuid>, DatabaseError> {
    raw.map(|value| parse_uuid(&value, field)).transpose()
}

pub(crate) fn get_text(row: &libsql::Row, idx: i32) -> String {
    match row.get_value(idx) {
        Ok(Value::Text(s)) => s,
        Ok(Value::Integer(i)) => i.to_string(),
        _ => String::new(),
    }
}

pub(crate) fn get_opt_text(row: &libsql::Row, idx: i32) -> Option<String> {
    match row.get_value(idx) {
        Ok(Value::Text(s)) if !s.is_empty() => Some(s),
        _ => None,
    }
}

pub(crate) fn get_i64(row: &libsql::Row, idx: i32) -> i64 {
    match row.get_value(idx) {
        Ok(Value::Integer(i)) => i,
        Ok(Value::Text(s)) => s.parse().unwrap_or_default(),
        _ => 0,
    }
}

pub(crate) fn get_opt_i64(row: &libsql::Row, idx: i32) -> Option<i64> {
    match row.get_value(idx) {
        Ok(Value::Integer(i)) => Some(i),
        _ => None,
    }
}

pub(crate) fn opt_text(value: Option<&str>) -> Value {
    match value {
        Some(s) => Value::Text(s.to_string()),
        None => Value::Null,
    }
}

pub(crate) fn opt_text_owned(value: Option<String>) -> Value {
    match value {
        Some(s) => Value::Text(s),
        None => Value::Null,
    }
}

pub(crate) fn opt_i64(value: Option<i64>) -> Value {
    match value {
        Some(i) => Value::Integer(i),
        None => Value::Null,
    }
}

pub(crate) fn bool_value(value: bool) -> Value {
    Value::Integer(i64::from(value))
}

pub(crate) async fn count(
    conn: &Connection,
    sql: &str,
    params: impl libsql::params::IntoParams,
) -> Result<i64, DatabaseError> {
    let row = conn
        .query(sql, params)
        .await?
        .next()
        .await?
        .ok_or_else(|| DatabaseError::Query("count query returned no rows".to_string()))?;
    Ok(get_i64(&row, 0))
}

// ==================== Database ====================

#[async_trait]
impl Database for LibSqlBackend {
    async fn run_migrations(&self) -> Result<(), DatabaseError> {
        let conn = self.connect().await?;
        let applied = self.applied_migrations(&conn).await?;

        for (version, name, sql) in MIGRATIONS {
            if applied.contains(version) {
                continue;
            }
            conn.execute_batch(sql)
                .await
                .map_err(|e| DatabaseError::Migration(format!("V{version}__{name}: {e}")))?;
            conn.execute(
                "INSERT INTO _migrations (version, name, applied_at) VALUES (?1, ?2, ?3)",
                params![*version, *name, fmt_ts(&Utc::now())],
            )
            .await?;
            tracing::debug!(version, name, "Applied libSQL migration");
        }
        Ok(())
    }
}

#[async_trait]
impl SettingsStore for LibSqlBackend {
    async fn get_setting(&self, key: &str) -> Result<Option<serde_json::Value>, DatabaseError> {
        let conn = self.connect().await?;
        let row = conn
            .query("SELECT value FROM settings WHERE key = ?1", params![key])
            .await?
            .next()
            .await?;
        row.map(|row| {
            serde_json::from_str(&get_text(&row, 0))
                .map_err(|e| DatabaseError::Serialization(e.to_string()))
        })
        .transpose()
    }

    async fn set_setting(
        &self,
        key: &str,
        value: &serde_json::Value,
    ) -> Result<(), DatabaseError> {
        let raw =
            serde_json::to_string(value).map_err(|e| DatabaseError::Serialization(e.to_string()))?;
        let conn = self.connect().await?;
        conn.execute(
            "INSERT INTO settings (key, value, updated_at) VALUES (?1, ?2, ?3) \
             ON CONFLICT (key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![key, raw, fmt_ts(&Utc::now())],
        )
        .await?;
        Ok(())
    }

    async fn delete_setting(&self, key: &str) -> Result<bool, DatabaseError> {
        let conn = self.connect().await?;
        let deleted = conn
            .execute("DELETE FROM settings WHERE key = ?1", params![key])
            .await?;
        Ok(deleted > 0)
    }

    async fn list_settings(&self) -> Result<Vec<SettingRow>, DatabaseError> {
        let conn = self.connect().await?;
        let mut rows = conn
            .query("SELECT key, value, updated_at FROM settings ORDER BY key", ())
            .await?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().await? {
            out.push(SettingRow {
                key: get_text(&row, 0),
                value: serde_json::from_str(&get_text(&row, 1))
                    .map_err(|e| DatabaseError::Serialization(e.to_string()))?,
                updated_at: parse_timestamp(&get_text(&row, 2))?,
            });
        }
        Ok(out)
    }
}

#[async_trait]
impl DashboardStore for LibSqlBackend {
    async fn admin_dashboard_counts(
        &self,
        today: NaiveDate,
    ) -> Result<AdminDashboardCounts, DatabaseError> {
        let conn = self.connect().await?;
        let today_raw = fmt_date(&today);

        let mut clients_by_status = BTreeMap::new();
        let mut rows = conn
            .query("SELECT status, COUNT(*) FROM clients GROUP BY status", ())
            .await?;
        while let Some(row) = rows.next().await? {
            clients_by_status.insert(get_text(&row, 0), get_i64(&row, 1));
        }

        let week_ago = (today - chrono::Duration::days(7))
            .and_hms_opt(0, 0, 0)
            .map(|dt| fmt_ts(&dt.and_utc()))
            .unwrap_or_default();

        Ok(AdminDashboardCounts {
            clients_by_status,
            open_tasks: count(&conn, "SELECT COUNT(*) FROM tasks WHERE status != 'done'", ())
                .await?,
            overdue_tasks: count(
                &conn,
                "SELECT COUNT(*) FROM tasks \
                 WHERE status != 'done' AND due_date IS NOT NULL AND due_date < ?1",
                params![today_raw],
            )
            .await?,
            tasks_completed_last_7_days: count(
                &conn,
                "SELECT COUNT(*) FROM tasks WHERE status = 'done' AND completed_at >= ?1",
                params![week_ago],
            )
            .await?,
            pending_requests: count(
                &conn,
                "SELECT COUNT(*) FROM requests WHERE status IN ('pending', 'in_review')",
                (),
            )
            .await?,
            unread_messages: count(
                &conn,
                "SELECT COUNT(*) FROM chat_messages WHERE sender_role = 'client' AND read_at IS NULL",
                (),
            )
            .await?,
        })
    }

    async fn client_dashboard_counts(
        &self,
        client_id: Uuid,
        today: NaiveDate,
    ) -> Result<ClientDashboardCounts, DatabaseError> {
        let conn = self.connect().await?;
        let client_id = client_id.to_string();

        Ok(ClientDashboardCounts {
            open_tasks: count(
                &conn,
                "SELECT COUNT(*) FROM tasks WHERE client_id = ?1 AND status != 'done'",
                params![client_id.as_str()],
            )
            .await?,
            overdue_tasks: count(
                &conn,
                "SELECT COUNT(*) FROM tasks WHERE client_id = ?1 AND status != 'done' \
                 AND due_date IS NOT NULL AND due_date < ?2",
                params![client_id.as_str(), fmt_date(&today)],
            )
            .await?,
            unread_messages: count(
                &conn,
                "SELECT COUNT(*) FROM chat_messages \
                 WHERE client_id = ?1 AND sender_role = 'admin' AND read_at IS NULL",
                params![client_id.as_str()],
            )
            .await?,
            open_requests: count(
                &conn,
                "SELECT COUNT(*) FROM requests \
                 WHERE client_id = ?1 AND status IN ('pending', 'in_review', 'approved')",
                params![client_id.as_str()],
            )
            .await?,
        })
    }
}
