use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::params;
use uuid::Uuid;

use crate::db::{
    AccountRecord, AccountStore, CreateAccountParams, Role, SessionRecord, SessionStore,
};
use crate::error::DatabaseError;

use super::{
    LibSqlBackend, count, fmt_ts, get_i64, get_text, get_opt_text, opt_text_owned,
    parse_opt_timestamp, parse_opt_uuid, parse_timestamp, parse_uuid,
};

const ACCOUNT_COLUMNS: &str = "id, email, display_name, password_hash, role, client_id, disabled, \
                               last_login_at, created_at, updated_at";

fn row_to_account_record(row: &libsql::Row) -> Result<AccountRecord, DatabaseError> {
    let role_raw = get_text(row, 4);
    Ok(AccountRecord {
        id: parse_uuid(&get_text(row, 0), "account.id")?,
        email: get_text(row, 1),
        display_name: get_text(row, 2),
        password_hash: get_text(row, 3),
        role: Role::from_db_value(&role_raw).ok_or_else(|| {
            DatabaseError::Serialization(format!("invalid account role '{}'", role_raw))
        })?,
        client_id: parse_opt_uuid(get_opt_text(row, 5), "account.client_id")?,
        disabled: get_i64(row, 6) != 0,
        last_login_at: parse_opt_timestamp(get_opt_text(row, 7))?,
        created_at: parse_timestamp(&get_text(row, 8))?,
        updated_at: parse_timestamp(&get_text(row, 9))?,
    })
}

fn row_to_session_record(row: &libsql::Row) -> Result<SessionRecord, DatabaseError> {
    Ok(SessionRecord {
        id: parse_uuid(&get_text(row, 0), "session.id")?,
        account_id: parse_uuid(&get_text(row, 1), "session.account_id")?,
        token_hash: get_text(row, 2),
        expires_at: parse_timestamp(&get_text(row, 3))?,
        created_at: parse_timestamp(&get_text(row, 4))?,
    })
}

/// Emails compare case-insensitively; they are stored lowercased.
fn normalize_email(raw: &str) -> String {
    raw.trim().to_lowercase()
}

#[async_trait]
impl AccountStore for LibSqlBackend {
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

        let email = normalize_email(&input.email);
        let id = Uuid::new_v4();
        let now = fmt_ts(&Utc::now());
        let conn = self.connect().await?;
        conn.execute(
            "INSERT INTO accounts (id, email, display_name, password_hash, role, client_id, disabled, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, ?7, ?7)",
            params![
                id.to_string(),
                email,
                input.display_name.trim(),
                input.password_hash.as_str(),
                input.role.as_str(),
                opt_text_owned(input.client_id.map(|id| id.to_string())),
                now,
            ],
        )
        .await?;

        self.get_account(id)
            .await?
            .ok_or_else(|| DatabaseError::Query("failed to load created account".to_string()))
    }

    async fn get_account(&self, account_id: Uuid) -> Result<Option<AccountRecord>, DatabaseError> {
        let conn = self.connect().await?;
        let row = conn
            .query(
                &format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = ?1 LIMIT 1"),
                params![account_id.to_string()],
            )
            .await?
            .next()
            .await?;
        row.map(|row| row_to_account_record(&row)).transpose()
    }

    async fn get_account_by_email(
        &self,
        email: &str,
    ) -> Result<Option<AccountRecord>, DatabaseError> {
        let conn = self.connect().await?;
        let row = conn
            .query(
                &format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE email = ?1 LIMIT 1"),
                params![normalize_email(email)],
            )
            .await?
            .next()
            .await?;
        row.map(|row| row_to_account_record(&row)).transpose()
    }

    async fn list_accounts(
        &self,
        client_id: Option<Uuid>,
    ) -> Result<Vec<AccountRecord>, DatabaseError> {
        let conn = self.connect().await?;
        let mut rows = match client_id {
            Some(client_id) => {
                conn.query(
                    &format!(
                        "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE client_id = ?1 ORDER BY email"
                    ),
                    params![client_id.to_string()],
                )
                .await?
            }
            None => {
                conn.query(
                    &format!("SELECT {ACCOUNT_COLUMNS} FROM accounts ORDER BY role, email"),
                    (),
                )
                .await?
            }
        };
        let mut out = Vec::new();
        while let Some(row) = rows.next().await? {
            out.push(row_to_account_record(&row)?);
        }
        Ok(out)
    }

    async fn set_account_password(
        &self,
        account_id: Uuid,
        password_hash: &str,
    ) -> Result<bool, DatabaseError> {
        let conn = self.connect().await?;
        let updated = conn
            .execute(
                "UPDATE accounts SET password_hash = ?2, updated_at = ?3 WHERE id = ?1",
                params![account_id.to_string(), password_hash, fmt_ts(&Utc::now())],
            )
            .await?;
        Ok(updated > 0)
    }

    async fn set_account_disabled(
        &self,
        account_id: Uuid,
        disabled: bool,
    ) -> Result<bool, DatabaseError> {
        let conn = self.connect().await?;
        let updated = conn
            .execute(
                "UPDATE accounts SET disabled = ?2, updated_at = ?3 WHERE id = ?1",
                params![
                    account_id.to_string(),
                    i64::from(disabled),
                    fmt_ts(&Utc::now())
                ],
            )
            .await?;
        Ok(updated > 0)
    }

    async fn touch_account_login(
        &self,
        account_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<(), DatabaseError> {
        let conn = self.connect().await?;
        conn.execute(
            "UPDATE accounts SET last_login_at = ?2 WHERE id = ?1",
            params![account_id.to_string(), fmt_ts(&at)],
        )
        .await?;
        Ok(())
    }

    async fn delete_account(&self, account_id: Uuid) -> Result<bool, DatabaseError> {
        let conn = self.connect().await?;
        let deleted = conn
            .execute(
                "DELETE FROM accounts WHERE id = ?1",
                params![account_id.to_string()],
            )
            .await?;
        Ok(deleted > 0)
    }

    async fn count_admin_accounts(&self) -> Result<i64, DatabaseError> {
        let conn = self.connect().await?;
        count(
            &conn,
            "SELECT COUNT(*) FROM accounts WHERE role = 'admin' AND disabled = 0",
            (),
        )
        .await
    }
}

#[async_trait]
impl SessionStore for LibSqlBackend {
    async fn create_session(
        &self,
        account_id: Uuid,
        token_hash: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<SessionRecord, DatabaseError> {
        let id = Uuid::new_v4();
        let conn = self.connect().await?;
        conn.execute(
            "INSERT INTO sessions (id, account_id, token_hash, expires_at, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                id.to_string(),
                account_id.to_string(),
                token_hash,
                fmt_ts(&expires_at),
                fmt_ts(&Utc::now()),
            ],
        )
        .await?;

        let row = conn
            .query(
                "SELECT id, account_id, token_hash, expires_at, created_at \
                 FROM sessions WHERE id = ?1 LIMIT 1",
                params![id.to_string()],
            )
            .await?
            .next()
            .await?
            .ok_or_else(|| DatabaseError::Query("failed to load created session".to_string()))?;
        row_to_session_record(&row)
    }

    async fn get_live_session(
        &self,
        token_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<SessionRecord>, DatabaseError> {
        let conn = self.connect().await?;
        let row = conn
            .query(
                "SELECT id, account_id, token_hash, expires_at, created_at \
                 FROM sessions WHERE token_hash = ?1 AND expires_at > ?2 LIMIT 1",
                params![token_hash, fmt_ts(&now)],
            )
            .await?
            .next()
            .await?;
        row.map(|row| row_to_session_record(&row)).transpose()
    }

    async fn delete_session(&self, token_hash: &str) -> Result<bool, DatabaseError> {
        let conn = self.connect().await?;
        let deleted = conn
            .execute(
                "DELETE FROM sessions WHERE token_hash = ?1",
                params![token_hash],
            )
            .await?;
        Ok(deleted > 0)
    }

    async fn delete_sessions_for_account(&self, account_id: Uuid) -> Result<u64, DatabaseError> {
        let conn = self.connect().await?;
        let deleted = conn
            .execute(
                "DELETE FROM sessions WHERE account_id = ?1",
                params![account_id.to_string()],
            )
            .await?;
        Ok(deleted)
    }

    async fn purge_expired_sessions(&self, now: DateTime<Utc>) -> Result<u64, DatabaseError> {
        let conn = self.connect().await?;
        let deleted = conn
            .execute(
                "DELETE FROM sessions WHERE expires_at <= ?1",
                params![fmt_ts(&now)],
            )
            .await?;
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{ClientStatus, ClientStore, CreateClientParams};

    fn admin(email: &str) -> CreateAccountParams {
        CreateAccountParams {
            email: email.to_string(),
            display_name: "Agency Admin".to_string(),
            password_hash: "hash".to_string(),
            role: Role::Admin,
            client_id: None,
        }
    }

    #[tokio::test]
    async fn emails_are_unique_case_insensitively() {
        let (db, _tmp) = crate::testing::test_libsql().await;
        let created = db
            .create_account(&admin("Owner@Agency.test"))
            .await
            .expect("create");
        assert_eq!(created.email, "owner@agency.test");

        let err = db
            .create_account(&admin("owner@agency.TEST"))
            .await
            .expect_err("duplicate email");
        assert!(matches!(err, DatabaseError::Constraint(_)), "{err:?}");

        let found = db
            .get_account_by_email("OWNER@agency.test")
            .await
            .expect("lookup")
            .expect("account");
        assert_eq!(found.id, created.id);
        assert_eq!(db.count_admin_accounts().await.expect("count"), 1);
    }

    #[tokio::test]
    async fn client_accounts_require_a_client() {
        let (db, _tmp) = crate::testing::test_libsql().await;
        let err = db
            .create_account(&CreateAccountParams {
                role: Role::Client,
                ..admin("client@example.test")
            })
            .await
            .expect_err("client without client_id");
        assert!(matches!(err, DatabaseError::Constraint(_)));

        let client = db
            .create_client(&CreateClientParams {
                name: "Bright Bakery".to_string(),
                company: None,
                email: None,
                phone: None,
                website: None,
                status: ClientStatus::Active,
                notes: None,
            })
            .await
            .expect("client");
        let account = db
            .create_account(&CreateAccountParams {
                role: Role::Client,
                client_id: Some(client.id),
                ..admin("client@example.test")
            })
            .await
            .expect("client account");
        assert_eq!(
            db.list_accounts(Some(client.id)).await.expect("list").len(),
            1
        );

        assert!(db.delete_client(client.id).await.expect("delete client"));
        assert!(
            db.get_account(account.id).await.expect("get").is_none(),
            "account cascades with its client"
        );
    }

    #[tokio::test]
    async fn sessions_expire_and_purge() {
        let (db, _tmp) = crate::testing::test_libsql().await;
        let account = db.create_account(&admin("a@agency.test")).await.expect("account");
        let now = Utc::now();

        db.create_session(account.id, "live", now + chrono::Duration::hours(1))
            .await
            .expect("live");
        db.create_session(account.id, "stale", now - chrono::Duration::hours(1))
            .await
            .expect("stale");

        assert!(db.get_live_session("live", now).await.expect("get").is_some());
        assert!(db.get_live_session("stale", now).await.expect("get").is_none());
        assert_eq!(db.purge_expired_sessions(now).await.expect("purge"), 1);
        assert!(db.delete_session("live").await.expect("delete"));
        assert!(!db.delete_session("live").await.expect("delete again"));
    }

    #[tokio::test]
    async fn disabling_and_password_updates() {
        let (db, _tmp) = crate::testing::test_libsql().await;
        let account = db.create_account(&admin("b@agency.test")).await.expect("account");

        assert!(db.set_account_disabled(account.id, true).await.expect("disable"));
        assert!(db.set_account_password(account.id, "new-hash").await.expect("password"));
        db.touch_account_login(account.id, Utc::now()).await.expect("touch");

        let reloaded = db.get_account(account.id).await.expect("get").expect("account");
        assert!(reloaded.disabled);
        assert_eq!(reloaded.password_hash, "new-hash");
        assert!(reloaded.last_login_at.is_some());
        assert_eq!(db.count_admin_accounts().await.expect("count"), 0);
        assert!(!db.set_account_disabled(Uuid::new_v4(), true).await.expect("missing"));
    }
}
