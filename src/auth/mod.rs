//! Authentication for both portals.
//!
//! Accounts log in with email and password and receive an opaque bearer
//! token. The same token is accepted from the `Authorization` header (API
//! clients) and from the session cookie (page requests).

pub mod access;
pub mod password;
pub mod session;

use std::sync::{Arc, OnceLock};

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::db::{AccountRecord, CreateAccountParams, Database, Role};
use crate::error::AuthError;
use crate::portal::validate;

/// The authenticated caller of a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Principal {
    pub account_id: Uuid,
    pub role: Role,
    pub client_id: Option<Uuid>,
    pub email: String,
    pub display_name: String,
}

impl Principal {
    fn from_account(account: &AccountRecord) -> Self {
        Self {
            account_id: account.id,
            role: account.role,
            client_id: account.client_id,
            email: account.email.clone(),
            display_name: account.display_name.clone(),
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

/// A freshly issued session.
#[derive(Debug, Clone)]
pub struct IssuedSession {
    /// Plain token, handed to the caller once and never stored.
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub principal: Principal,
}

/// Input for creating a login account.
#[derive(Debug, Clone)]
pub struct NewAccount {
    pub email: String,
    pub display_name: String,
    pub password: String,
    pub role: Role,
    pub client_id: Option<Uuid>,
}

async fn hash_blocking(password: String) -> Result<String, AuthError> {
    tokio::task::spawn_blocking(move || password::hash_password(&password))
        .await
        .map_err(|e| AuthError::Hashing(e.to_string()))?
}

async fn verify_blocking(password: String, hash: String) -> Result<bool, AuthError> {
    tokio::task::spawn_blocking(move || password::verify_password(&password, &hash))
        .await
        .map_err(|e| AuthError::Hashing(e.to_string()))?
}

/// Hash checked when the email is unknown, so both failure paths cost the same.
fn dummy_hash() -> Option<&'static str> {
    static DUMMY: OnceLock<Option<String>> = OnceLock::new();
    DUMMY
        .get_or_init(|| password::hash_password("clientdesk-timing-equalizer").ok())
        .as_deref()
}

/// A session that currently resolves, with the instant it stops doing so.
#[derive(Debug, Clone)]
pub struct ActiveSession {
    pub principal: Principal,
    pub expires_at: DateTime<Utc>,
}

/// Login, logout and session resolution over the account and session stores.
#[derive(Clone)]
pub struct AuthService {
    db: Arc<dyn Database>,
    session_ttl: Duration,
}

impl AuthService {
    pub fn new(db: Arc<dyn Database>, session_ttl_hours: i64) -> Self {
        Self {
            db,
            session_ttl: Duration::hours(session_ttl_hours),
        }
    }

    /// Create an account after validating the email and password.
    pub async fn create_account(&self, input: NewAccount) -> Result<AccountRecord, AuthError> {
        let email = validate::normalize_email(&input.email)
            .map_err(|e| AuthError::InvalidAccount(e.to_string()))?;
        let display_name = input.display_name.trim();
        if display_name.is_empty() {
            return Err(AuthError::InvalidAccount(
                "display name must not be empty".to_string(),
            ));
        }
        password::check_password_strength(&input.password)?;
        let password_hash = hash_blocking(input.password).await?;

        let account = self
            .db
            .create_account(&CreateAccountParams {
                email,
                display_name: display_name.to_string(),
                password_hash,
                role: input.role,
                client_id: input.client_id,
            })
            .await?;
        tracing::info!(
            account_id = %account.id,
            role = account.role.as_str(),
            "Created account"
        );
        Ok(account)
    }

    /// Create the first admin account. Returns `None` when an admin already exists.
    pub async fn bootstrap_admin(
        &self,
        email: &str,
        display_name: &str,
        password: &str,
    ) -> Result<Option<AccountRecord>, AuthError> {
        if self.db.count_admin_accounts().await? > 0 {
            tracing::debug!("Admin account already present, skipping bootstrap");
            return Ok(None);
        }
        self.create_account(NewAccount {
            email: email.to_string(),
            display_name: display_name.to_string(),
            password: password.to_string(),
            role: Role::Admin,
            client_id: None,
        })
        .await
        .map(Some)
    }

    /// Exchange credentials for a session.
    pub async fn login(&self, email: &str, password: &str) -> Result<IssuedSession, AuthError> {
        let email = email.trim().to_lowercase();
        let Some(account) = self.db.get_account_by_email(&email).await? else {
            if let Some(dummy) = dummy_hash() {
                let _ = verify_blocking(password.to_string(), dummy.to_string()).await;
            }
            return Err(AuthError::InvalidCredentials);
        };

        if !verify_blocking(password.to_string(), account.password_hash.clone()).await? {
            tracing::info!(account_id = %account.id, "Rejected login: wrong password");
            return Err(AuthError::InvalidCredentials);
        }
        if account.disabled {
            tracing::info!(account_id = %account.id, "Rejected login: account disabled");
            return Err(AuthError::AccountDisabled);
        }

        let now = Utc::now();
        self.db.touch_account_login(account.id, now).await?;
        self.issue(&account, now).await
    }

    async fn issue(
        &self,
        account: &AccountRecord,
        now: DateTime<Utc>,
    ) -> Result<IssuedSession, AuthError> {
        let token = session::generate_token();
        let expires_at = now + self.session_ttl;
        self.db
            .create_session(account.id, &session::hash_token(&token), expires_at)
            .await?;
        Ok(IssuedSession {
            token,
            expires_at,
            principal: Principal::from_account(account),
        })
    }

    /// Revoke the session behind `token`. Unknown tokens are not an error.
    pub async fn logout(&self, token: &str) -> Result<bool, AuthError> {
        if !session::looks_like_token(token) {
            return Ok(false);
        }
        Ok(self.db.delete_session(&session::hash_token(token)).await?)
    }

    /// Resolve a bearer token to its principal.
    ///
    /// Malformed, unknown and expired tokens, as well as tokens of disabled
    /// accounts, all resolve to `None`.
    pub async fn resolve(&self, token: &str) -> Result<Option<Principal>, AuthError> {
        Ok(self
            .resolve_session(token)
            .await?
            .map(|active| active.principal))
    }

    /// Like [`resolve`](Self::resolve), also reporting when the session expires.
    pub async fn resolve_session(&self, token: &str) -> Result<Option<ActiveSession>, AuthError> {
        if !session::looks_like_token(token) {
            return Ok(None);
        }
        let token_hash = session::hash_token(token);
        let Some(session) = self.db.get_live_session(&token_hash, Utc::now()).await? else {
            return Ok(None);
        };
        if !session::token_matches(token, &session.token_hash) {
            return Ok(None);
        }
        let Some(account) = self.db.get_account(session.account_id).await? else {
            return Ok(None);
        };
        if account.disabled {
            return Ok(None);
        }
        Ok(Some(ActiveSession {
            principal: Principal::from_account(&account),
            expires_at: session.expires_at,
        }))
    }

    /// Change the caller's password. All existing sessions are revoked and a
    /// new one is issued.
    pub async fn change_password(
        &self,
        principal: &Principal,
        current: &str,
        new_password: &str,
    ) -> Result<IssuedSession, AuthError> {
        let account = self
            .db
            .get_account(principal.account_id)
            .await?
            .ok_or(AuthError::SessionInvalid)?;
        if !verify_blocking(current.to_string(), account.password_hash.clone()).await? {
            return Err(AuthError::InvalidCredentials);
        }
        password::check_password_strength(new_password)?;
        let hash = hash_blocking(new_password.to_string()).await?;
        self.db.set_account_password(account.id, &hash).await?;
        let revoked = self.db.delete_sessions_for_account(account.id).await?;
        tracing::info!(account_id = %account.id, revoked, "Password changed");
        self.issue(&account, Utc::now()).await
    }

    /// Set a new password without knowing the old one (admin reset).
    pub async fn reset_password(
        &self,
        account_id: Uuid,
        new_password: &str,
    ) -> Result<bool, AuthError> {
        password::check_password_strength(new_password)?;
        let hash = hash_blocking(new_password.to_string()).await?;
        if !self.db.set_account_password(account_id, &hash).await? {
            return Ok(false);
        }
        self.db.delete_sessions_for_account(account_id).await?;
        Ok(true)
    }

    /// Enable or disable an account. Disabling revokes its sessions.
    pub async fn set_disabled(&self, account_id: Uuid, disabled: bool) -> Result<bool, AuthError> {
        if !self.db.set_account_disabled(account_id, disabled).await? {
            return Ok(false);
        }
        if disabled {
            self.db.delete_sessions_for_account(account_id).await?;
        }
        Ok(true)
    }

    /// Drop expired sessions.
    pub async fn purge_expired(&self) -> Result<u64, AuthError> {
        Ok(self.db.purge_expired_sessions(Utc::now()).await?)
    }
}

#[cfg(all(test, feature = "libsql"))]
mod tests {
    use super::*;
    use crate::db::{ClientStatus, CreateClientParams};

    async fn service() -> (AuthService, Arc<dyn Database>, tempfile::TempDir) {
        let (db, tmp) = crate::testing::test_db().await;
        (AuthService::new(Arc::clone(&db), 24), db, tmp)
    }

    fn admin(email: &str) -> NewAccount {
        NewAccount {
            email: email.to_string(),
            display_name: "Agency Admin".to_string(),
            password: "admin-password-1".to_string(),
            role: Role::Admin,
            client_id: None,
        }
    }

    #[tokio::test]
    async fn login_resolve_logout_round() {
        let (auth, _db, _tmp) = service().await;
        auth.create_account(admin("Owner@Agency.test")).await.expect("create");

        let session = auth
            .login("owner@agency.test", "admin-password-1")
            .await
            .expect("login");
        assert_eq!(session.principal.role, Role::Admin);
        assert_eq!(session.principal.email, "owner@agency.test");

        let resolved = auth.resolve(&session.token).await.expect("resolve");
        assert_eq!(resolved, Some(session.principal.clone()));

        assert!(auth.logout(&session.token).await.expect("logout"));
        assert!(auth.resolve(&session.token).await.expect("resolve").is_none());
    }

    #[tokio::test]
    async fn resolve_session_reports_expiry() {
        let (auth, _db, _tmp) = service().await;
        auth.create_account(admin("owner@agency.test")).await.expect("create");
        let session = auth
            .login("owner@agency.test", "admin-password-1")
            .await
            .expect("login");

        let active = auth
            .resolve_session(&session.token)
            .await
            .expect("resolve")
            .expect("live session");
        assert_eq!(active.principal, session.principal);
        assert!((active.expires_at - session.expires_at).num_seconds().abs() <= 1);
        assert!(auth.resolve_session("not-a-token").await.expect("resolve").is_none());
    }

    #[tokio::test]
    async fn wrong_password_and_unknown_email_look_the_same() {
        let (auth, _db, _tmp) = service().await;
        auth.create_account(admin("owner@agency.test")).await.expect("create");

        assert!(matches!(
            auth.login("owner@agency.test", "nope-nope-nope").await,
            Err(AuthError::InvalidCredentials)
        ));
        assert!(matches!(
            auth.login("ghost@agency.test", "admin-password-1").await,
            Err(AuthError::InvalidCredentials)
        ));
    }

    #[tokio::test]
    async fn disabled_accounts_lose_their_sessions() {
        let (auth, _db, _tmp) = service().await;
        let account = auth.create_account(admin("owner@agency.test")).await.expect("create");
        let session = auth
            .login("owner@agency.test", "admin-password-1")
            .await
            .expect("login");

        assert!(auth.set_disabled(account.id, true).await.expect("disable"));
        assert!(auth.resolve(&session.token).await.expect("resolve").is_none());
        assert!(matches!(
            auth.login("owner@agency.test", "admin-password-1").await,
            Err(AuthError::AccountDisabled)
        ));
    }

    #[tokio::test]
    async fn expired_sessions_do_not_resolve() {
        let (db, _tmp) = crate::testing::test_db().await;
        let auth = AuthService::new(Arc::clone(&db), 24);
        let account = auth.create_account(admin("owner@agency.test")).await.expect("create");

        let token = session::generate_token();
        db.create_session(
            account.id,
            &session::hash_token(&token),
            Utc::now() - Duration::minutes(1),
        )
        .await
        .expect("session");
        assert!(auth.resolve(&token).await.expect("resolve").is_none());
        assert_eq!(auth.purge_expired().await.expect("purge"), 1);
    }

    #[tokio::test]
    async fn garbage_tokens_resolve_to_none() {
        let (auth, _db, _tmp) = service().await;
        assert!(auth.resolve("").await.expect("resolve").is_none());
        assert!(auth.resolve("definitely not a token").await.expect("resolve").is_none());
        assert!(
            auth.resolve(&session::generate_token())
                .await
                .expect("resolve")
                .is_none()
        );
    }

    #[tokio::test]
    async fn change_password_rotates_sessions() {
        let (auth, _db, _tmp) = service().await;
        auth.create_account(admin("owner@agency.test")).await.expect("create");
        let first = auth
            .login("owner@agency.test", "admin-password-1")
            .await
            .expect("login");

        assert!(matches!(
            auth.change_password(&first.principal, "wrong-current", "new-password-22")
                .await,
            Err(AuthError::InvalidCredentials)
        ));
        assert!(matches!(
            auth.change_password(&first.principal, "admin-password-1", "short")
                .await,
            Err(AuthError::WeakPassword(_))
        ));

        let rotated = auth
            .change_password(&first.principal, "admin-password-1", "new-password-22")
            .await
            .expect("change");
        assert!(auth.resolve(&first.token).await.expect("old").is_none());
        assert!(auth.resolve(&rotated.token).await.expect("new").is_some());
        assert!(auth.login("owner@agency.test", "new-password-22").await.is_ok());
    }

    #[tokio::test]
    async fn bootstrap_admin_runs_once() {
        let (auth, _db, _tmp) = service().await;
        let first = auth
            .bootstrap_admin("owner@agency.test", "Owner", "admin-password-1")
            .await
            .expect("bootstrap");
        assert!(first.is_some());
        let second = auth
            .bootstrap_admin("other@agency.test", "Other", "admin-password-2")
            .await
            .expect("bootstrap");
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn client_accounts_carry_their_tenant() {
        let (auth, db, _tmp) = service().await;
        let client = db
            .create_client(&CreateClientParams {
                name: "Harbor Bakery".to_string(),
                company: None,
                email: None,
                phone: None,
                website: None,
                status: ClientStatus::Active,
                notes: None,
            })
            .await
            .expect("client");
        auth.create_account(NewAccount {
            email: "baker@harbor.test".to_string(),
            display_name: "Baker".to_string(),
            password: "client-password-1".to_string(),
            role: Role::Client,
            client_id: Some(client.id),
        })
        .await
        .expect("account");

        let session = auth
            .login("baker@harbor.test", "client-password-1")
            .await
            .expect("login");
        assert_eq!(session.principal.role, Role::Client);
        assert_eq!(session.principal.client_id, Some(client.id));
    }
}
