//! Test helpers shared by unit tests across modules.

use std::sync::Arc;

use tempfile::TempDir;

use crate::db::Database;
use crate::db::libsql::LibSqlBackend;

/// A migrated libSQL database in a fresh temp directory.
///
/// Keep the returned `TempDir` alive for as long as the backend is used.
pub(crate) async fn test_libsql() -> (LibSqlBackend, TempDir) {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("test.db");
    let backend = LibSqlBackend::new_local(&path.to_string_lossy())
        .await
        .expect("open libsql");
    backend.run_migrations().await.expect("migrations");
    (backend, dir)
}

/// Same as [`test_libsql`] but behind the `Database` trait object.
pub(crate) async fn test_db() -> (Arc<dyn Database>, TempDir) {
    let (backend, dir) = test_libsql().await;
    (Arc::new(backend), dir)
}

/// Application state over a fresh libSQL database, with storage under the
/// same temp directory.
pub(crate) async fn test_app_state() -> (Arc<crate::web::server::AppState>, TempDir) {
    use crate::config::{Config, DatabaseBackend, DatabaseConfig, PortalConfig, ServerConfig};

    let (db, dir) = test_db().await;
    let config = Config {
        database: DatabaseConfig {
            backend: DatabaseBackend::LibSql,
            url: None,
            pool_size: 1,
            libsql_path: None,
            libsql_url: None,
            libsql_auth_token: None,
        },
        server: ServerConfig {
            host: "127.0.0.1".parse().expect("host"),
            port: 0,
            allowed_origins: Vec::new(),
            body_limit_bytes: 1024 * 1024,
            login_attempts_per_minute: 3,
        },
        portal: PortalConfig::for_storage_root(dir.path().join("storage")),
    };
    let state = crate::web::server::AppState::new(db, &config, dir.path());
    (Arc::new(state), dir)
}
