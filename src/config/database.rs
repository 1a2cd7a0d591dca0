use secrecy::SecretString;

use crate::config::helpers::{optional_env, parse_env, parse_string_env};
use crate::error::ConfigError;
use crate::settings::Settings;

/// Which persistence backend to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseBackend {
    Postgres,
    LibSql,
}

impl DatabaseBackend {
    fn from_str(raw: &str) -> Result<Self, ConfigError> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" | "pg" => Ok(Self::Postgres),
            "libsql" | "sqlite" | "turso" => Ok(Self::LibSql),
            other => Err(ConfigError::InvalidValue {
                key: "DATABASE_BACKEND".to_string(),
                message: format!("unsupported backend '{other}'"),
            }),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Postgres => "postgres",
            Self::LibSql => "libsql",
        }
    }
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub backend: DatabaseBackend,
    /// PostgreSQL connection string. Required for the postgres backend.
    pub url: Option<SecretString>,
    pub pool_size: usize,
    pub libsql_path: Option<String>,
    /// Remote replica URL (Turso). When set, `libsql_auth_token` is required.
    pub libsql_url: Option<String>,
    pub libsql_auth_token: Option<SecretString>,
}

impl DatabaseConfig {
    pub(crate) fn resolve(settings: &Settings) -> Result<Self, ConfigError> {
        let backend = DatabaseBackend::from_str(&parse_string_env(
            "DATABASE_BACKEND",
            settings.database.backend.clone(),
        )?)?;

        let url = optional_env("DATABASE_URL")?.map(SecretString::from);
        if backend == DatabaseBackend::Postgres && url.is_none() {
            return Err(ConfigError::MissingRequired {
                key: "DATABASE_URL".to_string(),
            });
        }

        let pool_size = parse_env("DATABASE_POOL_SIZE", settings.database.pool_size)?;
        if pool_size == 0 {
            return Err(ConfigError::InvalidValue {
                key: "DATABASE_POOL_SIZE".to_string(),
                message: "pool size must be at least 1".to_string(),
            });
        }

        Ok(Self {
            backend,
            url,
            pool_size,
            libsql_path: optional_env("LIBSQL_PATH")?
                .or_else(|| settings.database.libsql_path.clone()),
            libsql_url: optional_env("LIBSQL_URL")?,
            libsql_auth_token: optional_env("LIBSQL_AUTH_TOKEN")?.map(SecretString::from),
        })
    }
}
