//! Error types shared across the crate.

use thiserror::Error;

/// Configuration resolution errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required configuration: {key}")]
    MissingRequired { key: String },

    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to read settings file {path}: {reason}")]
    SettingsFile { path: String, reason: String },
}

/// Persistence errors, independent of the backend in use.
#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Invalid data: {0}")]
    Serialization(String),

    #[error("Migration failed: {0}")]
    Migration(String),
}

impl DatabaseError {
    pub fn not_found(entity: &str, id: impl ToString) -> Self {
        Self::NotFound {
            entity: entity.to_string(),
            id: id.to_string(),
        }
    }
}

#[cfg(feature = "libsql")]
impl From<libsql::Error> for DatabaseError {
    fn from(e: libsql::Error) -> Self {
        let message = e.to_string();
        if message.contains("UNIQUE constraint failed")
            || message.contains("FOREIGN KEY constraint failed")
            || message.contains("CHECK constraint failed")
        {
            Self::Constraint(message)
        } else {
            Self::Query(message)
        }
    }
}

#[cfg(feature = "postgres")]
impl From<tokio_postgres::Error> for DatabaseError {
    fn from(e: tokio_postgres::Error) -> Self {
        use tokio_postgres::error::SqlState;

        match e.code() {
            Some(code)
                if *code == SqlState::UNIQUE_VIOLATION
                    || *code == SqlState::FOREIGN_KEY_VIOLATION
                    || *code == SqlState::CHECK_VIOLATION =>
            {
                Self::Constraint(e.to_string())
            }
            _ => Self::Query(e.to_string()),
        }
    }
}

#[cfg(feature = "postgres")]
impl From<deadpool_postgres::PoolError> for DatabaseError {
    fn from(e: deadpool_postgres::PoolError) -> Self {
        Self::Pool(e.to_string())
    }
}

/// Rejected user input.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

/// Authentication and authorization errors.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Invalid email or password")]
    InvalidCredentials,

    #[error("Account is disabled")]
    AccountDisabled,

    #[error("Session is missing, expired or revoked")]
    SessionInvalid,

    #[error("Password rejected: {0}")]
    WeakPassword(String),

    #[error("Invalid account data: {0}")]
    InvalidAccount(String),

    #[error("Password hashing failed: {0}")]
    Hashing(String),

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

/// File storage errors.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Object exceeds the {limit} byte upload limit ({size} bytes)")]
    TooLarge { size: usize, limit: usize },

    #[error("Invalid object key: {0}")]
    InvalidKey(String),

    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// HTTP server lifecycle errors.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Server failed to start: {reason}")]
    StartupFailed { reason: String },

    #[error("Server error: {0}")]
    Runtime(String),
}
