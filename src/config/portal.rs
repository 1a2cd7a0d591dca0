use std::path::{Component, PathBuf};

use crate::config::helpers::{optional_env, parse_bool_env, parse_env, parse_string_env};
use crate::error::ConfigError;
use crate::settings::Settings;

/// Audit trail controls.
#[derive(Debug, Clone)]
pub struct AuditConfig {
    pub enabled: bool,
    /// Relative to the clientdesk home directory, always under `logs/`.
    pub path: PathBuf,
    pub hash_chain: bool,
}

/// Behavior of the admin and client portals.
#[derive(Debug, Clone)]
pub struct PortalConfig {
    pub session_ttl_hours: i64,
    pub storage_root: PathBuf,
    pub upload_limit_bytes: usize,
    pub chat_max_length: usize,
    pub page_size_limit: usize,
    pub audit: AuditConfig,
}

fn validate_audit_path(raw: &str) -> Result<PathBuf, ConfigError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ConfigError::InvalidValue {
            key: "CLIENTDESK_AUDIT_PATH".to_string(),
            message: "audit log path must not be empty".to_string(),
        });
    }

    let raw_path = PathBuf::from(trimmed);
    if raw_path.is_absolute() {
        return Err(ConfigError::InvalidValue {
            key: "CLIENTDESK_AUDIT_PATH".to_string(),
            message: "audit log path must be relative to the clientdesk home".to_string(),
        });
    }

    let mut normalized = PathBuf::new();
    for component in raw_path.components() {
        match component {
            Component::Normal(segment) => normalized.push(segment),
            Component::CurDir => {}
            Component::ParentDir => {
                return Err(ConfigError::InvalidValue {
                    key: "CLIENTDESK_AUDIT_PATH".to_string(),
                    message: "audit log path must not contain '..' components".to_string(),
                });
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(ConfigError::InvalidValue {
                    key: "CLIENTDESK_AUDIT_PATH".to_string(),
                    message: "audit log path must be relative to the clientdesk home".to_string(),
                });
            }
        }
    }

    if normalized.components().count() < 2 || !normalized.starts_with("logs") {
        return Err(ConfigError::InvalidValue {
            key: "CLIENTDESK_AUDIT_PATH".to_string(),
            message: "audit log path must be under 'logs/' and include a filename".to_string(),
        });
    }

    Ok(normalized)
}

fn validate_session_ttl(hours: i64) -> Result<i64, ConfigError> {
    // One year upper bound keeps expiry arithmetic far from overflow.
    if !(1..=24 * 366).contains(&hours) {
        return Err(ConfigError::InvalidValue {
            key: "CLIENTDESK_SESSION_TTL_HOURS".to_string(),
            message: format!("session TTL must be between 1 and 8784 hours, got {hours}"),
        });
    }
    Ok(hours)
}

fn validate_positive(key: &str, value: usize) -> Result<usize, ConfigError> {
    if value == 0 {
        return Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: "must be greater than zero".to_string(),
        });
    }
    Ok(value)
}

impl PortalConfig {
    pub(crate) fn resolve(settings: &Settings) -> Result<Self, ConfigError> {
        let portal = &settings.portal;
        let storage_root = optional_env("CLIENTDESK_STORAGE_ROOT")?
            .or_else(|| portal.storage_root.clone())
            .map(PathBuf::from)
            .unwrap_or_else(|| crate::config::clientdesk_home().join("storage"));

        Ok(Self {
            session_ttl_hours: validate_session_ttl(parse_env(
                "CLIENTDESK_SESSION_TTL_HOURS",
                portal.session_ttl_hours,
            )?)?,
            storage_root,
            upload_limit_bytes: validate_positive(
                "CLIENTDESK_UPLOAD_LIMIT_BYTES",
                parse_env("CLIENTDESK_UPLOAD_LIMIT_BYTES", portal.upload_limit_bytes)?,
            )?,
            chat_max_length: validate_positive(
                "CLIENTDESK_CHAT_MAX_LENGTH",
                parse_env("CLIENTDESK_CHAT_MAX_LENGTH", portal.chat_max_length)?,
            )?,
            page_size_limit: validate_positive(
                "CLIENTDESK_PAGE_SIZE_LIMIT",
                parse_env("CLIENTDESK_PAGE_SIZE_LIMIT", portal.page_size_limit)?,
            )?,
            audit: AuditConfig {
                enabled: parse_bool_env("CLIENTDESK_AUDIT_ENABLED", portal.audit.enabled)?,
                path: {
                    let raw =
                        parse_string_env("CLIENTDESK_AUDIT_PATH", portal.audit.path.clone())?;
                    validate_audit_path(&raw)?
                },
                hash_chain: parse_bool_env(
                    "CLIENTDESK_AUDIT_HASH_CHAIN",
                    portal.audit.hash_chain,
                )?,
            },
        })
    }

    /// Defaults rooted at `storage_root`, for tests and embedding.
    pub fn for_storage_root(storage_root: PathBuf) -> Self {
        Self {
            session_ttl_hours: 168,
            storage_root,
            upload_limit_bytes: 10 * 1024 * 1024,
            chat_max_length: 4000,
            page_size_limit: 200,
            audit: AuditConfig {
                enabled: false,
                path: PathBuf::from("logs/audit.jsonl"),
                hash_chain: true,
            },
        }
    }
}
