//! File-backed settings.
//!
//! `Settings` is the on-disk layer of configuration (`clientdesk.toml`). Every
//! field has a default so a missing or partial file is valid; environment
//! variables are layered on top by [`crate::config::Config::resolve`].

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub database: DatabaseSettings,
    pub server: ServerSettings,
    pub portal: PortalSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    /// `libsql` or `postgres`.
    pub backend: String,
    pub libsql_path: Option<String>,
    pub pool_size: usize,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            backend: "libsql".to_string(),
            libsql_path: None,
            pool_size: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    pub allowed_origins: Vec<String>,
    pub body_limit_bytes: usize,
    pub login_attempts_per_minute: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3400,
            allowed_origins: Vec::new(),
            body_limit_bytes: 1024 * 1024,
            login_attempts_per_minute: 20,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PortalSettings {
    pub session_ttl_hours: i64,
    pub storage_root: Option<String>,
    pub upload_limit_bytes: usize,
    pub chat_max_length: usize,
    pub page_size_limit: usize,
    pub audit: AuditSettings,
}

impl Default for PortalSettings {
    fn default() -> Self {
        Self {
            session_ttl_hours: 168,
            storage_root: None,
            upload_limit_bytes: 10 * 1024 * 1024,
            chat_max_length: 4000,
            page_size_limit: 200,
            audit: AuditSettings::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditSettings {
    pub enabled: bool,
    pub path: String,
    pub hash_chain: bool,
}

impl Default for AuditSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            path: "logs/audit.jsonl".to_string(),
            hash_chain: true,
        }
    }
}

impl Settings {
    /// Load settings from a TOML file. A missing file yields defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(raw) => Self::from_toml(&raw).map_err(|reason| ConfigError::SettingsFile {
                path: path.display().to_string(),
                reason,
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(ConfigError::SettingsFile {
                path: path.display().to_string(),
                reason: e.to_string(),
            }),
        }
    }

    pub fn from_toml(raw: &str) -> Result<Self, String> {
        toml::from_str(raw).map_err(|e| e.to_string())
    }

    /// `~/.clientdesk/clientdesk.toml`, or `./clientdesk.toml` without a home dir.
    pub fn default_path() -> PathBuf {
        crate::config::clientdesk_home().join("clientdesk.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_defaults() {
        let settings = Settings::from_toml(
            r#"
            [server]
            port = 8080

            [portal.audit]
            enabled = false
            "#,
        )
        .expect("parse");

        assert_eq!(settings.server.port, 8080);
        assert_eq!(settings.server.host, "127.0.0.1");
        assert!(!settings.portal.audit.enabled);
        assert_eq!(settings.portal.audit.path, "logs/audit.jsonl");
        assert_eq!(settings.database.backend, "libsql");
        assert_eq!(settings.portal.session_ttl_hours, 168);
    }

    #[test]
    fn missing_file_is_default() {
        let dir = tempfile::tempdir().expect("tempdir");
        let settings = Settings::load(&dir.path().join("absent.toml")).expect("load");
        assert_eq!(settings.server.port, 3400);
    }

    #[test]
    fn malformed_file_is_reported() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "[server\nport = ").expect("write");
        let err = Settings::load(&path).expect_err("malformed toml");
        assert!(matches!(err, ConfigError::SettingsFile { .. }));
    }
}
