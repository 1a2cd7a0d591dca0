//! Runtime configuration.
//!
//! Resolution order for every value: environment variable, then the TOML
//! settings file, then the built-in default. `.env` files are loaded by the
//! binary through `dotenvy` before resolution.

mod database;
pub(crate) mod helpers;
mod portal;
mod server;

use std::path::PathBuf;

pub use database::{DatabaseBackend, DatabaseConfig};
pub use portal::{AuditConfig, PortalConfig};
pub use server::ServerConfig;

use crate::error::ConfigError;
use crate::settings::Settings;

/// Fully resolved configuration for the service.
#[derive(Debug, Clone)]
pub struct Config {
    pub database: DatabaseConfig,
    pub server: ServerConfig,
    pub portal: PortalConfig,
}

impl Config {
    pub fn resolve(settings: &Settings) -> Result<Self, ConfigError> {
        Ok(Self {
            database: DatabaseConfig::resolve(settings)?,
            server: ServerConfig::resolve(settings)?,
            portal: PortalConfig::resolve(settings)?,
        })
    }
}

/// Base directory for local state (`~/.clientdesk`).
pub fn clientdesk_home() -> PathBuf {
    dirs::home_dir()
        .map(|home| home.join(".clientdesk"))
        .unwrap_or_else(|| PathBuf::from(".clientdesk"))
}

/// Default on-disk location of the embedded libSQL database.
pub fn default_libsql_path() -> String {
    clientdesk_home()
        .join("clientdesk.db")
        .to_string_lossy()
        .into_owned()
}
