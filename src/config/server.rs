use std::net::{IpAddr, SocketAddr};

use crate::config::helpers::{optional_env, parse_csv, parse_env, parse_string_env};
use crate::error::ConfigError;
use crate::settings::Settings;

/// HTTP listener settings.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: IpAddr,
    pub port: u16,
    /// Extra CORS origins besides the server's own address.
    pub allowed_origins: Vec<String>,
    pub body_limit_bytes: usize,
    pub login_attempts_per_minute: u64,
}

impl ServerConfig {
    pub(crate) fn resolve(settings: &Settings) -> Result<Self, ConfigError> {
        let host_raw = parse_string_env("CLIENTDESK_HOST", settings.server.host.clone())?;
        let host = host_raw
            .trim()
            .parse::<IpAddr>()
            .map_err(|e| ConfigError::InvalidValue {
                key: "CLIENTDESK_HOST".to_string(),
                message: format!("'{host_raw}' is not an IP address: {e}"),
            })?;

        let allowed_origins = match optional_env("CLIENTDESK_ALLOWED_ORIGINS")? {
            Some(raw) => parse_csv(&raw),
            None => settings.server.allowed_origins.clone(),
        };
        for origin in &allowed_origins {
            url::Url::parse(origin).map_err(|e| ConfigError::InvalidValue {
                key: "CLIENTDESK_ALLOWED_ORIGINS".to_string(),
                message: format!("'{origin}' is not a valid origin: {e}"),
            })?;
        }

        Ok(Self {
            host,
            port: parse_env("CLIENTDESK_PORT", settings.server.port)?,
            allowed_origins,
            body_limit_bytes: parse_env(
                "CLIENTDESK_BODY_LIMIT_BYTES",
                settings.server.body_limit_bytes,
            )?,
            login_attempts_per_minute: parse_env(
                "CLIENTDESK_LOGIN_ATTEMPTS_PER_MINUTE",
                settings.server.login_attempts_per_minute,
            )?,
        })
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}
