use crate::types::POPUP_ROLE;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;

pub const DEFAULT_PORT: u16 = 6574;

/// Broker configuration
#[derive(Debug, Clone, PartialEq)]
pub struct BrokerConfig {
    /// Interface to bind
    pub host: IpAddr,
    pub port: u16,
    /// Where auth state is persisted (None = in-memory only)
    pub state_file: Option<PathBuf>,
    /// Role name that triggers an immediate state push on connect
    pub popup_role: String,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: DEFAULT_PORT,
            state_file: None,
            popup_role: POPUP_ROLE.to_string(),
        }
    }
}

/// Non-empty, trimmed env var
fn env_value(key: &str) -> Option<String> {
    std::env::var(key).ok().and_then(|v| {
        let trimmed = v.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    })
}

/// Parse an env var, logging and ignoring values that do not parse
fn env_parsed<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = env_value(key)?;
    match raw.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(key, value = %raw, "Ignoring invalid config value");
            None
        }
    }
}

impl BrokerConfig {
    /// Load config from environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let config = Self {
            host: env_parsed("AUTHRELAY_HOST").unwrap_or(defaults.host),
            port: env_parsed("AUTHRELAY_PORT").unwrap_or(defaults.port),
            state_file: env_value("AUTHRELAY_STATE_FILE").map(PathBuf::from),
            popup_role: env_value("AUTHRELAY_POPUP_ROLE").unwrap_or(defaults.popup_role),
        };

        tracing::info!(
            addr = %config.addr(),
            state_file = ?config.state_file,
            popup_role = %config.popup_role,
            "Broker config loaded"
        );
        config
    }

    pub fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}
