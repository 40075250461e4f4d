//! Configuration: defaults, then an optional TOML file, then `PORTAL_` environment variables.

use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::errors::{PortalError, PortalResult};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggerSettings {
    pub enable_persistence: bool,
    pub max_buffer_size: usize,
    pub flush_interval_secs: u64,
    /// Upper bound on entries kept in memory while storage keeps failing
    pub max_retained_entries: usize,
}

impl Default for LoggerSettings {
    fn default() -> Self {
        Self {
            enable_persistence: true,
            max_buffer_size: 100,
            flush_interval_secs: 30,
            max_retained_entries: 1000,
        }
    }
}

impl LoggerSettings {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.flush_interval_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthSettings {
    pub min_password_length: usize,
    pub session_ttl_hours: i64,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            min_password_length: 6,
            session_ttl_hours: 24,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PortalConfig {
    pub data_dir: String,
    pub ephemeral: bool,
    pub server: ServerSettings,
    pub logger: LoggerSettings,
    pub auth: AuthSettings,
}

impl Default for PortalConfig {
    fn default() -> Self {
        Self {
            data_dir: "portal_data".to_string(),
            ephemeral: false,
            server: ServerSettings::default(),
            logger: LoggerSettings::default(),
            auth: AuthSettings::default(),
        }
    }
}

impl PortalConfig {
    pub fn validate(&self) -> PortalResult<()> {
        if self.logger.max_buffer_size == 0 {
            return Err(PortalError::config("logger.max_buffer_size must be greater than 0"));
        }
        if self.logger.flush_interval_secs == 0 {
            return Err(PortalError::config("logger.flush_interval_secs must be greater than 0"));
        }
        if self.server.port == 0 {
            return Err(PortalError::config("server.port must not be 0"));
        }
        if !self.ephemeral && self.data_dir.trim().is_empty() {
            return Err(PortalError::config("data_dir cannot be empty"));
        }
        Ok(())
    }
}

/// Defaults, then the TOML file (if present), then `PORTAL_` variables.
///
/// Nested keys use `__` in the environment: `PORTAL_LOGGER__MAX_BUFFER_SIZE=50`.
pub fn figment(path: Option<&str>) -> Figment {
    Figment::from(Serialized::defaults(PortalConfig::default()))
        .merge(Toml::file(path.unwrap_or("portal.toml")))
        .merge(Env::prefixed("PORTAL_").split("__"))
}

pub fn load_config(path: Option<&str>) -> PortalResult<PortalConfig> {
    let mut config: PortalConfig = figment(path).extract()?;
    if crate::session_context::detect_ephemeral_mode() {
        config.ephemeral = true;
    }
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg: PortalConfig = Figment::from(Serialized::defaults(PortalConfig::default()))
            .extract()
            .unwrap();
        assert_eq!(cfg.logger.max_buffer_size, 100);
        assert_eq!(cfg.logger.flush_interval(), Duration::from_secs(30));
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn toml_overrides_defaults() {
        let cfg: PortalConfig = Figment::from(Serialized::defaults(PortalConfig::default()))
            .merge(Toml::string(
                "data_dir = \"/tmp/portal\"\n[logger]\nmax_buffer_size = 10\n",
            ))
            .extract()
            .unwrap();
        assert_eq!(cfg.data_dir, "/tmp/portal");
        assert_eq!(cfg.logger.max_buffer_size, 10);
        assert_eq!(cfg.logger.flush_interval_secs, 30);
    }

    #[test]
    fn zero_buffer_size_is_rejected() {
        let mut cfg = PortalConfig::default();
        cfg.logger.max_buffer_size = 0;
        assert!(cfg.validate().unwrap_err().to_string().contains("max_buffer_size"));
    }
}
