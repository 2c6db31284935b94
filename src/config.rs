//! Server configuration loaded from environment variables.
//!
//! Every setting has a default so the server starts with no configuration
//! for local development.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::warn;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Env: `CHAT_ADDR`. Default: `0.0.0.0:8080`.
    pub addr: SocketAddr,

    /// Longest accepted message text, in characters.
    /// Env: `CHAT_MAX_MESSAGE_LEN`. Default: `500`.
    pub max_message_len: usize,

    /// Longest accepted username, in characters.
    /// Env: `CHAT_MAX_USERNAME_LEN`. Default: `20`.
    pub max_username_len: usize,

    /// Longest accepted group name, in characters.
    /// Env: `CHAT_MAX_GROUP_NAME_LEN`. Default: `50`.
    pub max_group_name_len: usize,

    /// Longest accepted group description, in characters.
    /// Env: `CHAT_MAX_GROUP_DESCRIPTION_LEN`. Default: `200`.
    pub max_group_description_len: usize,

    /// Avatar assigned when a join carries none.
    pub default_avatar: String,

    /// How long a disconnected participant is kept before the sweep purges it.
    /// Env: `CHAT_RETENTION_SECS`. Default: 10 minutes.
    pub retention: Duration,

    /// Env: `CHAT_SWEEP_SECS`. Default: 5 minutes.
    pub sweep_interval: Duration,

    /// Env: `CHAT_TLS_CERT`. TLS is enabled only when both paths are set.
    pub tls_cert: Option<PathBuf>,
    /// Env: `CHAT_TLS_KEY`.
    pub tls_key: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: ([0, 0, 0, 0], 8080).into(),
            max_message_len: 500,
            max_username_len: 20,
            max_group_name_len: 50,
            max_group_description_len: 200,
            default_avatar: "👤".to_string(),
            retention: Duration::from_secs(10 * 60),
            sweep_interval: Duration::from_secs(5 * 60),
            tls_cert: None,
            tls_key: None,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(addr) = lookup("CHAT_ADDR") {
            match addr.parse::<SocketAddr>() {
                Ok(parsed) => config.addr = parsed,
                Err(_) => warn!("Invalid CHAT_ADDR {addr:?}, using default"),
            }
        }

        if let Some(n) = parse_positive(&lookup, "CHAT_MAX_MESSAGE_LEN") {
            config.max_message_len = n;
        }
        if let Some(n) = parse_positive(&lookup, "CHAT_MAX_USERNAME_LEN") {
            config.max_username_len = n;
        }
        if let Some(n) = parse_positive(&lookup, "CHAT_MAX_GROUP_NAME_LEN") {
            config.max_group_name_len = n;
        }
        if let Some(n) = parse_positive(&lookup, "CHAT_MAX_GROUP_DESCRIPTION_LEN") {
            config.max_group_description_len = n;
        }
        if let Some(secs) = parse_positive(&lookup, "CHAT_RETENTION_SECS") {
            config.retention = Duration::from_secs(secs as u64);
        }
        if let Some(secs) = parse_positive(&lookup, "CHAT_SWEEP_SECS") {
            config.sweep_interval = Duration::from_secs(secs as u64);
        }

        config.tls_cert = lookup("CHAT_TLS_CERT").filter(|p| !p.is_empty()).map(PathBuf::from);
        config.tls_key = lookup("CHAT_TLS_KEY").filter(|p| !p.is_empty()).map(PathBuf::from);

        config
    }

    /// Certificate and key paths, if both are configured and present on disk.
    pub fn tls_paths(&self) -> Option<(&Path, &Path)> {
        let (cert, key) = (self.tls_cert.as_deref()?, self.tls_key.as_deref()?);
        for path in [cert, key] {
            if !path.is_file() {
                warn!("TLS file {} not found", path.display());
                return None;
            }
        }
        Some((cert, key))
    }
}

fn parse_positive(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<usize> {
    let raw = lookup(key)?;
    match raw.trim().parse::<usize>() {
        Ok(n) if n > 0 => Some(n),
        _ => {
            warn!("Invalid {key} {raw:?}, using default");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> ServerConfig {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        ServerConfig::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.addr, ([0, 0, 0, 0], 8080).into());
        assert_eq!(config.max_message_len, 500);
        assert_eq!(config.max_username_len, 20);
        assert_eq!(config.max_group_name_len, 50);
        assert_eq!(config.max_group_description_len, 200);
        assert_eq!(config.retention, Duration::from_secs(600));
        assert!(config.tls_paths().is_none());
    }

    #[test]
    fn test_overrides() {
        let config = config_from(&[
            ("CHAT_ADDR", "127.0.0.1:9000"),
            ("CHAT_MAX_MESSAGE_LEN", "140"),
            ("CHAT_SWEEP_SECS", "30"),
            ("CHAT_MAX_GROUP_NAME_LEN", "80"),
            ("CHAT_MAX_GROUP_DESCRIPTION_LEN", "400"),
        ]);
        assert_eq!(config.addr, ([127, 0, 0, 1], 9000).into());
        assert_eq!(config.max_message_len, 140);
        assert_eq!(config.sweep_interval, Duration::from_secs(30));
        assert_eq!(config.max_group_name_len, 80);
        assert_eq!(config.max_group_description_len, 400);
    }

    #[test]
    fn test_invalid_values_keep_defaults() {
        let config = config_from(&[
            ("CHAT_ADDR", "not an address"),
            ("CHAT_MAX_USERNAME_LEN", "0"),
            ("CHAT_RETENTION_SECS", "ten"),
        ]);
        assert_eq!(config.addr, ([0, 0, 0, 0], 8080).into());
        assert_eq!(config.max_username_len, 20);
        assert_eq!(config.retention, Duration::from_secs(600));
    }

    #[test]
    fn test_tls_requires_existing_files() {
        let config = config_from(&[
            ("CHAT_TLS_CERT", "/nonexistent/cert.pem"),
            ("CHAT_TLS_KEY", "/nonexistent/key.pem"),
        ]);
        assert!(config.tls_cert.is_some());
        assert!(config.tls_paths().is_none());
    }
}
