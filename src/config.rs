//! Daemon configuration, read from `CREDVAULT_*` environment variables.

use std::path::PathBuf;
use std::time::Duration;

use crate::health::dispatcher::DEFAULT_PROBE_TIMEOUT;
use crate::probes::ProviderEndpoints;

const DEFAULT_RATE_LIMIT_PER_MINUTE: usize = 100;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Cannot determine home directory; set CREDVAULT_DATA_DIR")]
    NoHome,

    #[error("{var} must be a positive integer, got {value:?}")]
    InvalidNumber { var: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub data_dir: PathBuf,
    pub db_path: PathBuf,
    pub socket_path: PathBuf,
    /// Passphrase override. Falls back to `<data_dir>/master.key`.
    pub master_key: Option<String>,
    /// Signing secret override. Falls back to `<data_dir>/token.secret`.
    pub token_secret: Option<String>,
    pub probe_timeout: Duration,
    pub rate_limit_per_minute: usize,
    pub endpoints: ProviderEndpoints,
    pub json_logs: bool,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build a config from any variable source. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let data_dir = match get("CREDVAULT_DATA_DIR") {
            Some(dir) => PathBuf::from(dir),
            None => dirs::home_dir().ok_or(ConfigError::NoHome)?.join(".credvault"),
        };

        let defaults = ProviderEndpoints::default();
        let endpoints = ProviderEndpoints {
            openai: get("CREDVAULT_OPENAI_BASE_URL").unwrap_or(defaults.openai),
            groq: get("CREDVAULT_GROQ_BASE_URL").unwrap_or(defaults.groq),
            gemini: get("CREDVAULT_GEMINI_BASE_URL").unwrap_or(defaults.gemini),
        };

        let probe_timeout_secs = parse_positive(
            "CREDVAULT_PROBE_TIMEOUT_SECS",
            get("CREDVAULT_PROBE_TIMEOUT_SECS"),
            DEFAULT_PROBE_TIMEOUT.as_secs(),
        )?;
        let rate_limit_per_minute = parse_positive(
            "CREDVAULT_RATE_LIMIT_PER_MINUTE",
            get("CREDVAULT_RATE_LIMIT_PER_MINUTE"),
            DEFAULT_RATE_LIMIT_PER_MINUTE as u64,
        )? as usize;

        Ok(Self {
            db_path: get("CREDVAULT_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| data_dir.join("credvault.db")),
            socket_path: get("CREDVAULT_SOCKET_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| data_dir.join("credvault.sock")),
            master_key: get("CREDVAULT_MASTER_KEY"),
            token_secret: get("CREDVAULT_TOKEN_SECRET"),
            probe_timeout: Duration::from_secs(probe_timeout_secs),
            rate_limit_per_minute,
            endpoints,
            json_logs: get("CREDVAULT_LOG_FORMAT")
                .is_some_and(|v| v.trim().eq_ignore_ascii_case("json")),
            data_dir,
        })
    }
}

fn parse_positive(var: &'static str, raw: Option<String>, default: u64) -> Result<u64, ConfigError> {
    let Some(raw) = raw else {
        return Ok(default);
    };
    match raw.trim().parse::<u64>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(ConfigError::InvalidNumber { var, value: raw }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|name| map.get(name).cloned())
    }

    #[test]
    fn test_defaults_under_data_dir() {
        let config = config_from(&[("CREDVAULT_DATA_DIR", "/tmp/cv")]).unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/tmp/cv"));
        assert_eq!(config.db_path, PathBuf::from("/tmp/cv/credvault.db"));
        assert_eq!(config.socket_path, PathBuf::from("/tmp/cv/credvault.sock"));
        assert_eq!(config.probe_timeout, Duration::from_secs(10));
        assert_eq!(config.rate_limit_per_minute, 100);
        assert!(config.master_key.is_none());
        assert!(config.token_secret.is_none());
        assert!(!config.json_logs);
        assert_eq!(config.endpoints.openai, "https://api.openai.com");
        assert_eq!(config.endpoints.groq, "https://api.groq.com");
        assert_eq!(config.endpoints.gemini, "https://generativelanguage.googleapis.com");
    }

    #[test]
    fn test_overrides() {
        let config = config_from(&[
            ("CREDVAULT_DATA_DIR", "/tmp/cv"),
            ("CREDVAULT_DB_PATH", "/var/lib/cv.db"),
            ("CREDVAULT_SOCKET_PATH", "/run/cv.sock"),
            ("CREDVAULT_MASTER_KEY", "hunter2"),
            ("CREDVAULT_PROBE_TIMEOUT_SECS", "3"),
            ("CREDVAULT_RATE_LIMIT_PER_MINUTE", " 20 "),
            ("CREDVAULT_GROQ_BASE_URL", "http://127.0.0.1:9999"),
            ("CREDVAULT_LOG_FORMAT", "JSON"),
        ])
        .unwrap();
        assert_eq!(config.db_path, PathBuf::from("/var/lib/cv.db"));
        assert_eq!(config.socket_path, PathBuf::from("/run/cv.sock"));
        assert_eq!(config.master_key.as_deref(), Some("hunter2"));
        assert_eq!(config.probe_timeout, Duration::from_secs(3));
        assert_eq!(config.rate_limit_per_minute, 20);
        assert_eq!(config.endpoints.groq, "http://127.0.0.1:9999");
        assert_eq!(config.endpoints.openai, "https://api.openai.com");
        assert!(config.json_logs);
    }

    #[test]
    fn test_empty_values_are_unset() {
        let config = config_from(&[("CREDVAULT_DATA_DIR", "/tmp/cv"), ("CREDVAULT_MASTER_KEY", "  ")]).unwrap();
        assert!(config.master_key.is_none());
    }

    #[test]
    fn test_invalid_numbers_rejected() {
        for bad in ["abc", "0", "-5", "1.5"] {
            let err = config_from(&[
                ("CREDVAULT_DATA_DIR", "/tmp/cv"),
                ("CREDVAULT_PROBE_TIMEOUT_SECS", bad),
            ])
            .unwrap_err();
            assert!(matches!(
                err,
                ConfigError::InvalidNumber { var: "CREDVAULT_PROBE_TIMEOUT_SECS", .. }
            ));
        }
    }
}
