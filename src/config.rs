use anyhow::{anyhow, Context, Result};
use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

use crate::storage::FileStore;
use crate::tmdb::TMDB_BASE;

const DEFAULT_BIND: &str = "0.0.0.0:3146";
const DEFAULT_LOGIN: &str = "admin";
const DEFAULT_SESSION_TTL_MINUTES: i64 = 720;

#[derive(Debug, Clone)]
pub struct Config {
    pub tmdb_token: String,
    pub tmdb_base_url: String,
    pub session_secret: String,
    pub session_ttl: chrono::Duration,
    pub data_dir: PathBuf,
    pub login_identity: String,
    pub login_secret: String,
    pub storage_timeout: Option<Duration>,
    pub bind_addr: SocketAddr,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let required =
            |key: &str| get(key).ok_or_else(|| anyhow!("Missing required environment variable: {}", key));

        let tmdb_token = required("TMDB_API_KEY")?;
        let session_secret = required("MOVIEDECK_SESSION_SECRET")?;
        let tmdb_base_url = get("TMDB_BASE_URL").unwrap_or_else(|| TMDB_BASE.to_string());

        let data_dir = match get("MOVIEDECK_DATA_DIR") {
            Some(dir) => PathBuf::from(dir),
            None => FileStore::default_dir()
                .ok_or_else(|| anyhow!("No data directory available; set MOVIEDECK_DATA_DIR"))?,
        };

        let (login_identity, login_secret) =
            match (get("MOVIEDECK_LOGIN_USER"), get("MOVIEDECK_LOGIN_PASSWORD")) {
                (Some(user), Some(password)) => (user, password),
                _ => {
                    warn!("Login credentials not configured, falling back to the default account");
                    (DEFAULT_LOGIN.to_string(), DEFAULT_LOGIN.to_string())
                }
            };

        let session_ttl = match get("MOVIEDECK_SESSION_TTL_MINUTES") {
            Some(v) => v
                .trim()
                .parse::<i64>()
                .ok()
                .filter(|m| *m > 0)
                .ok_or_else(|| anyhow!("MOVIEDECK_SESSION_TTL_MINUTES must be a positive integer"))?,
            None => DEFAULT_SESSION_TTL_MINUTES,
        };

        let storage_timeout = get("MOVIEDECK_STORAGE_TIMEOUT_MS")
            .map(|v| {
                v.trim()
                    .parse::<u64>()
                    .context("MOVIEDECK_STORAGE_TIMEOUT_MS must be a number of milliseconds")
            })
            .transpose()?
            .map(Duration::from_millis);

        let bind_addr: SocketAddr = get("MOVIEDECK_BIND")
            .unwrap_or_else(|| DEFAULT_BIND.to_string())
            .parse()
            .context("MOVIEDECK_BIND must be a socket address")?;

        Ok(Self {
            tmdb_token,
            tmdb_base_url,
            session_secret,
            session_ttl: chrono::Duration::minutes(session_ttl),
            data_dir,
            login_identity,
            login_secret,
            storage_timeout,
            bind_addr,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn requires_token_and_session_secret() {
        let err = config_from(&[("MOVIEDECK_SESSION_SECRET", "s")]).unwrap_err();
        assert!(err.to_string().contains("TMDB_API_KEY"));
        let err = config_from(&[("TMDB_API_KEY", "t")]).unwrap_err();
        assert!(err.to_string().contains("MOVIEDECK_SESSION_SECRET"));
    }

    #[test]
    fn applies_defaults() {
        let config = config_from(&[
            ("TMDB_API_KEY", "t"),
            ("MOVIEDECK_SESSION_SECRET", "s"),
            ("MOVIEDECK_DATA_DIR", "/tmp/moviedeck"),
        ])
        .unwrap();
        assert_eq!(config.tmdb_base_url, TMDB_BASE);
        assert_eq!(config.login_identity, "admin");
        assert_eq!(config.login_secret, "admin");
        assert_eq!(config.session_ttl, chrono::Duration::minutes(720));
        assert_eq!(config.storage_timeout, None);
        assert_eq!(config.bind_addr.port(), 3146);
        assert_eq!(config.data_dir, PathBuf::from("/tmp/moviedeck"));
    }

    #[test]
    fn reads_overrides() {
        let config = config_from(&[
            ("TMDB_API_KEY", "t"),
            ("MOVIEDECK_SESSION_SECRET", "s"),
            ("MOVIEDECK_DATA_DIR", "/data"),
            ("MOVIEDECK_LOGIN_USER", "ann"),
            ("MOVIEDECK_LOGIN_PASSWORD", "pw"),
            ("MOVIEDECK_STORAGE_TIMEOUT_MS", "1500"),
            ("MOVIEDECK_SESSION_TTL_MINUTES", "30"),
            ("MOVIEDECK_BIND", "127.0.0.1:8080"),
        ])
        .unwrap();
        assert_eq!(config.login_identity, "ann");
        assert_eq!(config.storage_timeout, Some(Duration::from_millis(1500)));
        assert_eq!(config.session_ttl, chrono::Duration::minutes(30));
        assert_eq!(config.bind_addr.to_string(), "127.0.0.1:8080");
    }

    #[test]
    fn rejects_bad_numbers() {
        let err = config_from(&[
            ("TMDB_API_KEY", "t"),
            ("MOVIEDECK_SESSION_SECRET", "s"),
            ("MOVIEDECK_DATA_DIR", "/data"),
            ("MOVIEDECK_STORAGE_TIMEOUT_MS", "soon"),
        ])
        .unwrap_err();
        assert!(err.to_string().contains("MOVIEDECK_STORAGE_TIMEOUT_MS"));
    }
}
