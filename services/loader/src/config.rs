//! Database connection settings.
//!
//! Read from the environment (a `.env` file is loaded by `main`):
//! - `DB_URL`: full connection string, takes precedence when set
//! - `DB_HOST`, `DB_USER`, `DB_PASSWORD`, `DB_NAME`: required otherwise
//! - `DB_PORT`: default 5432
//! - `DB_SSLMODE`: default `require`

use std::fmt;
use std::str::FromStr;

use sqlx::postgres::{PgConnectOptions, PgSslMode};

use crate::error::{LoadError, Result};

const DEFAULT_PORT: u16 = 5432;
const DEFAULT_SSL_MODE: &str = "require";

/// Individual connection parameters
#[derive(Clone)]
pub struct DbParams {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
    pub ssl_mode: PgSslMode,
}

impl fmt::Debug for DbParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DbParams")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("database", &self.database)
            .field("ssl_mode", &self.ssl_mode)
            .finish()
    }
}

/// Where to connect
#[derive(Clone)]
pub enum DbConfig {
    Url(String),
    Params(DbParams),
}

impl fmt::Debug for DbConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DbConfig::Url(_) => f.write_str("DbConfig::Url(<redacted>)"),
            DbConfig::Params(params) => params.fmt(f),
        }
    }
}

impl DbConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let require = |key: &str| {
            get(key).ok_or_else(|| LoadError::Config(format!("{} env var missing", key)))
        };

        if let Some(url) = get("DB_URL") {
            return Ok(DbConfig::Url(url));
        }

        let port = match get("DB_PORT") {
            Some(raw) => raw
                .trim()
                .parse()
                .map_err(|_| LoadError::Config(format!("DB_PORT is not a port number: {}", raw)))?,
            None => DEFAULT_PORT,
        };

        let ssl_raw = get("DB_SSLMODE").unwrap_or_else(|| DEFAULT_SSL_MODE.to_string());
        let ssl_mode = PgSslMode::from_str(ssl_raw.trim())
            .map_err(|_| LoadError::Config(format!("DB_SSLMODE is not valid: {}", ssl_raw)))?;

        Ok(DbConfig::Params(DbParams {
            host: require("DB_HOST")?,
            port,
            user: require("DB_USER")?,
            password: require("DB_PASSWORD")?,
            database: require("DB_NAME")?,
            ssl_mode,
        }))
    }

    pub fn connect_options(&self) -> Result<PgConnectOptions> {
        match self {
            DbConfig::Url(url) => PgConnectOptions::from_str(url)
                .map_err(|e| LoadError::Config(format!("DB_URL is not valid: {}", e))),
            DbConfig::Params(p) => Ok(PgConnectOptions::new()
                .host(&p.host)
                .port(p.port)
                .username(&p.user)
                .password(&p.password)
                .database(&p.database)
                .ssl_mode(p.ssl_mode)),
        }
    }

    /// Host/database description safe to log
    pub fn describe(&self) -> String {
        match self {
            DbConfig::Url(_) => "DB_URL".to_string(),
            DbConfig::Params(p) => format!("{}:{}/{}", p.host, p.port, p.database),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    fn full_params() -> Vec<(&'static str, &'static str)> {
        vec![
            ("DB_HOST", "db.example.org"),
            ("DB_USER", "loader"),
            ("DB_PASSWORD", "s3cret"),
            ("DB_NAME", "meteo"),
        ]
    }

    #[test]
    fn test_params_with_defaults() {
        let config = DbConfig::from_lookup(lookup(&full_params())).unwrap();
        match config {
            DbConfig::Params(p) => {
                assert_eq!(p.host, "db.example.org");
                assert_eq!(p.port, 5432);
                assert_eq!(p.database, "meteo");
                assert!(matches!(p.ssl_mode, PgSslMode::Require));
            }
            DbConfig::Url(_) => panic!("expected params"),
        }
    }

    #[test]
    fn test_params_explicit_port_and_sslmode() {
        let mut pairs = full_params();
        pairs.push(("DB_PORT", "6543"));
        pairs.push(("DB_SSLMODE", "disable"));
        let config = DbConfig::from_lookup(lookup(&pairs)).unwrap();
        assert_eq!(config.describe(), "db.example.org:6543/meteo");
        match config {
            DbConfig::Params(p) => assert!(matches!(p.ssl_mode, PgSslMode::Disable)),
            DbConfig::Url(_) => panic!("expected params"),
        }
    }

    #[test]
    fn test_url_takes_precedence() {
        let mut pairs = full_params();
        pairs.push(("DB_URL", "postgres://u:p@localhost/meteo"));
        let config = DbConfig::from_lookup(lookup(&pairs)).unwrap();
        assert!(matches!(config, DbConfig::Url(_)));
        assert!(config.connect_options().is_ok());
    }

    #[test]
    fn test_missing_param() {
        let pairs: Vec<_> = full_params().into_iter().filter(|(k, _)| *k != "DB_NAME").collect();
        let err = DbConfig::from_lookup(lookup(&pairs)).unwrap_err();
        assert!(err.to_string().contains("DB_NAME"));
    }

    #[test]
    fn test_blank_value_is_missing() {
        let mut pairs = full_params();
        pairs.retain(|(k, _)| *k != "DB_HOST");
        pairs.push(("DB_HOST", "  "));
        let err = DbConfig::from_lookup(lookup(&pairs)).unwrap_err();
        assert!(err.to_string().contains("DB_HOST"));
    }

    #[test]
    fn test_invalid_port() {
        let mut pairs = full_params();
        pairs.push(("DB_PORT", "postgres"));
        assert!(DbConfig::from_lookup(lookup(&pairs)).is_err());
    }

    #[test]
    fn test_invalid_sslmode() {
        let mut pairs = full_params();
        pairs.push(("DB_SSLMODE", "sometimes"));
        assert!(DbConfig::from_lookup(lookup(&pairs)).is_err());
    }

    #[test]
    fn test_debug_redacts_password() {
        let config = DbConfig::from_lookup(lookup(&full_params())).unwrap();
        let debug = format!("{:?}", config);
        assert!(!debug.contains("s3cret"));
        assert!(debug.contains("<redacted>"));
    }
}
