//! Environment-driven configuration.

use std::time::Duration;

use thiserror::Error;

use crate::domain::aggregates::TransitionPolicy;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{key} has invalid value {value:?}")]
    Invalid { key: &'static str, value: String },
}

#[derive(Clone, Debug)]
pub struct Config {
    /// Upper bound for every document store call.
    pub store_timeout: Duration,
    pub transition_policy: TransitionPolicy,
    /// Postgres store when set, in-memory store otherwise.
    pub database_url: Option<String>,
    pub bind_addr: String,
    pub port: u16,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            store_timeout: Duration::from_millis(5000),
            transition_policy: TransitionPolicy::Permissive,
            database_url: None,
            bind_addr: "0.0.0.0".to_string(),
            port: 8083,
        }
    }
}

impl Config {
    /// Reads `.env` (if present) and then the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let store_timeout = match lookup("HERBVERSE_STORE_TIMEOUT_MS") {
            Some(raw) => raw.trim().parse::<u64>().ok().filter(|ms| *ms > 0).map(Duration::from_millis)
                .ok_or(ConfigError::Invalid { key: "HERBVERSE_STORE_TIMEOUT_MS", value: raw })?,
            None => defaults.store_timeout,
        };

        let transition_policy = match lookup("HERBVERSE_STRICT_STATUS_TRANSITIONS").as_deref().map(str::trim) {
            None | Some("") | Some("0") | Some("false") => TransitionPolicy::Permissive,
            Some("1") | Some("true") => TransitionPolicy::Strict,
            Some(other) => return Err(ConfigError::Invalid { key: "HERBVERSE_STRICT_STATUS_TRANSITIONS", value: other.to_string() }),
        };

        let port = match lookup("PORT") {
            Some(raw) => raw.trim().parse::<u16>().map_err(|_| ConfigError::Invalid { key: "PORT", value: raw })?,
            None => defaults.port,
        };

        Ok(Self {
            store_timeout,
            transition_policy,
            database_url: lookup("DATABASE_URL").filter(|url| !url.trim().is_empty()),
            bind_addr: lookup("HERBVERSE_BIND").unwrap_or(defaults.bind_addr),
            port,
        })
    }
}
