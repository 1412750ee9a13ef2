//! Process configuration, read from environment variables.
//!
//! | Variable | Default |
//! |----------|---------|
//! | `HTTP_ADDR` | `0.0.0.0:8080` |
//! | `USE_PERSISTENT_STORES` | `false` |
//! | `DATABASE_URL` | required when `USE_PERSISTENT_STORES=true` |
//! | `DATABASE_REPLICA_URL` | unset (reads go to the primary) |
//! | `DATABASE_MAX_CONNECTIONS` | `10` |
//! | `REDIS_URL` | `redis://localhost:6379` |
//! | `USER_CACHE_TTL_SECS` | `300` (`0` disables expiry) |
//! | `CREATE_USER_STREAM` | `users.create` |
//! | `CREATE_USER_GROUP` | `lure.create-user` |
//! | `USER_CREATED_STREAM` | `users.created` |
//! | `REQUEST_TIMEOUT_MS` | `5000` |

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{name} has an invalid value {value:?}: {reason}")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseConfig {
    pub primary_url: String,
    pub replica_url: Option<String>,
    pub max_connections: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamsConfig {
    pub create_user_stream: String,
    pub create_user_group: String,
    pub user_created_stream: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub http_addr: SocketAddr,
    pub use_persistent_stores: bool,
    /// Present whenever `use_persistent_stores` is true.
    pub database: Option<DatabaseConfig>,
    pub redis_url: String,
    /// `None` caches users without expiry.
    pub user_cache_ttl: Option<Duration>,
    pub streams: StreamsConfig,
    pub request_timeout: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build the configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let use_persistent_stores = parse_or(&var, "USE_PERSISTENT_STORES", false)?;

        let database = if use_persistent_stores {
            Some(DatabaseConfig {
                primary_url: var("DATABASE_URL").ok_or(ConfigError::Missing("DATABASE_URL"))?,
                replica_url: var("DATABASE_REPLICA_URL"),
                max_connections: parse_or(&var, "DATABASE_MAX_CONNECTIONS", 10)?,
            })
        } else {
            None
        };

        let ttl_secs: u64 = parse_or(&var, "USER_CACHE_TTL_SECS", 300)?;

        Ok(Self {
            http_addr: parse_or(&var, "HTTP_ADDR", SocketAddr::from(([0, 0, 0, 0], 8080)))?,
            use_persistent_stores,
            database,
            redis_url: var("REDIS_URL").unwrap_or_else(|| "redis://localhost:6379".to_string()),
            user_cache_ttl: (ttl_secs > 0).then(|| Duration::from_secs(ttl_secs)),
            streams: StreamsConfig {
                create_user_stream: var("CREATE_USER_STREAM")
                    .unwrap_or_else(|| "users.create".to_string()),
                create_user_group: var("CREATE_USER_GROUP")
                    .unwrap_or_else(|| "lure.create-user".to_string()),
                user_created_stream: var("USER_CREATED_STREAM")
                    .unwrap_or_else(|| "users.created".to_string()),
            },
            request_timeout: Duration::from_millis(parse_or(&var, "REQUEST_TIMEOUT_MS", 5000)?),
        })
    }
}

fn parse_or<T, F>(var: &F, name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match var(name) {
        Some(value) => {
            let parsed = value.trim().parse::<T>();
            parsed.map_err(|e| ConfigError::Invalid {
                name,
                reason: e.to_string(),
                value,
            })
        }
        None => Ok(default),
    }
}
