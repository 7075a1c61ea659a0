use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{AppError, AppResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub server: ServerConfig,
    pub cache: CacheConfig,
    pub feed: FeedConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// `memory` for the in-process store, otherwise an sqlx SQLite URL.
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Maximum number of per-principal feed sessions kept by the HTTP layer.
    pub session_capacity: usize,
}

/// Tunables for feed assembly and engagement writes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    /// Upper bound on authors per chunk; the store's declared limit wins if lower.
    pub max_chunk: usize,
    pub per_chunk_cap: usize,
    pub feed_cap: usize,
    pub global_fallback_cap: usize,
    pub query_timeout: Duration,
    pub write_timeout: Duration,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            max_chunk: 10,
            per_chunk_cap: 50,
            feed_cap: 50,
            global_fallback_cap: 20,
            query_timeout: Duration::from_secs(5),
            write_timeout: Duration::from_secs(5),
        }
    }
}

impl FeedConfig {
    pub fn validate(&self) -> AppResult<()> {
        let checks = [
            ("max_chunk", self.max_chunk),
            ("per_chunk_cap", self.per_chunk_cap),
            ("feed_cap", self.feed_cap),
            ("global_fallback_cap", self.global_fallback_cap),
        ];
        for (name, value) in checks {
            if value == 0 {
                return Err(AppError::Configuration(format!("{} must be greater than zero", name)));
            }
        }
        if self.query_timeout.is_zero() || self.write_timeout.is_zero() {
            return Err(AppError::Configuration("timeouts must be greater than zero".to_string()));
        }
        Ok(())
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> AppResult<T> {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| AppError::Configuration(format!("{} has an invalid value: {}", key, raw))),
        Err(_) => Ok(default),
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "memory".to_string(),
            },
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 3000,
            },
            cache: CacheConfig {
                session_capacity: 1000,
            },
            feed: FeedConfig::default(),
        }
    }
}

impl Config {
    pub fn from_env() -> AppResult<Self> {
        let defaults = FeedConfig::default();
        let feed = FeedConfig {
            max_chunk: env_or("FEED_MAX_CHUNK", defaults.max_chunk)?,
            per_chunk_cap: env_or("FEED_PER_CHUNK_CAP", defaults.per_chunk_cap)?,
            feed_cap: env_or("FEED_CAP", defaults.feed_cap)?,
            global_fallback_cap: env_or("FEED_GLOBAL_FALLBACK_CAP", defaults.global_fallback_cap)?,
            query_timeout: Duration::from_millis(env_or("FEED_QUERY_TIMEOUT_MS", 5_000u64)?),
            write_timeout: Duration::from_millis(env_or("FEED_WRITE_TIMEOUT_MS", 5_000u64)?),
        };
        feed.validate()?;

        let session_capacity = env_or("SESSION_CACHE_CAPACITY", 1000usize)?;
        if session_capacity == 0 {
            return Err(AppError::Configuration(
                "SESSION_CACHE_CAPACITY must be greater than zero".to_string(),
            ));
        }

        Ok(Self {
            database: DatabaseConfig {
                url: env::var("DATABASE_URL").unwrap_or_else(|_| "memory".to_string()),
            },
            server: ServerConfig {
                host: env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: env_or("SERVER_PORT", 3000u16)?,
            },
            cache: CacheConfig { session_capacity },
            feed,
        })
    }

    pub fn server_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}
