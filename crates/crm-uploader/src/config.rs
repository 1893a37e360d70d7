//! Configuration management

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::uploader::{UploaderConfig, DEFAULT_POOL_SIZE};

// ============================================================================
// Configuration Constants
// ============================================================================

/// Default bind address of the wake-up signal listener.
pub const DEFAULT_LISTENER_ADDR: &str = "127.0.0.1:8088";

/// Default CRM server base URL.
pub const DEFAULT_CRM_SERVER_ADDR: &str = "http://localhost:8089";

/// Default CRM API path customers are posted to.
pub const DEFAULT_CRM_API_PATH: &str = "/customers";

/// Maximum time to wait for the CRM server, in seconds.
pub const DEFAULT_CRM_CLIENT_TIMEOUT_SECS: u64 = 30;

/// Default database URL for local development.
pub const DEFAULT_DATABASE_URL: &str = "postgresql://localhost/crm";

/// Default maximum database connections in the pool.
pub const DEFAULT_DATABASE_MAX_CONNECTIONS: u32 = 10;

/// Default database connection timeout in seconds.
pub const DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Default delay before the first poll, in milliseconds.
pub const DEFAULT_INITIAL_INTERVAL_MS: u64 = 1000;

/// Default backoff step, in milliseconds.
pub const DEFAULT_BACKOFF_UNIT_MS: u64 = 1000;

/// Default polling ceiling in seconds. Zero disables the ceiling.
pub const DEFAULT_BACKOFF_MAX_SECS: u64 = 600;

/// Uploader configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub listener: ListenerConfig,
    pub crm: CrmConfig,
    pub database: DatabaseConfig,
    pub uploader: UploaderConfig,
}

/// Wake-up signal listener configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenerConfig {
    pub addr: String,
}

/// Remote CRM configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrmConfig {
    pub server_addr: String,
    pub api_path: String,
    pub client_timeout_secs: u64,
}

/// Staging database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub connect_timeout_secs: u64,
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

impl Config {
    /// Load configuration from `.env`, the environment and defaults
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self::from_env();
        config.validate()?;

        Ok(config)
    }

    /// Read the environment without loading `.env` or validating
    pub fn from_env() -> Self {
        let pool_size = env_or("UPLOADER_POOL_SIZE", DEFAULT_POOL_SIZE);
        let backoff_max_secs = env_or("UPLOADER_BACKOFF_MAX_SECS", DEFAULT_BACKOFF_MAX_SECS);

        Config {
            listener: ListenerConfig {
                addr: env_string("CRM_LISTENER_ADDR", DEFAULT_LISTENER_ADDR),
            },
            crm: CrmConfig {
                server_addr: env_string("CRM_SERVER_ADDR", DEFAULT_CRM_SERVER_ADDR),
                api_path: env_string("CRM_API_PATH", DEFAULT_CRM_API_PATH),
                client_timeout_secs: env_or(
                    "CRM_CLIENT_TIMEOUT_SECS",
                    DEFAULT_CRM_CLIENT_TIMEOUT_SECS,
                ),
            },
            database: DatabaseConfig {
                url: env_string("DATABASE_URL", DEFAULT_DATABASE_URL),
                max_connections: env_or(
                    "DATABASE_MAX_CONNECTIONS",
                    DEFAULT_DATABASE_MAX_CONNECTIONS,
                ),
                connect_timeout_secs: env_or(
                    "DATABASE_CONNECT_TIMEOUT",
                    DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS,
                ),
            },
            uploader: UploaderConfig {
                pool_size,
                queue_capacity: env_or("UPLOADER_QUEUE_CAPACITY", pool_size),
                initial_interval: Duration::from_millis(env_or(
                    "UPLOADER_INITIAL_INTERVAL_MS",
                    DEFAULT_INITIAL_INTERVAL_MS,
                )),
                backoff_unit: Duration::from_millis(env_or(
                    "UPLOADER_BACKOFF_UNIT_MS",
                    DEFAULT_BACKOFF_UNIT_MS,
                )),
                backoff_max: (backoff_max_secs > 0).then(|| Duration::from_secs(backoff_max_secs)),
                polling_enabled: env_or("UPLOADER_POLLING_ENABLED", true),
            },
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        self.listener_addr()?;

        if self.crm.server_addr.is_empty() {
            anyhow::bail!("CRM server address cannot be empty");
        }
        url::Url::parse(&self.crm.server_addr).map_err(|e| {
            anyhow::anyhow!("CRM server address {} is not a URL: {}", self.crm.server_addr, e)
        })?;

        if self.crm.client_timeout_secs == 0 {
            anyhow::bail!("CRM client timeout must be greater than 0");
        }

        if self.database.url.is_empty() {
            anyhow::bail!("Database URL cannot be empty");
        }

        if self.database.max_connections == 0 {
            anyhow::bail!("Database max_connections must be greater than 0");
        }

        self.uploader.validate()
    }

    pub fn listener_addr(&self) -> anyhow::Result<SocketAddr> {
        self.listener.addr.parse().map_err(|e| {
            anyhow::anyhow!("Invalid listener address {}: {}", self.listener.addr, e)
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listener: ListenerConfig {
                addr: DEFAULT_LISTENER_ADDR.to_string(),
            },
            crm: CrmConfig {
                server_addr: DEFAULT_CRM_SERVER_ADDR.to_string(),
                api_path: DEFAULT_CRM_API_PATH.to_string(),
                client_timeout_secs: DEFAULT_CRM_CLIENT_TIMEOUT_SECS,
            },
            database: DatabaseConfig {
                url: DEFAULT_DATABASE_URL.to_string(),
                max_connections: DEFAULT_DATABASE_MAX_CONNECTIONS,
                connect_timeout_secs: DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS,
            },
            uploader: UploaderConfig::default(),
        }
    }
}
