//! Engine configuration from the process environment.

use std::time::Duration;

const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 3001;
const DEFAULT_BATTLE_TIMEOUT_SECS: u64 = 60;
const DEFAULT_MATCH_TIMEOUT_SECS: u64 = 60;
const DEFAULT_READY_TIMEOUT_SECS: u64 = 10;

/// Storage backend selected by `STORAGE_DRIVER`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageDriver {
    Memory,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Unsupported STORAGE_DRIVER: {0} (supported: memory)")]
    UnsupportedStorageDriver(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub server_host: String,
    pub server_port: u16,
    /// Turn owner's window to act before an AFK loss
    pub battle_timeout: Duration,
    /// How long a user may wait in the queue
    pub match_timeout: Duration,
    /// Window for both clients to signal ready
    pub ready_timeout: Duration,
    pub cors_allowed_origins: Option<String>,
    pub storage_driver: StorageDriver,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            server_host: DEFAULT_HOST.to_string(),
            server_port: DEFAULT_PORT,
            battle_timeout: Duration::from_secs(DEFAULT_BATTLE_TIMEOUT_SECS),
            match_timeout: Duration::from_secs(DEFAULT_MATCH_TIMEOUT_SECS),
            ready_timeout: Duration::from_secs(DEFAULT_READY_TIMEOUT_SECS),
            cors_allowed_origins: None,
            storage_driver: StorageDriver::Memory,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let storage_driver = match get("STORAGE_DRIVER") {
            None => StorageDriver::Memory,
            Some(driver) if driver.eq_ignore_ascii_case("memory") => StorageDriver::Memory,
            Some(other) => return Err(ConfigError::UnsupportedStorageDriver(other)),
        };

        let server_port = get("SERVER_PORT")
            .map(|v| ("SERVER_PORT", v))
            .or_else(|| get("PORT").map(|v| ("PORT", v)))
            .map_or(DEFAULT_PORT, |(key, v)| parse_or(key, &v, DEFAULT_PORT));

        let seconds = |key: &str, default: u64| {
            let secs = get(key).map_or(default, |v| parse_or(key, &v, default));
            Duration::from_secs(secs)
        };

        Ok(Self {
            server_host: get("SERVER_HOST").unwrap_or_else(|| DEFAULT_HOST.to_string()),
            server_port,
            battle_timeout: seconds("BATTLE_TIMEOUT_SECONDS", DEFAULT_BATTLE_TIMEOUT_SECS),
            match_timeout: seconds("MATCH_TIMEOUT_SECONDS", DEFAULT_MATCH_TIMEOUT_SECS),
            ready_timeout: seconds("READY_TIMEOUT_SECONDS", DEFAULT_READY_TIMEOUT_SECS),
            cors_allowed_origins: get("CORS_ALLOWED_ORIGINS"),
            storage_driver,
        })
    }
}

fn parse_or<T>(key: &str, raw: &str, default: T) -> T
where
    T: std::str::FromStr + std::fmt::Display + Copy,
{
    match raw.parse() {
        Ok(value) => value,
        Err(_) => {
            tracing::warn!(key, value = raw, default = %default, "Invalid config value, using default");
            default
        }
    }
}
