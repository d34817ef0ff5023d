use crate::models::LockSettings;
use serde::Deserialize;
use std::env;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub storage_type: StorageType,
    pub redis_url: Option<String>,
    pub redis_username: Option<String>,
    pub redis_password: Option<String>,
    pub redis_db: Option<i64>,
    pub server_host: String,
    pub server_port: u16,
    pub memory_persist_enabled: bool,
    pub memory_persist_path: String,
    pub memory_persist_interval: u64, // 秒
    pub lock_ttl_seconds: u64,
    pub heartbeat_interval_seconds: u64,
    pub sweep_interval_seconds: u64,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum StorageType {
    Memory,
    Redis,
}

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("{0} must be greater than zero")]
    ZeroInterval(&'static str),

    #[error(
        "LOCK_TTL_SECONDS ({ttl}) must be at least twice HEARTBEAT_INTERVAL_SECONDS ({heartbeat})"
    )]
    TtlTooShort { ttl: u64, heartbeat: u64 },
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

impl Config {
    pub fn from_env() -> Self {
        let storage_type = env::var("STORAGE_TYPE")
            .unwrap_or_else(|_| "memory".to_string())
            .to_lowercase();

        let storage_type = match storage_type.as_str() {
            "redis" => StorageType::Redis,
            _ => StorageType::Memory,
        };

        let redis_url = if storage_type == StorageType::Redis {
            Some(env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string()))
        } else {
            None
        };

        Self {
            storage_type,
            redis_url,
            redis_username: env::var("REDIS_USERNAME").ok(),
            redis_password: env::var("REDIS_PASSWORD").ok(),
            redis_db: env::var("REDIS_DB").ok().and_then(|s| s.parse::<i64>().ok()),
            server_host: env::var("SERVER_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            server_port: env_or("SERVER_PORT", 8080),
            memory_persist_enabled: env_or("MEMORY_PERSIST_ENABLED", false),
            memory_persist_path: env::var("MEMORY_PERSIST_PATH")
                .unwrap_or_else(|_| "./data/locks.json".to_string()),
            memory_persist_interval: env_or("MEMORY_PERSIST_INTERVAL", 30),
            lock_ttl_seconds: env_or("LOCK_TTL_SECONDS", 90),
            heartbeat_interval_seconds: env_or("HEARTBEAT_INTERVAL_SECONDS", 30),
            sweep_interval_seconds: env_or("SWEEP_INTERVAL_SECONDS", 10),
        }
    }

    /// TTL 至少是心跳间隔的两倍，才能容忍偶尔丢失的心跳
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.heartbeat_interval_seconds == 0 {
            return Err(ConfigError::ZeroInterval("HEARTBEAT_INTERVAL_SECONDS"));
        }
        if self.lock_ttl_seconds == 0 {
            return Err(ConfigError::ZeroInterval("LOCK_TTL_SECONDS"));
        }
        if self.sweep_interval_seconds == 0 {
            return Err(ConfigError::ZeroInterval("SWEEP_INTERVAL_SECONDS"));
        }
        if self.memory_persist_enabled && self.memory_persist_interval == 0 {
            return Err(ConfigError::ZeroInterval("MEMORY_PERSIST_INTERVAL"));
        }
        if self.lock_ttl_seconds < self.heartbeat_interval_seconds.saturating_mul(2) {
            return Err(ConfigError::TtlTooShort {
                ttl: self.lock_ttl_seconds,
                heartbeat: self.heartbeat_interval_seconds,
            });
        }
        Ok(())
    }

    pub fn lock_ttl(&self) -> Duration {
        Duration::from_secs(self.lock_ttl_seconds)
    }

    /// 客户端通过 `GET /api/lock-settings` 读取的配置
    pub fn lock_settings(&self) -> LockSettings {
        LockSettings {
            heartbeat_interval_seconds: self.heartbeat_interval_seconds,
            lock_ttl_seconds: self.lock_ttl_seconds,
        }
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Config {
        Config {
            storage_type: StorageType::Memory,
            redis_url: None,
            redis_username: None,
            redis_password: None,
            redis_db: None,
            server_host: "127.0.0.1".to_string(),
            server_port: 8080,
            memory_persist_enabled: false,
            memory_persist_path: "./data/locks.json".to_string(),
            memory_persist_interval: 30,
            lock_ttl_seconds: 90,
            heartbeat_interval_seconds: 30,
            sweep_interval_seconds: 10,
        }
    }

    #[test]
    fn defaults_are_valid() {
        assert_eq!(base().validate(), Ok(()));
    }

    #[test]
    fn ttl_must_cover_two_heartbeats() {
        let mut config = base();
        config.lock_ttl_seconds = 45;
        assert_eq!(
            config.validate(),
            Err(ConfigError::TtlTooShort {
                ttl: 45,
                heartbeat: 30
            })
        );

        config.lock_ttl_seconds = 60;
        assert_eq!(config.validate(), Ok(()));
    }

    #[test]
    fn zero_intervals_are_rejected() {
        let mut config = base();
        config.heartbeat_interval_seconds = 0;
        assert_eq!(
            config.validate(),
            Err(ConfigError::ZeroInterval("HEARTBEAT_INTERVAL_SECONDS"))
        );

        let mut config = base();
        config.sweep_interval_seconds = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn lock_settings_mirror_configured_timings() {
        let mut config = base();
        config.lock_ttl_seconds = 120;
        config.heartbeat_interval_seconds = 20;

        let settings = config.lock_settings();
        assert_eq!(settings.lock_ttl_seconds, 120);
        assert_eq!(settings.heartbeat_interval_seconds, 20);
        assert_eq!(config.lock_ttl(), Duration::from_secs(120));
    }
}
