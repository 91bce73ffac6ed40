//! Connection-pool configuration.

use serde::{Deserialize, Serialize};

/// Recognised pool configuration, with the defaults the design specifies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Host:port or, when `network` is `"unix"`, a socket path.
    pub address: String,
    /// `"tcp"` or `"unix"`.
    pub network: String,
    /// Database index selected via `SELECT` on connection open (0..15).
    pub database: i64,
    /// If non-empty, `AUTH` is sent on connection open.
    pub password: String,
    pub max_idle: u32,
    /// `0` means unlimited.
    pub max_active: u32,
    pub idle_timeout_secs: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            address: "localhost:6379".to_string(),
            network: "tcp".to_string(),
            database: 0,
            password: String::new(),
            max_idle: 10,
            max_active: 0,
            idle_timeout_secs: 240,
        }
    }
}

impl PoolConfig {
    /// The connection string handed to `redis::Client::open`, in the shape the
    /// `redis` crate expects for TCP vs. Unix-socket addressing.
    pub fn connection_url(&self) -> String {
        if self.network == "unix" {
            format!("redis+unix://{}/?db={}", self.address, self.database)
        } else if self.password.is_empty() {
            format!("redis://{}/{}", self.address, self.database)
        } else {
            format!("redis://:{}@{}/{}", self.password, self.address, self.database)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_values() {
        let cfg = PoolConfig::default();
        assert_eq!(cfg.address, "localhost:6379");
        assert_eq!(cfg.network, "tcp");
        assert_eq!(cfg.database, 0);
        assert_eq!(cfg.password, "");
        assert_eq!(cfg.max_idle, 10);
        assert_eq!(cfg.max_active, 0);
        assert_eq!(cfg.idle_timeout_secs, 240);
    }

    #[test]
    fn tcp_url_without_password() {
        let cfg = PoolConfig::default();
        assert_eq!(cfg.connection_url(), "redis://localhost:6379/0");
    }

    #[test]
    fn tcp_url_with_password() {
        let mut cfg = PoolConfig::default();
        cfg.password = "s3cret".to_string();
        assert_eq!(cfg.connection_url(), "redis://:s3cret@localhost:6379/0");
    }

    #[test]
    fn unix_socket_url() {
        let cfg = PoolConfig {
            network: "unix".to_string(),
            address: "/tmp/redis.sock".to_string(),
            ..PoolConfig::default()
        };
        assert_eq!(cfg.connection_url(), "redis+unix:///tmp/redis.sock/?db=0");
    }
}
