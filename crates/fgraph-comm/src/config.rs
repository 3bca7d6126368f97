// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Dispatcher configuration.
//!
//! Loaded from TOML; every field has a default so an empty file is valid.

use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Dispatcher configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommConfig {
    /// Address the servers bind to (default: 0.0.0.0)
    #[serde(default = "default_bind_address")]
    pub bind_address: IpAddr,

    /// Listening port; 0 probes from `port_probe_base`
    #[serde(default)]
    pub port: u16,

    /// First candidate port when probing
    #[serde(default = "default_port_probe_base")]
    pub port_probe_base: u16,

    /// Number of candidate ports to try
    #[serde(default = "default_port_probe_count")]
    pub port_probe_count: u16,

    /// How long a blocking send waits for its acknowledgement (ms)
    #[serde(default = "default_ack_timeout_ms")]
    pub ack_timeout_ms: u64,

    /// Maximum encoded message size (bytes)
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,

    /// Run the TCP server
    #[serde(default = "default_true")]
    pub enable_tcp: bool,

    /// Run the reliable UDP server
    #[serde(default = "default_true")]
    pub enable_rudp: bool,

    /// Log filter (tracing EnvFilter syntax)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Reliable UDP transport tuning
    #[serde(default)]
    pub rudp: RudpConfig,
}

/// Reliable UDP transport tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RudpConfig {
    /// Maximum DATA payload per datagram (bytes)
    #[serde(default = "default_max_payload")]
    pub max_payload: usize,

    /// Max unacknowledged DATA packets in flight
    #[serde(default = "default_window_size")]
    pub window_size: u32,

    /// Retransmit timeout (ms), also the SYN retry interval
    #[serde(default = "default_retransmit_timeout_ms")]
    pub retransmit_timeout_ms: u64,

    /// Retransmissions before the connection is declared failed
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Idle interval after which an empty ACK is sent (ms)
    #[serde(default = "default_keepalive_interval_ms")]
    pub keepalive_interval_ms: u64,

    /// Silence after which the peer is considered gone (ms)
    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: u64,
}

fn default_bind_address() -> IpAddr {
    IpAddr::from([0, 0, 0, 0])
}

fn default_port_probe_base() -> u16 {
    4800
}

fn default_port_probe_count() -> u16 {
    100
}

fn default_ack_timeout_ms() -> u64 {
    6000
}

fn default_max_message_size() -> usize {
    16 * 1024 * 1024 // 16 MB
}

fn default_true() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_payload() -> usize {
    1200
}

fn default_window_size() -> u32 {
    8
}

fn default_retransmit_timeout_ms() -> u64 {
    200
}

fn default_max_retries() -> u32 {
    10
}

fn default_keepalive_interval_ms() -> u64 {
    1000
}

fn default_idle_timeout_ms() -> u64 {
    15_000
}

impl Default for CommConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: 0,
            port_probe_base: default_port_probe_base(),
            port_probe_count: default_port_probe_count(),
            ack_timeout_ms: default_ack_timeout_ms(),
            max_message_size: default_max_message_size(),
            enable_tcp: true,
            enable_rudp: true,
            log_level: default_log_level(),
            rudp: RudpConfig::default(),
        }
    }
}

impl Default for RudpConfig {
    fn default() -> Self {
        Self {
            max_payload: default_max_payload(),
            window_size: default_window_size(),
            retransmit_timeout_ms: default_retransmit_timeout_ms(),
            max_retries: default_max_retries(),
            keepalive_interval_ms: default_keepalive_interval_ms(),
            idle_timeout_ms: default_idle_timeout_ms(),
        }
    }
}

impl CommConfig {
    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file.
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Blocking-send acknowledgement timeout.
    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ack_timeout_ms == 0 {
            return Err(ConfigError::Invalid("ack_timeout_ms cannot be 0".into()));
        }
        if self.max_message_size == 0 || self.max_message_size > u32::MAX as usize {
            return Err(ConfigError::Invalid(format!(
                "max_message_size must be in 1..={}",
                u32::MAX
            )));
        }
        if self.port == 0 {
            if self.port_probe_count == 0 {
                return Err(ConfigError::Invalid(
                    "port_probe_count cannot be 0 when port is 0".into(),
                ));
            }
            if self.port_probe_base == 0 {
                return Err(ConfigError::Invalid(
                    "port_probe_base cannot be 0".into(),
                ));
            }
        }
        if !self.enable_tcp && !self.enable_rudp {
            return Err(ConfigError::Invalid(
                "At least one of enable_tcp / enable_rudp must be set".into(),
            ));
        }
        self.rudp.validate()
    }
}

impl RudpConfig {
    pub fn retransmit_timeout(&self) -> Duration {
        Duration::from_millis(self.retransmit_timeout_ms)
    }

    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_millis(self.keepalive_interval_ms)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    /// Validate transport tuning.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_payload == 0 || self.max_payload > 65_000 {
            return Err(ConfigError::Invalid(
                "rudp.max_payload must be in 1..=65000".into(),
            ));
        }
        if self.window_size == 0 {
            return Err(ConfigError::Invalid("rudp.window_size cannot be 0".into()));
        }
        if self.retransmit_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "rudp.retransmit_timeout_ms cannot be 0".into(),
            ));
        }
        if self.keepalive_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "rudp.keepalive_interval_ms cannot be 0".into(),
            ));
        }
        if self.idle_timeout_ms <= self.keepalive_interval_ms {
            return Err(ConfigError::Invalid(
                "rudp.idle_timeout_ms must exceed keepalive_interval_ms".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CommConfig::default();
        assert_eq!(config.port, 0);
        assert_eq!(config.port_probe_base, 4800);
        assert_eq!(config.ack_timeout(), Duration::from_millis(6000));
        assert_eq!(config.max_message_size, 16 * 1024 * 1024);
        assert!(config.enable_tcp && config.enable_rudp);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_toml_uses_defaults() {
        let config: CommConfig = toml::from_str("").unwrap();
        assert_eq!(config.ack_timeout_ms, 6000);
        assert_eq!(config.rudp, RudpConfig::default());
    }

    #[test]
    fn test_partial_toml() {
        let toml_str = r#"
            port = 5500
            enable_rudp = false

            [rudp]
            window_size = 16
        "#;
        let config: CommConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.port, 5500);
        assert!(!config.enable_rudp);
        assert_eq!(config.rudp.window_size, 16);
        assert_eq!(config.rudp.max_retries, 10);
    }

    #[test]
    fn test_validate_rejects() {
        let mut config = CommConfig {
            ack_timeout_ms: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        config = CommConfig {
            enable_tcp: false,
            enable_rudp: false,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        config = CommConfig::default();
        config.rudp.window_size = 0;
        assert!(config.validate().is_err());

        config = CommConfig::default();
        config.rudp.idle_timeout_ms = config.rudp.keepalive_interval_ms;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fgraph-comm.toml");

        let config = CommConfig {
            port: 4900,
            ack_timeout_ms: 2500,
            ..Default::default()
        };
        config.to_file(&path).unwrap();

        let loaded = CommConfig::from_file(&path).unwrap();
        assert_eq!(loaded.port, 4900);
        assert_eq!(loaded.ack_timeout_ms, 2500);
    }

    #[test]
    fn test_from_file_missing() {
        let err = CommConfig::from_file("/nonexistent/fgraph-comm.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
