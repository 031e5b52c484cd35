//! Server configuration, with defaults and `CARDROOM_*` environment
//! overrides.

use std::str::FromStr;

use thiserror::Error;

use crate::authority::RoomConfig;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("{var}: expected a number, got {value:?}")]
    InvalidNumber { var: &'static str, value: String },
    #[error("{var}: {reason}")]
    Invalid {
        var: &'static str,
        reason: &'static str,
    },
}

/// Server configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// WebSocket listen address
    pub bind_addr: String,
    /// Profile query listen address (None = disabled)
    pub http_addr: Option<String>,
    /// Maximum sessions per room
    pub max_sessions_per_room: usize,
    /// Broadcast frames buffered per session
    pub broadcast_capacity: usize,
    /// Commands buffered per room
    pub inbound_queue_capacity: usize,
    /// Heartbeat interval in seconds (0 = disabled)
    pub heartbeat_interval_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:9090".to_string(),
            http_addr: Some("127.0.0.1:9091".to_string()),
            max_sessions_per_room: 100,
            broadcast_capacity: 256,
            inbound_queue_capacity: 1024,
            heartbeat_interval_secs: 30,
        }
    }
}

impl ServerConfig {
    /// Defaults overridden by process environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Defaults overridden by `lookup`.
    ///
    /// | Variable | Field |
    /// |----------|-------|
    /// | `CARDROOM_BIND_ADDR` | `bind_addr` |
    /// | `CARDROOM_HTTP_ADDR` | `http_addr` (`off` disables) |
    /// | `CARDROOM_MAX_SESSIONS` | `max_sessions_per_room` |
    /// | `CARDROOM_BROADCAST_CAPACITY` | `broadcast_capacity` |
    /// | `CARDROOM_QUEUE_CAPACITY` | `inbound_queue_capacity` |
    /// | `CARDROOM_HEARTBEAT_SECS` | `heartbeat_interval_secs` |
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(addr) = lookup("CARDROOM_BIND_ADDR") {
            config.bind_addr = addr;
        }
        if let Some(addr) = lookup("CARDROOM_HTTP_ADDR") {
            config.http_addr = match addr.trim() {
                "" | "off" => None,
                addr => Some(addr.to_string()),
            };
        }
        if let Some(n) = parse(&lookup, "CARDROOM_MAX_SESSIONS")? {
            config.max_sessions_per_room = n;
        }
        if let Some(n) = parse(&lookup, "CARDROOM_BROADCAST_CAPACITY")? {
            config.broadcast_capacity = n;
        }
        if let Some(n) = parse(&lookup, "CARDROOM_QUEUE_CAPACITY")? {
            config.inbound_queue_capacity = n;
        }
        if let Some(n) = parse(&lookup, "CARDROOM_HEARTBEAT_SECS")? {
            config.heartbeat_interval_secs = n;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let non_zero = [
            ("CARDROOM_MAX_SESSIONS", self.max_sessions_per_room),
            ("CARDROOM_BROADCAST_CAPACITY", self.broadcast_capacity),
            ("CARDROOM_QUEUE_CAPACITY", self.inbound_queue_capacity),
        ];
        match non_zero.into_iter().find(|(_, value)| *value == 0) {
            Some((var, _)) => Err(ConfigError::Invalid {
                var,
                reason: "must be greater than zero",
            }),
            None => Ok(()),
        }
    }

    pub fn room_config(&self) -> RoomConfig {
        RoomConfig {
            broadcast_capacity: self.broadcast_capacity,
            inbound_queue_capacity: self.inbound_queue_capacity,
            max_sessions_per_room: self.max_sessions_per_room,
        }
    }
}

fn parse<F, T>(lookup: &F, var: &'static str) -> Result<Option<T>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    lookup(var)
        .map(|value| {
            value
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidNumber { var, value })
        })
        .transpose()
}
