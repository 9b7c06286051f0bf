//! Relay configuration.

use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    str::FromStr,
    time::Duration,
};

use thiserror::Error;

/// Default synchronous relay deadline.
pub const DEFAULT_SYNC_TIMEOUT: Duration = Duration::from_secs(30);

/// Default per-connection heartbeat interval.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Configuration error.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },
}

/// Runtime configuration for the relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayConfig {
    /// Address the HTTP/WebSocket server binds to.
    pub bind_addr: SocketAddr,
    /// How long a synchronous relay waits for a client result.
    pub sync_timeout: Duration,
    /// How often each connection sends a heartbeat ping.
    pub heartbeat_interval: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 8000),
            sync_timeout: DEFAULT_SYNC_TIMEOUT,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
        }
    }
}

impl RelayConfig {
    /// Build a configuration from the process environment.
    ///
    /// Reads `RELAY_HOST`, `PORT`, `SYNC_TIMEOUT_SECS` and
    /// `HEARTBEAT_INTERVAL_SECS`; unset variables keep their defaults.
    ///
    /// # Errors
    /// Returns error if a variable is set but cannot be parsed.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from an arbitrary key lookup.
    ///
    /// # Errors
    /// Returns error if a value is present but cannot be parsed.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let host: IpAddr = parse(&lookup, "RELAY_HOST")?.unwrap_or(defaults.bind_addr.ip());
        let port: u16 = parse(&lookup, "PORT")?.unwrap_or(defaults.bind_addr.port());
        let sync_timeout = parse::<u64, _>(&lookup, "SYNC_TIMEOUT_SECS")?
            .map_or(defaults.sync_timeout, Duration::from_secs);
        let heartbeat_interval = parse::<u64, _>(&lookup, "HEARTBEAT_INTERVAL_SECS")?
            .map_or(defaults.heartbeat_interval, Duration::from_secs);

        if heartbeat_interval.is_zero() {
            return Err(ConfigError::Invalid {
                key: "HEARTBEAT_INTERVAL_SECS",
                value: "0".to_string(),
            });
        }

        Ok(Self {
            bind_addr: SocketAddr::new(host, port),
            sync_timeout,
            heartbeat_interval,
        })
    }
}

fn parse<T, F>(lookup: &F, key: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(key) else {
        return Ok(None);
    };
    let value = raw.trim();
    if value.is_empty() {
        return Ok(None);
    }
    value
        .parse()
        .map(Some)
        .map_err(|_| ConfigError::Invalid {
            key,
            value: raw.clone(),
        })
}
