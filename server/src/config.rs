//! Configuration management for the Kawach server.
//!
//! Loads configuration from environment variables with defaults. A `.env`
//! file is read first when present. Unlike a missing variable, a variable that
//! is set but does not parse is an error.

use kawach_runtime::EngineConfig;
use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A variable is set but its value does not parse
    #[error("{name}={value:?} is invalid: {reason}")]
    Invalid {
        /// Variable name
        name: &'static str,
        /// Raw value
        value: String,
        /// Why it was rejected
        reason: String,
    },
}

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// HTTP server configuration
    pub server: ServerConfig,
    /// `PostgreSQL` configuration; `None` runs on the in-memory store
    pub database: Option<DatabaseConfig>,
    /// Engine tuning
    pub engine: EngineConfig,
    /// Changes buffered for the notification dispatcher
    pub relay_capacity: usize,
}

/// HTTP server configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Bind host (`KAWACH_HOST`, default `0.0.0.0`)
    pub host: String,
    /// API port (`KAWACH_PORT`, default 8080)
    pub port: u16,
    /// Prometheus scrape port (`KAWACH_METRICS_PORT`, default 9090)
    pub metrics_port: u16,
    /// How long shutdown waits for open connections (`KAWACH_SHUTDOWN_TIMEOUT_SECS`, default 30)
    pub shutdown_timeout: Duration,
}

/// `PostgreSQL` configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseConfig {
    /// Connection URL (`DATABASE_URL`)
    pub url: String,
    /// Pool size (`DATABASE_MAX_CONNECTIONS`, default 10)
    pub max_connections: u32,
}

impl ServerConfig {
    /// Address of the API listener.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Invalid`] when the host is not an IP address.
    pub fn addr(&self) -> Result<SocketAddr, ConfigError> {
        socket_addr("KAWACH_HOST", &self.host, self.port)
    }

    /// Address of the metrics listener.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Invalid`] when the host is not an IP address.
    pub fn metrics_addr(&self) -> Result<SocketAddr, ConfigError> {
        socket_addr("KAWACH_HOST", &self.host, self.metrics_port)
    }
}

fn socket_addr(name: &'static str, host: &str, port: u16) -> Result<SocketAddr, ConfigError> {
    format!("{host}:{port}")
        .parse()
        .map_err(|e: std::net::AddrParseError| ConfigError::Invalid {
            name,
            value: host.to_string(),
            reason: e.to_string(),
        })
}

impl Config {
    /// Load from the process environment.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Invalid`] for the first malformed variable.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load through `lookup`, which returns the value of a variable if set.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Invalid`] for the first malformed variable.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let vars = Vars(&lookup);
        let defaults = EngineConfig::default();

        let database = match vars.string("DATABASE_URL") {
            Some(url) => Some(DatabaseConfig {
                url,
                max_connections: vars.parse("DATABASE_MAX_CONNECTIONS")?.unwrap_or(10),
            }),
            None => None,
        };

        let engine = EngineConfig {
            lock_wait: vars
                .parse("KAWACH_LOCK_WAIT_MS")?
                .map_or(defaults.lock_wait, Duration::from_millis),
            busy_retries: vars
                .parse("KAWACH_BUSY_RETRIES")?
                .unwrap_or(defaults.busy_retries),
            feed_capacity: vars
                .positive("KAWACH_FEED_CAPACITY")?
                .unwrap_or(defaults.feed_capacity),
            station_radius_km: vars
                .radius("KAWACH_STATION_RADIUS_KM")?
                .unwrap_or(defaults.station_radius_km),
            supersede_open_tickets: vars
                .parse("KAWACH_SUPERSEDE_OPEN_TICKETS")?
                .unwrap_or(defaults.supersede_open_tickets),
            max_clock_skew: vars
                .parse("KAWACH_MAX_CLOCK_SKEW_SECS")?
                .map_or(defaults.max_clock_skew, chrono::Duration::seconds),
            ..defaults
        };

        Ok(Self {
            server: ServerConfig {
                host: vars.string("KAWACH_HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
                port: vars.parse("KAWACH_PORT")?.unwrap_or(8080),
                metrics_port: vars.parse("KAWACH_METRICS_PORT")?.unwrap_or(9090),
                shutdown_timeout: Duration::from_secs(
                    vars.parse("KAWACH_SHUTDOWN_TIMEOUT_SECS")?.unwrap_or(30),
                ),
            },
            database,
            engine,
            relay_capacity: vars.positive("KAWACH_RELAY_CAPACITY")?.unwrap_or(1024),
        })
    }
}

struct Vars<'a, F>(&'a F);

impl<F> Vars<'_, F>
where
    F: Fn(&str) -> Option<String>,
{
    /// Set and non-blank
    fn string(&self, name: &str) -> Option<String> {
        (self.0)(name)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn parse<T>(&self, name: &'static str) -> Result<Option<T>, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        self.string(name)
            .map(|value| {
                value.parse().map_err(|e: T::Err| ConfigError::Invalid {
                    name,
                    reason: e.to_string(),
                    value,
                })
            })
            .transpose()
    }

    fn positive(&self, name: &'static str) -> Result<Option<usize>, ConfigError> {
        match self.parse::<usize>(name)? {
            Some(0) => Err(ConfigError::Invalid {
                name,
                value: "0".to_string(),
                reason: "must be at least 1".to_string(),
            }),
            other => Ok(other),
        }
    }

    fn radius(&self, name: &'static str) -> Result<Option<f64>, ConfigError> {
        match self.parse::<f64>(name)? {
            Some(km) if !km.is_finite() || km <= 0.0 => Err(ConfigError::Invalid {
                name,
                value: km.to_string(),
                reason: "must be a positive distance".to_string(),
            }),
            other => Ok(other),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(pairs: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        Config::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn defaults_run_in_memory() {
        let config = load(&[]).unwrap();
        assert_eq!(config.database, None);
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.metrics_port, 9090);
        assert_eq!(config.server.shutdown_timeout, Duration::from_secs(30));
        assert_eq!(config.engine, EngineConfig::default());
        assert_eq!(
            config.server.addr().unwrap(),
            "0.0.0.0:8080".parse::<SocketAddr>().unwrap()
        );
    }

    #[test]
    fn overrides_are_applied() {
        let config = load(&[
            ("DATABASE_URL", "postgres://localhost/kawach"),
            ("DATABASE_MAX_CONNECTIONS", "4"),
            ("KAWACH_LOCK_WAIT_MS", "100"),
            ("KAWACH_BUSY_RETRIES", "5"),
            ("KAWACH_FEED_CAPACITY", "16"),
            ("KAWACH_STATION_RADIUS_KM", "2.5"),
            ("KAWACH_SUPERSEDE_OPEN_TICKETS", "false"),
            ("KAWACH_MAX_CLOCK_SKEW_SECS", "5"),
            ("KAWACH_HOST", "127.0.0.1"),
        ])
        .unwrap();

        let database = config.database.unwrap();
        assert_eq!(database.url, "postgres://localhost/kawach");
        assert_eq!(database.max_connections, 4);
        assert_eq!(config.engine.lock_wait, Duration::from_millis(100));
        assert_eq!(config.engine.busy_retries, 5);
        assert_eq!(config.engine.feed_capacity, 16);
        assert!((config.engine.station_radius_km - 2.5).abs() < f64::EPSILON);
        assert!(!config.engine.supersede_open_tickets);
        assert_eq!(config.engine.max_clock_skew, chrono::Duration::seconds(5));
        assert_eq!(
            config.server.metrics_addr().unwrap(),
            "127.0.0.1:9090".parse::<SocketAddr>().unwrap()
        );
    }

    #[test]
    fn blank_values_fall_back_to_defaults() {
        let config = load(&[("DATABASE_URL", "  "), ("KAWACH_PORT", "")]).unwrap();
        assert_eq!(config.database, None);
        assert_eq!(config.server.port, 8080);
    }

    #[test]
    fn malformed_values_are_errors() {
        let err = load(&[("KAWACH_PORT", "eighty")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { name: "KAWACH_PORT", .. }));

        assert!(load(&[("KAWACH_FEED_CAPACITY", "0")]).is_err());
        assert!(load(&[("KAWACH_STATION_RADIUS_KM", "-1")]).is_err());
        assert!(load(&[("KAWACH_SUPERSEDE_OPEN_TICKETS", "sometimes")]).is_err());

        let bad_host = load(&[("KAWACH_HOST", "not a host")]).unwrap();
        assert!(bad_host.server.addr().is_err());
    }
}
