//! Client and server configuration.
//!
//! Defaults mirror the reference library's `client_config`/`server_config`
//! structs. Beyond the builder methods those carried, configuration here can
//! also be assembled from layered sources (defaults, a config file, then
//! environment variables) via [`ClientConfig::from_layered`] and
//! [`ServerConfig::from_layered`].

use std::time::Duration;

use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::logging::{null_logging_handler, LoggingHandler};

fn default_connect_timeout() -> Duration {
    Duration::from_secs(10)
}

/// Configuration for [`crate::client::Client`].
#[derive(Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    #[serde(default = "ClientConfig::default_host")]
    pub host: String,
    #[serde(default = "ClientConfig::default_port")]
    pub port: u16,
    #[serde(default = "ClientConfig::default_max_connections")]
    pub max_connections: usize,
    #[serde(default = "default_connect_timeout", with = "millis_duration")]
    pub connect_timeout: Duration,
    #[serde(skip)]
    pub logging_handler: LoggingHandler,
}

impl ClientConfig {
    fn default_host() -> String {
        "127.0.0.1".to_string()
    }

    fn default_port() -> u16 {
        502
    }

    fn default_max_connections() -> usize {
        1
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_max_connections(mut self, max_connections: usize) -> Self {
        self.max_connections = max_connections;
        self
    }

    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    pub fn with_logging_handler(mut self, handler: LoggingHandler) -> Self {
        self.logging_handler = handler;
        self
    }

    /// Loads a config from, in increasing priority: built-in defaults, an
    /// optional YAML file, then `MODBUS_CLIENT_*` environment variables
    /// (e.g. `MODBUS_CLIENT_PORT=1502`).
    pub fn from_layered(yaml_path: Option<&str>) -> Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(ClientConfig::default()));
        if let Some(path) = yaml_path {
            figment = figment.merge(Yaml::file(path));
        }
        figment = figment.merge(Env::prefixed("MODBUS_CLIENT_"));
        figment
            .extract()
            .map_err(|e| crate::error::ModbusError::Internal(e.to_string()))
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: Self::default_host(),
            port: Self::default_port(),
            max_connections: Self::default_max_connections(),
            connect_timeout: default_connect_timeout(),
            logging_handler: null_logging_handler(),
        }
    }
}

impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("max_connections", &self.max_connections)
            .field("connect_timeout", &self.connect_timeout)
            .finish_non_exhaustive()
    }
}

fn default_max_sessions() -> u16 {
    4
}

/// Configuration for [`crate::server::Server`].
#[derive(Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "ServerConfig::default_endpoint")]
    pub endpoint: String,
    #[serde(default = "ClientConfig::default_port")]
    pub port: u16,
    #[serde(default = "default_max_sessions")]
    pub max_connections: u16,
    #[serde(skip)]
    pub logging_handler: LoggingHandler,
}

impl ServerConfig {
    fn default_endpoint() -> String {
        "0.0.0.0".to_string()
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_max_connections(mut self, max_connections: u16) -> Self {
        self.max_connections = max_connections;
        self
    }

    pub fn with_logging_handler(mut self, handler: LoggingHandler) -> Self {
        self.logging_handler = handler;
        self
    }

    /// Loads a config from, in increasing priority: built-in defaults, an
    /// optional YAML file, then `MODBUS_SERVER_*` environment variables.
    pub fn from_layered(yaml_path: Option<&str>) -> Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(ServerConfig::default()));
        if let Some(path) = yaml_path {
            figment = figment.merge(Yaml::file(path));
        }
        figment = figment.merge(Env::prefixed("MODBUS_SERVER_"));
        figment
            .extract()
            .map_err(|e| crate::error::ModbusError::Internal(e.to_string()))
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            endpoint: Self::default_endpoint(),
            port: ClientConfig::default_port(),
            max_connections: default_max_sessions(),
            logging_handler: null_logging_handler(),
        }
    }
}

impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("endpoint", &self.endpoint)
            .field("port", &self.port)
            .field("max_connections", &self.max_connections)
            .finish_non_exhaustive()
    }
}

mod millis_duration {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
