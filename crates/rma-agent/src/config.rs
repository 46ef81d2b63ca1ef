//! Agent configuration.
//!
//! Values are layered: built-in defaults, then an optional TOML file, then
//! `RMA_*` environment variables. The effective settings are exposed to
//! consoles as a read-only managed object.

use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use rma_core::{AttributeInfo, ManagedObject, Node, Value, ValueKind};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ConfigError;

/// Default naming-registry port.
pub const DEFAULT_AGENT_PORT: u16 = 3000;

/// Default connector port.
pub const DEFAULT_EXPORTED_PORT: u16 = 4000;

/// Default watchdog polling interval.
pub const DEFAULT_WATCHDOG_INTERVAL_MS: u64 = 20_000;

/// Default notification buffer per subscriber.
pub const DEFAULT_NOTIFICATION_CAPACITY: usize = 256;

/// Effective agent settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// When false, registration is a silent no-op
    pub enabled: bool,
    /// Address the registry and connectors bind to
    pub host: String,
    /// Naming-registry port
    pub agent_port: u16,
    /// Connector port; 0 picks an ephemeral port
    pub exported_port: u16,
    pub watchdog_interval_ms: u64,
    pub notification_capacity: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: "127.0.0.1".to_string(),
            agent_port: DEFAULT_AGENT_PORT,
            exported_port: DEFAULT_EXPORTED_PORT,
            watchdog_interval_ms: DEFAULT_WATCHDOG_INTERVAL_MS,
            notification_capacity: DEFAULT_NOTIFICATION_CAPACITY,
        }
    }
}

impl AgentConfig {
    /// `<config dir>/rma/agent.toml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("rma").join("agent.toml"))
    }

    /// Loads defaults, the file at `path` (if it exists) and environment
    /// overrides.
    pub fn load_from(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) if path.exists() => {
                let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
                    path: path.to_path_buf(),
                    reason: e.to_string(),
                })?;
                debug!(path = %path.display(), "Loaded agent config file");
                Self::from_toml_str(&text)?
            }
            _ => Self::default(),
        };
        config.apply_env(|var| std::env::var(var).ok())?;
        Ok(config)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Applies `RMA_*` overrides using `lookup` to read variables.
    pub fn apply_env(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        fn parsed<T: std::str::FromStr>(var: &str, value: String) -> Result<T, ConfigError> {
            value
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidEnv {
                    var: var.to_string(),
                    value,
                })
        }

        if let Some(v) = lookup("RMA_ENABLED") {
            self.enabled = parsed("RMA_ENABLED", v)?;
        }
        if let Some(v) = lookup("RMA_HOST") {
            self.host = v;
        }
        if let Some(v) = lookup("RMA_AGENT_PORT") {
            self.agent_port = parsed("RMA_AGENT_PORT", v)?;
        }
        if let Some(v) = lookup("RMA_EXPORTED_PORT") {
            self.exported_port = parsed("RMA_EXPORTED_PORT", v)?;
        }
        if let Some(v) = lookup("RMA_WATCHDOG_INTERVAL_MS") {
            self.watchdog_interval_ms = parsed("RMA_WATCHDOG_INTERVAL_MS", v)?;
        }
        Ok(())
    }

    fn ip(&self) -> Result<IpAddr, ConfigError> {
        self.host
            .parse()
            .map_err(|_| ConfigError::InvalidHost(self.host.clone()))
    }

    /// Address of the naming registry.
    pub fn agent_address(&self) -> Result<SocketAddr, ConfigError> {
        Ok(SocketAddr::new(self.ip()?, self.agent_port))
    }

    /// Address connectors bind to.
    pub fn exported_address(&self) -> Result<SocketAddr, ConfigError> {
        Ok(SocketAddr::new(self.ip()?, self.exported_port))
    }

    pub fn watchdog_interval(&self) -> Duration {
        Duration::from_millis(self.watchdog_interval_ms.max(1))
    }
}

impl ManagedObject for AgentConfig {
    fn type_name(&self) -> &str {
        "Settings"
    }

    fn attributes(&self) -> Vec<AttributeInfo> {
        vec![
            AttributeInfo::scalar("Enabled", ValueKind::Bool),
            AttributeInfo::scalar("Host", ValueKind::Text),
            AttributeInfo::scalar("AgentPort", ValueKind::Int),
            AttributeInfo::scalar("ExportedPort", ValueKind::Int),
            AttributeInfo::scalar("WatchdogIntervalMs", ValueKind::Long),
            AttributeInfo::scalar("NotificationCapacity", ValueKind::Long),
        ]
    }

    fn get(&self, name: &str) -> Option<Node> {
        let value = match name {
            "Enabled" => Value::Bool(self.enabled),
            "Host" => Value::from(self.host.as_str()),
            "AgentPort" => Value::Int(i32::from(self.agent_port)),
            "ExportedPort" => Value::Int(i32::from(self.exported_port)),
            "WatchdogIntervalMs" => {
                Value::Long(i64::try_from(self.watchdog_interval_ms).unwrap_or(i64::MAX))
            }
            "NotificationCapacity" => {
                Value::Long(i64::try_from(self.notification_capacity).unwrap_or(i64::MAX))
            }
            _ => return None,
        };
        Some(Node::Leaf(value))
    }
}

/// Where sessions obtain their configuration.
#[derive(Debug, Clone)]
pub enum ConfigSource {
    /// A fixed, already-built configuration
    Fixed(AgentConfig),
    /// Layered load from an optional file (default path when `None`)
    File(Option<PathBuf>),
}

impl ConfigSource {
    /// Produces the configuration for one registration.
    pub fn load(&self) -> Result<AgentConfig, ConfigError> {
        match self {
            Self::Fixed(config) => Ok(config.clone()),
            Self::File(path) => {
                let path = path.clone().or_else(AgentConfig::default_path);
                AgentConfig::load_from(path.as_deref())
            }
        }
    }
}

impl Default for ConfigSource {
    fn default() -> Self {
        Self::File(None)
    }
}
