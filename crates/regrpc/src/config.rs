//! # Node configuration
//!
//! A node's settings live in the registry itself, as a JSON document stored
//! under the node's key. A process only needs to know where the registry is
//! and which key to read (`Bootstrap`); everything else comes from `Config`.

use std::net::SocketAddr;
use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;

use crate::registry;
use crate::registry::Registry;

/// Registry address used when no data source name is configured.
pub const DEFAULT_REGISTRY_HOST: &str = "consulx.com:8500";

#[derive(Debug)]
pub enum Error {
    Registry(registry::Error),
    Malformed { node: String, details: String },
    Invalid { node: String, details: String },
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Registry(e) => write!(f, "Config unavailable: {}", e),
            Self::Malformed { node, details } => {
                write!(f, "Config [{}] is not valid JSON: {}", node, details)
            }
            Self::Invalid { node, details } => {
                write!(f, "Config [{}] is invalid: {}", node, details)
            }
        }
    }
}

impl std::error::Error for Error {}

impl From<registry::Error> for Error {
    fn from(e: registry::Error) -> Self {
        Self::Registry(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Where to find the registry and which node config to load from it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Bootstrap {
    pub registry: String,
    pub node: String,
    pub token: Option<String>,
}

impl Bootstrap {
    pub fn new(registry: impl Into<String>, node: impl Into<String>) -> Self {
        Self {
            registry: registry.into(),
            node: node.into(),
            token: None,
        }
    }
}

/// Per-node settings, immutable once loaded.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Config {
    /// Data source name this node is filed under in a `SessionManager`.
    pub ds_name: String,
    /// The registry key this config was read from.
    pub node: String,
    /// Registry address.
    pub host: String,
    /// Advertised address override; empty means "detect".
    pub domain: String,
    pub check_port: u16,
    /// Port advertised as the registration's service port.
    pub rpc_port: u16,
    /// Port the RPC listener binds; advertised in the `host` metadata.
    #[serde(alias = "ListenProt")]
    pub listen_port: u16,
    pub protocol: String,
    pub timeout: String,
    pub interval: String,
    pub destroy_after: String,
    /// Slow-call threshold in milliseconds, 0 disables the slow-call log.
    pub slow_query: u64,
    pub slow_log_path: String,
    /// Read deadline for a call's reply in milliseconds, 0 waits forever.
    pub call_timeout: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ds_name: String::new(),
            node: String::new(),
            host: String::new(),
            domain: String::new(),
            check_port: 0,
            rpc_port: 0,
            listen_port: 0,
            protocol: "tcp".into(),
            timeout: "3s".into(),
            interval: "5s".into(),
            destroy_after: "30s".into(),
            slow_query: 0,
            slow_log_path: String::new(),
            call_timeout: 0,
        }
    }
}

impl Config {
    /// Reads, parses and validates the config stored under `node`.
    pub async fn load(registry: &dyn Registry, node: &str) -> Result<Self> {
        let data = registry.get(node).await?;
        let mut config = Self::from_json(node, &data)?;
        config.node = node.to_string();
        if config.host.is_empty() {
            config.host = registry.address().to_string();
        }
        config.validate()?;
        Ok(config)
    }

    /// Parses a config document without validating it.
    pub fn from_json(node: &str, data: &[u8]) -> Result<Self> {
        serde_json::from_slice(data).map_err(|e| Error::Malformed {
            node: node.to_string(),
            details: e.to_string(),
        })
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |details: &str| Error::Invalid {
            node: self.node.clone(),
            details: details.to_string(),
        };
        if self.protocol.is_empty() {
            return Err(invalid("Protocol must not be empty"));
        }
        if self.listen_port == 0 {
            return Err(invalid("ListenPort must be set"));
        }
        if self.check_port == 0 {
            return Err(invalid("CheckPort must be set"));
        }
        Ok(())
    }

    /// The slow-call threshold, `None` when the slow-call log is disabled.
    pub fn slow_threshold(&self) -> Option<Duration> {
        if self.slow_query == 0 || self.slow_log_path.is_empty() {
            return None;
        }
        Some(Duration::from_millis(self.slow_query))
    }

    pub fn call_timeout(&self) -> Option<Duration> {
        (self.call_timeout > 0).then(|| Duration::from_millis(self.call_timeout))
    }

    /// Bind address of the RPC listener.
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::from(([0, 0, 0, 0], self.listen_port))
    }

    /// Bind address of the health probe listener.
    pub fn check_addr(&self) -> SocketAddr {
        SocketAddr::from(([0, 0, 0, 0], self.check_port))
    }

    /// The key this node is filed under: its data source name, else the registry host.
    pub fn data_source(&self) -> &str {
        if self.ds_name.is_empty() { &self.host } else { &self.ds_name }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::MemoryRegistry;

    const NODE: &str = r#"{
        "DsName": "",
        "CheckPort": 9001,
        "RpcPort": 9000,
        "ListenProt": 9100,
        "Protocol": "tcp",
        "Timeout": "3s",
        "Interval": "5s",
        "DestroyAfter": "15s",
        "SlowQuery": 50,
        "SlowLogPath": "/tmp/slow.log"
    }"#;

    #[tokio::test]
    async fn test_load_from_registry() {
        let reg = MemoryRegistry::new("127.0.0.1:8500");
        reg.put("node-a", NODE.as_bytes()).await.unwrap();

        let config = Config::load(&reg, "node-a").await.expect("load failed");
        assert_eq!(config.node, "node-a");
        assert_eq!(config.host, "127.0.0.1:8500");
        assert_eq!(config.listen_port, 9100);
        assert_eq!(config.destroy_after, "15s");
        assert_eq!(config.slow_threshold(), Some(Duration::from_millis(50)));
        assert_eq!(config.call_timeout(), None);
        assert_eq!(config.data_source(), "127.0.0.1:8500");
    }

    #[tokio::test]
    async fn test_load_missing_key() {
        let reg = MemoryRegistry::default();
        let err = Config::load(&reg, "nope").await.unwrap_err();
        assert!(matches!(err, Error::Registry(registry::Error::KeyNotFound(_))));
    }

    #[tokio::test]
    async fn test_load_malformed() {
        let reg = MemoryRegistry::default();
        reg.put("node-a", b"{not json").await.unwrap();
        assert!(matches!(Config::load(&reg, "node-a").await, Err(Error::Malformed { .. })));
    }

    #[test]
    fn test_validate_requires_ports() {
        let config = Config { protocol: "tcp".into(), ..Config::default() };
        assert!(matches!(config.validate(), Err(Error::Invalid { .. })));
    }

    #[test]
    fn test_slow_threshold_disabled() {
        let config = Config { slow_query: 0, slow_log_path: "/tmp/x".into(), ..Config::default() };
        assert_eq!(config.slow_threshold(), None);
        let config = Config { slow_query: 10, ..Config::default() };
        assert_eq!(config.slow_threshold(), None);
    }
}
