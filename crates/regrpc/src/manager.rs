//! # Session manager
//!
//! Holds the nodes of a process, one per data source. Constructed once at
//! startup and passed to whatever needs to reach a registry.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::info;

use crate::config::Bootstrap;
use crate::config::DEFAULT_REGISTRY_HOST;
use crate::node;
use crate::node::Node;

#[derive(Debug)]
pub enum Error {
    Node(node::Error),
    DataSourceNotFound(String),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Node(e) => write!(f, "{}", e),
            Self::DataSourceNotFound(name) => write!(f, "Data source [{}] not found", name),
        }
    }
}

impl std::error::Error for Error {}

impl From<node::Error> for Error {
    fn from(e: node::Error) -> Self {
        Self::Node(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Default)]
pub struct SessionManager {
    nodes: DashMap<String, Arc<Node>>,
}

impl SessionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Connects every bootstrap entry; the first failure aborts.
    pub async fn connect_all(bootstraps: &[Bootstrap]) -> Result<Self> {
        let manager = Self::new();
        for bootstrap in bootstraps {
            let node = Node::connect(bootstrap).await?;
            manager.insert(node);
        }
        Ok(manager)
    }

    /// Files `node` under its data source, replacing any previous node there.
    pub fn insert(&self, node: Node) -> Arc<Node> {
        let name = node.config().data_source().to_string();
        let node = Arc::new(node);
        if self.nodes.insert(name.clone(), node.clone()).is_some() {
            info!(data_source = %name, "data source replaced");
        }
        node
    }

    /// The node for `data_source`, or for the default registry host.
    pub fn node(&self, data_source: Option<&str>) -> Result<Arc<Node>> {
        let name = data_source.unwrap_or(DEFAULT_REGISTRY_HOST);
        self.nodes
            .get(name)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| Error::DataSourceNotFound(name.to_string()))
    }

    /// Registered data source names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.nodes.iter().map(|entry| entry.key().clone()).collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::registry::MemoryRegistry;

    fn node(ds_name: &str, host: &str) -> Node {
        let config = Config {
            ds_name: ds_name.into(),
            host: host.into(),
            ..Config::default()
        };
        Node::from_parts(Arc::new(MemoryRegistry::new(host)), config)
    }

    #[test]
    fn test_lookup_by_data_source() {
        let manager = SessionManager::new();
        manager.insert(node("orders", "10.0.0.1:8500"));
        manager.insert(node("", DEFAULT_REGISTRY_HOST));

        assert_eq!(manager.names(), vec![DEFAULT_REGISTRY_HOST.to_string(), "orders".to_string()]);
        assert_eq!(manager.node(Some("orders")).unwrap().config().host, "10.0.0.1:8500");
        assert_eq!(manager.node(None).unwrap().config().data_source(), DEFAULT_REGISTRY_HOST);
    }

    #[test]
    fn test_unknown_data_source() {
        let manager = SessionManager::new();
        assert!(matches!(
            manager.node(None),
            Err(Error::DataSourceNotFound(name)) if name == DEFAULT_REGISTRY_HOST
        ));
        assert!(matches!(manager.node(Some("x")), Err(Error::DataSourceNotFound(_))));
    }
}
