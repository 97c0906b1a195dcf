//! # Candidate Resolver
//!
//! Maps a `service.method` name onto a live endpoint using the registry
//! catalog.
//!
//! ## Selection
//!
//! Candidates are visited in the order the registry returns them and the
//! first structurally valid one wins. There is no health weighting and no
//! load distribution; every caller with the same catalog picks the same
//! instance.

use tracing::warn;

use crate::registration::method_token;
use crate::registry;
use crate::registry::META_HOST;
use crate::registry::META_METHODS;
use crate::registry::META_PROTOCOL;
use crate::registry::REQUIRED_META_KEYS;
use crate::registry::Registry;
use crate::registry::ServiceRegistration;

#[derive(Debug, Clone)]
pub enum Error {
    /// The name is not `<service>.<method>` with both parts non-empty.
    MalformedIdentifier(String),
    RegistryUnavailable(registry::Error),
    NoServicesRegistered,
    ServiceNotFound { service: String },
    NoMethodCandidate { service: String, method: String },
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MalformedIdentifier(name) => {
                write!(f, "Malformed identifier [{}], expected Service.Method", name)
            }
            Self::RegistryUnavailable(e) => write!(f, "Reading RPC services failed: {}", e),
            Self::NoServicesRegistered => write!(f, "No RPC services registered"),
            Self::ServiceNotFound { service } => {
                write!(f, "[{}] has no available instance", service)
            }
            Self::NoMethodCandidate { service, method } => {
                write!(f, "No instance of [{}] advertises method [{}]", service, method)
            }
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;

/// A parsed `service.method` identifier.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QualifiedName {
    pub service: String,
    pub method: String,
}

impl QualifiedName {
    /// Splits on `.`; anything other than two non-empty parts is malformed.
    pub fn parse(name: &str) -> Result<Self> {
        let malformed = || Error::MalformedIdentifier(name.to_string());
        let (service, method) = name.split_once('.').ok_or_else(malformed)?;
        if service.is_empty() || method.is_empty() || method.contains('.') {
            return Err(malformed());
        }
        Ok(Self {
            service: service.to_string(),
            method: method.to_string(),
        })
    }
}

impl std::fmt::Display for QualifiedName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.service, self.method)
    }
}

/// A resolved endpoint; used for one call and then dropped.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RpcAddress {
    pub host: String,
    pub port: u16,
    pub protocol: String,
    /// Registry identity of the chosen instance.
    pub agent_id: String,
}

impl RpcAddress {
    /// `host:port`, as dialed.
    pub fn authority(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Resolves `name` against the registry catalog.
pub async fn resolve(registry: &dyn Registry, name: &QualifiedName) -> Result<RpcAddress> {
    let services = registry.list_services().await.map_err(Error::RegistryUnavailable)?;
    select(&services, name)
}

/// Parses and resolves a `service.method` string.
pub async fn resolve_str(registry: &dyn Registry, name: &str) -> Result<RpcAddress> {
    let name = QualifiedName::parse(name)?;
    resolve(registry, &name).await
}

/// Applies the filtering and first-match rules to a catalog snapshot.
pub fn select(services: &[ServiceRegistration], name: &QualifiedName) -> Result<RpcAddress> {
    if services.is_empty() {
        return Err(Error::NoServicesRegistered);
    }

    let segment = format!("/{}/", name.service);
    let candidates: Vec<&ServiceRegistration> =
        services.iter().filter(|svc| svc.id.contains(&segment)).collect();
    if candidates.is_empty() {
        return Err(Error::ServiceNotFound {
            service: name.service.clone(),
        });
    }

    let token = method_token(&name.method);
    for candidate in candidates {
        if candidate.meta.len() < REQUIRED_META_KEYS {
            warn!(id = %candidate.id, "service metadata incomplete");
            continue;
        }
        if !candidate.meta_value(META_METHODS).contains(&token) {
            warn!(id = %candidate.id, method = %name.method, "service does not advertise method");
            continue;
        }
        let host = candidate.meta_value(META_HOST);
        let protocol = candidate.meta_value(META_PROTOCOL);
        if host.is_empty() || protocol.is_empty() {
            warn!(id = %candidate.id, method = %name.method, "service host or protocol missing");
            continue;
        }
        let Some((addr, port)) = split_host(host) else {
            warn!(id = %candidate.id, host = %host, "service host is not address:port");
            continue;
        };
        return Ok(RpcAddress {
            host: addr.to_string(),
            port,
            protocol: protocol.to_string(),
            agent_id: candidate.id.clone(),
        });
    }

    Err(Error::NoMethodCandidate {
        service: name.service.clone(),
        method: name.method.clone(),
    })
}

fn split_host(host: &str) -> Option<(&str, u16)> {
    let (addr, port) = host.rsplit_once(':')?;
    let port = port.parse().ok()?;
    (!addr.is_empty()).then_some((addr, port))
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use serde_json::json;

    use super::*;
    use crate::config::Config;
    use crate::registration;
    use crate::registry::MemoryRegistry;
    use crate::service::Service;

    fn config(listen_port: u16) -> Config {
        Config {
            check_port: 9001,
            rpc_port: 9000,
            listen_port,
            protocol: "tcp".into(),
            ..Config::default()
        }
    }

    fn calculator() -> Service {
        Service::new("Calculator").method("Add", |_| async move { Ok(json!(0)) })
    }

    fn echo() -> Service {
        Service::new("Echo").method("Echo", |args| async move { Ok(args) })
    }

    fn qn(s: &str) -> QualifiedName {
        QualifiedName::parse(s).unwrap()
    }

    #[test]
    fn test_parse_malformed() {
        for bad in ["", "Calculator", "Calculator.", ".Add", "a.b.c", "."] {
            assert!(
                matches!(QualifiedName::parse(bad), Err(Error::MalformedIdentifier(_))),
                "{:?} should be malformed",
                bad
            );
        }
        assert_eq!(qn("Calculator.Add").to_string(), "Calculator.Add");
    }

    #[test]
    fn test_empty_catalog() {
        assert!(matches!(select(&[], &qn("Calculator.Add")), Err(Error::NoServicesRegistered)));
    }

    #[test]
    fn test_other_services_only() {
        let reg = registration::build("e", &echo(), &config(9100), "10.0.0.1").unwrap();
        assert!(matches!(
            select(&[reg], &qn("Calculator.Add")),
            Err(Error::ServiceNotFound { .. })
        ));
    }

    #[test]
    fn test_method_not_advertised() {
        let reg = registration::build("c", &calculator(), &config(9100), "10.0.0.1").unwrap();
        assert!(matches!(
            select(&[reg], &qn("Calculator.Subtract")),
            Err(Error::NoMethodCandidate { .. })
        ));
    }

    #[test]
    fn test_first_valid_candidate_wins() {
        let mut broken =
            registration::build("c", &calculator(), &config(9100), "10.0.0.1").unwrap();
        broken.meta.remove(META_PROTOCOL);
        let mut blank_host =
            registration::build("c", &calculator(), &config(9101), "10.0.0.2").unwrap();
        blank_host.meta.insert(META_HOST.into(), String::new());
        let first = registration::build("c", &calculator(), &config(9102), "10.0.0.3").unwrap();
        let second = registration::build("c", &calculator(), &config(9103), "10.0.0.4").unwrap();

        let catalog = [broken, blank_host, first.clone(), second];
        let addr = select(&catalog, &qn("Calculator.Add")).unwrap();
        assert_eq!(addr.host, "10.0.0.3");
        assert_eq!(addr.port, 9102);
        assert_eq!(addr.protocol, "tcp");
        assert_eq!(addr.agent_id, first.id);
        assert_eq!(addr.authority(), "10.0.0.3:9102");
    }

    #[test]
    fn test_unparsable_host_is_skipped() {
        let mut reg = registration::build("c", &calculator(), &config(9100), "10.0.0.1").unwrap();
        reg.meta.insert(META_HOST.into(), "10.0.0.1".into());
        assert!(matches!(
            select(&[reg], &qn("Calculator.Add")),
            Err(Error::NoMethodCandidate { .. })
        ));
    }

    #[test]
    fn test_segment_match_is_exact() {
        let meta: BTreeMap<String, String> = [
            (META_HOST, "10.0.0.1:1"),
            (META_PROTOCOL, "tcp"),
            ("version", "1.0.0"),
            (META_METHODS, ",Add,"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        let reg = ServiceRegistration {
            id: "10.0.0.1/CalculatorV2/Add".into(),
            name: "10.0.0.1/CalculatorV2".into(),
            tags: vec![],
            address: "10.0.0.1".into(),
            port: 1,
            meta,
            check: None,
        };
        assert!(matches!(
            select(&[reg], &qn("Calculator.Add")),
            Err(Error::ServiceNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_resolve_through_registry() {
        let registry = MemoryRegistry::default();
        assert!(matches!(
            resolve_str(&registry, "Calculator.Add").await,
            Err(Error::NoServicesRegistered)
        ));

        let reg = registration::build("c", &calculator(), &config(9100), "10.0.0.1").unwrap();
        registry.register(&reg).await.unwrap();
        let addr = resolve_str(&registry, "Calculator.Add").await.unwrap();
        assert_eq!(addr.port, 9100);
    }
}
