//! # Registration Builder
//!
//! Turns a local `Service` plus the node's `Config` into the record advertised
//! to the registry. Building is pure: submitting the record and starting the
//! listener it points at are separate steps owned by the caller.
//!
//! ## Invariants
//! - `meta["methods"]` is `,m1,m2,...,` so that `,<method>,` containment is an
//!   exact method match.
//! - A registration always advertises at least one method.
//! - Service and method names are non-empty and free of `,`, `.` and `/`, the
//!   separators of the method list, the qualified name and the instance id.

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::net::UdpSocket;

use crate::config::Config;
use crate::registry::HealthCheck;
use crate::registry::META_HOST;
use crate::registry::META_METHODS;
use crate::registry::META_PROTOCOL;
use crate::registry::META_VERSION;
use crate::registry::ServiceRegistration;
use crate::service::Service;

/// Registration format version advertised in `meta["version"]`.
pub const REGISTRATION_VERSION: &str = "1.0.0";

/// Delimiter of the advertised method list.
pub const METHOD_DELIMITER: char = ',';

/// Characters that may not appear in service or method names.
pub const RESERVED_NAME_CHARS: [char; 3] = [METHOD_DELIMITER, '.', '/'];

/// Path of the health probe on the check port.
pub const CHECK_PATH: &str = "/check";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    NoMethodsExposed { service: String },
    /// A service or method name is empty or contains a reserved character.
    InvalidName { kind: &'static str, name: String },
    AddressUnavailable(String),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoMethodsExposed { service } => {
                write!(f, "Service [{}] exposes no methods", service)
            }
            Self::InvalidName { kind, name } => write!(
                f,
                "Invalid {} name [{}]: names must be non-empty and free of ',', '.' and '/'",
                kind, name
            ),
            Self::AddressUnavailable(msg) => write!(f, "Local address unavailable: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;

/// The token a method name occupies inside `meta["methods"]`.
pub fn method_token(method: &str) -> String {
    format!("{d}{}{d}", method, d = METHOD_DELIMITER)
}

/// Joins method names into the delimiter-wrapped `meta["methods"]` value.
pub fn methods_meta<'a>(methods: impl IntoIterator<Item = &'a str>) -> String {
    let mut out = String::from(METHOD_DELIMITER);
    for method in methods {
        out.push_str(method);
        out.push(METHOD_DELIMITER);
    }
    out
}

fn check_name(kind: &'static str, name: &str) -> Result<()> {
    if name.is_empty() || name.contains(RESERVED_NAME_CHARS) {
        return Err(Error::InvalidName {
            kind,
            name: name.to_string(),
        });
    }
    Ok(())
}

/// Builds the registry record for `service` as published under `tag`.
pub fn build(
    tag: &str,
    service: &Service,
    config: &Config,
    address: &str,
) -> Result<ServiceRegistration> {
    check_name("service", service.name())?;
    let methods = service.method_names();
    if methods.is_empty() {
        return Err(Error::NoMethodsExposed {
            service: service.name().to_string(),
        });
    }
    for method in &methods {
        check_name("method", method)?;
    }

    let name = format!("{}/{}", address, service.name());
    let id = methods
        .iter()
        .fold(name.clone(), |id, method| format!("{}/{}", id, method));

    let mut meta = BTreeMap::new();
    meta.insert(META_HOST.to_string(), format!("{}:{}", address, config.listen_port));
    meta.insert(META_PROTOCOL.to_string(), config.protocol.clone());
    meta.insert(META_VERSION.to_string(), REGISTRATION_VERSION.to_string());
    meta.insert(META_METHODS.to_string(), methods_meta(methods.iter().copied()));

    let check = HealthCheck {
        http: format!("http://{}:{}{}", address, config.check_port, CHECK_PATH),
        timeout: config.timeout.clone(),
        interval: config.interval.clone(),
        deregister_critical_service_after: config.destroy_after.clone(),
    };

    Ok(ServiceRegistration {
        id,
        name,
        tags: vec![tag.to_string()],
        address: address.to_string(),
        port: config.rpc_port,
        meta,
        check: Some(check),
    })
}

/// The address this node advertises: the configured `Domain`, else the
/// address of the interface that routes outbound traffic.
pub fn local_address(config: &Config) -> Result<String> {
    if !config.domain.is_empty() {
        return Ok(config.domain.clone());
    }
    outbound_ip()
        .map(|ip| ip.to_string())
        .map_err(|e| Error::AddressUnavailable(e.to_string()))
}

fn outbound_ip() -> std::io::Result<IpAddr> {
    // Connecting a UDP socket only selects a route; nothing is sent.
    let socket = UdpSocket::bind("0.0.0.0:0")?;
    socket.connect("8.8.8.8:80")?;
    Ok(socket.local_addr()?.ip())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn config() -> Config {
        Config {
            check_port: 9001,
            rpc_port: 9000,
            listen_port: 9100,
            protocol: "tcp".into(),
            timeout: "3s".into(),
            interval: "5s".into(),
            destroy_after: "15s".into(),
            ..Config::default()
        }
    }

    fn calculator() -> Service {
        Service::new("Calculator")
            .method("Sub", |_| async move { Ok(json!(0)) })
            .method("Add", |_| async move { Ok(json!(0)) })
    }

    #[test]
    fn test_build_identity_and_meta() {
        let reg = build("calc", &calculator(), &config(), "10.0.0.5").expect("build failed");

        assert_eq!(reg.id, "10.0.0.5/Calculator/Add/Sub");
        assert_eq!(reg.name, "10.0.0.5/Calculator");
        assert_eq!(reg.tags, vec!["calc".to_string()]);
        assert_eq!(reg.port, 9000);
        assert_eq!(reg.meta_value(META_HOST), "10.0.0.5:9100");
        assert_eq!(reg.meta_value(META_PROTOCOL), "tcp");
        assert_eq!(reg.meta_value(META_VERSION), "1.0.0");
        assert_eq!(reg.meta_value(META_METHODS), ",Add,Sub,");
        assert_eq!(reg.meta.len(), crate::registry::REQUIRED_META_KEYS);

        let check = reg.check.expect("no health check");
        assert_eq!(check.http, "http://10.0.0.5:9001/check");
        assert_eq!(check.deregister_critical_service_after, "15s");
    }

    #[test]
    fn test_every_method_is_an_exact_token() {
        let svc = Service::new("Strings")
            .method("Get", |_| async move { Ok(json!(null)) })
            .method("GetAll", |_| async move { Ok(json!(null)) })
            .method("Set", |_| async move { Ok(json!(null)) });
        let reg = build("s", &svc, &config(), "h").unwrap();
        let methods = reg.meta_value(META_METHODS);

        for name in svc.method_names() {
            assert!(methods.contains(&method_token(name)), "{} missing", name);
        }
        assert!(!methods.contains(&method_token("All")));
        assert!(!methods.contains(&method_token("Ge")));
    }

    #[test]
    fn test_empty_service_rejected() {
        let err = build("x", &Service::new("Empty"), &config(), "h").unwrap_err();
        assert_eq!(err, Error::NoMethodsExposed { service: "Empty".into() });
    }

    #[test]
    fn test_reserved_method_names_rejected() {
        for bad in ["Get,Set", "Get.All", "Kv/Get", ""] {
            let svc = Service::new("Kv").method(bad, |_| async move { Ok(json!(null)) });
            let err = build("kv", &svc, &config(), "10.0.0.1").unwrap_err();
            assert_eq!(err, Error::InvalidName { kind: "method", name: bad.into() });
        }
    }

    #[test]
    fn test_reserved_service_names_rejected() {
        for bad in ["Key/Value", "Key.Value", "Key,Value", ""] {
            let svc = Service::new(bad).method("Get", |_| async move { Ok(json!(null)) });
            let err = build("kv", &svc, &config(), "10.0.0.1").unwrap_err();
            assert_eq!(err, Error::InvalidName { kind: "service", name: bad.into() });
        }
    }

    #[test]
    fn test_domain_override() {
        let config = Config { domain: "rpc.internal".into(), ..config() };
        assert_eq!(local_address(&config).unwrap(), "rpc.internal");
    }
}
