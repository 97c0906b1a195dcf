//! # Consul registry
//!
//! The registry operations mapped onto the Consul agent HTTP API:
//!
//! | operation       | request                              |
//! |-----------------|--------------------------------------|
//! | `get`           | `GET  /v1/kv/<key>?raw`              |
//! | `put`           | `PUT  /v1/kv/<key>`                  |
//! | `register`      | `PUT  /v1/agent/service/register`    |
//! | `list_services` | `GET  /v1/agent/services`            |

use std::collections::BTreeMap;

use reqwest::Client as HttpClient;
use reqwest::StatusCode;
use reqwest::Url;
use serde::Deserialize;
use serde::Serialize;
use tracing::debug;

use super::Error;
use super::Registry;
use super::Result;
use super::ServiceRegistration;

/// Registry backed by a Consul agent.
#[derive(Clone, Debug)]
pub struct ConsulRegistry {
    address: String,
    base_url: String,
    token: Option<String>,
    http: HttpClient,
}

impl ConsulRegistry {
    /// Creates a client for the agent at `address` (`host:port` or a URL).
    pub fn new(address: impl Into<String>) -> Self {
        let address = address.into();
        let base_url = if address.starts_with("http://") || address.starts_with("https://") {
            address.trim_end_matches('/').to_string()
        } else {
            format!("http://{}", address.trim_end_matches('/'))
        };
        Self {
            address,
            base_url,
            token: None,
            http: HttpClient::new(),
        }
    }

    /// Sends `X-Consul-Token` with every request.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v1{}", self.base_url, path)
    }

    /// `/v1/kv/<key>` with every segment of `key` percent-encoded.
    fn kv_url(&self, key: &str) -> Result<Url> {
        let mut url = Url::parse(&self.url("/kv"))
            .map_err(|e| Error::Unavailable(format!("bad agent address {}: {}", self.address, e)))?;
        url.path_segments_mut()
            .map_err(|_| Error::Unavailable(format!("bad agent address {}", self.address)))?
            .extend(key.split('/'));
        Ok(url)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.header("X-Consul-Token", token),
            None => request,
        }
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response> {
        self.authorize(request)
            .send()
            .await
            .map_err(|e| Error::Unavailable(e.to_string()))
    }
}

async fn reject(op: &str, response: reqwest::Response) -> Error {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    Error::Rejected(format!("{} returned {}: {}", op, status, body.trim()))
}

#[async_trait::async_trait]
impl Registry for ConsulRegistry {
    fn address(&self) -> &str {
        &self.address
    }

    async fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        let request = self.http.put(self.kv_url(key)?).body(value.to_vec());
        let response = self.send(request).await?;
        if !response.status().is_success() {
            return Err(reject("kv put", response).await);
        }
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        let mut url = self.kv_url(key)?;
        url.set_query(Some("raw"));
        let request = self.http.get(url);
        let response = self.send(request).await?;
        match response.status() {
            StatusCode::NOT_FOUND => return Err(Error::KeyNotFound(key.to_string())),
            status if !status.is_success() => return Err(reject("kv get", response).await),
            _ => {}
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|e| Error::Unavailable(e.to_string()))?;
        if bytes.is_empty() {
            return Err(Error::EmptyValue(key.to_string()));
        }
        Ok(bytes.to_vec())
    }

    async fn register(&self, registration: &ServiceRegistration) -> Result<()> {
        debug!(id = %registration.id, "registering service with consul");
        let body = AgentServiceRegistration::from(registration);
        let request = self.http.put(self.url("/agent/service/register")).json(&body);
        let response = self.send(request).await?;
        if !response.status().is_success() {
            return Err(reject("service register", response).await);
        }
        Ok(())
    }

    async fn list_services(&self) -> Result<Vec<ServiceRegistration>> {
        let request = self.http.get(self.url("/agent/services"));
        let response = self.send(request).await?;
        if !response.status().is_success() {
            return Err(reject("agent services", response).await);
        }
        // BTreeMap keeps the catalog ordered by service id.
        let services: BTreeMap<String, AgentService> = response
            .json()
            .await
            .map_err(|e| Error::Decode(e.to_string()))?;
        Ok(services.into_values().map(ServiceRegistration::from).collect())
    }
}

// Wire shapes of the Consul agent API.

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct AgentServiceRegistration<'a> {
    #[serde(rename = "ID")]
    id: &'a str,
    name: &'a str,
    tags: &'a [String],
    address: &'a str,
    port: u16,
    meta: &'a BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    check: Option<AgentServiceCheck<'a>>,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct AgentServiceCheck<'a> {
    #[serde(rename = "HTTP")]
    http: &'a str,
    timeout: &'a str,
    interval: &'a str,
    deregister_critical_service_after: &'a str,
}

impl<'a> From<&'a ServiceRegistration> for AgentServiceRegistration<'a> {
    fn from(reg: &'a ServiceRegistration) -> Self {
        Self {
            id: &reg.id,
            name: &reg.name,
            tags: &reg.tags,
            address: &reg.address,
            port: reg.port,
            meta: &reg.meta,
            check: reg.check.as_ref().map(|check| AgentServiceCheck {
                http: &check.http,
                timeout: &check.timeout,
                interval: &check.interval,
                deregister_critical_service_after: &check.deregister_critical_service_after,
            }),
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AgentService {
    #[serde(rename = "ID")]
    id: String,
    service: String,
    #[serde(default)]
    tags: Option<Vec<String>>,
    #[serde(default)]
    meta: Option<BTreeMap<String, String>>,
    #[serde(default)]
    port: u16,
    #[serde(default)]
    address: String,
}

impl From<AgentService> for ServiceRegistration {
    fn from(svc: AgentService) -> Self {
        Self {
            id: svc.id,
            name: svc.service,
            tags: svc.tags.unwrap_or_default(),
            address: svc.address,
            port: svc.port,
            meta: svc.meta.unwrap_or_default(),
            // The agent listing does not echo check definitions.
            check: None,
        }
    }
}
