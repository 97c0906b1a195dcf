//! # Registry Client
//!
//! A narrow, async interface over the external discovery registry.
//!
//! ## Philosophy
//!
//! - **Four operations**: the engine only needs `put`/`get` for configuration,
//!   `register` for advertisement and `list_services` for resolution. Health
//!   evaluation and deregistration stay inside the registry.
//! - **Order matters**: `list_services` returns entries in a stable order and
//!   the resolver honours it; implementations must not shuffle.

pub mod consul;
pub mod memory;

use std::collections::BTreeMap;

use serde::Deserialize;
use serde::Serialize;

pub use consul::ConsulRegistry;
pub use memory::MemoryRegistry;

/// Metadata key: `address:port` of the RPC listener.
pub const META_HOST: &str = "host";
/// Metadata key: transport protocol name.
pub const META_PROTOCOL: &str = "protocol";
/// Metadata key: registration format version.
pub const META_VERSION: &str = "version";
/// Metadata key: `,m1,m2,...,` method list.
pub const META_METHODS: &str = "methods";
/// Number of metadata keys every well-formed registration carries.
pub const REQUIRED_META_KEYS: usize = 4;

/// Registry errors.
#[derive(Debug, Clone)]
pub enum Error {
    /// The registry could not be reached or the query failed in transit.
    Unavailable(String),
    /// The requested key does not exist.
    KeyNotFound(String),
    /// The key exists but holds no bytes.
    EmptyValue(String),
    /// The registry answered but refused the operation.
    Rejected(String),
    /// The registry answered with a body we could not understand.
    Decode(String),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unavailable(msg) => write!(f, "Registry unavailable: {}", msg),
            Self::KeyNotFound(key) => write!(f, "Registry key [{}] not found", key),
            Self::EmptyValue(key) => write!(f, "Registry key [{}] is empty", key),
            Self::Rejected(msg) => write!(f, "Registry rejected request: {}", msg),
            Self::Decode(msg) => write!(f, "Registry response undecodable: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;

/// Health probe the registry runs against a registered instance.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthCheck {
    /// Probe URL, `http://<address>:<checkPort>/check`.
    pub http: String,
    pub timeout: String,
    pub interval: String,
    pub deregister_critical_service_after: String,
}

/// The advertised record of one service instance.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceRegistration {
    pub id: String,
    pub name: String,
    pub tags: Vec<String>,
    pub address: String,
    pub port: u16,
    pub meta: BTreeMap<String, String>,
    pub check: Option<HealthCheck>,
}

impl ServiceRegistration {
    /// Looks up a metadata value, treating absence as empty.
    pub fn meta_value(&self, key: &str) -> &str {
        self.meta.get(key).map(String::as_str).unwrap_or("")
    }
}

/// The discovery registry as seen by the engine.
///
/// This trait is designed to be object-safe (`Arc<dyn Registry>`).
#[async_trait::async_trait]
pub trait Registry: Send + Sync + 'static {
    /// Address of the registry, recorded in call monitor records.
    fn address(&self) -> &str;

    /// Stores raw bytes under `key`.
    async fn put(&self, key: &str, value: &[u8]) -> Result<()>;

    /// Reads the raw bytes under `key`.
    ///
    /// # invariants
    /// - Missing keys are `KeyNotFound`, present-but-empty keys `EmptyValue`;
    ///   `Ok` always carries at least one byte.
    async fn get(&self, key: &str) -> Result<Vec<u8>>;

    /// Submits a registration. Re-registering an id replaces the entry.
    async fn register(&self, registration: &ServiceRegistration) -> Result<()>;

    /// Lists every registered service instance, in a stable order.
    async fn list_services(&self) -> Result<Vec<ServiceRegistration>>;
}
