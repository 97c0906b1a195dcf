//! # In-memory registry
//!
//! A registry living inside the process. Useful for tests and for wiring a
//! caller and its services together without an external discovery agent.

use std::sync::Arc;
use std::sync::Mutex;

use dashmap::DashMap;

use super::Error;
use super::Registry;
use super::Result;
use super::ServiceRegistration;

/// Key-value store plus an insertion-ordered service catalog.
#[derive(Clone, Debug)]
pub struct MemoryRegistry {
    address: String,
    kv: Arc<DashMap<String, Vec<u8>>>,
    catalog: Arc<Mutex<Vec<ServiceRegistration>>>,
}

impl MemoryRegistry {
    /// Creates an empty registry that reports `address` as its host.
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            kv: Arc::new(DashMap::new()),
            catalog: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn catalog(&self) -> Result<std::sync::MutexGuard<'_, Vec<ServiceRegistration>>> {
        self.catalog
            .lock()
            .map_err(|_| Error::Unavailable("catalog lock poisoned".into()))
    }
}

impl Default for MemoryRegistry {
    fn default() -> Self {
        Self::new("memory")
    }
}

#[async_trait::async_trait]
impl Registry for MemoryRegistry {
    fn address(&self) -> &str {
        &self.address
    }

    async fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        self.kv.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        let value = self
            .kv
            .get(key)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| Error::KeyNotFound(key.to_string()))?;
        if value.is_empty() {
            return Err(Error::EmptyValue(key.to_string()));
        }
        Ok(value)
    }

    async fn register(&self, registration: &ServiceRegistration) -> Result<()> {
        let mut catalog = self.catalog()?;
        match catalog.iter_mut().find(|entry| entry.id == registration.id) {
            Some(existing) => *existing = registration.clone(),
            None => catalog.push(registration.clone()),
        }
        Ok(())
    }

    async fn list_services(&self) -> Result<Vec<ServiceRegistration>> {
        Ok(self.catalog()?.clone())
    }
}
