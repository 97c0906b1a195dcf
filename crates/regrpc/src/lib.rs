//! # regrpc
//!
//! Registry-backed RPC: services advertise themselves in a discovery registry
//! (Consul), callers resolve `Service.Method` names against it and make one
//! request per connection over `wirerpc` frames.
//!
//! ## Architecture
//!
//! - `registry`: the four registry operations, with Consul and in-memory backends.
//! - `config`: per-node settings stored in the registry.
//! - `service`, `registration`: what a node exposes and how it is advertised.
//! - `resolver`, `transport`, `client`: the outbound call path.
//! - `monitor`, `slowlog`, `rotate`: per-call accounting and the slow-call log.
//! - `server`, `health`: the inbound listeners.
//! - `node`, `manager`: wiring for a process with one or more registries.

pub mod client;
pub mod config;
pub mod health;
pub mod logging;
pub mod manager;
pub mod monitor;
pub mod node;
pub mod registration;
pub mod registry;
pub mod resolver;
pub mod rotate;
pub mod server;
pub mod service;
pub mod slowlog;
pub mod transport;

pub use client::Client;
pub use config::Bootstrap;
pub use config::Config;
pub use config::DEFAULT_REGISTRY_HOST;
pub use manager::SessionManager;
pub use monitor::Monitor;
pub use monitor::MonitorRecord;
pub use node::Node;
pub use registry::ConsulRegistry;
pub use registry::MemoryRegistry;
pub use registry::Registry;
pub use registry::ServiceRegistration;
pub use resolver::QualifiedName;
pub use resolver::RpcAddress;
pub use server::Dispatcher;
pub use server::Server;
pub use service::Service;
pub use slowlog::SlowLog;
pub use wirerpc::Payload;
