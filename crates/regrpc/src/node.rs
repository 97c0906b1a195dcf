//! # Node
//!
//! One process's view of a registry: its loaded `Config`, the local services
//! it serves and the client it calls others with.
//!
//! ## Lifecycle
//!
//! 1. `Node::connect` / `Node::with_registry` loads the config from the registry.
//! 2. `serve` binds the RPC and health listeners and spawns their loops.
//! 3. `add_registration` installs a service locally and advertises it. It
//!    starts serving first if that has not happened yet, so the registry never
//!    advertises an endpoint that refuses connections.

use std::net::Ipv6Addr;
use std::net::SocketAddr;
use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::net::TcpListener;
use tokio::sync::OnceCell;
use tokio::task::AbortHandle;
use tracing::error;
use tracing::info;
use wirerpc::Payload;

use crate::client;
use crate::client::Client;
use crate::config;
use crate::config::Bootstrap;
use crate::config::Config;
use crate::health;
use crate::registration;
use crate::registry;
use crate::registry::ConsulRegistry;
use crate::registry::Registry;
use crate::registry::ServiceRegistration;
use crate::server::Dispatcher;
use crate::server::Server;
use crate::service::Service;
use crate::transport;

#[derive(Debug)]
pub enum Error {
    Config(config::Error),
    Registration(registration::Error),
    Registry(registry::Error),
    UnsupportedProtocol(String),
    Bind { addr: SocketAddr, reason: String },
    /// A registry value was not the JSON document expected.
    Decode { key: String, details: String },
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(e) => write!(f, "{}", e),
            Self::Registration(e) => write!(f, "Registration failed: {}", e),
            Self::Registry(e) => write!(f, "{}", e),
            Self::UnsupportedProtocol(p) => write!(f, "Unsupported protocol: {}", p),
            Self::Bind { addr, reason } => write!(f, "Binding {} failed: {}", addr, reason),
            Self::Decode { key, details } => {
                write!(f, "Value of [{}] is not valid JSON: {}", key, details)
            }
        }
    }
}

impl std::error::Error for Error {}

impl From<config::Error> for Error {
    fn from(e: config::Error) -> Self {
        Self::Config(e)
    }
}

impl From<registration::Error> for Error {
    fn from(e: registration::Error) -> Self {
        Self::Registration(e)
    }
}

impl From<registry::Error> for Error {
    fn from(e: registry::Error) -> Self {
        Self::Registry(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Addresses the node's listeners are bound to.
#[derive(Debug)]
pub struct Listening {
    pub rpc_addr: SocketAddr,
    pub check_addr: SocketAddr,
    tasks: Vec<AbortHandle>,
}

pub struct Node {
    registry: Arc<dyn Registry>,
    config: Config,
    dispatcher: Arc<Dispatcher>,
    client: Client,
    listening: OnceCell<Listening>,
}

impl Node {
    /// Connects to the Consul agent named by `bootstrap` and loads the node config.
    pub async fn connect(bootstrap: &Bootstrap) -> Result<Self> {
        let mut consul = ConsulRegistry::new(&bootstrap.registry);
        if let Some(token) = &bootstrap.token {
            consul = consul.with_token(token);
        }
        Self::with_registry(Arc::new(consul), &bootstrap.node).await
    }

    /// Loads the config stored under `node` from any registry.
    pub async fn with_registry(registry: Arc<dyn Registry>, node: &str) -> Result<Self> {
        let config = Config::load(registry.as_ref(), node).await?;
        info!(node = %node, registry = %registry.address(), "node config loaded");
        Ok(Self::from_parts(registry, config))
    }

    /// Assembles a node from an already loaded config.
    pub fn from_parts(registry: Arc<dyn Registry>, config: Config) -> Self {
        let client = Client::from_config(registry.clone(), &config);
        Self {
            registry,
            config,
            dispatcher: Arc::new(Dispatcher::new()),
            client,
            listening: OnceCell::new(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn registry(&self) -> &Arc<dyn Registry> {
        &self.registry
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Binds both listeners and spawns their loops; later calls return the
    /// existing bindings.
    pub async fn serve(&self) -> Result<&Listening> {
        self.listening.get_or_try_init(|| self.bind_and_spawn()).await
    }

    /// Stops the listener loops. In-flight connections finish on their own.
    pub fn shutdown(&self) {
        if let Some(listening) = self.listening.get() {
            for task in &listening.tasks {
                task.abort();
            }
        }
    }

    async fn bind_and_spawn(&self) -> Result<Listening> {
        let protocol = &self.config.protocol;
        if !transport::is_supported(protocol) {
            return Err(Error::UnsupportedProtocol(protocol.clone()));
        }
        let (rpc, check) = if protocol == "tcp6" {
            (
                SocketAddr::from((Ipv6Addr::UNSPECIFIED, self.config.listen_port)),
                SocketAddr::from((Ipv6Addr::UNSPECIFIED, self.config.check_port)),
            )
        } else {
            (self.config.listen_addr(), self.config.check_addr())
        };

        let rpc_listener = bind(rpc).await?;
        let check_listener = bind(check).await?;
        let rpc_addr = local_addr(&rpc_listener, rpc)?;
        let check_addr = local_addr(&check_listener, check)?;

        let server = Server::new(self.dispatcher.clone());
        let rpc_task = tokio::spawn(server.serve(rpc_listener));
        let check_task = tokio::spawn(async move {
            if let Err(e) = health::serve(check_listener).await {
                error!(addr = %check_addr, error = %e, "health listener stopped");
            }
        });

        info!(rpc = %rpc_addr, check = %check_addr, "node listening");
        Ok(Listening {
            rpc_addr,
            check_addr,
            tasks: vec![rpc_task.abort_handle(), check_task.abort_handle()],
        })
    }

    /// Installs `service` locally and advertises it under `tag`.
    pub async fn add_registration(
        &self,
        tag: &str,
        service: Service,
    ) -> Result<ServiceRegistration> {
        let listening = self.serve().await?;
        let advertised = Config {
            listen_port: listening.rpc_addr.port(),
            check_port: listening.check_addr.port(),
            ..self.config.clone()
        };

        let address = registration::local_address(&self.config)?;
        let registration = registration::build(tag, &service, &advertised, &address)?;
        self.dispatcher.add(service);
        self.registry.register(&registration).await?;

        info!(
            id = %registration.id,
            tag = %tag,
            host = %registration.meta_value(registry::META_HOST),
            "service registered"
        );
        Ok(registration)
    }

    /// Raw bytes stored under `key`.
    pub async fn get_kv(&self, key: &str) -> Result<Vec<u8>> {
        Ok(self.registry.get(key).await?)
    }

    /// The JSON document stored under `key`, decoded into `T`.
    pub async fn read_json_config<T: DeserializeOwned>(&self, key: &str) -> Result<T> {
        let data = self.get_kv(key).await?;
        serde_json::from_slice(&data).map_err(|e| Error::Decode {
            key: key.to_string(),
            details: e.to_string(),
        })
    }

    pub async fn call(&self, name: &str, args: Payload) -> client::Result<Payload> {
        self.client.call(name, args).await
    }

    pub async fn call_as<A, R>(&self, name: &str, args: &A) -> client::Result<R>
    where
        A: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        self.client.call_as(name, args).await
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("registry", &self.registry.address())
            .field("node", &self.config.node)
            .field("services", &self.dispatcher.names())
            .field("listening", &self.listening.get())
            .finish()
    }
}

async fn bind(addr: SocketAddr) -> Result<TcpListener> {
    TcpListener::bind(addr).await.map_err(|e| Error::Bind {
        addr,
        reason: e.to_string(),
    })
}

fn local_addr(listener: &TcpListener, requested: SocketAddr) -> Result<SocketAddr> {
    listener.local_addr().map_err(|e| Error::Bind {
        addr: requested,
        reason: e.to_string(),
    })
}
