//! # RPC Server
//!
//! Accepts connections on the RPC listener and routes each incoming call to
//! the matching local `Service` by type and method name.
//!
//! ## Invariants
//! - Each accepted connection is served by its own task: a stalled or
//!   panicking handler never blocks the accept loop or other connections.
//! - A call that cannot be dispatched still gets a reply carrying the error,
//!   provided its sequence number can be recovered.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tokio::net::TcpStream;
use tracing::debug;
use tracing::error;
use tracing::warn;
use wirerpc::Frame;
use wirerpc::Payload;
use wirerpc::ReplyFrame;

use crate::service;
use crate::service::Service;

/// Pause after a failed `accept` so a persistent error does not spin.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    ServiceNotFound(String),
    Method(service::Error),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ServiceNotFound(name) => write!(f, "Service {} not found", name),
            Self::Method(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for Error {}

impl From<service::Error> for Error {
    fn from(e: service::Error) -> Self {
        Self::Method(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// The local services reachable through the RPC listener.
#[derive(Debug, Default)]
pub struct Dispatcher {
    services: DashMap<String, Arc<Service>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs `service`, replacing any service of the same name.
    pub fn add(&self, service: Service) -> Arc<Service> {
        let service = Arc::new(service);
        self.services.insert(service.name().to_string(), service.clone());
        service
    }

    pub fn get(&self, name: &str) -> Option<Arc<Service>> {
        self.services.get(name).map(|entry| entry.value().clone())
    }

    /// Names of installed services, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .services
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        names.sort();
        names
    }

    pub async fn dispatch(&self, service: &str, method: &str, args: Payload) -> Result<Payload> {
        // Clone out of the map so no shard lock is held across the handler.
        let target = self
            .get(service)
            .ok_or_else(|| Error::ServiceNotFound(service.to_string()))?;
        Ok(target.invoke(method, args).await?)
    }
}

/// Serves calls from a listener until the task is dropped.
#[derive(Debug, Clone)]
pub struct Server {
    dispatcher: Arc<Dispatcher>,
}

impl Server {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self { dispatcher }
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// Runs the accept loop. Accept failures are logged and retried.
    pub async fn serve(self, listener: TcpListener) {
        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    let dispatcher = self.dispatcher.clone();
                    tokio::spawn(async move {
                        handle_connection(&dispatcher, stream, peer).await;
                    });
                }
                Err(e) => {
                    error!(error = %e, "accepting rpc connection failed");
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                }
            }
        }
    }
}

async fn handle_connection(dispatcher: &Dispatcher, mut stream: TcpStream, peer: SocketAddr) {
    let body = match wirerpc::read_body(&mut stream).await {
        Ok(body) => body,
        Err(e) => {
            warn!(%peer, error = %e, "reading rpc request failed");
            return;
        }
    };

    let reply = match wirerpc::decode_body(&body).and_then(Frame::into_call) {
        Ok(call) => {
            debug!(%peer, call = %call.qualified_name(), seq = call.seq, "rpc request");
            match dispatcher.dispatch(&call.service, &call.method, call.args).await {
                Ok(reply) => ReplyFrame::ok(call.seq, reply),
                Err(e) => {
                    warn!(
                        %peer,
                        service = %call.service,
                        method = %call.method,
                        error = %e,
                        "rpc dispatch failed"
                    );
                    ReplyFrame::err(call.seq, e.to_string())
                }
            }
        }
        Err(e) => {
            warn!(%peer, error = %e, "decoding rpc request failed");
            match wirerpc::decode_seq(&body) {
                Ok(seq) => ReplyFrame::err(seq, format!("bad request: {}", e)),
                Err(_) => return,
            }
        }
    };

    if let Err(e) = wirerpc::write_frame(&mut stream, &Frame::Reply(reply)).await {
        warn!(%peer, error = %e, "writing rpc reply failed");
        return;
    }
    let _ = stream.shutdown().await;
}
