//! # RPC Client
//!
//! Resolves `Service.Method` through the registry, dials the chosen instance,
//! performs one exchange and closes the connection. Every call, successful or
//! not, goes through the `Monitor`.
//!
//! ## Invariants
//! - A failed call reports its own error even if closing also failed; the
//!   close failure is kept on the monitor record.
//! - A successful call whose close fails is reported as failed.

use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::error;
use wirerpc::CallFrame;
use wirerpc::Payload;

use crate::config::Config;
use crate::monitor::InFlight;
use crate::monitor::Monitor;
use crate::monitor::MonitorRecord;
use crate::registry::Registry;
use crate::resolver;
use crate::resolver::QualifiedName;
use crate::slowlog::SlowLog;
use crate::transport;
use crate::transport::Connection;
use crate::transport::DIAL_TIMEOUT;

#[derive(Debug, Clone)]
pub enum Error {
    Resolve(resolver::Error),
    Dial { agent_id: String, host: String, source: transport::Error },
    Exchange { agent_id: String, host: String, source: transport::Error },
    /// The remote method ran and returned an error.
    RemoteCallFailed { agent_id: String, host: String, message: String },
    /// The call succeeded but the connection could not be closed.
    CallCloseFailed { agent_id: String, host: String, source: transport::Error },
    /// Arguments or reply did not convert to/from the requested types.
    Encode(wirerpc::Error),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Resolve(e) => write!(f, "{}", e),
            Self::Dial { agent_id, host, source } => {
                write!(f, "[{}][{}] connect failed: {}", agent_id, host, source)
            }
            Self::Exchange { agent_id, host, source } => {
                write!(f, "[{}][{}] call failed: {}", agent_id, host, source)
            }
            Self::RemoteCallFailed { agent_id, host, message } => {
                write!(f, "[{}][{}] remote error: {}", agent_id, host, message)
            }
            Self::CallCloseFailed { agent_id, host, source } => {
                write!(f, "[{}][{}] close failed: {}", agent_id, host, source)
            }
            Self::Encode(e) => write!(f, "Payload conversion failed: {}", e),
        }
    }
}

impl std::error::Error for Error {}

impl From<resolver::Error> for Error {
    fn from(e: resolver::Error) -> Self {
        Self::Resolve(e)
    }
}

impl From<wirerpc::Error> for Error {
    fn from(e: wirerpc::Error) -> Self {
        Self::Encode(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Outbound call surface; cheap to clone.
#[derive(Clone)]
pub struct Client {
    registry: Arc<dyn Registry>,
    monitor: Arc<Monitor>,
    dial_timeout: Duration,
    read_timeout: Option<Duration>,
    seq_gen: Arc<AtomicU64>,
}

impl Client {
    /// A client with no slow-call log and no read deadline.
    pub fn new(registry: Arc<dyn Registry>) -> Self {
        let monitor = Monitor::new(registry.address());
        Self {
            registry,
            monitor: Arc::new(monitor),
            dial_timeout: DIAL_TIMEOUT,
            read_timeout: None,
            seq_gen: Arc::new(AtomicU64::new(1)),
        }
    }

    /// A client configured from a node's settings, sharing the process-wide
    /// slow-call log when a threshold is set.
    pub fn from_config(registry: Arc<dyn Registry>, config: &Config) -> Self {
        let mut monitor = Monitor::new(registry.address());
        if let Some(threshold) = config.slow_threshold() {
            monitor = monitor.with_slow_log(threshold, SlowLog::shared(&config.slow_log_path));
        }
        Self::new(registry)
            .with_monitor(monitor)
            .with_read_timeout(config.call_timeout())
    }

    pub fn with_monitor(mut self, monitor: Monitor) -> Self {
        self.monitor = Arc::new(monitor);
        self
    }

    pub fn with_read_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn monitor(&self) -> &Monitor {
        &self.monitor
    }

    /// Calls `name` (`Service.Method`) with raw arguments.
    pub async fn call(&self, name: &str, args: Payload) -> Result<Payload> {
        self.call_monitored(name, args).await.0
    }

    /// Calls `name`, converting arguments and reply through serde.
    pub async fn call_as<A, R>(&self, name: &str, args: &A) -> Result<R>
    where
        A: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let args = wirerpc::to_payload(args)?;
        let reply = self.call(name, args).await?;
        Ok(wirerpc::from_payload(reply)?)
    }

    /// Calls `name` and also returns the record the monitor emitted for it.
    pub async fn call_monitored(
        &self,
        name: &str,
        args: Payload,
    ) -> (Result<Payload>, MonitorRecord) {
        let parsed = QualifiedName::parse(name);
        let mut call = match &parsed {
            Ok(qn) => self.monitor.start(&qn.service, &qn.method),
            Err(_) => self.monitor.start(name, ""),
        };

        let (result, close_error) = match parsed {
            Ok(qn) => self.invoke(&qn, &args, &mut call).await,
            Err(e) => (Err(Error::Resolve(e)), None),
        };

        let error = result.as_ref().err().map(ToString::to_string);
        let record = self
            .monitor
            .finish(call, error, close_error, &args, result.as_ref().ok());
        (result, record)
    }

    async fn invoke(
        &self,
        name: &QualifiedName,
        args: &Payload,
        call: &mut InFlight,
    ) -> (Result<Payload>, Option<String>) {
        let addr = match resolver::resolve(self.registry.as_ref(), name).await {
            Ok(addr) => addr,
            Err(e) => return (Err(e.into()), None),
        };
        call.set_address(&addr);

        let agent_id = addr.agent_id.clone();
        let host = addr.authority();

        let mut conn = match Connection::dial(&addr, self.dial_timeout).await {
            Ok(conn) => conn,
            Err(source) => {
                error!(
                    id = %agent_id,
                    host = %host,
                    call = %name,
                    error = %source,
                    "rpc connect failed"
                );
                return (Err(Error::Dial { agent_id, host, source }), None);
            }
        };

        let seq = self.seq_gen.fetch_add(1, Ordering::Relaxed);
        let frame = CallFrame::new(seq, &name.service, &name.method, args.clone());
        let exchanged = conn.exchange(frame, self.read_timeout).await;
        let closed = conn.close().await;

        let result = match exchanged {
            Ok(reply) => reply.status.map_err(|message| Error::RemoteCallFailed {
                agent_id: agent_id.clone(),
                host: host.clone(),
                message,
            }),
            Err(source) => Err(Error::Exchange {
                agent_id: agent_id.clone(),
                host: host.clone(),
                source,
            }),
        };

        let (result, close_error) = settle(result, closed, &agent_id, &host);
        if let Err(e) = &result {
            error!(
                id = %agent_id,
                host = %host,
                call = %name,
                error = %e,
                close_error = close_error.as_deref().unwrap_or(""),
                "rpc call failed"
            );
        }
        (result, close_error)
    }
}

/// Folds the close outcome into the call outcome. A call error wins and the
/// close error is handed back for the monitor record; a close error after a
/// successful call fails the call.
fn settle(
    result: Result<Payload>,
    closed: transport::Result<()>,
    agent_id: &str,
    host: &str,
) -> (Result<Payload>, Option<String>) {
    match (result, closed) {
        (result, Ok(())) => (result, None),
        (Err(e), Err(close)) => (Err(e), Some(close.to_string())),
        (Ok(_), Err(source)) => {
            let error = Error::CallCloseFailed {
                agent_id: agent_id.to_string(),
                host: host.to_string(),
                source,
            };
            (Err(error), None)
        }
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("registry", &self.registry.address())
            .field("dial_timeout", &self.dial_timeout)
            .field("read_timeout", &self.read_timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::registry::MemoryRegistry;

    #[tokio::test]
    async fn test_malformed_name_is_monitored() {
        let client = Client::new(Arc::new(MemoryRegistry::default()));
        let (result, record) = client.call_monitored("NoDot", json!(null)).await;

        assert!(matches!(
            result,
            Err(Error::Resolve(resolver::Error::MalformedIdentifier(_)))
        ));
        assert!(record.is_error());
        assert_eq!(record.registry_host, "memory");
    }

    #[tokio::test]
    async fn test_empty_registry() {
        let client = Client::new(Arc::new(MemoryRegistry::default()));
        let err = client.call("Calculator.Add", json!([1, 2])).await.unwrap_err();
        assert!(matches!(err, Error::Resolve(resolver::Error::NoServicesRegistered)));
    }

    fn exchange_failed() -> Error {
        Error::Exchange {
            agent_id: "a".into(),
            host: "h:1".into(),
            source: transport::Error::ReadTimeout,
        }
    }

    fn close_failed() -> transport::Result<()> {
        Err(transport::Error::Close("reset".into()))
    }

    #[test]
    fn test_clean_close_keeps_call_outcome() {
        let (result, close) = settle(Ok(json!(7)), Ok(()), "a", "h:1");
        assert_eq!(result.unwrap(), json!(7));
        assert_eq!(close, None);

        let (result, close) = settle(Err(exchange_failed()), Ok(()), "a", "h:1");
        assert!(matches!(result, Err(Error::Exchange { .. })));
        assert_eq!(close, None);
    }

    #[test]
    fn test_close_failure_fails_successful_call() {
        let (result, close) = settle(Ok(json!(7)), close_failed(), "a", "h:1");
        match result {
            Err(Error::CallCloseFailed { agent_id, host, source }) => {
                assert_eq!(agent_id, "a");
                assert_eq!(host, "h:1");
                assert!(matches!(source, transport::Error::Close(_)));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(close, None);
    }

    #[test]
    fn test_call_error_wins_over_close_error() {
        let (result, close) = settle(Err(exchange_failed()), close_failed(), "a", "h:1");
        assert!(matches!(
            result,
            Err(Error::Exchange { source: transport::Error::ReadTimeout, .. })
        ));
        assert_eq!(close.as_deref(), Some("Close failed: reset"));

        let monitor = Monitor::new("memory");
        let error = result.as_ref().err().map(ToString::to_string);
        let call = monitor.start("Echo", "Echo");
        let record = monitor.finish(call, error, close, &json!(null), None);
        assert_eq!(record.error.as_deref(), Some("[a][h:1] call failed: Reply timed out"));
        assert_eq!(record.close_error.as_deref(), Some("Close failed: reset"));
    }
}
