//! # Call Transport
//!
//! One connection, one request, one reply.
//!
//! ## Philosophy
//!
//! - **Frame-Oriented**: the transport moves `CallFrame`/`ReplyFrame` pairs and
//!   knows nothing about registries, services or monitoring.
//! - **Disposable**: a `Connection` is dialed for a single exchange and closed
//!   afterwards. There is no pooling and no reuse.
//! - **Unbounded read by default**: once the call is written, the reply is
//!   awaited without a deadline unless the caller passes one.

use std::io::ErrorKind;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::debug;
use wirerpc::CallFrame;
use wirerpc::Frame;
use wirerpc::ReplyFrame;

use crate::resolver::RpcAddress;

/// Fixed connect timeout for outbound calls.
pub const DIAL_TIMEOUT: Duration = Duration::from_secs(10);

/// Errors that occur at the network/transport layer.
#[derive(Debug, Clone)]
pub enum Error {
    /// The advertised protocol is not one this transport can dial.
    UnsupportedProtocol(String),
    /// The connect attempt did not complete within the dial timeout.
    DialTimeout { addr: String },
    /// The remote host actively refused the connection.
    ConnectionRefused { addr: String },
    /// The remote host could not be reached for another reason.
    Unreachable { addr: String, reason: String },
    /// The reply did not arrive within the configured read deadline.
    ReadTimeout,
    /// The frame exchange failed.
    Wire(wirerpc::Error),
    /// Shutting the connection down failed.
    Close(String),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnsupportedProtocol(p) => write!(f, "Unsupported protocol: {}", p),
            Self::DialTimeout { addr } => write!(f, "Dial {} timed out", addr),
            Self::ConnectionRefused { addr } => write!(f, "Connection to {} refused", addr),
            Self::Unreachable { addr, reason } => write!(f, "Dial {} failed: {}", addr, reason),
            Self::ReadTimeout => write!(f, "Reply timed out"),
            Self::Wire(e) => write!(f, "Wire error: {}", e),
            Self::Close(msg) => write!(f, "Close failed: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

impl From<wirerpc::Error> for Error {
    fn from(e: wirerpc::Error) -> Self {
        Self::Wire(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Whether `protocol` names a transport this crate can dial and listen on.
pub fn is_supported(protocol: &str) -> bool {
    matches!(protocol, "tcp" | "tcp4" | "tcp6")
}

/// A dialed connection to a resolved endpoint.
#[derive(Debug)]
pub struct Connection {
    stream: TcpStream,
}

impl Connection {
    /// Dials `addr` using its advertised protocol.
    pub async fn dial(addr: &RpcAddress, timeout: Duration) -> Result<Self> {
        if !is_supported(&addr.protocol) {
            return Err(Error::UnsupportedProtocol(addr.protocol.clone()));
        }

        let authority = addr.authority();
        let stream = match tokio::time::timeout(timeout, TcpStream::connect(&authority)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return Err(dial_error(authority, e)),
            Err(_) => return Err(Error::DialTimeout { addr: authority }),
        };
        // Latency matters more than batching for a single small frame.
        if let Err(e) = stream.set_nodelay(true) {
            debug!(addr = %authority, error = %e, "TCP_NODELAY not set");
        }

        Ok(Self { stream })
    }

    /// Writes `call` and waits for the matching reply.
    pub async fn exchange(
        &mut self,
        call: CallFrame,
        read_timeout: Option<Duration>,
    ) -> Result<ReplyFrame> {
        let seq = call.seq;
        wirerpc::write_frame(&mut self.stream, &Frame::Call(call)).await?;

        let read = wirerpc::read_frame(&mut self.stream);
        let frame = match read_timeout {
            Some(deadline) => tokio::time::timeout(deadline, read)
                .await
                .map_err(|_| Error::ReadTimeout)??,
            None => read.await?,
        };
        Ok(frame.into_reply(seq)?)
    }

    /// Shuts the connection down.
    pub async fn close(mut self) -> Result<()> {
        self.stream
            .shutdown()
            .await
            .map_err(|e| Error::Close(e.to_string()))
    }
}

fn dial_error(addr: String, e: std::io::Error) -> Error {
    match e.kind() {
        ErrorKind::ConnectionRefused => Error::ConnectionRefused { addr },
        ErrorKind::TimedOut => Error::DialTimeout { addr },
        _ => Error::Unreachable { addr, reason: e.to_string() },
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tokio::net::TcpListener;

    use super::*;

    fn address(port: u16, protocol: &str) -> RpcAddress {
        RpcAddress {
            host: "127.0.0.1".into(),
            port,
            protocol: protocol.into(),
            agent_id: "test".into(),
        }
    }

    #[tokio::test]
    async fn test_unsupported_protocol() {
        let err = Connection::dial(&address(1, "udp"), DIAL_TIMEOUT).await.unwrap_err();
        assert!(matches!(err, Error::UnsupportedProtocol(_)));
    }

    #[tokio::test]
    async fn test_connection_refused() {
        // Bind then drop to obtain a port nobody listens on.
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };
        let err = Connection::dial(&address(port, "tcp"), DIAL_TIMEOUT).await.unwrap_err();
        assert!(matches!(err, Error::ConnectionRefused { .. }), "got {:?}", err);
    }

    #[tokio::test]
    async fn test_exchange_and_read_timeout() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        tokio::spawn(async move {
            // First connection: answer. Second: read the call and stall.
            let (mut s, _) = listener.accept().await.unwrap();
            let call = wirerpc::read_frame(&mut s).await.unwrap().into_call().unwrap();
            let reply = ReplyFrame::ok(call.seq, call.args);
            wirerpc::write_frame(&mut s, &reply.into()).await.unwrap();

            let (mut s, _) = listener.accept().await.unwrap();
            let _ = wirerpc::read_frame(&mut s).await;
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let mut conn = Connection::dial(&address(port, "tcp"), DIAL_TIMEOUT).await.unwrap();
        let reply = conn
            .exchange(CallFrame::new(1, "Echo", "Echo", json!("hi")), None)
            .await
            .unwrap();
        assert_eq!(reply.status, Ok(json!("hi")));
        conn.close().await.unwrap();

        let mut conn = Connection::dial(&address(port, "tcp"), DIAL_TIMEOUT).await.unwrap();
        let err = conn
            .exchange(
                CallFrame::new(1, "Echo", "Echo", json!("hi")),
                Some(Duration::from_millis(50)),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ReadTimeout));
    }
}
