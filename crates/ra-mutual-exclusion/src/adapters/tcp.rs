//! TCP transport (requires "network" feature).
//!
//! # Wire Protocol
//!
//! One JSON document per line, over a long-lived connection per peer pair:
//!
//! ```text
//! → {"requester_address":"127.0.0.1","requester_port":50051,"requester_name":"b","logical_timestamp":7}
//! ← {"granted":true,"logical_timestamp":9}
//! ```
//!
//! A request that is deferred simply leaves its connection waiting for the
//! answer line; the server task is suspended, not spinning.

use crate::domain::{Answer, PeerIdentity, Request};
use crate::ports::{PeerClient, PeerConnector, PermissionApi, TransportError};
use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Default time allowed to open a connection.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

fn encode<T: serde::Serialize>(message: &T) -> Result<String, TransportError> {
    let mut line =
        serde_json::to_string(message).map_err(|e| TransportError::Codec(e.to_string()))?;
    line.push('\n');
    Ok(line)
}

fn decode<T: serde::de::DeserializeOwned>(line: &str) -> Result<T, TransportError> {
    serde_json::from_str(line.trim_end()).map_err(|e| TransportError::Codec(e.to_string()))
}

// ============================================================================
// Server
// ============================================================================

/// Serves `AskPermission` over TCP.
pub struct TcpPermissionServer<A: PermissionApi + 'static> {
    listener: TcpListener,
    api: Arc<A>,
}

impl<A: PermissionApi + 'static> TcpPermissionServer<A> {
    /// Bind to `addr` (e.g. "127.0.0.1:50050", port 0 for any).
    pub async fn bind(addr: &str, api: Arc<A>) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self::from_listener(listener, api))
    }

    /// Serve on an already bound listener.
    pub fn from_listener(listener: TcpListener, api: Arc<A>) -> Self {
        Self { listener, api }
    }

    /// Address the server is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections forever, one task per connection.
    pub async fn serve(self) -> Result<(), TransportError> {
        info!(address = %self.local_addr()?, "Started peer receiving requests");
        loop {
            let (stream, remote) = self.listener.accept().await?;
            debug!(remote = %remote, "Accepted connection");
            let api = Arc::clone(&self.api);
            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, api).await {
                    warn!(remote = %remote, error = %e, "Connection closed with error");
                }
            });
        }
    }
}

async fn handle_connection<A: PermissionApi>(
    stream: TcpStream,
    api: Arc<A>,
) -> Result<(), TransportError> {
    let (read, mut write) = stream.into_split();
    let mut lines = BufReader::new(read).lines();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let request: Request = decode(&line)?;
        let answer = api
            .ask_permission(request)
            .await
            .map_err(|e| TransportError::Remote(e.to_string()))?;
        write.write_all(encode(&answer)?.as_bytes()).await?;
        write.flush().await?;
    }
    Ok(())
}

// ============================================================================
// Client
// ============================================================================

struct Connection {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

/// Lazily connected TCP handle to one peer.
///
/// The connection is opened on first use and dropped after any failure, so
/// the next call reconnects.
#[derive(Clone)]
pub struct TcpPeerClient {
    endpoint: String,
    connect_timeout: Duration,
    connection: Arc<Mutex<Option<Connection>>>,
}

impl TcpPeerClient {
    /// Create a handle for `endpoint` ("host:port"). Does not connect.
    pub fn new(endpoint: String, connect_timeout: Duration) -> Self {
        Self {
            endpoint,
            connect_timeout,
            connection: Arc::new(Mutex::new(None)),
        }
    }

    /// Target endpoint.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn open(&self) -> Result<Connection, TransportError> {
        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(&self.endpoint))
            .await
            .map_err(|_| TransportError::Timeout(self.endpoint.clone()))?
            .map_err(|e| TransportError::Unreachable(format!("{}: {}", self.endpoint, e)))?;
        stream.set_nodelay(true)?;
        info!(endpoint = %self.endpoint, "Created TCP connection to peer");
        let (read, writer) = stream.into_split();
        Ok(Connection {
            reader: BufReader::new(read),
            writer,
        })
    }

    async fn exchange(
        &self,
        conn: &mut Connection,
        request: &Request,
    ) -> Result<Answer, TransportError> {
        conn.writer.write_all(encode(request)?.as_bytes()).await?;
        conn.writer.flush().await?;

        let mut line = String::new();
        if conn.reader.read_line(&mut line).await? == 0 {
            return Err(TransportError::ConnectionClosed(self.endpoint.clone()));
        }
        decode(&line)
    }
}

#[async_trait]
impl PeerClient for TcpPeerClient {
    async fn ask_permission(&self, request: Request) -> Result<Answer, TransportError> {
        let mut slot = self.connection.lock().await;
        let mut conn = match slot.take() {
            Some(conn) => conn,
            None => self.open().await?,
        };

        let result = self.exchange(&mut conn, &request).await;
        if result.is_ok() {
            *slot = Some(conn);
        }
        result
    }
}

/// Connector producing `TcpPeerClient` handles.
#[derive(Debug, Clone)]
pub struct TcpPeerConnector {
    connect_timeout: Duration,
}

impl TcpPeerConnector {
    /// Create a connector with the default connect timeout.
    pub fn new() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    /// Override the connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

impl Default for TcpPeerConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl PeerConnector for TcpPeerConnector {
    type Client = TcpPeerClient;

    fn connect(&self, peer: &PeerIdentity) -> TcpPeerClient {
        TcpPeerClient::new(peer.endpoint(), self.connect_timeout)
    }
}
