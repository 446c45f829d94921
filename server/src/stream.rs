//! Streaming endpoint for exec, attach, and port-forward sessions.
//!
//! Interactive operations use a two-phase protocol: a request handler
//! registers a session and hands the caller a URL, then the client connects
//! to the URL for bidirectional I/O. This endpoint supplies the network
//! binding, optional transport security, and the lookup glue back into the
//! registry; session mechanics are delegated to the container's attach
//! socket.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr, UdpSocket};
use std::path::PathBuf;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, UnixStream};
use tokio::sync::RwLock;
use tokio_rustls::TlsAcceptor;

use berth_core::error::{BerthError, Result};
use berth_core::signal::CloseNotifier;
use berth_runtime::registry::Registry;

use crate::cert_cache::{load_certs, load_key, CertConfigCache};

const UPGRADE_RESPONSE: &str =
    "HTTP/1.1 101 Switching Protocols\r\nConnection: Upgrade\r\nUpgrade: SPDY/3.1\r\n\r\n";

/// Type of streaming session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionKind {
    Exec,
    Attach,
    PortForward,
}

impl SessionKind {
    fn as_str(&self) -> &'static str {
        match self {
            SessionKind::Exec => "exec",
            SessionKind::Attach => "attach",
            SessionKind::PortForward => "portforward",
        }
    }
}

/// A pending streaming session registered by a request handler.
#[derive(Debug, Clone)]
pub struct StreamSession {
    /// Type of streaming operation.
    pub kind: SessionKind,
    /// Target container (empty for port-forward).
    pub container_id: String,
    /// Target container's sandbox.
    pub sandbox_id: String,
    /// Command to execute (exec only).
    pub cmd: Vec<String>,
    /// Whether to allocate a TTY.
    pub tty: bool,
    /// Whether stdin is requested.
    pub stdin: bool,
    /// Ports to forward (port-forward only).
    pub ports: Vec<i32>,
    /// Attach socket the session bridges to.
    pub attach_socket: PathBuf,
}

/// Transport security for the endpoint.
pub struct StreamTls {
    /// Per-connection config source.
    pub cache: Arc<CertConfigCache>,
    /// Certificate validated at construction.
    pub cert_path: PathBuf,
    /// Key validated at construction.
    pub key_path: PathBuf,
}

/// Streaming endpoint serving registered sessions over a long-lived listener.
pub struct StreamEndpoint {
    addr: SocketAddr,
    sessions: Arc<RwLock<HashMap<String, StreamSession>>>,
    registry: Arc<Registry>,
    tls: Option<Arc<CertConfigCache>>,
    close: CloseNotifier,
}

impl StreamEndpoint {
    /// Create an endpoint bound to `addr` once started.
    ///
    /// With TLS enabled, an initial certificate+key pair must load here even
    /// though connections fetch their config from the cache; the transport
    /// requires some certificate to be statically present, and this one is
    /// never served after the first hot-path load.
    pub fn new(
        addr: SocketAddr,
        registry: Arc<Registry>,
        tls: Option<StreamTls>,
    ) -> Result<Self> {
        let tls = match tls {
            Some(t) => {
                load_certs(&t.cert_path)?;
                load_key(&t.key_path)?;
                Some(t.cache)
            }
            None => None,
        };

        Ok(Self {
            addr,
            sessions: Arc::new(RwLock::new(HashMap::new())),
            registry,
            tls,
            close: CloseNotifier::new(),
        })
    }

    /// Get a handle for registering sessions.
    pub fn handle(&self) -> StreamHandle {
        let scheme = if self.tls.is_some() { "https" } else { "http" };
        StreamHandle {
            base_url: format!("{}://{}", scheme, self.addr),
            sessions: self.sessions.clone(),
        }
    }

    /// The close signal observable by external supervisors.
    pub fn close_notifier(&self) -> CloseNotifier {
        self.close.clone()
    }

    /// Start accepting connections on a dedicated background task.
    ///
    /// Serve failures are logged, not propagated; the close signal is the
    /// only observable indicator of endpoint termination.
    pub fn start(&self) {
        let addr = self.addr;
        let sessions = self.sessions.clone();
        let registry = self.registry.clone();
        let tls = self.tls.clone();
        let close = self.close.clone();

        tokio::spawn(async move {
            if let Err(e) = serve(addr, sessions, registry, tls, close.clone()).await {
                tracing::error!(addr = %addr, error = %e, "Failed to start streaming endpoint");
            }
            close.close();
        });
    }

    /// Stop the endpoint, closing the listener and all accepted sessions.
    /// Idempotent.
    pub fn stop(&self) {
        self.close.close();
    }
}

/// Handle for registering streaming sessions from request handlers.
#[derive(Clone)]
pub struct StreamHandle {
    base_url: String,
    sessions: Arc<RwLock<HashMap<String, StreamSession>>>,
}

impl StreamHandle {
    /// Register a session and return the URL the client connects to.
    /// Each token is single-use: the first connection consumes it.
    pub async fn register(&self, session: StreamSession) -> String {
        let token = uuid::Uuid::new_v4().to_string();
        let kind = session.kind.as_str();
        crate::metrics::STREAM_SESSIONS.with_label_values(&[kind]).inc();
        self.sessions.write().await.insert(token.clone(), session);
        format!("{}/{}/{}", self.base_url, kind, token)
    }
}

async fn serve(
    addr: SocketAddr,
    sessions: Arc<RwLock<HashMap<String, StreamSession>>>,
    registry: Arc<Registry>,
    tls: Option<Arc<CertConfigCache>>,
    close: CloseNotifier,
) -> Result<()> {
    let listener = TcpListener::bind(addr).await.map_err(|e| {
        BerthError::StreamError(format!("failed to bind streaming endpoint {}: {}", addr, e))
    })?;
    tracing::info!(addr = %addr, tls = tls.is_some(), "Streaming endpoint listening");

    loop {
        tokio::select! {
            _ = close.wait() => {
                tracing::debug!("closing streaming endpoint");
                return Ok(());
            }
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        tracing::warn!(error = %e, "Failed to accept streaming connection");
                        continue;
                    }
                };
                let sessions = sessions.clone();
                let registry = registry.clone();
                let tls = tls.clone();
                let close = close.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, peer, sessions, registry, tls, close).await {
                        tracing::warn!(peer = %peer, error = %e, "Streaming connection failed");
                    }
                });
            }
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    sessions: Arc<RwLock<HashMap<String, StreamSession>>>,
    registry: Arc<Registry>,
    tls: Option<Arc<CertConfigCache>>,
    close: CloseNotifier,
) -> Result<()> {
    match tls {
        Some(cache) => {
            // TLS credential failures affect only this connection attempt.
            let config = cache.get_config()?;
            let acceptor = TlsAcceptor::from(config);
            let tls_stream = acceptor.accept(stream).await.map_err(|e| {
                BerthError::TlsError(format!("TLS handshake with {} failed: {}", peer, e))
            })?;
            serve_session(tls_stream, peer, sessions, registry, close).await
        }
        None => serve_session(stream, peer, sessions, registry, close).await,
    }
}

async fn serve_session<S>(
    mut stream: S,
    peer: SocketAddr,
    sessions: Arc<RwLock<HashMap<String, StreamSession>>>,
    registry: Arc<Registry>,
    close: CloseNotifier,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    // Read the HTTP request head: GET /<kind>/<token> HTTP/1.1
    let mut buf = vec![0u8; 8192];
    let n = stream.read(&mut buf).await?;
    let request = String::from_utf8_lossy(&buf[..n]);
    let first_line = request.lines().next().unwrap_or("");

    let (kind, token) = match parse_target(first_line) {
        Some(target) => target,
        None => {
            send_response(&mut stream, 400, "Bad Request").await?;
            return Ok(());
        }
    };

    // Look up and consume the session; tokens are single-use.
    let session = sessions.write().await.remove(token);
    let session = match session {
        Some(s) => s,
        None => {
            send_response(&mut stream, 404, "Session not found or expired").await?;
            return Ok(());
        }
    };

    // Lookup glue: the target must still be tracked in the registry.
    let tracked = registry.get_container(&session.container_id).is_some()
        || registry.get_sandbox(&session.sandbox_id).is_some();
    if !tracked {
        send_response(&mut stream, 410, "Session target no longer tracked").await?;
        return Ok(());
    }

    tracing::info!(
        peer = %peer,
        kind = %kind,
        sandbox_id = %session.sandbox_id,
        "Streaming session started"
    );

    bridge(stream, &session, close).await
}

/// Upgrade the connection and bridge it to the session's attach socket.
async fn bridge<S>(mut stream: S, session: &StreamSession, close: CloseNotifier) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    stream.write_all(UPGRADE_RESPONSE.as_bytes()).await?;

    let unix_stream = UnixStream::connect(&session.attach_socket)
        .await
        .map_err(|e| {
            BerthError::StreamError(format!(
                "failed to connect attach socket {}: {}",
                session.attach_socket.display(),
                e
            ))
        })?;

    let (mut client_read, mut client_write) = tokio::io::split(stream);
    let (mut attach_read, mut attach_write) = tokio::io::split(unix_stream);

    let client_to_attach = tokio::io::copy(&mut client_read, &mut attach_write);
    let attach_to_client = tokio::io::copy(&mut attach_read, &mut client_write);

    tokio::select! {
        _ = close.wait() => {}
        r = client_to_attach => { let _ = r; }
        r = attach_to_client => { let _ = r; }
    }

    Ok(())
}

/// Parse `GET /<kind>/<token> HTTP/1.1` into its path segments.
fn parse_target(request_line: &str) -> Option<(&str, &str)> {
    let parts: Vec<&str> = request_line.split_whitespace().collect();
    if parts.len() < 2 {
        return None;
    }
    let segments: Vec<&str> = parts[1].trim_start_matches('/').split('/').collect();
    if segments.len() != 2 || segments[0].is_empty() || segments[1].is_empty() {
        return None;
    }
    Some((segments[0], segments[1]))
}

/// Send a simple HTTP response.
async fn send_response<S>(stream: &mut S, status: u16, body: &str) -> Result<()>
where
    S: AsyncWrite + Unpin + Send,
{
    let status_text = match status {
        200 => "OK",
        400 => "Bad Request",
        404 => "Not Found",
        410 => "Gone",
        _ => "Error",
    };
    let response = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        status_text,
        body.len(),
        body,
    );
    stream.write_all(response.as_bytes()).await?;
    Ok(())
}

/// Resolve the streaming bind address.
///
/// Prefers an explicitly configured address; otherwise picks the host's
/// outbound-routable address.
pub fn resolve_bind_address(configured: &str) -> Result<IpAddr> {
    if configured.is_empty() {
        return choose_bind_address();
    }
    configured.parse().map_err(|e| {
        BerthError::ConfigError(format!("invalid stream address {:?}: {}", configured, e))
    })
}

fn choose_bind_address() -> Result<IpAddr> {
    // Connecting a UDP socket selects the outbound route without sending.
    let socket = UdpSocket::bind(("0.0.0.0", 0)).map_err(|e| {
        BerthError::ConfigError(format!("failed to probe for a bind address: {}", e))
    })?;
    socket.connect(("8.8.8.8", 53)).map_err(|e| {
        BerthError::ConfigError(format!("no outbound-routable address available: {}", e))
    })?;
    let addr = socket.local_addr().map_err(|e| {
        BerthError::ConfigError(format!("failed to probe for a bind address: {}", e))
    })?;
    Ok(addr.ip())
}

/// Validate that the configured port parses as a TCP port.
pub fn validate_stream_port(port: &str) -> Result<u16> {
    port.parse::<u16>()
        .map_err(|e| BerthError::ConfigError(format!("invalid stream port {:?}: {}", port, e)))
}
