//! WebSocket feeds
//!
//! Push subscriptions over tungstenite: the raw Flashblocks stream and
//! `eth_subscribe("newHeads")` on any JSON-RPC WebSocket endpoint.

use std::net::{TcpStream, ToSocketAddrs};
use std::thread;
use std::time::{Duration, Instant};

use serde_json::json;
use tracing::{debug, info};
use tungstenite::http::Uri;
use tungstenite::stream::MaybeTlsStream;
use tungstenite::{client_tls, Message, WebSocket};

use crate::core::constants::WS_CONNECT_TIMEOUT;
use crate::core::io_traits::{FeedConnector, FeedError, FeedSubscription};
use crate::core::protocol::RpcRequest;

const READ_POLL_STEP: Duration = Duration::from_millis(10);

/// Rewrite an http(s) base URL to its ws(s) form; ws(s) URLs pass through
pub fn ws_url(base: &str) -> String {
    let base = base.trim_end_matches('/');
    if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        base.to_string()
    }
}

/// Host and port to dial for a ws(s) URL
fn socket_target(url: &str) -> Result<(String, u16), FeedError> {
    let uri: Uri = url
        .parse()
        .map_err(|e| FeedError::Connect(format!("invalid url {url}: {e}")))?;
    let host = uri
        .host()
        .ok_or_else(|| FeedError::Connect(format!("no host in {url}")))?
        .trim_start_matches('[')
        .trim_end_matches(']')
        .to_string();
    let port = match (uri.port_u16(), uri.scheme_str()) {
        (Some(port), _) => port,
        (None, Some("wss")) => 443,
        (None, Some("ws")) => 80,
        _ => return Err(FeedError::Connect(format!("unsupported scheme in {url}"))),
    };
    Ok((host, port))
}

/// TCP connection to the first reachable address, each attempt bounded by `timeout`
fn connect_tcp(url: &str, timeout: Duration) -> Result<TcpStream, FeedError> {
    let (host, port) = socket_target(url)?;
    let addrs = (host.as_str(), port)
        .to_socket_addrs()
        .map_err(|e| FeedError::Connect(format!("resolve {host}: {e}")))?;

    let mut last_error = None;
    for addr in addrs {
        match TcpStream::connect_timeout(&addr, timeout) {
            Ok(stream) => return Ok(stream),
            Err(e) => last_error = Some(e),
        }
    }
    Err(FeedError::Connect(match last_error {
        Some(e) => e.to_string(),
        None => format!("no address for {host}"),
    }))
}

// =============================================================================
// CONNECTOR
// =============================================================================

/// Opens WebSocket subscriptions to one endpoint
#[derive(Debug, Clone)]
pub struct WsFeed {
    url: String,
    /// Sent right after the handshake, if any
    subscribe_request: Option<String>,
}

impl WsFeed {
    /// Stream that pushes frames without a subscribe call (Flashblocks)
    pub fn raw(url: &str) -> Self {
        Self {
            url: ws_url(url),
            subscribe_request: None,
        }
    }

    /// JSON-RPC endpoint, subscribed to `newHeads`
    pub fn new_heads(url: &str) -> Self {
        let request = RpcRequest::new(1, "eth_subscribe", json!(["newHeads"]));
        Self {
            url: ws_url(url),
            subscribe_request: serde_json::to_string(&request).ok(),
        }
    }
}

impl FeedConnector for WsFeed {
    fn subscribe(&self) -> Result<Box<dyn FeedSubscription>, FeedError> {
        info!(url = %self.url, "[WS] Connecting...");
        let stream = connect_tcp(&self.url, WS_CONNECT_TIMEOUT)?;
        // Blocking handshake, bounded until the switch to non-blocking below
        let _ = stream.set_read_timeout(Some(WS_CONNECT_TIMEOUT));
        let _ = stream.set_write_timeout(Some(WS_CONNECT_TIMEOUT));
        let (mut socket, _) =
            client_tls(self.url.as_str(), stream).map_err(|e| FeedError::Connect(e.to_string()))?;

        if let Some(request) = &self.subscribe_request {
            socket
                .send(Message::Text(request.clone()))
                .map_err(|e| FeedError::Connect(format!("subscribe: {e}")))?;
        }

        // Non-blocking reads; next_frame polls until its timeout
        match socket.get_ref() {
            MaybeTlsStream::Plain(tcp) => {
                let _ = tcp.set_nonblocking(true);
            }
            MaybeTlsStream::NativeTls(tls) => {
                let _ = tls.get_ref().set_nonblocking(true);
            }
            _ => {}
        }

        info!(url = %self.url, "[WS] Connected");
        Ok(Box::new(WsSubscription {
            socket,
            closed: false,
        }))
    }
}

// =============================================================================
// SUBSCRIPTION
// =============================================================================

pub struct WsSubscription {
    socket: WebSocket<MaybeTlsStream<TcpStream>>,
    closed: bool,
}

impl FeedSubscription for WsSubscription {
    fn next_frame(&mut self, timeout: Duration) -> Result<Option<String>, FeedError> {
        if self.closed {
            return Err(FeedError::Closed);
        }
        let deadline = Instant::now() + timeout;

        loop {
            match self.socket.read() {
                Ok(Message::Text(text)) => return Ok(Some(text)),
                Ok(Message::Binary(bytes)) => {
                    return String::from_utf8(bytes)
                        .map(Some)
                        .map_err(|e| FeedError::Read(format!("non-utf8 frame: {e}")));
                }
                Ok(Message::Close(_)) => {
                    self.closed = true;
                    return Err(FeedError::Closed);
                }
                // Ping/pong are answered by tungstenite itself
                Ok(_) => {}
                Err(tungstenite::Error::Io(ref e))
                    if e.kind() == std::io::ErrorKind::WouldBlock => {}
                Err(tungstenite::Error::ConnectionClosed) | Err(tungstenite::Error::AlreadyClosed) => {
                    self.closed = true;
                    return Err(FeedError::Closed);
                }
                Err(e) => return Err(FeedError::Read(e.to_string())),
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            thread::sleep(READ_POLL_STEP.min(remaining));
        }
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        let _ = self.socket.close(None);
        let _ = self.socket.flush();
        debug!("[WS] Subscription closed");
    }
}

impl Drop for WsSubscription {
    fn drop(&mut self) {
        self.close();
    }
}
