//! Transport Contracts
//!
//! The coordinator drives two kinds of link without knowing how either is
//! implemented. Concrete adapters live in [`super::websocket`] and
//! [`super::http`]; tests substitute spies.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::config::LinkerConfig;
use crate::network::auth::AuthPayload;
use crate::network::http::HttpTransport;
use crate::network::protocol::Method;
use crate::network::websocket::WsTransport;

/// Handler for an inbound named event.
pub type EventHandler = Arc<dyn Fn(Value) + Send + Sync>;

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// HTTP client error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Socket bind or accept failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Payload (de)serialization failure.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Operation needs a live connection.
    #[error("Not connected")]
    NotConnected,

    /// Link did not open in time.
    #[error("Connect timed out after {0:?}")]
    ConnectTimeout(Duration),

    /// Peer did not accept the handshake in time.
    #[error("Handshake timed out after {0:?}")]
    HandshakeTimeout(Duration),

    /// Peer did not acknowledge in time.
    #[error("Acknowledgement timed out after {0:?}")]
    AckTimeout(Duration),

    /// Connection closed while waiting.
    #[error("Connection closed")]
    Closed,
}

/// Response to a request-mode call.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    /// HTTP status code.
    pub status: u16,
    /// Parsed JSON body (`Null` when empty or not JSON).
    pub body: Value,
}

/// Bidirectional, event-driven link.
///
/// The auth payload is fixed at construction. A disconnected instance may
/// be connected again with the same credentials.
#[async_trait]
pub trait PersistentTransport: Send + Sync {
    /// Open the link and present the auth payload.
    async fn connect(&self) -> Result<(), TransportError>;

    /// Close the link and release its connection.
    async fn disconnect(&self);

    /// Whether the link is currently open.
    fn is_connected(&self) -> bool;

    /// Fire-and-forget a named event.
    async fn send(&self, event: &str, payload: Value) -> Result<(), TransportError>;

    /// Send a named event and wait for the peer's acknowledgement.
    async fn send_with_ack(
        &self,
        event: &str,
        payload: Value,
        timeout: Duration,
    ) -> Result<Value, TransportError>;

    /// Subscribe to an inbound named event. Replaces any earlier handler.
    fn on(&self, event: &str, handler: EventHandler);
}

/// Stateless request/response link.
#[async_trait]
pub trait RequestTransport: Send + Sync {
    /// Start accepting the service's inbound calls on `port`.
    async fn connect(&self, port: u16) -> Result<(), TransportError>;

    /// Stop accepting inbound calls and release the port.
    async fn disconnect(&self);

    /// Whether the inbound listener is running.
    fn is_listening(&self) -> bool;

    /// Perform one round trip. `Err` means no response was obtained.
    async fn send(&self, method: Method, path: &str, body: Value) -> Result<HttpResponse, TransportError>;
}

/// Builds fresh transport instances for the coordinator.
pub trait TransportFactory: Send + Sync {
    /// A new, unconnected persistent link carrying `auth`.
    fn persistent(&self, auth: AuthPayload) -> Arc<dyn PersistentTransport>;

    /// A new, unconnected request link.
    fn request(&self) -> Arc<dyn RequestTransport>;
}

/// Production factory: WebSocket and HTTP adapters pointed at the service.
#[derive(Debug, Clone)]
pub struct NetworkTransports {
    config: LinkerConfig,
}

impl NetworkTransports {
    /// Factory using the service URLs and timeouts in `config`.
    pub fn new(config: LinkerConfig) -> Self {
        Self { config }
    }
}

impl TransportFactory for NetworkTransports {
    fn persistent(&self, auth: AuthPayload) -> Arc<dyn PersistentTransport> {
        Arc::new(
            WsTransport::new(self.config.bot_ws_url.clone(), auth)
                .with_connect_timeout(self.config.connect_timeout),
        )
    }

    fn request(&self) -> Arc<dyn RequestTransport> {
        Arc::new(HttpTransport::new(
            &self.config.bot_http_url,
            self.config.request_timeout,
        ))
    }
}
