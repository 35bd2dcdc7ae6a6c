//! Link Session
//!
//! The single logical link to the community service, and the record that
//! makes it survive a restart.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::network::auth::AuthPayload;
use crate::network::transport::{PersistentTransport, RequestTransport};

/// Observable link state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkMode {
    /// No transport selected.
    Idle,
    /// Request transport selected.
    Request,
    /// Persistent transport selected.
    Persistent,
    /// A persistent handshake is in flight.
    HandshakePending,
}

/// Which transport produced a connection record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// Persistent (WebSocket) link.
    Websocket,
    /// Request (HTTP) link.
    Http,
}

/// A channel the service relays messages into.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelSubscription {
    /// Channel identifier.
    pub id: String,
    /// Category keys routed to this channel.
    #[serde(default)]
    pub types: Vec<String>,
}

/// Persisted credentials and metadata of the current session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionRecord {
    /// Transport that produced this record.
    pub protocol: Protocol,
    /// Remote-assigned session identifier.
    #[serde(default)]
    pub id: Option<String>,
    /// Session credential (persistent only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    /// Server address the service knows us by (request only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    /// Subscribed channels, in order.
    #[serde(default)]
    pub channels: Vec<ChannelSubscription>,
    /// Role a player needs to join, if enforced.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required_role_to_join: Option<Value>,
}

/// An authenticated persistent link.
#[derive(Clone)]
pub struct PersistentSession {
    /// Underlying transport.
    pub transport: Arc<dyn PersistentTransport>,
    /// Credentials it connects with.
    pub auth: AuthPayload,
    /// Required role learned during the handshake.
    pub required_role: Option<Value>,
}

/// The selected transport. Holding both kinds at once is unrepresentable.
#[derive(Clone, Default)]
pub enum TransportSlot {
    /// Nothing selected.
    #[default]
    Idle,
    /// Request mode.
    Request(Arc<dyn RequestTransport>),
    /// Persistent mode.
    Persistent(PersistentSession),
}

impl TransportSlot {
    /// Mode this slot selects.
    pub fn mode(&self) -> LinkMode {
        match self {
            TransportSlot::Idle => LinkMode::Idle,
            TransportSlot::Request(_) => LinkMode::Request,
            TransportSlot::Persistent(_) => LinkMode::Persistent,
        }
    }

    /// Where a dispatch should go right now.
    pub fn route(&self) -> Route {
        match self {
            TransportSlot::Persistent(session) if session.transport.is_connected() => {
                Route::Persistent(session.transport.clone())
            }
            TransportSlot::Request(transport) => Route::Request(transport.clone()),
            _ => Route::Unrouted,
        }
    }
}

/// Snapshot of the dispatch target, taken under the state lock.
#[derive(Clone)]
pub enum Route {
    /// Send by event name.
    Persistent(Arc<dyn PersistentTransport>),
    /// Send by method and path.
    Request(Arc<dyn RequestTransport>),
    /// No usable transport.
    Unrouted,
}
