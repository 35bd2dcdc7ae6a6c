//! Network Layer
//!
//! Link to the community service: wire vocabulary, handshake credentials,
//! the two transports, and the coordinator that arbitrates between them.
//! Nothing outside this module talks to a transport directly.

pub mod auth;
pub mod coordinator;
pub mod http;
pub mod protocol;
pub mod session;
pub mod transport;
pub mod websocket;

#[cfg(test)]
pub(crate) mod testing;

pub use auth::{AuthPayload, PendingHandshake};
pub use coordinator::{Delivery, LinkContext, TransportCoordinator};
pub use http::HttpTransport;
pub use protocol::{ChatType, RoleCheck, StatsUpdateEvent, ROLE_QUERY_TIMEOUT};
pub use session::{ChannelSubscription, ConnectionRecord, LinkMode, Protocol};
pub use transport::{
    NetworkTransports, PersistentTransport, RequestTransport, TransportError, TransportFactory,
};
pub use websocket::WsTransport;
