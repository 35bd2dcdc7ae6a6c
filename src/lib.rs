//! # Linker Bridge
//!
//! Links a game server to a community chat service. The link runs over one
//! of two mutually exclusive transports and survives restarts through a
//! persisted connection record.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      LINKER BRIDGE                           │
//! ├─────────────────────────────────────────────────────────────┤
//! │  config.rs         - Environment-driven settings             │
//! │  store.rs          - Connection record persistence           │
//! │  host.rs           - Channel policy and player roster        │
//! │                                                              │
//! │  core/             - Pure helpers                            │
//! │  ├── token.rs      - Handshake token generation              │
//! │  └── format.rs     - Chat formatting-code stripping          │
//! │                                                              │
//! │  network/          - Link to the service                     │
//! │  ├── coordinator.rs- Transport arbitration and dispatch      │
//! │  ├── auth.rs       - Handshake credentials                   │
//! │  ├── session.rs    - Link state and connection record        │
//! │  ├── protocol.rs   - Events, paths and envelopes             │
//! │  ├── transport.rs  - Transport contracts and factory         │
//! │  ├── websocket.rs  - Persistent transport (WebSocket)        │
//! │  └── http.rs       - Request transport (HTTP)                │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modes
//!
//! - **Request**: every message is an HTTP call. No handshake, no record.
//! - **Persistent**: a WebSocket authenticated with a verification code.
//!   A successful handshake saves a token so the link resumes after restart.
//!
//! At most one transport is connected at any time.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod config;
pub mod core;
pub mod host;
pub mod network;
pub mod store;

// Re-export commonly used types
pub use config::LinkerConfig;
pub use host::{ChannelPolicy, OnlinePlayers, PlayerRoster, StoreChannelPolicy};
pub use network::{
    ChatType, ConnectionRecord, Delivery, LinkContext, LinkMode, NetworkTransports, RoleCheck,
    StatsUpdateEvent, TransportCoordinator,
};
pub use store::{ConnectionStore, JsonFileStore, MemoryStore};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
