//! Handshake Credentials
//!
//! A persistent link starts anonymous. The user supplies a verification code
//! issued by the community service; the server pairs it with a fresh token
//! and presents both. Once the service answers `auth-success`, the token
//! becomes this server's durable credential.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::core::token::generate_token;
use crate::network::protocol::AuthSuccess;
use crate::network::session::{ConnectionRecord, Protocol};
use crate::network::transport::{PersistentTransport, TransportFactory};

/// Auth fields presented when a persistent link connects.
pub type AuthPayload = BTreeMap<String, String>;

/// Auth payload for a first-time handshake.
pub fn handshake_payload(code: &str, token: &str) -> AuthPayload {
    let mut auth = AuthPayload::new();
    auth.insert("code".into(), code.into());
    auth.insert("token".into(), token.into());
    auth
}

/// Auth payload for resuming a saved session.
pub fn resume_payload(token: &str) -> AuthPayload {
    let mut auth = AuthPayload::new();
    auth.insert("token".into(), token.into());
    auth
}

/// Session id encoded in a verification code: everything before the first `:`.
pub fn session_id_from_code(code: &str) -> &str {
    code.find(':').map_or(code, |idx| &code[..idx])
}

/// A single connect attempt awaiting `auth-success`.
pub struct PendingHandshake {
    /// Attempt sequence number.
    pub attempt: u64,
    /// Verification code supplied by the user.
    pub code: String,
    /// Freshly generated token.
    pub token: String,
    /// Auth payload handed to the transport.
    pub auth: AuthPayload,
    /// In-flight transport.
    pub transport: Arc<dyn PersistentTransport>,
}

impl PendingHandshake {
    /// Start a new attempt with a fresh token.
    pub fn new(attempt: u64, code: &str, factory: &dyn TransportFactory) -> Self {
        let token = generate_token();
        let auth = handshake_payload(code, &token);
        let transport = factory.persistent(auth.clone());

        Self {
            attempt,
            code: code.to_string(),
            token,
            auth,
            transport,
        }
    }

    /// Connection record to persist once the service accepts the attempt.
    pub fn record(&self, accepted: &AuthSuccess) -> ConnectionRecord {
        ConnectionRecord {
            protocol: Protocol::Websocket,
            id: Some(session_id_from_code(&self.code).to_string()),
            token: Some(self.token.clone()),
            ip: None,
            channels: Vec::new(),
            required_role_to_join: accepted.required_role_to_join.clone(),
        }
    }
}
