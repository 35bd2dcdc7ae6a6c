//! Transport Coordinator
//!
//! Owns the link to the community service. Exactly one transport is selected
//! at a time: a persistent, authenticated event link or a stateless request
//! link. The coordinator performs the persistent handshake, falls back when
//! it fails, and routes every outbound message to whichever link is live.
//!
//! ## Serialization
//!
//! Mode transitions run one at a time under a transition lock. Slot changes
//! happen under the state lock, which is never held across opening a
//! persistent link; dispatch and queries only take the state lock, read a
//! snapshot and release it before any network I/O. Opening a persistent
//! link is bounded by `connect_timeout`.
//!
//! A handshake holds neither lock while it connects and waits for
//! `auth-success`. Each attempt carries a sequence number; on completion it
//! re-takes both locks and only promotes itself if it is still the latest
//! attempt.

use std::sync::{Arc, Mutex};

use serde::Serialize;
use serde_json::Value;
use tokio::sync::{oneshot, RwLock, RwLockWriteGuard};
use tokio::time::timeout;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::config::LinkerConfig;
use crate::core::format::strip_formatting;
use crate::host::{ChannelPolicy, PlayerRoster};
use crate::network::auth::{resume_payload, PendingHandshake};
use crate::network::protocol::{
    events, paths, AuthSuccess, ChannelCategory, ChatMessage, ChatType, Method, RoleCheck,
    RoleQuery, StatsUpdate, StatsUpdateEvent, UserVerification, VerificationResponse,
    ROLE_QUERY_TIMEOUT, STATUS_SESSION_REVOKED,
};
use crate::network::session::{
    ConnectionRecord, LinkMode, PersistentSession, Protocol, Route, TransportSlot,
};
use crate::network::transport::{
    HttpResponse, PersistentTransport, RequestTransport, TransportError, TransportFactory,
};
use crate::store::ConnectionStore;

/// Result of a dispatch call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Handed to the live transport.
    Sent,
    /// No channel subscribes to this category; nothing was sent.
    NoChannels,
    /// No transport is selected.
    NoTransport,
    /// The transport failed to deliver.
    Failed,
    /// The service no longer holds a session for this server. The local
    /// connection record has been deleted.
    Revoked,
}

/// Mutable link state. Only touched under the coordinator's lock.
struct LinkState {
    /// Selected transport.
    slot: TransportSlot,
    /// In-flight persistent handshake.
    pending: Option<PendingHandshake>,
    /// Persistent session torn down for the pending handshake.
    fallback: Option<PersistentSession>,
    /// Latest attempt sequence number.
    attempt: u64,
    /// Port for the request-mode listener.
    http_port: u16,
}

/// Collaborators injected into the coordinator.
#[derive(Clone)]
pub struct LinkContext {
    /// Builds transport instances.
    pub factory: Arc<dyn TransportFactory>,
    /// Persists the connection record.
    pub store: Arc<dyn ConnectionStore>,
    /// Selects channels per message category.
    pub channels: Arc<dyn ChannelPolicy>,
    /// Reports online players.
    pub roster: Arc<dyn PlayerRoster>,
}

/// Transport arbitration and session lifecycle.
pub struct TransportCoordinator {
    config: LinkerConfig,
    ctx: LinkContext,
    state: RwLock<LinkState>,
    transitions: tokio::sync::Mutex<()>,
}

impl TransportCoordinator {
    /// Coordinator with request mode selected. Nothing is connected until
    /// [`start_all`](Self::start_all).
    pub fn new(config: LinkerConfig, ctx: LinkContext) -> Self {
        let slot = TransportSlot::Request(ctx.factory.request());
        Self::with_slot(config, ctx, slot)
    }

    /// Coordinator resuming whatever the connection record describes.
    ///
    /// A persistent record with a token selects persistent mode with the
    /// saved credentials; anything else selects request mode.
    pub fn restore(config: LinkerConfig, ctx: LinkContext) -> Self {
        let slot = match ctx.store.read() {
            Some(ConnectionRecord {
                protocol: Protocol::Websocket,
                token: Some(token),
                required_role_to_join,
                ..
            }) => {
                let auth = resume_payload(&token);
                TransportSlot::Persistent(PersistentSession {
                    transport: ctx.factory.persistent(auth.clone()),
                    auth,
                    required_role: required_role_to_join,
                })
            }
            _ => TransportSlot::Request(ctx.factory.request()),
        };
        Self::with_slot(config, ctx, slot)
    }

    fn with_slot(config: LinkerConfig, ctx: LinkContext, slot: TransportSlot) -> Self {
        let http_port = config.http_port;
        Self {
            config,
            ctx,
            state: RwLock::new(LinkState {
                slot,
                pending: None,
                fallback: None,
                attempt: 0,
                http_port,
            }),
            transitions: tokio::sync::Mutex::new(()),
        }
    }

    // =========================================================================
    // MODE TRANSITIONS
    // =========================================================================

    /// Reconnect the selected transport, dropping any existing connection.
    #[instrument(skip(self))]
    pub async fn start_all(&self) -> bool {
        let _transition = self.transitions.lock().await;
        let mut state = self.state.write().await;
        Self::abandon_pending(&mut state).await;

        match state.slot.clone() {
            TransportSlot::Persistent(session) => {
                drop(state);
                if session.transport.is_connected() {
                    session.transport.disconnect().await;
                }
                match self.connect_persistent(&*session.transport).await {
                    Ok(()) => {
                        info!("Persistent link connected");
                        true
                    }
                    Err(e) => {
                        warn!("Persistent link failed to connect: {}", e);
                        false
                    }
                }
            }
            TransportSlot::Request(transport) => {
                if transport.is_listening() {
                    transport.disconnect().await;
                }
                Self::connect_request(&*transport, state.http_port).await
            }
            TransportSlot::Idle => {
                debug!("No transport selected, nothing to start");
                false
            }
        }
    }

    /// Disconnect the selected transport. The selection and the connection
    /// record are kept, so [`start_all`](Self::start_all) can resume.
    #[instrument(skip(self))]
    pub async fn stop_all(&self) {
        let _transition = self.transitions.lock().await;
        let mut state = self.state.write().await;
        Self::abandon_pending(&mut state).await;

        match &state.slot {
            TransportSlot::Persistent(session) => {
                if session.transport.is_connected() {
                    session.transport.disconnect().await;
                }
            }
            TransportSlot::Request(transport) => {
                if transport.is_listening() {
                    transport.disconnect().await;
                }
            }
            TransportSlot::Idle => {}
        }
        info!("All transports stopped");
    }

    /// Switch to a fresh request transport.
    #[instrument(skip(self))]
    pub async fn start_http(&self) -> bool {
        let _transition = self.transitions.lock().await;
        let mut state = self.state.write().await;
        Self::abandon_pending(&mut state).await;
        self.activate_request(&mut state).await
    }

    /// Disconnect and forget the request transport.
    #[instrument(skip(self))]
    pub async fn stop_http(&self) {
        let _transition = self.transitions.lock().await;
        let mut state = self.state.write().await;
        if let TransportSlot::Request(transport) = &state.slot {
            if transport.is_listening() {
                transport.disconnect().await;
            }
            state.slot = TransportSlot::Idle;
            info!("Request transport stopped");
        }
    }

    /// Port used by subsequent request-mode starts.
    pub async fn set_http_port(&self, port: u16) {
        self.state.write().await.http_port = port;
    }

    /// Upgrade to an authenticated persistent link using a verification code.
    ///
    /// Returns `true` once the service accepted the handshake and the new
    /// connection record is saved. On `false` the previous persistent
    /// session, if there was one, has been reconnected.
    ///
    /// The handshake socket is not a selected transport: until it is
    /// promoted it carries only the auth exchange, and every dispatch keeps
    /// using the selected slot. A running request listener therefore stays
    /// up alongside it and is torn down only on success.
    #[instrument(skip_all)]
    pub async fn connect_websocket(&self, code: &str) -> bool {
        let (attempt, transport, accepted_rx) = {
            let _transition = self.transitions.lock().await;
            let mut state = self.state.write().await;
            Self::cancel_pending(&mut state).await;
            state.attempt += 1;

            // The request slot stays up until the handshake succeeds. A
            // persistent session is parked so a failed attempt can restore it.
            if matches!(state.slot, TransportSlot::Persistent(_)) {
                if let TransportSlot::Persistent(previous) = std::mem::take(&mut state.slot) {
                    if previous.transport.is_connected() {
                        previous.transport.disconnect().await;
                    }
                    state.fallback = Some(previous);
                }
            }

            let pending = PendingHandshake::new(state.attempt, code, &*self.ctx.factory);
            let (tx, rx) = oneshot::channel::<Value>();
            let tx = Mutex::new(Some(tx));
            pending.transport.on(
                events::AUTH_SUCCESS,
                Arc::new(move |payload: Value| {
                    if let Some(tx) = tx.lock().ok().and_then(|mut slot| slot.take()) {
                        let _ = tx.send(payload);
                    }
                }),
            );

            let handle = (pending.attempt, pending.transport.clone(), rx);
            state.pending = Some(pending);
            handle
        };

        info!("Handshake attempt {} started", attempt);

        let outcome = match self.connect_persistent(&*transport).await {
            Ok(()) => match timeout(self.config.handshake_timeout, accepted_rx).await {
                Ok(Ok(payload)) => Ok(payload),
                Ok(Err(_)) => Err(TransportError::Closed),
                Err(_) => Err(TransportError::HandshakeTimeout(self.config.handshake_timeout)),
            },
            Err(e) => Err(e),
        };

        let _transition = self.transitions.lock().await;
        let mut state = self.state.write().await;
        let latest = state.attempt;
        let pending = match state.pending.take() {
            Some(pending) if pending.attempt == attempt && latest == attempt => pending,
            other => {
                state.pending = other;
                debug!("Discarding superseded handshake attempt {}", attempt);
                transport.disconnect().await;
                return false;
            }
        };

        let accepted = match outcome.map(|payload| AuthSuccess::parse(&payload)) {
            Ok(Ok(accepted)) => accepted,
            Ok(Err(e)) => {
                warn!("Malformed auth-success payload: {}", e);
                return self.fail_handshake(state, pending).await;
            }
            Err(e) => {
                warn!("Handshake attempt {} failed: {}", attempt, e);
                return self.fail_handshake(state, pending).await;
            }
        };

        let record = pending.record(&accepted);
        if let Err(e) = self.ctx.store.write(&record) {
            error!("Failed to save connection data: {}", e);
            pending.transport.disconnect().await;
            state.fallback = None;
            self.activate_request(&mut state).await;
            return false;
        }

        Self::release_slot(&mut state).await;
        state.fallback = None;
        state.slot = TransportSlot::Persistent(PersistentSession {
            transport: pending.transport,
            auth: pending.auth,
            required_role: accepted.required_role_to_join,
        });

        info!(
            "Persistent link established for session {}",
            record.id.as_deref().unwrap_or_default()
        );
        true
    }

    /// Tell the service this server is leaving, drop the persistent link,
    /// switch to request mode, and delete the connection record.
    ///
    /// Returns whether the service was notified. The record is deleted
    /// either way.
    #[instrument(skip(self))]
    pub async fn disconnect_force(&self) -> bool {
        let _transition = self.transitions.lock().await;
        let mut state = self.state.write().await;
        Self::abandon_pending(&mut state).await;

        let notified = match state.slot.clone() {
            TransportSlot::Persistent(session) => {
                let notified = session.transport.is_connected()
                    && session
                        .transport
                        .send(events::DISCONNECT_FORCE, Value::Null)
                        .await
                        .is_ok();
                self.activate_request(&mut state).await;
                notified
            }
            TransportSlot::Request(transport) => transport
                .send(Method::Get, paths::DISCONNECT_FORCE, Value::Null)
                .await
                .is_ok(),
            TransportSlot::Idle => false,
        };

        if let Err(e) = self.ctx.store.delete() {
            warn!("Failed to delete connection data: {}", e);
        }
        info!("Forced disconnect (service notified: {})", notified);
        notified
    }

    // =========================================================================
    // QUERIES
    // =========================================================================

    /// Current link state.
    pub async fn mode(&self) -> LinkMode {
        let state = self.state.read().await;
        if state.pending.is_some() {
            LinkMode::HandshakePending
        } else {
            state.slot.mode()
        }
    }

    /// Whether the persistent link is selected and open.
    pub async fn is_websocket_connected(&self) -> bool {
        matches!(&self.state.read().await.slot,
            TransportSlot::Persistent(session) if session.transport.is_connected())
    }

    /// Whether request mode is selected.
    pub async fn is_http_active(&self) -> bool {
        matches!(self.state.read().await.slot, TransportSlot::Request(_))
    }

    /// Whether the selected transport is live.
    pub async fn is_connected(&self) -> bool {
        match &self.state.read().await.slot {
            TransportSlot::Persistent(session) => session.transport.is_connected(),
            TransportSlot::Request(transport) => transport.is_listening(),
            TransportSlot::Idle => false,
        }
    }

    /// Role a player needs to join, as learned during the handshake.
    pub async fn required_role(&self) -> Option<Value> {
        match &self.state.read().await.slot {
            TransportSlot::Persistent(session) => session.required_role.clone(),
            _ => None,
        }
    }

    // =========================================================================
    // DISPATCH
    // =========================================================================

    /// Relay a chat message to the channels subscribed to `kind`.
    pub async fn send_chat(&self, message: &str, kind: ChatType, player: &str) -> Delivery {
        let channels = self.ctx.channels.filter_channels(ChannelCategory::Chat(kind));
        if channels.is_empty() {
            return Delivery::NoChannels;
        }

        let record = self.ctx.store.read();
        let mut chat = ChatMessage {
            kind,
            player: player.to_string(),
            message: strip_formatting(message),
            channels,
            id: record.as_ref().and_then(|r| r.id.clone()),
            ip: None,
        };

        match self.route().await {
            Route::Persistent(transport) => {
                let Some(payload) = envelope(&chat) else { return Delivery::Failed };
                delivered(transport.send(events::CHAT, payload).await)
            }
            Route::Request(transport) => {
                chat.ip = record.and_then(|r| r.ip);
                let Some(body) = envelope(&chat) else { return Delivery::Failed };
                let response = transport.send(Method::Post, paths::CHAT, body).await;
                self.check_revoked(response)
            }
            Route::Unrouted => Delivery::NoTransport,
        }
    }

    /// Push a statistics update to the channels subscribed to `event`.
    pub async fn send_stats_update(&self, event: StatsUpdateEvent) -> Delivery {
        let channels = self.ctx.channels.filter_channels(ChannelCategory::Stats(event));
        if channels.is_empty() {
            return Delivery::NoChannels;
        }

        let record = self.ctx.store.read();
        let mut stats = StatsUpdate {
            event,
            channels,
            id: record.as_ref().and_then(|r| r.id.clone()),
            members: (event == StatsUpdateEvent::Members).then(|| self.ctx.roster.online_count()),
            ip: None,
        };

        match self.route().await {
            Route::Persistent(transport) => {
                let Some(payload) = envelope(&stats) else { return Delivery::Failed };
                delivered(transport.send(events::UPDATE_STATS_CHANNELS, payload).await)
            }
            Route::Request(transport) => {
                stats.ip = record.and_then(|r| r.ip);
                let Some(body) = envelope(&stats) else { return Delivery::Failed };
                let response = transport
                    .send(Method::Post, paths::UPDATE_STATS_CHANNELS, body)
                    .await;
                self.check_revoked(response)
            }
            Route::Unrouted => Delivery::NoTransport,
        }
    }

    /// Answer a verification request for a player. Best effort.
    pub async fn send_verification_response(&self, code: &str, uuid: Uuid) -> Delivery {
        let message = VerificationResponse {
            code: code.to_string(),
            uuid,
        };
        self.notify(events::VERIFY_RESPONSE, paths::VERIFY_RESPONSE, &message)
            .await
    }

    /// Register a player who verified in game. Best effort.
    pub async fn verify_user(&self, uuid: Uuid, username: &str, code: u32) -> Delivery {
        let message = UserVerification {
            code: code.to_string(),
            uuid,
            username: username.to_string(),
        };
        self.notify(events::VERIFY_USER, paths::VERIFY_USER, &message).await
    }

    /// Ask the service whether a player holds the required role.
    ///
    /// Never waits longer than [`ROLE_QUERY_TIMEOUT`] on the persistent link.
    /// Any failure yields [`RoleCheck::Error`].
    pub async fn has_required_role(&self, uuid: Uuid) -> RoleCheck {
        let record = self.ctx.store.read();
        let query = RoleQuery {
            uuid,
            id: record.as_ref().and_then(|r| r.id.clone()),
            ip: record.and_then(|r| r.ip),
        };
        let Some(payload) = envelope(&query) else { return RoleCheck::Error };

        match self.route().await {
            Route::Persistent(transport) => {
                let ack =
                    transport.send_with_ack(events::HAS_REQUIRED_ROLE, payload, ROLE_QUERY_TIMEOUT);
                match timeout(ROLE_QUERY_TIMEOUT, ack).await {
                    Ok(Ok(reply)) => RoleCheck::from_body(&reply),
                    Ok(Err(e)) => {
                        debug!("Role query failed: {}", e);
                        RoleCheck::Error
                    }
                    Err(_) => {
                        debug!("Role query timed out after {:?}", ROLE_QUERY_TIMEOUT);
                        RoleCheck::Error
                    }
                }
            }
            Route::Request(transport) => {
                match transport.send(Method::Post, paths::HAS_REQUIRED_ROLE, payload).await {
                    Ok(response) if response.status < 500 => RoleCheck::from_body(&response.body),
                    Ok(response) => {
                        debug!("Role query rejected with status {}", response.status);
                        RoleCheck::Error
                    }
                    Err(e) => {
                        debug!("Role query got no response: {}", e);
                        RoleCheck::Error
                    }
                }
            }
            Route::Unrouted => RoleCheck::Error,
        }
    }

    // =========================================================================
    // INTERNALS
    // =========================================================================

    async fn route(&self) -> Route {
        self.state.read().await.slot.route()
    }

    /// Open a persistent link, giving up after `connect_timeout`.
    async fn connect_persistent(
        &self,
        transport: &dyn PersistentTransport,
    ) -> Result<(), TransportError> {
        let limit = self.config.connect_timeout;
        match timeout(limit, transport.connect()).await {
            Ok(result) => result,
            Err(_) => {
                transport.disconnect().await;
                Err(TransportError::ConnectTimeout(limit))
            }
        }
    }

    /// Fire-and-forget over whichever transport is live.
    async fn notify<T: Serialize>(&self, event: &str, path: &str, message: &T) -> Delivery {
        let Some(payload) = envelope(message) else { return Delivery::Failed };
        match self.route().await {
            Route::Persistent(transport) => delivered(transport.send(event, payload).await),
            Route::Request(transport) => {
                delivered(transport.send(Method::Post, path, payload).await.map(|_| ()))
            }
            Route::Unrouted => Delivery::NoTransport,
        }
    }

    /// A 403 means the service dropped our session: forget it locally. The
    /// mode is left alone.
    fn check_revoked(&self, response: Result<HttpResponse, TransportError>) -> Delivery {
        match response {
            Ok(response) if response.status == STATUS_SESSION_REVOKED => {
                warn!("Service holds no session for this server, deleting connection data");
                if let Err(e) = self.ctx.store.delete() {
                    warn!("Failed to delete connection data: {}", e);
                }
                Delivery::Revoked
            }
            Ok(_) => Delivery::Sent,
            Err(e) => {
                debug!("Request got no response: {}", e);
                Delivery::Failed
            }
        }
    }

    /// Tear down whatever is selected and select a fresh request transport.
    async fn activate_request(&self, state: &mut LinkState) -> bool {
        Self::release_slot(state).await;
        let transport = self.ctx.factory.request();
        state.slot = TransportSlot::Request(transport.clone());
        Self::connect_request(&*transport, state.http_port).await
    }

    async fn connect_request(transport: &dyn RequestTransport, port: u16) -> bool {
        match transport.connect(port).await {
            Ok(()) => {
                info!("Request transport listening on port {}", port);
                true
            }
            Err(e) => {
                warn!("Request transport failed to start on port {}: {}", port, e);
                false
            }
        }
    }

    /// Disconnect and clear the selected transport.
    async fn release_slot(state: &mut LinkState) {
        match std::mem::take(&mut state.slot) {
            TransportSlot::Persistent(session) => {
                if session.transport.is_connected() {
                    session.transport.disconnect().await;
                }
            }
            TransportSlot::Request(transport) => {
                if transport.is_listening() {
                    transport.disconnect().await;
                }
            }
            TransportSlot::Idle => {}
        }
    }

    /// Drop the in-flight handshake, if any.
    async fn cancel_pending(state: &mut LinkState) {
        if let Some(pending) = state.pending.take() {
            debug!("Cancelling handshake attempt {}", pending.attempt);
            pending.transport.disconnect().await;
        }
    }

    /// Supersede any handshake and put a parked session back in the slot.
    async fn abandon_pending(state: &mut LinkState) {
        Self::cancel_pending(state).await;
        state.attempt += 1;
        if let Some(previous) = state.fallback.take() {
            if matches!(state.slot, TransportSlot::Idle) {
                state.slot = TransportSlot::Persistent(previous);
            }
        }
    }

    /// Discard a failed attempt and reconnect the session it replaced.
    ///
    /// The parked session is selected again before the state lock is
    /// released for the reconnect.
    async fn fail_handshake(
        &self,
        mut state: RwLockWriteGuard<'_, LinkState>,
        pending: PendingHandshake,
    ) -> bool {
        pending.transport.disconnect().await;

        let Some(previous) = state.fallback.take() else { return false };
        Self::release_slot(&mut state).await;
        state.slot = TransportSlot::Persistent(previous.clone());
        drop(state);

        match self.connect_persistent(&*previous.transport).await {
            Ok(()) => info!("Restored previous persistent link"),
            Err(e) => warn!("Failed to restore previous persistent link: {}", e),
        }
        false
    }
}

/// Serialize an outbound envelope.
fn envelope<T: Serialize>(message: &T) -> Option<Value> {
    match serde_json::to_value(message) {
        Ok(value) => Some(value),
        Err(e) => {
            error!("Failed to serialize message: {}", e);
            None
        }
    }
}

fn delivered(result: Result<(), TransportError>) -> Delivery {
    match result {
        Ok(()) => Delivery::Sent,
        Err(e) => {
            debug!("Delivery failed: {}", e);
            Delivery::Failed
        }
    }
}
