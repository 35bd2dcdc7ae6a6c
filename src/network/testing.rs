//! Test doubles for the transport contracts.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::host::{ChannelPolicy, PlayerRoster};
use crate::network::auth::AuthPayload;
use crate::network::protocol::{ChannelCategory, Method};
use crate::network::transport::{
    EventHandler, HttpResponse, PersistentTransport, RequestTransport, TransportError,
    TransportFactory,
};

/// Persistent transport that records traffic and replays scripted replies.
pub struct SpyPersistent {
    pub auth: AuthPayload,
    connected: AtomicBool,
    connect_ok: AtomicBool,
    connect_hangs: AtomicBool,
    connects: AtomicUsize,
    disconnects: AtomicUsize,
    auto_accept: Mutex<Option<Value>>,
    ack_reply: Mutex<Option<Value>>,
    handlers: Mutex<BTreeMap<String, EventHandler>>,
    sent: Mutex<Vec<(String, Value)>>,
}

impl SpyPersistent {
    pub fn new(auth: AuthPayload) -> Arc<Self> {
        Arc::new(Self {
            auth,
            connected: AtomicBool::new(false),
            connect_ok: AtomicBool::new(true),
            connect_hangs: AtomicBool::new(false),
            connects: AtomicUsize::new(0),
            disconnects: AtomicUsize::new(0),
            auto_accept: Mutex::new(None),
            ack_reply: Mutex::new(None),
            handlers: Mutex::new(BTreeMap::new()),
            sent: Mutex::new(Vec::new()),
        })
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    pub fn set_connect_ok(&self, ok: bool) {
        self.connect_ok.store(ok, Ordering::SeqCst);
    }

    /// Make `connect` wait forever, like a peer that never answers.
    pub fn set_connect_hangs(&self, hangs: bool) {
        self.connect_hangs.store(hangs, Ordering::SeqCst);
    }

    /// Fire `auth-success` with `payload` as soon as `connect` succeeds.
    pub fn set_auto_accept(&self, payload: Option<Value>) {
        *self.auto_accept.lock().unwrap() = payload;
    }

    /// Acknowledge every `send_with_ack` with `reply`; `None` never answers.
    pub fn set_ack_reply(&self, reply: Option<Value>) {
        *self.ack_reply.lock().unwrap() = reply;
    }

    /// Deliver an inbound event to its handler, if one is registered.
    pub fn emit(&self, event: &str, payload: Value) {
        let handler = self.handlers.lock().unwrap().get(event).cloned();
        if let Some(handler) = handler {
            handler(payload);
        }
    }

    pub fn has_handler(&self, event: &str) -> bool {
        self.handlers.lock().unwrap().contains_key(event)
    }

    pub fn sent(&self) -> Vec<(String, Value)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn disconnect_count(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }

    pub fn token(&self) -> Option<String> {
        self.auth.get("token").cloned()
    }
}

#[async_trait]
impl PersistentTransport for SpyPersistent {
    async fn connect(&self) -> Result<(), TransportError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if self.connect_hangs.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if !self.connect_ok.load(Ordering::SeqCst) {
            return Err(TransportError::NotConnected);
        }
        self.set_connected(true);

        let accept = self.auto_accept.lock().unwrap().clone();
        if let Some(payload) = accept {
            self.emit("auth-success", payload);
        }
        Ok(())
    }

    async fn disconnect(&self) {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        self.set_connected(false);
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn send(&self, event: &str, payload: Value) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        self.sent.lock().unwrap().push((event.to_string(), payload));
        Ok(())
    }

    async fn send_with_ack(
        &self,
        event: &str,
        payload: Value,
        _timeout: Duration,
    ) -> Result<Value, TransportError> {
        self.send(event, payload).await?;
        let reply = self.ack_reply.lock().unwrap().clone();
        match reply {
            Some(reply) => Ok(reply),
            None => std::future::pending().await,
        }
    }

    fn on(&self, event: &str, handler: EventHandler) {
        self.handlers.lock().unwrap().insert(event.to_string(), handler);
    }
}

/// Request transport that records calls and answers with a scripted response.
pub struct SpyRequest {
    listening: AtomicBool,
    connect_ok: AtomicBool,
    port: Mutex<Option<u16>>,
    disconnects: AtomicUsize,
    response: Mutex<Option<HttpResponse>>,
    calls: Mutex<Vec<(Method, String, Value)>>,
}

impl SpyRequest {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            listening: AtomicBool::new(false),
            connect_ok: AtomicBool::new(true),
            port: Mutex::new(None),
            disconnects: AtomicUsize::new(0),
            response: Mutex::new(Some(ok_response(json!({})))),
            calls: Mutex::new(Vec::new()),
        })
    }

    /// Answer every call with `response`; `None` means no response at all.
    pub fn set_response(&self, response: Option<HttpResponse>) {
        *self.response.lock().unwrap() = response;
    }

    pub fn set_connect_ok(&self, ok: bool) {
        self.connect_ok.store(ok, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<(Method, String, Value)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn port(&self) -> Option<u16> {
        *self.port.lock().unwrap()
    }

    pub fn disconnect_count(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RequestTransport for SpyRequest {
    async fn connect(&self, port: u16) -> Result<(), TransportError> {
        *self.port.lock().unwrap() = Some(port);
        if !self.connect_ok.load(Ordering::SeqCst) {
            return Err(TransportError::NotConnected);
        }
        self.listening.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        self.listening.store(false, Ordering::SeqCst);
    }

    fn is_listening(&self) -> bool {
        self.listening.load(Ordering::SeqCst)
    }

    async fn send(&self, method: Method, path: &str, body: Value) -> Result<HttpResponse, TransportError> {
        self.calls.lock().unwrap().push((method, path.to_string(), body));
        self.response.lock().unwrap().clone().ok_or(TransportError::Closed)
    }
}

pub fn ok_response(body: Value) -> HttpResponse {
    HttpResponse { status: 200, body }
}

pub fn status_response(status: u16, body: Value) -> HttpResponse {
    HttpResponse { status, body }
}

/// Factory handing out spies configured from its current defaults.
pub struct SpyFactory {
    persistent: Mutex<Vec<Arc<SpyPersistent>>>,
    request: Mutex<Vec<Arc<SpyRequest>>>,
    persistent_connect_ok: AtomicBool,
    persistent_connect_hangs: AtomicBool,
    auto_accept: Mutex<Option<Value>>,
    ack_reply: Mutex<Option<Value>>,
    response: Mutex<Option<HttpResponse>>,
}

impl SpyFactory {
    pub fn new() -> Self {
        Self {
            persistent: Mutex::new(Vec::new()),
            request: Mutex::new(Vec::new()),
            persistent_connect_ok: AtomicBool::new(true),
            persistent_connect_hangs: AtomicBool::new(false),
            auto_accept: Mutex::new(Some(json!({}))),
            ack_reply: Mutex::new(None),
            response: Mutex::new(Some(ok_response(json!({})))),
        }
    }

    pub fn set_persistent_connect_ok(&self, ok: bool) {
        self.persistent_connect_ok.store(ok, Ordering::SeqCst);
    }

    pub fn set_persistent_connect_hangs(&self, hangs: bool) {
        self.persistent_connect_hangs.store(hangs, Ordering::SeqCst);
    }

    pub fn set_auto_accept(&self, payload: Option<Value>) {
        *self.auto_accept.lock().unwrap() = payload;
    }

    pub fn set_ack_reply(&self, reply: Option<Value>) {
        *self.ack_reply.lock().unwrap() = reply;
    }

    pub fn set_response(&self, response: Option<HttpResponse>) {
        *self.response.lock().unwrap() = response;
    }

    pub fn persistent_spies(&self) -> Vec<Arc<SpyPersistent>> {
        self.persistent.lock().unwrap().clone()
    }

    pub fn request_spies(&self) -> Vec<Arc<SpyRequest>> {
        self.request.lock().unwrap().clone()
    }

    pub fn last_persistent(&self) -> Arc<SpyPersistent> {
        self.persistent_spies().last().cloned().expect("no persistent transport created")
    }

    pub fn last_request(&self) -> Arc<SpyRequest> {
        self.request_spies().last().cloned().expect("no request transport created")
    }

    /// At most one transport of either kind is live.
    pub fn exclusive(&self) -> bool {
        let persistent = self.persistent_spies().iter().filter(|s| s.is_connected()).count();
        let request = self.request_spies().iter().filter(|s| s.is_listening()).count();
        persistent + request <= 1
    }
}

impl TransportFactory for SpyFactory {
    fn persistent(&self, auth: AuthPayload) -> Arc<dyn PersistentTransport> {
        let spy = SpyPersistent::new(auth);
        spy.set_connect_ok(self.persistent_connect_ok.load(Ordering::SeqCst));
        spy.set_connect_hangs(self.persistent_connect_hangs.load(Ordering::SeqCst));
        spy.set_auto_accept(self.auto_accept.lock().unwrap().clone());
        spy.set_ack_reply(self.ack_reply.lock().unwrap().clone());
        self.persistent.lock().unwrap().push(spy.clone());
        spy
    }

    fn request(&self) -> Arc<dyn RequestTransport> {
        let spy = SpyRequest::new();
        spy.set_response(self.response.lock().unwrap().clone());
        self.request.lock().unwrap().push(spy.clone());
        spy
    }
}

/// Policy returning the same channels for every category.
pub struct FixedChannels {
    channels: Mutex<Vec<String>>,
    queries: Mutex<Vec<ChannelCategory>>,
}

impl FixedChannels {
    pub fn new(channels: &[&str]) -> Self {
        Self {
            channels: Mutex::new(channels.iter().map(|c| c.to_string()).collect()),
            queries: Mutex::new(Vec::new()),
        }
    }

    pub fn set(&self, channels: &[&str]) {
        *self.channels.lock().unwrap() = channels.iter().map(|c| c.to_string()).collect();
    }

    pub fn queries(&self) -> Vec<ChannelCategory> {
        self.queries.lock().unwrap().clone()
    }
}

impl ChannelPolicy for FixedChannels {
    fn filter_channels(&self, category: ChannelCategory) -> Vec<String> {
        self.queries.lock().unwrap().push(category);
        self.channels.lock().unwrap().clone()
    }
}

pub struct FixedRoster(pub usize);

impl PlayerRoster for FixedRoster {
    fn online_count(&self) -> usize {
        self.0
    }
}

/// Yield until `condition` holds.
pub async fn wait_until<F: Fn() -> bool>(condition: F) {
    for _ in 0..10_000 {
        if condition() {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("condition never became true");
}
