//! Persistent WebSocket Transport
//!
//! Event link to the community service over a single WebSocket. Every text
//! frame is a JSON [`Frame`]: a named event with a payload and, when the
//! sender wants an answer, an acknowledgement id. The peer answers with an
//! `ack` frame carrying the same id.
//!
//! The first frame after the upgrade is `auth`, carrying the credentials the
//! transport was built with. The service replies `auth-success` once it
//! accepts them.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use crate::network::auth::AuthPayload;
use crate::network::transport::{EventHandler, PersistentTransport, TransportError};

/// Event carrying the credentials, sent first on every connection.
pub const AUTH_EVENT: &str = "auth";

/// Event answering an earlier frame's acknowledgement id.
pub const ACK_EVENT: &str = "ack";

/// Outbound queue depth.
const OUTGOING_CAPACITY: usize = 64;

/// Limit on opening a connection when none is configured.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// One WebSocket text frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    /// Event name.
    pub event: String,
    /// Event payload.
    #[serde(default)]
    pub data: Value,
    /// Acknowledgement id, when an answer is expected or being given.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ack: Option<u64>,
}

impl Frame {
    /// Frame without an acknowledgement id.
    pub fn new(event: impl Into<String>, data: Value) -> Self {
        Self {
            event: event.into(),
            data,
            ack: None,
        }
    }

    /// Encode as frame text.
    pub fn to_text(&self) -> Result<String, TransportError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode frame text.
    pub fn from_text(text: &str) -> Result<Self, TransportError> {
        Ok(serde_json::from_str(text)?)
    }
}

/// State shared with the reader task.
#[derive(Default)]
struct WsShared {
    /// Generation of the open connection, 0 when closed.
    live: AtomicU64,
    /// Last generation handed out.
    generations: AtomicU64,
    handlers: RwLock<BTreeMap<String, EventHandler>>,
    acks: Mutex<BTreeMap<u64, oneshot::Sender<Value>>>,
}

impl WsShared {
    fn dispatch(&self, frame: Frame) {
        if frame.event == ACK_EVENT {
            let waiter = match (frame.ack, self.acks.lock()) {
                (Some(id), Ok(mut acks)) => acks.remove(&id),
                _ => None,
            };
            match waiter {
                Some(waiter) => {
                    let _ = waiter.send(frame.data);
                }
                None => debug!("Dropping unmatched ack {:?}", frame.ack),
            }
            return;
        }

        let handler = self
            .handlers
            .read()
            .ok()
            .and_then(|handlers| handlers.get(&frame.event).cloned());
        match handler {
            Some(handler) => handler(frame.data),
            None => debug!("No handler for event {}", frame.event),
        }
    }

    /// Drop every pending acknowledgement; waiters observe a closed link.
    fn fail_acks(&self) {
        if let Ok(mut acks) = self.acks.lock() {
            acks.clear();
        }
    }

    fn is_open(&self) -> bool {
        self.live.load(Ordering::SeqCst) != 0
    }

    /// Mark `generation` closed. No effect once a newer connection is live.
    fn release(&self, generation: u64) -> bool {
        self.live
            .compare_exchange(generation, 0, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }
}

/// Tasks and queue of one live connection.
struct Connection {
    generation: u64,
    outgoing: mpsc::Sender<Message>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

/// WebSocket implementation of [`PersistentTransport`].
pub struct WsTransport {
    url: String,
    auth: AuthPayload,
    shared: Arc<WsShared>,
    connection: Mutex<Option<Connection>>,
    next_ack: AtomicU64,
    connect_timeout: Duration,
}

impl WsTransport {
    /// Transport for `url` presenting `auth` on every connect.
    pub fn new(url: impl Into<String>, auth: AuthPayload) -> Self {
        Self {
            url: url.into(),
            auth,
            shared: Arc::new(WsShared::default()),
            connection: Mutex::new(None),
            next_ack: AtomicU64::new(1),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    /// Limit how long `connect` may take, upgrade and auth frame included.
    pub fn with_connect_timeout(mut self, limit: Duration) -> Self {
        self.connect_timeout = limit;
        self
    }

    /// Service URL.
    pub fn url(&self) -> &str {
        &self.url
    }

    fn outgoing(&self) -> Result<mpsc::Sender<Message>, TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        let live = self.shared.live.load(Ordering::SeqCst);
        self.connection
            .lock()
            .ok()
            .and_then(|connection| {
                connection
                    .as_ref()
                    .filter(|c| c.generation == live)
                    .map(|c| c.outgoing.clone())
            })
            .ok_or(TransportError::NotConnected)
    }

    async fn send_frame(&self, frame: &Frame) -> Result<(), TransportError> {
        let text = frame.to_text()?;
        let outgoing = self.outgoing()?;
        outgoing
            .send(Message::Text(text))
            .await
            .map_err(|_| TransportError::Closed)
    }

    fn forget_ack(&self, id: u64) {
        if let Ok(mut acks) = self.shared.acks.lock() {
            acks.remove(&id);
        }
    }
}

#[async_trait]
impl PersistentTransport for WsTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        if self.is_connected() {
            return Ok(());
        }

        info!("Connecting to {}...", self.url);
        let open = async {
            let (stream, _) = connect_async(self.url.as_str()).await?;
            let (mut write, read) = stream.split();

            let auth = Frame::new(AUTH_EVENT, serde_json::to_value(&self.auth)?);
            write.send(Message::Text(auth.to_text()?)).await?;
            Ok::<_, TransportError>((write, read))
        };
        let (mut write, mut read) = match tokio::time::timeout(self.connect_timeout, open).await {
            Ok(opened) => opened?,
            Err(_) => {
                warn!("No answer from {} within {:?}", self.url, self.connect_timeout);
                return Err(TransportError::ConnectTimeout(self.connect_timeout));
            }
        };

        let generation = self.shared.generations.fetch_add(1, Ordering::SeqCst) + 1;
        let (outgoing, mut outgoing_rx) = mpsc::channel::<Message>(OUTGOING_CAPACITY);
        self.shared.live.store(generation, Ordering::SeqCst);

        let writer = tokio::spawn(async move {
            while let Some(message) = outgoing_rx.recv().await {
                if let Err(e) = write.send(message).await {
                    error!("Failed to send frame: {}", e);
                    break;
                }
            }
            let _ = write.close().await;
            debug!("Writer task ended");
        });

        let shared = self.shared.clone();
        let reader = tokio::spawn(async move {
            while let Some(message) = read.next().await {
                match message {
                    Ok(Message::Text(text)) => match Frame::from_text(&text) {
                        Ok(frame) => shared.dispatch(frame),
                        Err(e) => warn!("Failed to parse frame: {} - {}", e, text),
                    },
                    Ok(Message::Close(_)) => {
                        info!("Service closed the connection");
                        break;
                    }
                    Err(e) => {
                        error!("WebSocket read error: {}", e);
                        break;
                    }
                    _ => {}
                }
            }
            if shared.release(generation) {
                shared.fail_acks();
            }
            debug!("Reader task for connection {} ended", generation);
        });

        if let Ok(mut connection) = self.connection.lock() {
            if let Some(stale) = connection.replace(Connection {
                generation,
                outgoing,
                reader,
                writer,
            }) {
                stale.reader.abort();
                stale.writer.abort();
            }
        }
        info!("WebSocket connected");
        Ok(())
    }

    async fn disconnect(&self) {
        self.shared.live.store(0, Ordering::SeqCst);
        let connection = self.connection.lock().ok().and_then(|mut c| c.take());

        if let Some(Connection {
            outgoing,
            reader,
            writer,
            ..
        }) = connection
        {
            // Closing the queue lets the writer flush and send a close frame.
            drop(outgoing);
            reader.abort();
            if tokio::time::timeout(Duration::from_secs(1), writer).await.is_err() {
                debug!("Writer did not finish closing in time");
            }
            info!("WebSocket disconnected");
        }
        self.shared.fail_acks();
    }

    fn is_connected(&self) -> bool {
        self.shared.is_open()
    }

    async fn send(&self, event: &str, payload: Value) -> Result<(), TransportError> {
        self.send_frame(&Frame::new(event, payload)).await
    }

    async fn send_with_ack(
        &self,
        event: &str,
        payload: Value,
        timeout: Duration,
    ) -> Result<Value, TransportError> {
        let id = self.next_ack.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        if let Ok(mut acks) = self.shared.acks.lock() {
            acks.insert(id, tx);
        }

        let frame = Frame {
            event: event.to_string(),
            data: payload,
            ack: Some(id),
        };
        if let Err(e) = self.send_frame(&frame).await {
            self.forget_ack(id);
            return Err(e);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(TransportError::Closed),
            Err(_) => {
                self.forget_ack(id);
                Err(TransportError::AckTimeout(timeout))
            }
        }
    }

    fn on(&self, event: &str, handler: EventHandler) {
        if let Ok(mut handlers) = self.shared.handlers.write() {
            handlers.insert(event.to_string(), handler);
        }
    }
}
