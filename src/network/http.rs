//! Request HTTP Transport
//!
//! Stateless link: each outbound message is one HTTP round trip to the
//! service. While connected, a small listener on the configured port lets
//! the service check that this server is reachable.

use std::net::SocketAddr;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use axum::{routing::get, Json, Router};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::network::protocol::Method;
use crate::network::transport::{HttpResponse, RequestTransport, TransportError};

/// A running inbound listener.
struct Listener {
    addr: SocketAddr,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

/// HTTP implementation of [`RequestTransport`].
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
    listener: Mutex<Option<Listener>>,
}

impl HttpTransport {
    /// Transport calling the service at `base_url`.
    pub fn new(base_url: &str, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(timeout)
                .user_agent(concat!("linker-bridge/", env!("CARGO_PKG_VERSION")))
                .build()
                .unwrap_or_default(),
            base_url: base_url.trim_end_matches('/').to_string(),
            listener: Mutex::new(None),
        }
    }

    /// Address the inbound listener is bound to, if running.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener
            .lock()
            .ok()
            .and_then(|listener| listener.as_ref().map(|l| l.addr))
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

/// Liveness route.
fn router() -> Router {
    Router::new().route(
        "/",
        get(|| async { Json(json!({"status": "ok", "version": crate::VERSION})) }),
    )
}

#[async_trait]
impl RequestTransport for HttpTransport {
    async fn connect(&self, port: u16) -> Result<(), TransportError> {
        if self.is_listening() {
            return Ok(());
        }

        let listener = TcpListener::bind(SocketAddr::from(([0, 0, 0, 0], port))).await?;
        let addr = listener.local_addr()?;
        let (shutdown, shutdown_rx) = oneshot::channel::<()>();

        let task = tokio::spawn(async move {
            let server = axum::serve(listener, router()).with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            });
            if let Err(e) = server.await {
                error!("HTTP listener error: {}", e);
            }
            debug!("HTTP listener stopped");
        });

        if let Ok(mut slot) = self.listener.lock() {
            *slot = Some(Listener {
                addr,
                shutdown,
                task,
            });
        }
        info!("HTTP listener on {}", addr);
        Ok(())
    }

    async fn disconnect(&self) {
        let listener = self.listener.lock().ok().and_then(|mut slot| slot.take());
        if let Some(Listener {
            addr,
            shutdown,
            task,
        }) = listener
        {
            let _ = shutdown.send(());
            if tokio::time::timeout(Duration::from_secs(5), task).await.is_err() {
                debug!("HTTP listener on {} did not stop in time", addr);
            }
            info!("HTTP listener on {} closed", addr);
        }
    }

    fn is_listening(&self) -> bool {
        self.listener
            .lock()
            .map(|listener| listener.is_some())
            .unwrap_or(false)
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Value,
    ) -> Result<HttpResponse, TransportError> {
        let url = self.url(path);
        let request = match method {
            Method::Get => self.client.get(&url),
            Method::Post => self.client.post(&url).json(&body),
        };

        let response = request.send().await?;
        let status = response.status().as_u16();
        let bytes = response.bytes().await?;
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);

        debug!("{} {} -> {}", method.as_str(), path, status);
        Ok(HttpResponse { status, body })
    }
}
