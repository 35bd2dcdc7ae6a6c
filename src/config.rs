//! Bridge Configuration
//!
//! Runtime settings for the link to the community service. Read from the
//! environment so the host can reconfigure the bridge without a rebuild.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

/// Default port for the inbound HTTP listener.
pub const DEFAULT_HTTP_PORT: u16 = 11111;

/// Default base URL of the community service.
pub const DEFAULT_BOT_URL: &str = "http://127.0.0.1:8081";

/// Default location of the persisted connection record.
pub const DEFAULT_CONNECTION_FILE: &str = "connection.json";

/// Bridge configuration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LinkerConfig {
    /// Port the request-mode listener binds to.
    pub http_port: u16,
    /// Base URL for request-mode calls to the service.
    pub bot_http_url: String,
    /// URL for the persistent (WebSocket) link.
    pub bot_ws_url: String,
    /// Where the connection record is persisted.
    pub connection_file: PathBuf,
    /// How long opening the persistent link may take, upgrade and auth frame included.
    pub connect_timeout: Duration,
    /// How long a handshake may wait for `auth-success`.
    pub handshake_timeout: Duration,
    /// Per-request timeout for request-mode calls.
    pub request_timeout: Duration,
}

impl Default for LinkerConfig {
    fn default() -> Self {
        Self {
            http_port: DEFAULT_HTTP_PORT,
            bot_http_url: DEFAULT_BOT_URL.to_string(),
            bot_ws_url: ws_url_for(DEFAULT_BOT_URL),
            connection_file: PathBuf::from(DEFAULT_CONNECTION_FILE),
            connect_timeout: Duration::from_secs(10),
            handshake_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(10),
        }
    }
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An environment variable holds an unparsable value.
    #[error("invalid value for {var}: {value:?}")]
    InvalidValue {
        /// Variable name.
        var: &'static str,
        /// Raw value.
        value: String,
    },
}

impl LinkerConfig {
    /// Create config from environment variables.
    ///
    /// Unparsable values are logged and replaced by their defaults.
    pub fn from_env() -> Self {
        Self::build(|var, value| {
            warn!("Ignoring invalid {}={:?}, using default", var, value);
            Ok(())
        })
        .unwrap_or_default()
    }

    /// Create config from environment variables, rejecting bad values.
    pub fn try_from_env() -> Result<Self, ConfigError> {
        Self::build(|var, value| {
            Err(ConfigError::InvalidValue {
                var,
                value: value.to_string(),
            })
        })
    }

    fn build<F>(mut on_invalid: F) -> Result<Self, ConfigError>
    where
        F: FnMut(&'static str, &str) -> Result<(), ConfigError>,
    {
        let defaults = Self::default();

        let http_port = env_parse("LINKER_HTTP_PORT", &mut on_invalid)?
            .unwrap_or(defaults.http_port);
        let bot_http_url = std::env::var("LINKER_BOT_URL")
            .map(|url| url.trim_end_matches('/').to_string())
            .unwrap_or(defaults.bot_http_url);
        let bot_ws_url = std::env::var("LINKER_BOT_WS_URL")
            .unwrap_or_else(|_| ws_url_for(&bot_http_url));
        let connection_file = std::env::var("LINKER_CONNECTION_FILE")
            .map(PathBuf::from)
            .unwrap_or(defaults.connection_file);
        let connect_timeout = env_parse::<u64, _>("LINKER_CONNECT_TIMEOUT_MS", &mut on_invalid)?
            .map(Duration::from_millis)
            .unwrap_or(defaults.connect_timeout);
        let handshake_timeout = env_parse::<u64, _>("LINKER_HANDSHAKE_TIMEOUT_MS", &mut on_invalid)?
            .map(Duration::from_millis)
            .unwrap_or(defaults.handshake_timeout);
        let request_timeout = env_parse::<u64, _>("LINKER_REQUEST_TIMEOUT_MS", &mut on_invalid)?
            .map(Duration::from_millis)
            .unwrap_or(defaults.request_timeout);

        Ok(Self {
            http_port,
            bot_http_url,
            bot_ws_url,
            connection_file,
            connect_timeout,
            handshake_timeout,
            request_timeout,
        })
    }
}

/// Read and parse an environment variable. Unset is `Ok(None)`.
fn env_parse<T, F>(var: &'static str, on_invalid: &mut F) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    F: FnMut(&'static str, &str) -> Result<(), ConfigError>,
{
    match std::env::var(var) {
        Ok(raw) => match raw.trim().parse() {
            Ok(value) => Ok(Some(value)),
            Err(_) => on_invalid(var, &raw).map(|_| None),
        },
        Err(_) => Ok(None),
    }
}

/// Derive the WebSocket URL from an HTTP base URL.
pub fn ws_url_for(http_url: &str) -> String {
    if let Some(rest) = http_url.strip_prefix("https://") {
        format!("wss://{}", rest)
    } else if let Some(rest) = http_url.strip_prefix("http://") {
        format!("ws://{}", rest)
    } else {
        http_url.to_string()
    }
}
