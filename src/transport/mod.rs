//! Transport sessions
//!
//! A session is one connection to the remote endpoint. It emits named
//! events with an acknowledgment callback and reports its lifecycle on an
//! event channel. The acknowledgment correlation (ack ids, pending table)
//! belongs to the session; callers only ever see the callback fire.

pub mod codec;
pub mod mock;
pub mod socketio;

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::common::Result;

pub use mock::MockSession;
pub use socketio::SocketIoSession;

/// Callback invoked with the acknowledgment's argument list
pub type AckCallback = Box<dyn FnOnce(Vec<Value>) + Send + 'static>;

/// Connection state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Connected,
    Disconnected,
    Errored,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::Errored => "errored",
        };
        f.write_str(s)
    }
}

/// Lifecycle events reported by a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Handshake complete, session id assigned
    Connected { sid: String },
    /// One connect attempt failed; the session may try again
    ConnectError(String),
    /// Every connect attempt failed; the session will not try again
    GaveUp(String),
    /// Error on an established connection
    TransportError(String),
    /// Connection closed
    Disconnected(String),
}

/// Remote endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// WebSocket URL for the Engine.IO 3 transport
    pub fn websocket_url(&self) -> String {
        format!(
            "ws://{}:{}/socket.io/?EIO=3&transport=websocket",
            self.host, self.port
        )
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "http://{}:{}", self.host, self.port)
    }
}

/// Connect policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionOptions {
    /// Extra attempts after the first connect attempt fails
    pub reconnection_attempts: u32,
    /// Bound on each connect attempt
    pub connect_timeout: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            reconnection_attempts: 3,
            connect_timeout: Duration::from_millis(10_000),
        }
    }
}

impl SessionOptions {
    /// Upper bound on how long connecting can take, including retry delays
    pub fn connect_budget(&self) -> Duration {
        let attempts = self.reconnection_attempts.saturating_add(1);
        // Delays grow by a second per attempt up to the cap, then stay flat
        let retries = u64::from(self.reconnection_attempts);
        let ramp = retries.min(5);
        let delay_secs = ramp * (ramp + 1) / 2 + (retries - ramp) * 5;
        let delays = Duration::from_secs(delay_secs);
        self.connect_timeout
            .checked_mul(attempts)
            .unwrap_or(Duration::MAX)
            .saturating_add(delays)
    }
}

/// Delay before reconnect attempt `n` (1-based), capped at five seconds
pub fn reconnect_delay(attempt: u32) -> Duration {
    Duration::from_millis(1_000 * u64::from(attempt.min(5)))
}

/// A connection that can emit events with acknowledgments
#[async_trait]
pub trait Transport: Send {
    /// Take the lifecycle event receiver (can only be called once)
    fn take_event_receiver(&mut self) -> Option<mpsc::UnboundedReceiver<SessionEvent>>;

    /// Current connection state
    fn state(&self) -> SessionState;

    /// Session id assigned by the remote on connect
    fn session_id(&self) -> Option<String>;

    /// Emit `event` with `payload`; `ack` is invoked at most once with the reply arguments
    ///
    /// Returns once the request has been handed to the connection. If the
    /// session drops `ack` without invoking it, no reply will ever arrive.
    async fn emit(&mut self, event: &str, payload: Value, ack: AckCallback) -> Result<()>;

    /// Close the connection
    async fn close(&mut self) -> Result<()>;
}
