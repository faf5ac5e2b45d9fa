//! Socket.IO session over WebSocket
//!
//! A background task owns the WebSocket. It performs the Engine.IO
//! handshake (with bounded reconnect attempts), keeps the heartbeat going,
//! writes outbound frames and routes `ack` packets to the callbacks
//! registered by [`SocketIoSession::emit`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::common::{Error, Result};

use super::codec::{EnginePacket, Handshake, PacketKind, SocketPacket, ROOT_NAMESPACE};
use super::{
    reconnect_delay, AckCallback, Endpoint, SessionEvent, SessionOptions, SessionState, Transport,
};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type PendingAcks = Arc<Mutex<HashMap<u64, AckCallback>>>;

/// How long `close` waits for the goodbye frames before aborting the task
const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// Lower bound on the heartbeat period
const MIN_PING_INTERVAL: Duration = Duration::from_secs(1);

/// Commands for the connection task
enum Outbound {
    Frame(String),
    Close,
}

/// Socket.IO client session
pub struct SocketIoSession {
    endpoint: Endpoint,
    /// Sequence number for ack ids
    next_ack_id: AtomicU64,
    /// Callbacks waiting for their ack packet
    pending: PendingAcks,
    outbound: mpsc::UnboundedSender<Outbound>,
    state: watch::Receiver<SessionState>,
    sid: Arc<OnceLock<String>>,
    event_rx: Option<mpsc::UnboundedReceiver<SessionEvent>>,
    task: Option<JoinHandle<()>>,
}

impl SocketIoSession {
    /// Start connecting to `endpoint`
    ///
    /// Returns immediately in the `connecting` state. The outcome is
    /// reported on the event channel as `Connected` or, after every attempt
    /// failed, `GaveUp`.
    pub fn connect(endpoint: Endpoint, options: SessionOptions) -> Self {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(SessionState::Connecting);
        let pending: PendingAcks = Arc::new(Mutex::new(HashMap::new()));
        let sid = Arc::new(OnceLock::new());

        let driver = Driver {
            url: endpoint.websocket_url(),
            options,
            events: event_tx,
            state: state_tx,
            pending: Arc::clone(&pending),
            sid: Arc::clone(&sid),
        };
        tracing::info!(url = %driver.url, "Connecting");
        let task = tokio::spawn(driver.run(outbound_rx));

        Self {
            endpoint,
            next_ack_id: AtomicU64::new(0),
            pending,
            outbound: outbound_tx,
            state: state_rx,
            sid,
            event_rx: Some(event_rx),
            task: Some(task),
        }
    }

    /// Endpoint this session talks to
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    fn next_ack_id(&self) -> u64 {
        self.next_ack_id.fetch_add(1, Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for SocketIoSession {
    fn take_event_receiver(&mut self) -> Option<mpsc::UnboundedReceiver<SessionEvent>> {
        self.event_rx.take()
    }

    fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    fn session_id(&self) -> Option<String> {
        self.sid.get().cloned()
    }

    async fn emit(&mut self, event: &str, payload: Value, ack: AckCallback) -> Result<()> {
        let state = self.state();
        if state != SessionState::Connected {
            return Err(Error::Transport(format!(
                "Cannot emit '{}' while session is {}",
                event, state
            )));
        }

        let id = self.next_ack_id();
        let frame = SocketPacket::event(event, payload, Some(id)).to_frame();
        self.pending.lock().await.insert(id, ack);

        tracing::trace!(id, frame = %frame, "Socket.IO >>>");
        if self.outbound.send(Outbound::Frame(frame)).is_err() {
            self.pending.lock().await.remove(&id);
            return Err(Error::Transport("Connection task has stopped".to_string()));
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        let Some(mut task) = self.task.take() else {
            return Ok(());
        };

        if self.state() == SessionState::Connected {
            let _ = self.outbound.send(Outbound::Close);
            if tokio::time::timeout(CLOSE_GRACE, &mut task).await.is_err() {
                tracing::warn!("Connection task did not stop in time, aborting");
                task.abort();
            }
        } else {
            task.abort();
        }

        tracing::debug!(endpoint = %self.endpoint, "Session closed");
        Ok(())
    }
}

impl Drop for SocketIoSession {
    fn drop(&mut self) {
        // Best-effort: a session dropped without close() must not leak the task
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// What the connection task should do after handling one frame
enum FrameAction {
    Continue,
    Reply(String),
    Closed(String),
}

/// State owned by the connection task
struct Driver {
    url: String,
    options: SessionOptions,
    events: mpsc::UnboundedSender<SessionEvent>,
    state: watch::Sender<SessionState>,
    pending: PendingAcks,
    sid: Arc<OnceLock<String>>,
}

impl Driver {
    async fn run(self, outbound: mpsc::UnboundedReceiver<Outbound>) {
        let Some((ws, handshake)) = self.connect_with_retries().await else {
            return;
        };

        let _ = self.sid.set(handshake.sid.clone());
        self.state.send_replace(SessionState::Connected);
        tracing::info!(sid = %handshake.sid, "Connected");
        self.report(SessionEvent::Connected {
            sid: handshake.sid.clone(),
        });

        let (reason, errored) = self.pump(ws, &handshake, outbound).await;

        self.state.send_replace(if errored {
            SessionState::Errored
        } else {
            SessionState::Disconnected
        });

        // Acks that can no longer arrive: dropping the callbacks tells the callers
        let dropped = {
            let mut pending = self.pending.lock().await;
            let n = pending.len();
            pending.clear();
            n
        };
        if dropped > 0 {
            tracing::debug!(dropped, "Dropped pending acknowledgments");
        }

        tracing::info!(%reason, "Disconnected");
        self.report(SessionEvent::Disconnected(reason));
    }

    fn report(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }

    async fn connect_with_retries(&self) -> Option<(WsStream, Handshake)> {
        let attempts = self.options.reconnection_attempts.saturating_add(1);
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            if attempt > 1 {
                tokio::time::sleep(reconnect_delay(attempt - 1)).await;
                tracing::info!(attempt, "Reconnecting");
            }

            let outcome = tokio::time::timeout(self.options.connect_timeout, open(&self.url)).await;
            let reason = match outcome {
                Ok(Ok(connection)) => return Some(connection),
                Ok(Err(e)) => e.to_string(),
                Err(_) => format!(
                    "timed out after {} ms",
                    self.options.connect_timeout.as_millis()
                ),
            };

            tracing::warn!(attempt, %reason, "Connect attempt failed");
            self.report(SessionEvent::ConnectError(reason.clone()));
            last_error = reason;
        }

        self.state.send_replace(SessionState::Errored);
        self.report(SessionEvent::GaveUp(format!(
            "{} connect attempt(s) failed, last error: {}",
            attempts, last_error
        )));
        None
    }

    /// Drive an established connection until it closes
    ///
    /// Returns the close reason and whether it was caused by an error.
    async fn pump(
        &self,
        ws: WsStream,
        handshake: &Handshake,
        mut outbound: mpsc::UnboundedReceiver<Outbound>,
    ) -> (String, bool) {
        let (mut sink, mut stream) = ws.split();

        let period = Duration::from_millis(handshake.ping_interval).max(MIN_PING_INTERVAL);
        let mut heartbeat = tokio::time::interval_at(Instant::now() + period, period);

        loop {
            tokio::select! {
                msg = stream.next() => {
                    let text = match msg {
                        Some(Ok(Message::Text(text))) => text,
                        Some(Ok(Message::Close(_))) => {
                            return ("closed by server".to_string(), false);
                        }
                        Some(Ok(_)) => continue,
                        Some(Err(e)) => {
                            self.report(SessionEvent::TransportError(e.to_string()));
                            return (e.to_string(), true);
                        }
                        None => return ("connection closed".to_string(), false),
                    };

                    tracing::trace!(frame = %text, "Socket.IO <<<");
                    match handle_frame(&text, &self.pending, &self.events).await {
                        FrameAction::Continue => {}
                        FrameAction::Reply(frame) => {
                            if let Err(e) = sink.send(Message::Text(frame)).await {
                                self.report(SessionEvent::TransportError(e.to_string()));
                                return (e.to_string(), true);
                            }
                        }
                        FrameAction::Closed(reason) => return (reason, false),
                    }
                }
                cmd = outbound.recv() => match cmd {
                    Some(Outbound::Frame(frame)) => {
                        if let Err(e) = sink.send(Message::Text(frame)).await {
                            self.report(SessionEvent::TransportError(e.to_string()));
                            return (e.to_string(), true);
                        }
                    }
                    Some(Outbound::Close) | None => {
                        let _ = sink.send(Message::Text(SocketPacket::disconnect().to_frame())).await;
                        let _ = sink.send(Message::Text(EnginePacket::Close.encode())).await;
                        let _ = sink.close().await;
                        return ("closed by client".to_string(), false);
                    }
                },
                _ = heartbeat.tick() => {
                    if let Err(e) = sink.send(Message::Text(EnginePacket::Ping(None).encode())).await {
                        self.report(SessionEvent::TransportError(e.to_string()));
                        return (e.to_string(), true);
                    }
                }
            }
        }
    }
}

/// Open the WebSocket and wait for the open handshake and namespace connect
async fn open(url: &str) -> Result<(WsStream, Handshake)> {
    let (mut ws, _response) = connect_async(url)
        .await
        .map_err(|e| Error::connect_failed(url, e))?;

    let mut handshake: Option<Handshake> = None;

    while let Some(msg) = ws.next().await {
        let text = match msg.map_err(|e| Error::Transport(e.to_string()))? {
            Message::Text(text) => text,
            Message::Close(_) => break,
            _ => continue,
        };

        match EnginePacket::decode(&text)? {
            EnginePacket::Open(h) => {
                tracing::debug!(sid = %h.sid, ping_interval = h.ping_interval, "Engine.IO handshake");
                handshake = Some(h);
            }
            EnginePacket::Message(body) => {
                let packet = SocketPacket::decode(&body)?;
                match packet.kind {
                    PacketKind::Connect if packet.namespace == ROOT_NAMESPACE => {
                        return match handshake.take() {
                            Some(h) => Ok((ws, h)),
                            None => Err(Error::Protocol(
                                "Namespace connect arrived before the open handshake".to_string(),
                            )),
                        };
                    }
                    PacketKind::Error => {
                        let reason = packet.data.map(|d| d.to_string()).unwrap_or_default();
                        return Err(Error::Transport(format!("Connection rejected: {}", reason)));
                    }
                    _ => {}
                }
            }
            EnginePacket::Ping(probe) => {
                ws.send(Message::Text(EnginePacket::Pong(probe).encode()))
                    .await
                    .map_err(|e| Error::Transport(e.to_string()))?;
            }
            EnginePacket::Close => break,
            _ => {}
        }
    }

    Err(Error::Disconnected(
        "connection closed during handshake".to_string(),
    ))
}

async fn handle_frame(
    text: &str,
    pending: &PendingAcks,
    events: &mpsc::UnboundedSender<SessionEvent>,
) -> FrameAction {
    let packet = match EnginePacket::decode(text) {
        Ok(packet) => packet,
        Err(e) => {
            tracing::warn!(error = %e, "Ignoring undecodable frame");
            return FrameAction::Continue;
        }
    };

    match packet {
        EnginePacket::Ping(probe) => FrameAction::Reply(EnginePacket::Pong(probe).encode()),
        EnginePacket::Close => FrameAction::Closed("closed by server".to_string()),
        EnginePacket::Message(body) => match SocketPacket::decode(&body) {
            Ok(packet) => handle_packet(packet, pending, events).await,
            Err(e) => {
                tracing::warn!(error = %e, "Ignoring undecodable packet");
                FrameAction::Continue
            }
        },
        _ => FrameAction::Continue,
    }
}

async fn handle_packet(
    packet: SocketPacket,
    pending: &PendingAcks,
    events: &mpsc::UnboundedSender<SessionEvent>,
) -> FrameAction {
    match packet.kind {
        PacketKind::Ack => {
            let Some(id) = packet.id else {
                tracing::warn!("Ack packet without an id");
                return FrameAction::Continue;
            };
            let callback = pending.lock().await.remove(&id);
            match callback {
                Some(callback) => callback(packet.into_arguments()),
                None => tracing::debug!(id, "Ack for an unknown request"),
            }
            FrameAction::Continue
        }
        PacketKind::Event => {
            if let Some((name, _)) = packet.event_parts() {
                tracing::debug!(event = name, "Ignoring server-initiated event");
            }
            FrameAction::Continue
        }
        PacketKind::Error => {
            let reason = packet.data.map(|d| d.to_string()).unwrap_or_default();
            tracing::warn!(%reason, "Server reported an error");
            let _ = events.send(SessionEvent::TransportError(reason));
            FrameAction::Continue
        }
        PacketKind::Disconnect => FrameAction::Closed("namespace disconnected by server".to_string()),
        PacketKind::Connect => FrameAction::Continue,
    }
}
