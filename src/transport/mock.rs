//! Scriptable in-process session for tests
//!
//! Replies are configured per event. Every emission, delivered ack and
//! close is written to a shared [`Journal`] so tests can assert ordering
//! after the session has been moved into a runner.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::common::{Error, Result};

use super::{AckCallback, SessionEvent, SessionState, Transport};

/// How the mock answers one event
#[derive(Debug, Clone)]
pub enum Reply {
    /// Acknowledge with these arguments right away
    Args(Vec<Value>),
    /// Acknowledge with these arguments after a delay
    Delayed(Duration, Vec<Value>),
    /// Keep the callback but never invoke it
    Never,
    /// Drop the callback without invoking it, as a lost connection would
    Drop,
}

impl Reply {
    /// Acknowledge with a single value
    pub fn value(value: Value) -> Self {
        Self::Args(vec![value])
    }

    /// Acknowledge with no arguments
    pub fn empty() -> Self {
        Self::Args(Vec::new())
    }

    /// Acknowledge with a single value after `delay`
    pub fn after(delay: Duration, value: Value) -> Self {
        Self::Delayed(delay, vec![value])
    }
}

/// One recorded interaction
#[derive(Debug, Clone)]
pub enum JournalEntry {
    Emitted {
        event: String,
        payload: Value,
        at: Instant,
    },
    Acked {
        event: String,
        at: Instant,
    },
    Closed {
        at: Instant,
    },
}

/// Shared record of everything the mock saw
#[derive(Debug, Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<JournalEntry>>>);

impl Journal {
    fn push(&self, entry: JournalEntry) {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(entry);
    }

    /// Snapshot of all entries in order
    pub fn entries(&self) -> Vec<JournalEntry> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Emitted events with their payloads, in emission order
    pub fn emitted(&self) -> Vec<(String, Value)> {
        self.entries()
            .into_iter()
            .filter_map(|e| match e {
                JournalEntry::Emitted { event, payload, .. } => Some((event, payload)),
                _ => None,
            })
            .collect()
    }

    /// Emitted event names, in emission order
    pub fn emitted_events(&self) -> Vec<String> {
        self.emitted().into_iter().map(|(event, _)| event).collect()
    }

    /// Number of emissions of `event`
    pub fn emit_count(&self, event: &str) -> usize {
        self.emitted().iter().filter(|(e, _)| e == event).count()
    }

    /// Number of acks the mock delivered for `event`
    pub fn ack_count(&self, event: &str) -> usize {
        self.entries()
            .iter()
            .filter(|e| matches!(e, JournalEntry::Acked { event: name, .. } if name == event))
            .count()
    }

    /// Number of times the session was closed
    pub fn close_count(&self) -> usize {
        self.entries()
            .iter()
            .filter(|e| matches!(e, JournalEntry::Closed { .. }))
            .count()
    }
}

/// Mock session with per-event replies
pub struct MockSession {
    replies: HashMap<String, Reply>,
    default_reply: Reply,
    state: SessionState,
    sid: Option<String>,
    journal: Journal,
    /// Callbacks for `Reply::Never`, kept alive until close
    held: Vec<AckCallback>,
    event_tx: mpsc::UnboundedSender<SessionEvent>,
    event_rx: Option<mpsc::UnboundedReceiver<SessionEvent>>,
}

impl Default for MockSession {
    fn default() -> Self {
        Self::new()
    }
}

impl MockSession {
    /// A session that connects at once and acknowledges unknown events with no arguments
    pub fn new() -> Self {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let sid = "mock-session".to_string();
        let _ = event_tx.send(SessionEvent::Connected { sid: sid.clone() });

        Self {
            replies: HashMap::new(),
            default_reply: Reply::empty(),
            state: SessionState::Connected,
            sid: Some(sid),
            journal: Journal::default(),
            held: Vec::new(),
            event_tx,
            event_rx: Some(event_rx),
        }
    }

    /// A session whose every connect attempt fails
    pub fn refusing(attempts: u32, reason: &str) -> Self {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        for _ in 0..attempts {
            let _ = event_tx.send(SessionEvent::ConnectError(reason.to_string()));
        }
        let _ = event_tx.send(SessionEvent::GaveUp(reason.to_string()));

        Self {
            replies: HashMap::new(),
            default_reply: Reply::empty(),
            state: SessionState::Errored,
            sid: None,
            journal: Journal::default(),
            held: Vec::new(),
            event_tx,
            event_rx: Some(event_rx),
        }
    }

    /// Configure the reply for `event`
    pub fn reply(mut self, event: &str, reply: Reply) -> Self {
        self.replies.insert(event.to_string(), reply);
        self
    }

    /// Configure the reply for events without their own entry
    pub fn default_reply(mut self, reply: Reply) -> Self {
        self.default_reply = reply;
        self
    }

    /// Handle to the interaction journal
    pub fn journal(&self) -> Journal {
        self.journal.clone()
    }

    /// Push a lifecycle event as if the connection reported it
    pub fn inject_event(&self, event: SessionEvent) {
        let _ = self.event_tx.send(event);
    }

    fn deliver(&self, event: &str, delay: Option<Duration>, args: Vec<Value>, ack: AckCallback) {
        let journal = self.journal.clone();
        let event = event.to_string();
        // Acks arrive out of band, never inside emit()
        tokio::spawn(async move {
            match delay {
                Some(delay) => tokio::time::sleep(delay).await,
                None => tokio::task::yield_now().await,
            }
            journal.push(JournalEntry::Acked {
                event,
                at: Instant::now(),
            });
            ack(args);
        });
    }
}

#[async_trait]
impl Transport for MockSession {
    fn take_event_receiver(&mut self) -> Option<mpsc::UnboundedReceiver<SessionEvent>> {
        self.event_rx.take()
    }

    fn state(&self) -> SessionState {
        self.state
    }

    fn session_id(&self) -> Option<String> {
        self.sid.clone()
    }

    async fn emit(&mut self, event: &str, payload: Value, ack: AckCallback) -> Result<()> {
        if self.state != SessionState::Connected {
            return Err(Error::Transport(format!(
                "Cannot emit '{}' while session is {}",
                event, self.state
            )));
        }

        self.journal.push(JournalEntry::Emitted {
            event: event.to_string(),
            payload,
            at: Instant::now(),
        });

        let reply = self
            .replies
            .get(event)
            .cloned()
            .unwrap_or_else(|| self.default_reply.clone());

        match reply {
            Reply::Args(args) => self.deliver(event, None, args, ack),
            Reply::Delayed(delay, args) => self.deliver(event, Some(delay), args, ack),
            Reply::Never => self.held.push(ack),
            Reply::Drop => drop(ack),
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.state = SessionState::Disconnected;
        self.held.clear();
        self.journal.push(JournalEntry::Closed { at: Instant::now() });
        let _ = self
            .event_tx
            .send(SessionEvent::Disconnected("closed by client".to_string()));
        Ok(())
    }
}
