//! Correlated request/acknowledgment calls
//!
//! A [`CorrelatedCall`] turns one emit-with-callback exchange into a single
//! awaitable result. The acknowledgment callback and the deadline race each
//! other; whichever settles first wins and the other becomes a no-op. A
//! late acknowledgment finds its receiver gone and is ignored.

use std::time::Duration;

use serde_json::Value;
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::common::{preview, Error, Result};
use crate::transport::{AckCallback, Transport};

/// Default time to wait for an acknowledgment
pub const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_millis(10_000);

/// Longest payload/result rendering in log lines
const LOG_PREVIEW_CHARS: usize = 2_000;

/// Lifecycle of one call
///
/// `Resolved(None)` is the absent marker for an acknowledgment that carried
/// no arguments; `Resolved(Some(Value::Null))` is an explicit `null`.
#[derive(Debug)]
pub enum CallState {
    Pending,
    Resolved(Option<Value>),
    Failed(Error),
}

impl CallState {
    /// Whether the call has reached a terminal state
    pub fn is_settled(&self) -> bool {
        !matches!(self, CallState::Pending)
    }

    /// Move from `Pending` to the terminal state for `outcome`
    ///
    /// Returns `false` and leaves the state untouched if already settled.
    pub fn settle(&mut self, outcome: Result<Option<Value>>) -> bool {
        if self.is_settled() {
            return false;
        }
        *self = match outcome {
            Ok(value) => CallState::Resolved(value),
            Err(e) => CallState::Failed(e),
        };
        true
    }

    /// Terminal result of the call
    pub fn into_result(self) -> Result<Option<Value>> {
        match self {
            CallState::Resolved(value) => Ok(value),
            CallState::Failed(e) => Err(e),
            CallState::Pending => Err(Error::Internal("call has not settled".to_string())),
        }
    }
}

/// Result value carried by an acknowledgment's argument list
///
/// Only the first argument is kept; zero arguments means absent.
pub fn first_ack_argument(args: Vec<Value>) -> Option<Value> {
    args.into_iter().next()
}

/// One request awaiting one acknowledgment
#[derive(Debug)]
pub struct CorrelatedCall {
    event: String,
    payload: Value,
    label: String,
    timeout: Duration,
    state: CallState,
}

impl CorrelatedCall {
    /// A call for `event`, labelled with the event name
    pub fn new(event: impl Into<String>, payload: Value) -> Self {
        let event = event.into();
        Self {
            label: event.clone(),
            event,
            payload,
            timeout: DEFAULT_ACK_TIMEOUT,
            state: CallState::Pending,
        }
    }

    /// Set the diagnostic label
    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Set the acknowledgment timeout
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn label_str(&self) -> &str {
        &self.label
    }

    pub fn timeout_duration(&self) -> Duration {
        self.timeout
    }

    /// Emit once and wait for the acknowledgment or the deadline
    ///
    /// The deadline is measured from the moment of emission.
    pub async fn execute<T>(mut self, transport: &mut T) -> Result<Option<Value>>
    where
        T: Transport + ?Sized,
    {
        let payload = std::mem::replace(&mut self.payload, Value::Null);
        tracing::info!(
            label = %self.label,
            payload = %preview(&payload, LOG_PREVIEW_CHARS),
            ">>> Emitting {}",
            self.event
        );

        let (tx, rx) = oneshot::channel();
        let ack: AckCallback = Box::new(move |args| {
            // Fails only when the call already timed out
            let _ = tx.send(first_ack_argument(args));
        });

        let deadline = Instant::now() + self.timeout;
        let outcome = match transport.emit(&self.event, payload, ack).await {
            Ok(()) => match tokio::time::timeout_at(deadline, rx).await {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(_)) => Err(Error::ack_dropped(&self.label)),
                Err(_) => Err(Error::ack_timeout(&self.label, self.timeout)),
            },
            Err(e) => Err(e),
        };
        self.state.settle(outcome);

        match &self.state {
            CallState::Resolved(Some(value)) => tracing::info!(
                label = %self.label,
                response = %preview(value, LOG_PREVIEW_CHARS),
                "<<< ACK response"
            ),
            CallState::Resolved(None) => {
                tracing::info!(label = %self.label, "<<< ACK response: <no-args>")
            }
            CallState::Failed(e) => tracing::warn!(label = %self.label, error = %e, "<<< No ACK"),
            CallState::Pending => {}
        }

        self.state.into_result()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::{MockSession, Reply};
    use serde_json::json;

    #[test]
    fn test_settle_is_single_transition() {
        let mut state = CallState::Pending;
        assert!(!state.is_settled());

        assert!(state.settle(Err(Error::ack_timeout("x", Duration::from_millis(5)))));
        assert!(!state.settle(Ok(Some(json!(1)))));

        assert!(matches!(state, CallState::Failed(Error::AckTimeout { .. })));
    }

    #[test]
    fn test_pending_has_no_result() {
        assert!(matches!(
            CallState::Pending.into_result(),
            Err(Error::Internal(_))
        ));
    }

    #[test]
    fn test_first_ack_argument() {
        assert_eq!(first_ack_argument(vec![]), None);
        assert_eq!(first_ack_argument(vec![json!(null)]), Some(json!(null)));
        assert_eq!(first_ack_argument(vec![json!([]), json!("rest")]), Some(json!([])));
    }

    #[tokio::test]
    async fn test_resolves_first_argument() {
        let mut session = MockSession::new().reply(
            "get_status",
            Reply::Args(vec![json!({"online": true}), json!("ignored")]),
        );

        let value = CorrelatedCall::new("get_status", json!({"key": "k"}))
            .execute(&mut session)
            .await
            .unwrap();
        assert_eq!(value, Some(json!({"online": true})));
    }

    #[tokio::test]
    async fn test_zero_args_is_absent_not_falsy() {
        let mut session = MockSession::new()
            .reply("force_update", Reply::empty())
            .reply("list_online_players", Reply::value(json!([])))
            .reply("count", Reply::value(json!(0)));

        let absent = CorrelatedCall::new("force_update", json!({}))
            .execute(&mut session)
            .await
            .unwrap();
        let empty = CorrelatedCall::new("list_online_players", json!({}))
            .execute(&mut session)
            .await
            .unwrap();
        let zero = CorrelatedCall::new("count", json!({}))
            .execute(&mut session)
            .await
            .unwrap();

        assert_eq!(absent, None);
        assert_eq!(empty, Some(json!([])));
        assert_eq!(zero, Some(json!(0)));
    }

    #[tokio::test]
    async fn test_timeout_when_never_acknowledged() {
        let mut session = MockSession::new().reply("get_player_stats", Reply::Never);

        let started = Instant::now();
        let err = CorrelatedCall::new("get_player_stats", json!({}))
            .label("stats")
            .timeout(Duration::from_millis(50))
            .execute(&mut session)
            .await
            .unwrap_err();

        assert!(started.elapsed() >= Duration::from_millis(50));
        match err {
            Error::AckTimeout { label, timeout_ms } => {
                assert_eq!(label, "stats");
                assert_eq!(timeout_ms, 50);
            }
            other => panic!("Expected AckTimeout, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_late_ack_is_ignored() {
        let mut session = MockSession::new()
            .reply("slow", Reply::after(Duration::from_millis(80), json!("late")));
        let journal = session.journal();

        let result = CorrelatedCall::new("slow", json!({}))
            .timeout(Duration::from_millis(20))
            .execute(&mut session)
            .await;
        assert!(matches!(result, Err(Error::AckTimeout { .. })));

        // The ack still fires afterwards, into a call that has already settled
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(journal.ack_count("slow"), 1);
        assert_eq!(journal.emit_count("slow"), 1);
    }

    #[tokio::test]
    async fn test_dropped_callback_is_transport_failure() {
        let mut session = MockSession::new().reply("lost", Reply::Drop);

        let err = CorrelatedCall::new("lost", json!({}))
            .timeout(Duration::from_secs(5))
            .execute(&mut session)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::AckDropped { .. }));
    }

    #[tokio::test]
    async fn test_emit_failure_is_reported_without_waiting() {
        let mut session = MockSession::new();
        session.close().await.unwrap();

        let err = CorrelatedCall::new("get_status", json!({}))
            .execute(&mut session)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Transport(_)));
    }

    #[tokio::test]
    async fn test_exactly_one_emission() {
        let mut session = MockSession::new().reply("get_status", Reply::value(json!(1)));
        let journal = session.journal();

        CorrelatedCall::new("get_status", json!({"key": "k"}))
            .execute(&mut session)
            .await
            .unwrap();

        assert_eq!(journal.emitted(), vec![("get_status".to_string(), json!({"key": "k"}))]);
    }
}
