//! Scenario runner
//!
//! Drives one session through a planned scenario: wait for the connection,
//! run each step strictly in order, persist results, then close the session
//! on every exit path. Step failures, including panics, are contained at the
//! step boundary and never end the run.

use std::any::Any;
use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::time::Duration;

use futures_util::FutureExt;
use serde_json::Value;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::Instant;

use crate::call::DEFAULT_ACK_TIMEOUT;
use crate::common::config::RunSettings;
use crate::common::{Error, Result};
use crate::sink::ResultSink;
use crate::transport::{SessionEvent, SessionOptions, Transport};

use super::step::{FollowUp, Planned, Scenario, Step};

/// Knobs for one run
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Acknowledgment timeout for steps without their own
    pub ack_timeout: Duration,
    /// Longest wait for the session to connect, retries included
    pub connect_budget: Duration,
    /// Write an artifact with the error for failed steps
    pub record_failures: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            ack_timeout: DEFAULT_ACK_TIMEOUT,
            connect_budget: SessionOptions::default().connect_budget(),
            record_failures: false,
        }
    }
}

impl From<&RunSettings> for RunOptions {
    fn from(settings: &RunSettings) -> Self {
        Self {
            ack_timeout: settings.ack_timeout,
            connect_budget: settings.session.connect_budget(),
            record_failures: settings.record_failures,
        }
    }
}

/// How a step ended
#[derive(Debug, Clone, PartialEq)]
pub enum StepStatus {
    /// Result persisted; `remote_error` is set when the service answered `success: false`
    Written {
        path: PathBuf,
        remote_error: Option<String>,
    },
    Failed {
        error: String,
        timed_out: bool,
    },
    Skipped(String),
}

/// Outcome of one step
#[derive(Debug, Clone)]
pub struct StepReport {
    pub label: String,
    pub event: Option<String>,
    pub artifact: Option<String>,
    pub status: StepStatus,
    pub elapsed: Duration,
    /// Produced by another step's follow-up
    pub dependent: bool,
}

impl StepReport {
    fn skipped(label: String, reason: String) -> Self {
        Self {
            label,
            event: None,
            artifact: None,
            status: StepStatus::Skipped(reason),
            elapsed: Duration::ZERO,
            dependent: false,
        }
    }
}

/// Outcome of a whole run
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub scenario: String,
    pub session_id: Option<String>,
    pub steps: Vec<StepReport>,
    pub elapsed: Duration,
}

impl RunReport {
    pub fn written(&self) -> usize {
        self.count(|s| matches!(s, StepStatus::Written { .. }))
    }

    pub fn failed(&self) -> usize {
        self.count(|s| matches!(s, StepStatus::Failed { .. }))
    }

    pub fn skipped(&self) -> usize {
        self.count(|s| matches!(s, StepStatus::Skipped(_)))
    }

    pub fn timeouts(&self) -> usize {
        self.count(|s| matches!(s, StepStatus::Failed { timed_out: true, .. }))
    }

    /// Steps whose result reported `success: false`
    pub fn remote_errors(&self) -> usize {
        self.count(|s| {
            matches!(
                s,
                StepStatus::Written {
                    remote_error: Some(_),
                    ..
                }
            )
        })
    }

    pub fn step(&self, label: &str) -> Option<&StepReport> {
        self.steps.iter().find(|s| s.label == label)
    }

    fn count(&self, pred: impl Fn(&StepStatus) -> bool) -> usize {
        self.steps.iter().filter(|s| pred(&s.status)).count()
    }
}

/// Runs one scenario over one exclusively owned session
pub struct Runner<T: Transport> {
    session: T,
    sink: ResultSink,
    options: RunOptions,
}

impl<T: Transport> Runner<T> {
    pub fn new(session: T, sink: ResultSink, options: RunOptions) -> Self {
        Self {
            session,
            sink,
            options,
        }
    }

    /// Execute `scenario` and close the session
    ///
    /// Fails only when the scenario is invalid or the session never
    /// connects; step failures are reported in the [`RunReport`].
    pub async fn run(mut self, scenario: Scenario) -> Result<RunReport> {
        let started = Instant::now();
        let outcome = self.execute(scenario).await;

        if let Err(e) = self.session.close().await {
            tracing::warn!(error = %e, "Failed to close session cleanly");
        }

        let mut report = outcome?;
        report.elapsed = started.elapsed();
        tracing::info!(
            scenario = %report.scenario,
            written = report.written(),
            failed = report.failed(),
            skipped = report.skipped(),
            elapsed_ms = report.elapsed.as_millis() as u64,
            "Scenario finished"
        );
        Ok(report)
    }

    async fn execute(&mut self, scenario: Scenario) -> Result<RunReport> {
        scenario.validate()?;

        let mut events = self
            .session
            .take_event_receiver()
            .ok_or_else(|| Error::Internal("session event receiver already taken".to_string()))?;
        let sid = wait_connected(&mut events, self.options.connect_budget).await?;
        tracing::info!("Connected, session id = {}", sid);

        let mut report = RunReport {
            scenario: scenario.name,
            session_id: Some(sid),
            ..RunReport::default()
        };

        let mut queue: VecDeque<(Planned, bool)> =
            scenario.items.into_iter().map(|item| (item, false)).collect();

        while let Some((item, dependent)) = queue.pop_front() {
            drain_events(&mut events);

            match item {
                Planned::Skip { label, reason } => {
                    tracing::info!(label = %label, "Skipping step: {}", reason);
                    report.steps.push(StepReport::skipped(label, reason));
                }
                Planned::Run(step) => {
                    let (step_reports, next) = self.run_step(step, dependent).await;
                    report.steps.extend(step_reports);
                    // Dependent lookups run right after the step they came from
                    if let Some(next) = next {
                        queue.push_front((Planned::Run(next), true));
                    }
                }
            }
        }

        drain_events(&mut events);
        Ok(report)
    }

    async fn run_step(&mut self, mut step: Step, dependent: bool) -> (Vec<StepReport>, Option<Step>) {
        let started = Instant::now();
        let follow_up = step.follow_up.take();
        let label = step.label.clone();
        let event = step.event.clone();
        let artifact = step.artifact.clone();

        let outcome = AssertUnwindSafe(self.perform(&step))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(Error::StepPanicked(panic_message(panic))));

        let mut reports = Vec::with_capacity(2);
        let mut next = None;

        let status = match outcome {
            Ok((path, value)) => {
                let remote_error = value.as_ref().and_then(remote_error);
                if let Some(reason) = &remote_error {
                    tracing::warn!(label = %label, "Service reported failure: {}", reason);
                }

                if let (Some(rule), Some(value)) = (&follow_up, &value) {
                    match derive_follow_up(rule, value) {
                        Ok(Some(dependent_step)) => next = Some(dependent_step),
                        Ok(None) => {
                            tracing::debug!(label = %label, "No records, skipping dependent lookup")
                        }
                        Err(e) => {
                            tracing::error!(label = %label, error = %e, "Follow-up failed");
                            reports.push(StepReport {
                                label: format!("{} (follow-up)", label),
                                event: None,
                                artifact: None,
                                status: StepStatus::Failed {
                                    error: e.to_string(),
                                    timed_out: false,
                                },
                                elapsed: Duration::ZERO,
                                dependent: true,
                            });
                        }
                    }
                }

                StepStatus::Written { path, remote_error }
            }
            Err(e) => {
                tracing::error!(label = %label, error = %e, "Step failed");
                if self.options.record_failures {
                    if let Err(write_err) = self.sink.write_failure(&artifact, &e.to_string()).await {
                        tracing::warn!(
                            label = %label,
                            error = %write_err,
                            "Could not record failure artifact"
                        );
                    }
                }
                StepStatus::Failed {
                    error: e.to_string(),
                    timed_out: e.is_timeout(),
                }
            }
        };

        reports.insert(
            0,
            StepReport {
                label,
                event: Some(event),
                artifact: Some(artifact),
                status,
                elapsed: started.elapsed(),
                dependent,
            },
        );
        (reports, next)
    }

    async fn perform(&mut self, step: &Step) -> Result<(PathBuf, Option<Value>)> {
        let value = step
            .to_call(self.options.ack_timeout)
            .execute(&mut self.session)
            .await?;
        let path = self.sink.write(&step.artifact, value.as_ref()).await?;
        Ok((path, value))
    }
}

/// Wait for `Connected`, logging failed attempts along the way
pub async fn wait_connected(
    events: &mut UnboundedReceiver<SessionEvent>,
    budget: Duration,
) -> Result<String> {
    let wait = async {
        while let Some(event) = events.recv().await {
            match event {
                SessionEvent::Connected { sid } => return Ok(sid),
                SessionEvent::ConnectError(reason) => {
                    tracing::error!("Connect error: {}", reason)
                }
                SessionEvent::TransportError(reason) => {
                    tracing::error!("Socket error: {}", reason)
                }
                SessionEvent::GaveUp(reason) | SessionEvent::Disconnected(reason) => {
                    return Err(Error::ConnectFailed(reason));
                }
            }
        }
        Err(Error::ConnectFailed(
            "session ended before connecting".to_string(),
        ))
    };

    tokio::time::timeout(budget, wait)
        .await
        .map_err(|_| Error::ConnectTimeout(budget.as_millis() as u64))?
}

/// Log lifecycle events that arrived since the last step
fn drain_events(events: &mut UnboundedReceiver<SessionEvent>) {
    while let Ok(event) = events.try_recv() {
        match event {
            SessionEvent::TransportError(reason) => tracing::error!("Socket error: {}", reason),
            SessionEvent::Disconnected(reason) => tracing::warn!("Disconnected: {}", reason),
            other => tracing::debug!(?other, "Session event"),
        }
    }
}

fn derive_follow_up(rule: &FollowUp, value: &Value) -> Result<Option<Step>> {
    std::panic::catch_unwind(AssertUnwindSafe(|| rule(value)))
        .unwrap_or_else(|panic| Err(Error::StepPanicked(panic_message(panic))))
}

/// Error text of a `{ "success": false, "error": ... }` result
pub fn remote_error(value: &Value) -> Option<String> {
    if value.get("success") != Some(&Value::Bool(false)) {
        return None;
    }
    Some(
        value
            .get("error")
            .and_then(Value::as_str)
            .unwrap_or("unspecified error")
            .to_string(),
    )
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
