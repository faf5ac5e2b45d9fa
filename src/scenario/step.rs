//! Scenario steps and the plan they form

use std::collections::HashSet;
use std::fmt;
use std::time::Duration;

use serde_json::Value;

use crate::call::CorrelatedCall;
use crate::common::{Error, Result};

/// Derives a dependent step from a step's result
///
/// `Ok(None)` means there is nothing to look up and the dependent call is
/// skipped without being reported.
pub type FollowUp = Box<dyn Fn(&Value) -> Result<Option<Step>> + Send + Sync>;

/// One request, the artifact it produces and an optional follow-up
pub struct Step {
    pub label: String,
    pub event: String,
    pub payload: Value,
    pub artifact: String,
    /// Overrides the run's acknowledgment timeout
    pub timeout: Option<Duration>,
    pub follow_up: Option<FollowUp>,
}

impl Step {
    /// A step labelled with its event name
    pub fn new(event: impl Into<String>, payload: Value, artifact: impl Into<String>) -> Self {
        let event = event.into();
        Self {
            label: event.clone(),
            event,
            payload,
            artifact: artifact.into(),
            timeout: None,
            follow_up: None,
        }
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Attach a follow-up rule
    pub fn then<F>(mut self, follow_up: F) -> Self
    where
        F: Fn(&Value) -> Result<Option<Step>> + Send + Sync + 'static,
    {
        self.follow_up = Some(Box::new(follow_up));
        self
    }

    /// The correlated call this step issues
    pub fn to_call(&self, default_timeout: Duration) -> CorrelatedCall {
        CorrelatedCall::new(self.event.clone(), self.payload.clone())
            .label(self.label.clone())
            .timeout(self.timeout.unwrap_or(default_timeout))
    }
}

impl fmt::Debug for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Step")
            .field("label", &self.label)
            .field("event", &self.event)
            .field("payload", &self.payload)
            .field("artifact", &self.artifact)
            .field("timeout", &self.timeout)
            .field("follow_up", &self.follow_up.is_some())
            .finish()
    }
}

/// Render a record identifier for use in an artifact name
pub fn id_text(id: &Value) -> String {
    match id {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Follow-up that looks up the first record of a listing
///
/// Reads `result[records_field][0][id_field]` and hands it to `build`.
/// A missing or empty listing yields no step; a first record without a
/// usable identifier is an [`Error::Extraction`].
pub fn first_record<F>(
    records_field: &str,
    id_field: &str,
    build: F,
) -> impl Fn(&Value) -> Result<Option<Step>> + Send + Sync + 'static
where
    F: Fn(&Value) -> Step + Send + Sync + 'static,
{
    let records_field = records_field.to_string();
    let id_field = id_field.to_string();

    move |result: &Value| {
        let Some(first) = result
            .get(&records_field)
            .and_then(Value::as_array)
            .and_then(|records| records.first())
        else {
            return Ok(None);
        };

        match first.get(&id_field) {
            Some(id) if !id.is_null() && !id.is_object() && !id.is_array() => Ok(Some(build(id))),
            _ => Err(Error::Extraction(format!(
                "first record of '{}' has no usable '{}'",
                records_field, id_field
            ))),
        }
    }
}

/// A planned entry: either a step to run or a step skipped up front
#[derive(Debug)]
pub enum Planned {
    Run(Step),
    Skip { label: String, reason: String },
}

impl Planned {
    pub fn label(&self) -> &str {
        match self {
            Planned::Run(step) => &step.label,
            Planned::Skip { label, .. } => label,
        }
    }
}

/// Ordered plan of steps for one run
#[derive(Debug, Default)]
pub struct Scenario {
    pub name: String,
    pub items: Vec<Planned>,
}

impl Scenario {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            items: Vec::new(),
        }
    }

    pub fn push(&mut self, step: Step) {
        self.items.push(Planned::Run(step));
    }

    pub fn push_skip(&mut self, label: impl Into<String>, reason: impl Into<String>) {
        self.items.push(Planned::Skip {
            label: label.into(),
            reason: reason.into(),
        });
    }

    pub fn step(mut self, step: Step) -> Self {
        self.push(step);
        self
    }

    pub fn skip(mut self, label: impl Into<String>, reason: impl Into<String>) -> Self {
        self.push_skip(label, reason);
        self
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Reject statically known artifact names that repeat
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for item in &self.items {
            if let Planned::Run(step) = item {
                if !seen.insert(step.artifact.as_str()) {
                    return Err(Error::Config(format!(
                        "Scenario '{}' writes artifact '{}' more than once",
                        self.name, step.artifact
                    )));
                }
            }
        }
        Ok(())
    }
}
