//! Scenario files
//!
//! A YAML scenario replaces the built-in script:
//!
//! ```yaml
//! name: mtr-only
//! steps:
//!   - event: get_player_mtr_logs
//!     label: mtr(today)
//!     artifact: mtr_logs_{today}
//!     player: optional
//!     payload:
//!       singleDate: "{today}"
//!       page: 1
//!       pageSize: 50
//!     detail:
//!       event: get_mtr_log_detail
//!       artifact: mtr_log
//! ```

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::common::{Error, Result};
use crate::sink::artifact_name;

use super::payload::PayloadBuilder;
use super::step::{first_record, id_text, Scenario, Step};
use super::ScenarioContext;

/// A scenario loaded from a YAML file
#[derive(Deserialize, Debug)]
pub struct ScenarioFile {
    /// Name of the scenario
    pub name: String,
    /// Optional description of what the scenario verifies
    pub description: Option<String>,
    /// Steps in execution order
    pub steps: Vec<StepConfig>,
}

/// Whether a step uses the player identity
#[derive(Deserialize, Debug, Default, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PlayerScope {
    /// Player fields are never sent
    #[default]
    None,
    /// Player fields are sent when configured
    Optional,
    /// The step is skipped without a player identity
    Required,
}

/// One declared step
#[derive(Deserialize, Debug)]
pub struct StepConfig {
    /// Event to emit
    pub event: String,
    /// Diagnostic label (default: the event name)
    pub label: Option<String>,
    /// Artifact name, `.json` appended when missing
    pub artifact: String,
    /// Extra payload fields
    #[serde(default)]
    pub payload: Map<String, Value>,
    #[serde(default)]
    pub player: PlayerScope,
    /// Whether the shared key is added to the payload
    #[serde(default = "default_true")]
    pub key: bool,
    /// Acknowledgment timeout override in milliseconds
    pub timeout_ms: Option<u64>,
    /// Dependent lookup on the first listed record
    pub detail: Option<DetailConfig>,
}

/// Follow-up lookup of the first record in a listing
#[derive(Deserialize, Debug, Clone)]
pub struct DetailConfig {
    pub event: String,
    pub label: Option<String>,
    /// Artifact prefix; the record id is appended
    pub artifact: String,
    /// Field holding the listed records
    #[serde(default = "default_records")]
    pub records: String,
    /// Field of a record holding its identifier
    #[serde(default = "default_id")]
    pub id: String,
    /// Payload field the identifier is sent as
    #[serde(default = "default_id")]
    pub param: String,
}

fn default_true() -> bool {
    true
}

fn default_records() -> String {
    "records".to_string()
}

fn default_id() -> String {
    "id".to_string()
}

impl ScenarioFile {
    /// Load and parse a scenario file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| Error::FileRead {
            path: path.display().to_string(),
            error: e.to_string(),
        })?;
        Self::from_yaml(&content).map_err(|e| match e {
            Error::ConfigParse(msg) => {
                Error::ConfigParse(format!("{}: {}", path.display(), msg))
            }
            other => other,
        })
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        let file: Self =
            serde_yaml::from_str(content).map_err(|e| Error::ConfigParse(e.to_string()))?;
        if file.steps.is_empty() {
            return Err(Error::ConfigParse(format!(
                "scenario '{}' has no steps",
                file.name
            )));
        }
        Ok(file)
    }

    /// Expand placeholders and build the validated plan
    pub fn plan(&self, ctx: &ScenarioContext) -> Result<Scenario> {
        let mut scenario = Scenario::new(self.name.clone());

        for config in &self.steps {
            let label = config.label.clone().unwrap_or_else(|| config.event.clone());
            if config.player == PlayerScope::Required && ctx.player.is_empty() {
                scenario.push_skip(label, "no player uuid or name configured");
                continue;
            }
            scenario.push(build_step(config, label, ctx));
        }

        scenario.validate()?;
        Ok(scenario)
    }
}

fn build_step(config: &StepConfig, label: String, ctx: &ScenarioContext) -> Step {
    let mut payload = if config.key {
        PayloadBuilder::authenticated(&ctx.key)
    } else {
        PayloadBuilder::new()
    };
    if config.player != PlayerScope::None {
        payload = payload.player(&ctx.player);
    }
    let fields = config
        .payload
        .iter()
        .map(|(name, value)| (name.clone(), expand_value(value, ctx)))
        .collect();

    let mut step = Step::new(
        config.event.clone(),
        payload.extend(fields).build(),
        with_extension(ctx.expand(&config.artifact)),
    )
    .label(label);

    if let Some(ms) = config.timeout_ms {
        step = step.timeout(Duration::from_millis(ms));
    }

    if let Some(detail) = &config.detail {
        let (records, id_field) = (detail.records.clone(), detail.id.clone());
        let detail = detail.clone();
        let key = config.key.then(|| ctx.key.clone());
        let prefix = ctx.expand(&detail.artifact);
        step = step.then(first_record(&records, &id_field, move |id: &Value| {
            let payload = match &key {
                Some(key) => PayloadBuilder::authenticated(key),
                None => PayloadBuilder::new(),
            };
            Step::new(
                detail.event.clone(),
                payload.field(&detail.param, id.clone()).build(),
                artifact_name(&prefix, Some(id_text(id).as_str())),
            )
            .label(detail.label.clone().unwrap_or_else(|| detail.event.clone()))
        }));
    }

    step
}

fn expand_value(value: &Value, ctx: &ScenarioContext) -> Value {
    match value {
        Value::String(s) => Value::String(ctx.expand(s)),
        Value::Array(items) => Value::Array(items.iter().map(|v| expand_value(v, ctx)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), expand_value(v, ctx)))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn with_extension(name: String) -> String {
    if name.ends_with(".json") {
        name
    } else {
        format!("{}.json", name)
    }
}
