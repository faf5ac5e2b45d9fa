//! CLI command handling
//!
//! Resolves settings, drives the runner or a single call, and formats output.

use std::path::Path;
use std::time::Duration;

use colored::Colorize;
use serde_json::Value;

use crate::call::CorrelatedCall;
use crate::commands::Commands;
use crate::common::config::{Config, RunSettings};
use crate::common::paths::default_output_dir;
use crate::common::{preview, Error, Result};
use crate::scenario::payload::KEY_FIELD;
use crate::scenario::runner::wait_connected;
use crate::scenario::{
    beacon_scenario, RunDates, RunOptions, RunReport, Runner, ScenarioContext, ScenarioFile,
    StepStatus,
};
use crate::sink::{list_artifacts, ResultSink};
use crate::transport::{SocketIoSession, Transport};

/// Longest data preview in the artifact listing
const LISTING_PREVIEW_CHARS: usize = 80;

/// Dispatch a CLI command
pub async fn dispatch(command: Commands, config: &Config) -> Result<()> {
    match command {
        Commands::Run { scenario, .. } => run(config.resolve()?, scenario.as_deref()).await,

        Commands::Call {
            event,
            payload,
            label,
            timeout_ms,
            no_key,
        } => {
            let settings = config.resolve()?;
            let key = (!no_key).then_some(settings.key.as_str());
            let payload = parse_payload(payload.as_deref(), key)?;

            let mut call = CorrelatedCall::new(event, payload)
                .timeout(timeout_ms.map_or(settings.ack_timeout, Duration::from_millis));
            if let Some(label) = label {
                call = call.label(label);
            }
            single_call(&settings, call).await
        }

        Commands::Artifacts => {
            let dir = config.output.dir.clone().unwrap_or_else(default_output_dir);
            artifacts(&dir).await
        }
    }
}

async fn run(settings: RunSettings, scenario_path: Option<&Path>) -> Result<()> {
    let ctx = ScenarioContext::new(
        settings.key.clone(),
        settings.player.clone(),
        RunDates::capture(),
    );
    let scenario = match scenario_path {
        Some(path) => {
            let file = ScenarioFile::load(path)?;
            if let Some(desc) = &file.description {
                tracing::info!(scenario = %file.name, "{}", desc);
            }
            file.plan(&ctx)?
        }
        None => beacon_scenario(&ctx),
    };
    scenario.validate()?;

    if ctx.player.is_empty() {
        tracing::info!("No player uuid or name configured, skipping player-specific queries");
    }

    println!(
        "\n{} {} ({} steps)",
        "Scenario:".bold(),
        scenario.name.cyan(),
        scenario.len()
    );

    let sink = ResultSink::prepare(&settings.output_dir).await?;
    tracing::info!("Connecting to {}", settings.endpoint);
    let session = SocketIoSession::connect(settings.endpoint.clone(), settings.session);

    let report = Runner::new(session, sink, RunOptions::from(&settings))
        .run(scenario)
        .await?;

    print_report(&report, &settings.output_dir);
    Ok(())
}

async fn single_call(settings: &RunSettings, call: CorrelatedCall) -> Result<()> {
    tracing::info!("Connecting to {}", settings.endpoint);
    let mut session = SocketIoSession::connect(settings.endpoint.clone(), settings.session);
    let mut events = session
        .take_event_receiver()
        .ok_or_else(|| Error::Internal("session event receiver already taken".to_string()))?;

    let outcome = match wait_connected(&mut events, settings.session.connect_budget()).await {
        Ok(sid) => {
            tracing::info!("Connected, session id = {}", sid);
            call.execute(&mut session).await
        }
        Err(e) => Err(e),
    };

    if let Err(e) = session.close().await {
        tracing::warn!(error = %e, "Failed to close session cleanly");
    }

    match outcome? {
        Some(value) => println!("{}", serde_json::to_string_pretty(&value)?),
        None => println!("{}", "<no-args>".dimmed()),
    }
    Ok(())
}

async fn artifacts(dir: &Path) -> Result<()> {
    let artifacts = list_artifacts(dir).await?;
    if artifacts.is_empty() {
        println!("No artifacts in {}", dir.display());
        return Ok(());
    }

    println!("{} {}\n", "Artifacts in".bold(), dir.display());
    for (path, record) in &artifacts {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        println!("  {} {}", name.cyan(), record.timestamp.dimmed());
        match &record.error {
            Some(error) => println!("      {} {}", "error:".red(), error),
            None => println!("      {}", preview(&record.data, LISTING_PREVIEW_CHARS)),
        }
    }
    println!("\n{} artifact(s)", artifacts.len());
    Ok(())
}

/// Build the request payload for a single call
///
/// The payload defaults to `{}`. When `key` is given it is added to object
/// payloads that do not already carry one.
pub fn parse_payload(payload: Option<&str>, key: Option<&str>) -> Result<Value> {
    let mut value = match payload {
        Some(text) => serde_json::from_str(text)
            .map_err(|e| Error::Config(format!("Invalid --payload JSON: {}", e)))?,
        None => Value::Object(Default::default()),
    };

    if let Some(key) = key {
        match &mut value {
            Value::Object(map) => {
                map.entry(KEY_FIELD)
                    .or_insert_with(|| Value::String(key.to_string()));
            }
            _ => tracing::warn!("Payload is not an object, the key was not added"),
        }
    }
    Ok(value)
}

fn print_report(report: &RunReport, output_dir: &Path) {
    println!();
    for step in &report.steps {
        let indent = if step.dependent { "    " } else { "  " };
        match &step.status {
            StepStatus::Written {
                path,
                remote_error: None,
            } => println!(
                "{}{} {} {}",
                indent,
                "✓".green(),
                step.label,
                artifact_file(path).dimmed()
            ),
            StepStatus::Written {
                path,
                remote_error: Some(reason),
            } => println!(
                "{}{} {} {} {}",
                indent,
                "!".yellow(),
                step.label,
                artifact_file(path).dimmed(),
                format!("(service error: {})", reason).yellow()
            ),
            StepStatus::Failed { error, .. } => {
                println!("{}{} {}: {}", indent, "✗".red(), step.label, error)
            }
            StepStatus::Skipped(reason) => println!(
                "{}{} {} {}",
                indent,
                "-".dimmed(),
                step.label,
                format!("(skipped: {})", reason).dimmed()
            ),
        }
    }

    let failed = report.failed();
    let summary = format!(
        "{} written, {} failed, {} skipped in {:.1}s",
        report.written(),
        failed,
        report.skipped(),
        report.elapsed.as_secs_f64()
    );
    println!();
    if failed == 0 {
        println!("{} {}", "✓".green().bold(), summary.green());
    } else {
        println!("{} {}", "!".yellow().bold(), summary.yellow());
    }
    println!("Results written to {}", output_dir.display());
}

fn artifact_file(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}
