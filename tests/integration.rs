//! End-to-end tests for the scenario runner
//!
//! These tests drive complete runs against a scripted in-process session
//! and verify the artifacts on disk, the emission order and that the
//! session is closed exactly once on every path.

use std::path::{Path, PathBuf};
use std::time::Duration;

use beacon_probe::scenario::{
    beacon_scenario, first_record, PlayerIdentity, RunDates, RunOptions, ScenarioContext,
    ScenarioFile, StepStatus,
};
use beacon_probe::sink::{list_artifacts, read_artifact};
use beacon_probe::transport::mock::{JournalEntry, MockSession, Reply};
use beacon_probe::transport::SessionEvent;
use beacon_probe::{Error, ResultSink, Runner, Scenario, Step};
use chrono::NaiveDate;
use serde_json::{json, Value};
use tempfile::TempDir;

/// Temporary output directory for one test
struct TestContext {
    _temp: TempDir,
    output: PathBuf,
}

impl TestContext {
    fn new() -> Self {
        let temp = tempfile::tempdir().expect("Failed to create temp dir");
        let output = temp.path().join("output");
        Self {
            _temp: temp,
            output,
        }
    }

    async fn sink(&self) -> ResultSink {
        ResultSink::prepare(&self.output)
            .await
            .expect("Failed to prepare output dir")
    }

    fn artifact(&self, name: &str) -> PathBuf {
        self.output.join(name)
    }

    async fn data(&self, name: &str) -> Value {
        read_artifact(&self.artifact(name))
            .await
            .unwrap_or_else(|e| panic!("Failed to read {}: {}", name, e))
            .data
    }
}

fn options(ack_ms: u64) -> RunOptions {
    RunOptions {
        ack_timeout: Duration::from_millis(ack_ms),
        connect_budget: Duration::from_secs(1),
        record_failures: false,
    }
}

fn context(player: PlayerIdentity) -> ScenarioContext {
    ScenarioContext::new(
        "secret",
        player,
        RunDates::new(NaiveDate::from_ymd_opt(2024, 1, 3).unwrap()),
    )
}

fn keyed() -> Value {
    json!({"key": "k"})
}

// ============== Core run behaviour ==============

#[tokio::test]
async fn test_results_written_and_timeout_contained() {
    let ctx = TestContext::new();
    let session = MockSession::new()
        .reply("get_status", Reply::value(json!({"online": true})))
        .reply("get_player_stats", Reply::Never);
    let journal = session.journal();

    let scenario = Scenario::new("status-and-stats")
        .step(Step::new("get_status", keyed(), "server_status.json"))
        .step(Step::new(
            "get_player_stats",
            json!({"key": "k", "playerName": "Steve"}),
            "stats_Steve.json",
        ))
        .step(Step::new("force_update", keyed(), "force_update.json"));

    let report = Runner::new(session, ctx.sink().await, options(100))
        .run(scenario)
        .await
        .unwrap();

    assert_eq!(ctx.data("server_status.json").await, json!({"online": true}));
    assert!(!ctx.artifact("stats_Steve.json").exists());
    // Zero-argument ack still produces an artifact, with null data
    assert_eq!(ctx.data("force_update.json").await, Value::Null);

    assert_eq!(report.timeouts(), 1);
    assert_eq!(report.written(), 2);
    match &report.step("get_player_stats").unwrap().status {
        StepStatus::Failed { error, timed_out } => {
            assert!(timed_out);
            assert_eq!(error, "get_player_stats ack timeout after 100 ms");
        }
        other => panic!("Expected timeout, got {:?}", other),
    }

    assert_eq!(journal.close_count(), 1);
    assert_eq!(report.session_id.as_deref(), Some("mock-session"));
}

#[tokio::test]
async fn test_steps_run_in_declaration_order() {
    let ctx = TestContext::new();
    let session = MockSession::new()
        .reply("b", Reply::after(Duration::from_millis(30), json!("slow")))
        .reply("a", Reply::value(json!("fast")));
    let journal = session.journal();

    let scenario = Scenario::new("order")
        .step(Step::new("b", keyed(), "b.json"))
        .step(Step::new("a", keyed(), "a.json"))
        .step(Step::new("c", keyed(), "c.json"));

    Runner::new(session, ctx.sink().await, options(1_000))
        .run(scenario)
        .await
        .unwrap();

    assert_eq!(journal.emitted_events(), vec!["b", "a", "c"]);
    // The slow ack of "b" arrives before "a" is emitted
    let entries = journal.entries();
    let acked_b = entries
        .iter()
        .position(|e| matches!(e, JournalEntry::Acked { event, .. } if event == "b"))
        .unwrap();
    let emitted_a = entries
        .iter()
        .position(|e| matches!(e, JournalEntry::Emitted { event, .. } if event == "a"))
        .unwrap();
    assert!(acked_b < emitted_a);
}

#[tokio::test]
async fn test_failed_step_does_not_stop_the_run() {
    let ctx = TestContext::new();
    let session = MockSession::new()
        .reply("lost", Reply::Drop)
        .reply("after", Reply::value(json!({"ok": 1})));

    let scenario = Scenario::new("isolation")
        .step(Step::new("lost", keyed(), "lost.json"))
        .step(Step::new("after", keyed(), "after.json"));

    let report = Runner::new(session, ctx.sink().await, options(1_000))
        .run(scenario)
        .await
        .unwrap();

    assert_eq!(report.failed(), 1);
    assert_eq!(report.timeouts(), 0);
    assert!(!ctx.artifact("lost.json").exists());
    assert_eq!(ctx.data("after.json").await, json!({"ok": 1}));
}

#[tokio::test]
async fn test_record_failures_writes_error_artifact() {
    let ctx = TestContext::new();
    let session = MockSession::new().reply("get_status", Reply::Never);

    let scenario = Scenario::new("failures").step(Step::new("get_status", keyed(), "server_status.json"));
    let options = RunOptions {
        record_failures: true,
        ..options(50)
    };

    Runner::new(session, ctx.sink().await, options)
        .run(scenario)
        .await
        .unwrap();

    let record = read_artifact(&ctx.artifact("server_status.json")).await.unwrap();
    assert_eq!(record.data, Value::Null);
    assert_eq!(
        record.error.as_deref(),
        Some("get_status ack timeout after 50 ms")
    );
}

#[tokio::test]
async fn test_remote_error_is_written_and_flagged() {
    let ctx = TestContext::new();
    let session = MockSession::new().reply(
        "get_status",
        Reply::value(json!({"success": false, "error": "INVALID_KEY"})),
    );

    let scenario = Scenario::new("remote").step(Step::new("get_status", keyed(), "server_status.json"));
    let report = Runner::new(session, ctx.sink().await, options(1_000))
        .run(scenario)
        .await
        .unwrap();

    assert_eq!(report.remote_errors(), 1);
    assert_eq!(
        ctx.data("server_status.json").await,
        json!({"success": false, "error": "INVALID_KEY"})
    );
}

// ============== Follow-ups ==============

fn listing_step() -> Step {
    Step::new("get_player_mtr_logs", keyed(), "mtr_logs_page1.json").then(first_record(
        "records",
        "id",
        |id: &Value| {
            Step::new(
                "get_mtr_log_detail",
                json!({"key": "k", "id": id}),
                format!("mtr_log_{}.json", id),
            )
        },
    ))
}

#[tokio::test]
async fn test_follow_up_issued_for_first_record() {
    let ctx = TestContext::new();
    let session = MockSession::new()
        .reply(
            "get_player_mtr_logs",
            Reply::value(json!({"records": [{"id": 11}, {"id": 12}], "total": 2})),
        )
        .reply("get_mtr_log_detail", Reply::value(json!({"id": 11, "line": "L1"})));
    let journal = session.journal();

    let scenario = Scenario::new("chain")
        .step(listing_step())
        .step(Step::new("force_update", keyed(), "force_update.json"));

    let report = Runner::new(session, ctx.sink().await, options(1_000))
        .run(scenario)
        .await
        .unwrap();

    assert_eq!(
        journal.emitted_events(),
        vec!["get_player_mtr_logs", "get_mtr_log_detail", "force_update"]
    );
    assert_eq!(
        journal.emitted()[1].1,
        json!({"key": "k", "id": 11})
    );
    assert_eq!(ctx.data("mtr_log_11.json").await, json!({"id": 11, "line": "L1"}));
    assert!(report.steps[1].dependent);
}

#[tokio::test]
async fn test_follow_up_skipped_for_empty_listing() {
    let ctx = TestContext::new();
    let session = MockSession::new().reply(
        "get_player_mtr_logs",
        Reply::value(json!({"records": [], "total": 0})),
    );
    let journal = session.journal();

    let report = Runner::new(session, ctx.sink().await, options(1_000))
        .run(Scenario::new("empty").step(listing_step()))
        .await
        .unwrap();

    assert_eq!(journal.emit_count("get_mtr_log_detail"), 0);
    assert_eq!(report.steps.len(), 1);
    assert_eq!(report.failed(), 0);
}

#[tokio::test]
async fn test_follow_up_skipped_when_listing_fails() {
    let ctx = TestContext::new();
    let session = MockSession::new().reply("get_player_mtr_logs", Reply::Never);
    let journal = session.journal();

    Runner::new(session, ctx.sink().await, options(30))
        .run(Scenario::new("failed-listing").step(listing_step()))
        .await
        .unwrap();

    assert_eq!(journal.emit_count("get_mtr_log_detail"), 0);
}

#[tokio::test]
async fn test_missing_id_is_contained() {
    let ctx = TestContext::new();
    let session = MockSession::new().reply(
        "get_player_mtr_logs",
        Reply::value(json!({"records": [{"name": "no id"}]})),
    );
    let journal = session.journal();

    let scenario = Scenario::new("no-id")
        .step(listing_step())
        .step(Step::new("force_update", keyed(), "force_update.json"));
    let report = Runner::new(session, ctx.sink().await, options(1_000))
        .run(scenario)
        .await
        .unwrap();

    // The listing itself was written; the extraction failure is its own entry
    assert!(ctx.artifact("mtr_logs_page1.json").exists());
    assert_eq!(report.failed(), 1);
    assert_eq!(journal.emitted_events(), vec!["get_player_mtr_logs", "force_update"]);
}

#[tokio::test]
async fn test_runtime_duplicate_artifact_is_step_failure() {
    let ctx = TestContext::new();
    let session = MockSession::new().reply(
        "listing",
        Reply::value(json!({"records": [{"id": "page1"}]})),
    );

    let listing = Step::new("listing", keyed(), "mtr_logs_page1.json").then(first_record(
        "records",
        "id",
        |id: &Value| {
            Step::new(
                "detail",
                json!({"id": id}),
                format!("mtr_logs_{}.json", id.as_str().unwrap_or_default()),
            )
        },
    ));

    let report = Runner::new(session, ctx.sink().await, options(1_000))
        .run(Scenario::new("dup").step(listing))
        .await
        .unwrap();

    match &report.steps[1].status {
        StepStatus::Failed { error, .. } => assert!(error.contains("already written")),
        other => panic!("Expected duplicate failure, got {:?}", other),
    }
    assert_eq!(ctx.data("mtr_logs_page1.json").await, json!({"records": [{"id": "page1"}]}));
}

#[tokio::test]
async fn test_panicking_follow_up_is_contained() {
    let ctx = TestContext::new();
    let session = MockSession::new().reply("listing", Reply::value(json!({"records": []})));
    let journal = session.journal();

    let listing = Step::new("listing", keyed(), "listing.json")
        .then(|_: &Value| -> beacon_probe::Result<Option<Step>> { panic!("follow-up bug") });

    let report = Runner::new(session, ctx.sink().await, options(1_000))
        .run(
            Scenario::new("panic")
                .step(listing)
                .step(Step::new("after", keyed(), "after.json")),
        )
        .await
        .unwrap();

    assert_eq!(report.failed(), 1);
    assert!(ctx.artifact("after.json").exists());
    assert_eq!(journal.close_count(), 1);
}

// ============== Connect failures ==============

#[tokio::test]
async fn test_connect_failure_is_fatal_and_closes() {
    let ctx = TestContext::new();
    let session = MockSession::refusing(3, "connection refused");
    let journal = session.journal();

    let err = Runner::new(session, ctx.sink().await, options(1_000))
        .run(Scenario::new("never").step(Step::new("get_status", keyed(), "s.json")))
        .await
        .unwrap_err();

    assert!(err.is_fatal());
    assert!(matches!(err, Error::ConnectFailed(_)));
    assert!(journal.emitted().is_empty());
    assert_eq!(journal.close_count(), 1);
}

#[tokio::test]
async fn test_invalid_scenario_still_closes_session() {
    let ctx = TestContext::new();
    let session = MockSession::new();
    let journal = session.journal();

    let scenario = Scenario::new("dup")
        .step(Step::new("a", keyed(), "x.json"))
        .step(Step::new("b", keyed(), "x.json"));
    let err = Runner::new(session, ctx.sink().await, options(1_000))
        .run(scenario)
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Config(_)));
    assert!(journal.emitted().is_empty());
    assert_eq!(journal.close_count(), 1);
}

#[tokio::test]
async fn test_lifecycle_events_between_steps_do_not_abort_run() {
    let ctx = TestContext::new();
    let session = MockSession::new().reply("get_status", Reply::value(json!({"online": true})));
    session.inject_event(SessionEvent::TransportError("transport close".to_string()));
    session.inject_event(SessionEvent::Disconnected("ping timeout".to_string()));
    let journal = session.journal();

    let scenario = Scenario::new("flaky")
        .step(Step::new("get_status", keyed(), "server_status.json"))
        .step(Step::new("force_update", keyed(), "force_update.json"));
    let report = Runner::new(session, ctx.sink().await, options(1_000))
        .run(scenario)
        .await
        .unwrap();

    assert_eq!(report.written(), 2);
    assert_eq!(journal.emitted_events(), vec!["get_status", "force_update"]);
    assert_eq!(journal.close_count(), 1);
}

// ============== Built-in and file scenarios ==============

#[tokio::test]
async fn test_builtin_scenario_without_player() {
    let ctx = TestContext::new();
    let session = MockSession::new()
        .default_reply(Reply::value(json!({"success": true})))
        .reply(
            "get_player_mtr_logs",
            Reply::value(json!({"records": [{"id": 7}]})),
        );
    let journal = session.journal();

    let report = Runner::new(session, ctx.sink().await, options(1_000))
        .run(beacon_scenario(&context(PlayerIdentity::default())))
        .await
        .unwrap();

    assert_eq!(
        journal.emitted_events(),
        vec![
            "get_status",
            "get_server_time",
            "list_online_players",
            "force_update",
            "get_player_mtr_logs",
            "get_mtr_log_detail",
            "get_player_mtr_logs",
            "get_player_mtr_logs",
            "get_player_sessions",
            "get_player_sessions",
            "get_player_sessions",
        ]
    );
    assert_eq!(report.skipped(), 5);
    assert_eq!(report.written(), 11);

    // Every payload carries the key and none carries empty player fields
    for (_, payload) in journal.emitted() {
        assert_eq!(payload["key"], "secret");
        assert!(payload.get("playerUuid").is_none());
        assert!(payload.get("playerName").is_none());
    }

    let names: Vec<String> = list_artifacts(&ctx.output)
        .await
        .unwrap()
        .into_iter()
        .map(|(path, _)| file_name(&path))
        .collect();
    assert!(names.contains(&"mtr_log_7.json".to_string()));
    assert!(names.contains(&"mtr_logs_2023-12-28_to_2024-01-03.json".to_string()));
    assert!(names.contains(&"player_sessions_JOIN_2024-01-03.json".to_string()));
}

#[tokio::test]
async fn test_scenario_file_fixture() {
    let ctx = TestContext::new();
    let fixture = Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join("scenario.yaml");
    let file = ScenarioFile::load(&fixture).unwrap();
    let player = PlayerIdentity::new(None, Some("Alex".to_string()));
    let scenario = file.plan(&context(player)).unwrap();

    let session = MockSession::new().reply(
        "get_player_mtr_logs",
        Reply::value(json!({"records": [{"id": 3, "line": "L3"}]})),
    );
    let journal = session.journal();

    let report = Runner::new(session, ctx.sink().await, options(1_000))
        .run(scenario)
        .await
        .unwrap();

    assert_eq!(report.scenario, "fixture");
    assert_eq!(
        journal.emitted_events(),
        vec![
            "get_status",
            "get_player_stats",
            "get_player_sessions",
            "get_player_mtr_logs",
            "get_mtr_log_detail",
        ]
    );
    assert_eq!(
        journal.emitted()[2].1,
        json!({
            "key": "secret",
            "playerName": "Alex",
            "singleDate": "2024-01-03",
            "page": 1,
            "pageSize": 100
        })
    );
    assert_eq!(journal.emitted()[4].1, json!({"key": "secret", "id": 3}));
    assert!(ctx.artifact("stats_Alex.json").exists());
    assert!(ctx.artifact("player_sessions_Alex_2024-01-03.json").exists());
    assert!(ctx.artifact("mtr_log_3.json").exists());
}

// ============== Result sink ==============

#[tokio::test]
async fn test_prepare_clears_previous_run() {
    let ctx = TestContext::new();
    std::fs::create_dir_all(ctx.output.join("nested")).unwrap();
    std::fs::write(ctx.output.join("stale.json"), "{}").unwrap();
    std::fs::write(ctx.output.join("nested").join("old.json"), "{}").unwrap();

    let sink = ctx.sink().await;
    assert!(std::fs::read_dir(sink.dir()).unwrap().next().is_none());
}

#[tokio::test]
async fn test_artifact_round_trip() {
    let ctx = TestContext::new();
    let mut sink = ctx.sink().await;

    let path = sink.write("stats_Steve.json", Some(&json!({"hp": 20}))).await.unwrap();
    let record = read_artifact(&path).await.unwrap();
    assert_eq!(record.data, json!({"hp": 20}));
    assert!(chrono::DateTime::parse_from_rfc3339(&record.timestamp).is_ok());

    let content = std::fs::read_to_string(&path).unwrap();
    assert!(content.ends_with("}\n"));
    assert!(content.contains("\n  \"data\""));

    let null_path = sink.write("force_update.json", None).await.unwrap();
    assert_eq!(read_artifact(&null_path).await.unwrap().data, Value::Null);

    // No staging files left behind
    let listed = list_artifacts(&ctx.output).await.unwrap();
    assert_eq!(listed.len(), 2);
    assert!(std::fs::read_dir(&ctx.output)
        .unwrap()
        .all(|e| !e.unwrap().file_name().to_string_lossy().ends_with(".tmp")));
}

#[tokio::test]
async fn test_duplicate_write_rejected() {
    let ctx = TestContext::new();
    let mut sink = ctx.sink().await;

    sink.write("a.json", Some(&json!(1))).await.unwrap();
    let err = sink.write("a.json", Some(&json!(2))).await.unwrap_err();
    assert!(matches!(err, Error::DuplicateArtifact(_)));
    assert_eq!(ctx.data("a.json").await, json!(1));
}

fn file_name(path: &Path) -> String {
    path.file_name().unwrap().to_string_lossy().into_owned()
}
