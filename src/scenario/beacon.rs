//! Built-in verification script for the Beacon socket service

use serde_json::Value;

use crate::sink::artifact_name;

use super::payload::PayloadBuilder;
use super::step::{first_record, id_text, Scenario, Step};
use super::ScenarioContext;

pub const SCENARIO_NAME: &str = "beacon";

const SKIP_NO_PLAYER: &str = "no player uuid or name configured";

/// Plan the full Beacon script for `ctx`
pub fn beacon_scenario(ctx: &ScenarioContext) -> Scenario {
    let key = ctx.key.as_str();
    let player = &ctx.player;
    let today = ctx.dates.today_str();
    let week_start = ctx.dates.week_start_str();
    let keyed = || PayloadBuilder::authenticated(key);

    let mut scenario = Scenario::new(SCENARIO_NAME)
        .step(Step::new(
            "get_status",
            keyed().build(),
            artifact_name("server_status", None),
        ))
        .step(Step::new(
            "get_server_time",
            keyed().build(),
            artifact_name("server_time", None),
        ))
        .step(Step::new(
            "list_online_players",
            keyed().build(),
            artifact_name("online_players", None),
        ));

    let qualifier = player.qualifier();
    for (event, prefix) in [
        ("get_player_advancements", "advancements"),
        ("get_player_stats", "stats"),
        ("get_player_nbt", "nbt"),
        ("lookup_player_identity", "player_identity"),
    ] {
        if player.is_empty() {
            scenario.push_skip(event, SKIP_NO_PLAYER);
        } else {
            scenario.push(Step::new(
                event,
                keyed().player(player).build(),
                artifact_name(prefix, Some(qualifier.as_str())),
            ));
        }
    }

    scenario.push(Step::new(
        "force_update",
        keyed().build(),
        artifact_name("force_update", None),
    ));

    let detail_key = key.to_string();
    scenario.push(
        Step::new(
            "get_player_mtr_logs",
            keyed().player(player).page(1, 20).build(),
            artifact_name("mtr_logs_page1", None),
        )
        .then(first_record("records", "id", move |id: &Value| {
            Step::new(
                "get_mtr_log_detail",
                PayloadBuilder::authenticated(&detail_key)
                    .field("id", id.clone())
                    .build(),
                artifact_name("mtr_log", Some(id_text(id).as_str())),
            )
        })),
    );

    scenario.push(
        Step::new(
            "get_player_mtr_logs",
            keyed()
                .player(player)
                .field("singleDate", today.as_str())
                .page(1, 50)
                .build(),
            artifact_name("mtr_logs", Some(today.as_str())),
        )
        .label("get_player_mtr_logs(singleDate)"),
    );

    scenario.push(
        Step::new(
            "get_player_mtr_logs",
            keyed()
                .player(player)
                .field("startDate", week_start.as_str())
                .field("endDate", today.as_str())
                .page(1, 50)
                .build(),
            artifact_name("mtr_logs", Some(format!("{}_to_{}", week_start, today).as_str())),
        )
        .label("get_player_mtr_logs(range7d)"),
    );

    scenario.push(
        Step::new(
            "get_player_sessions",
            keyed().page(1, 50).build(),
            artifact_name("player_sessions_page1", None),
        )
        .label("get_player_sessions(page1)"),
    );

    scenario.push(
        Step::new(
            "get_player_sessions",
            keyed()
                .field("singleDate", today.as_str())
                .page(1, 100)
                .build(),
            artifact_name("player_sessions", Some(today.as_str())),
        )
        .label("get_player_sessions(today)"),
    );

    scenario.push(
        Step::new(
            "get_player_sessions",
            keyed()
                .field("eventType", "JOIN")
                .field("singleDate", today.as_str())
                .page(1, 100)
                .build(),
            artifact_name("player_sessions_JOIN", Some(today.as_str())),
        )
        .label("get_player_sessions(join_today)"),
    );

    if player.is_empty() {
        scenario.push_skip("get_player_sessions(by_player)", SKIP_NO_PLAYER);
    } else {
        scenario.push(
            Step::new(
                "get_player_sessions",
                keyed().player(player).page(1, 100).build(),
                artifact_name("player_sessions", Some(qualifier.as_str())),
            )
            .label("get_player_sessions(by_player)"),
        );
    }

    scenario
}
