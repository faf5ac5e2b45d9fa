//! Scenarios: what to call, in which order, and where results go
//!
//! A [`Scenario`] is planned up front from a [`ScenarioContext`] (shared
//! key, optional player, dates fixed for the run) and then handed to the
//! [`Runner`], which executes it against one session.

pub mod beacon;
pub mod dates;
pub mod file;
pub mod payload;
pub mod runner;
pub mod step;

pub use beacon::beacon_scenario;
pub use dates::RunDates;
pub use file::ScenarioFile;
pub use payload::{PayloadBuilder, PlayerIdentity};
pub use runner::{RunOptions, RunReport, Runner, StepReport, StepStatus};
pub use step::{first_record, FollowUp, Planned, Scenario, Step};

/// Values a scenario is planned from
#[derive(Debug, Clone)]
pub struct ScenarioContext {
    pub key: String,
    pub player: PlayerIdentity,
    pub dates: RunDates,
}

impl ScenarioContext {
    pub fn new(key: impl Into<String>, player: PlayerIdentity, dates: RunDates) -> Self {
        Self {
            key: key.into(),
            player,
            dates,
        }
    }

    /// Replace `{today}`, `{week_start}` and `{player}` in `template`
    pub fn expand(&self, template: &str) -> String {
        if !template.contains('{') {
            return template.to_string();
        }
        template
            .replace("{today}", &self.dates.today_str())
            .replace("{week_start}", &self.dates.week_start_str())
            .replace("{player}", &self.player.qualifier())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_expand_placeholders() {
        let ctx = ScenarioContext::new(
            "k",
            PlayerIdentity::new(None, Some("Steve Jr".to_string())),
            RunDates::new(NaiveDate::from_ymd_opt(2024, 1, 3).unwrap()),
        );
        assert_eq!(
            ctx.expand("mtr_logs_{week_start}_to_{today}"),
            "mtr_logs_2023-12-28_to_2024-01-03"
        );
        assert_eq!(ctx.expand("stats_{player}"), "stats_Steve_Jr");
        assert_eq!(ctx.expand("plain"), "plain");
    }
}
