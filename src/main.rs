//! Beacon probe CLI
//!
//! Runs the verification scenario against a Beacon Socket.IO server and
//! writes one JSON artifact per result.

use beacon_probe::commands::{Commands, GlobalArgs};
use beacon_probe::common::config::{Config, Overrides};
use beacon_probe::common::logging;
use beacon_probe::{cli, Result};
use clap::Parser;

#[derive(Parser)]
#[command(name = "beacon-probe", about = "Beacon Socket.IO verification harness")]
#[command(version, long_about = None)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let mut overrides = cli.global.overrides();
    if let Commands::Run {
        record_failures: true,
        ..
    } = &cli.command
    {
        overrides.record_failures = true;
    }

    let mut config = match Config::load(cli.global.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };
    config.apply_overrides(&overrides);

    let guard = logging::init(config.logging.file.as_deref());
    if let Some(file) = guard.file() {
        tracing::debug!(path = %file.display(), "Logging to file");
    }

    let result = execute(config, &overrides, cli.command).await;

    let code = match result {
        Ok(()) => 0,
        Err(e) => {
            if guard.file().is_some() {
                tracing::error!(fatal = e.is_fatal(), "{}", e);
            }
            eprintln!("Error: {e}");
            1
        }
    };

    // Flush file logging before exiting
    drop(guard);
    std::process::exit(code);
}

async fn execute(mut config: Config, overrides: &Overrides, command: Commands) -> Result<()> {
    // Environment and .env sit between the config file and the command line
    config.apply_process_env()?;
    config.apply_overrides(overrides);
    cli::dispatch(command, &config).await
}
