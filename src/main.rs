/*
 * This file is part of hpdstorm.
 *
 * Copyright (C) 2025 hpdstorm contributors
 *
 * hpdstorm is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * hpdstorm is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with hpdstorm. If not, see <https://www.gnu.org/licenses/>.
 */

use std::path::PathBuf;

use anyhow::{bail, Context};
use hpd_core::{load_settings, settings_path};
use hpdstorm::logger;
use hpdstorm::{load_scenario, Simulation};
use tracing::{info, warn};

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Environment variable holding the log filter
const LOG_ENV: &str = "HPDSTORM_LOG";

fn print_help() {
    eprintln!("hpdstorm {} - Display hot-plug storm simulator", VERSION);
    eprintln!();
    eprintln!("USAGE:");
    eprintln!("    hpdstorm [OPTIONS] SCENARIO.json");
    eprintln!();
    eprintln!("OPTIONS:");
    eprintln!("    -c, --config PATH      Settings file (default: $HPDSTORM_SETTINGS or /etc/hpdstorm/hotplug.json)");
    eprintln!("    -e, --event-log PATH   Append JSON-lines events to PATH");
    eprintln!("    -v, --version          Print version");
    eprintln!("    -h, --help             Print this help");
    eprintln!();
    eprintln!("ENVIRONMENT:");
    eprintln!("    HPDSTORM_LOG           Log level (trace, debug, info, warn, error)");
    eprintln!("    HPDSTORM_SETTINGS      Settings file path");
}

fn print_version() {
    println!("hpdstorm {}", VERSION);
}

struct Options {
    config: Option<PathBuf>,
    event_log: Option<PathBuf>,
    scenario: PathBuf,
}

/// Returns `None` when the program should exit without running
fn parse_args(args: &[String]) -> anyhow::Result<Option<Options>> {
    let mut config = None;
    let mut event_log = None;
    let mut scenario = None;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "-h" | "--help" => {
                print_help();
                return Ok(None);
            }
            "-v" | "--version" => {
                print_version();
                return Ok(None);
            }
            "-c" | "--config" => {
                i += 1;
                let Some(path) = args.get(i) else {
                    bail!("--config requires a path argument");
                };
                config = Some(PathBuf::from(path));
            }
            "-e" | "--event-log" => {
                i += 1;
                let Some(path) = args.get(i) else {
                    bail!("--event-log requires a path argument");
                };
                event_log = Some(PathBuf::from(path));
            }
            arg if arg.starts_with('-') => {
                print_help();
                bail!("Unknown argument: {}", arg);
            }
            arg => {
                if scenario.is_some() {
                    bail!("Only one scenario file may be given");
                }
                scenario = Some(PathBuf::from(arg));
            }
        }
        i += 1;
    }

    let Some(scenario) = scenario else {
        print_help();
        bail!("Missing scenario file");
    };

    Ok(Some(Options {
        config,
        event_log,
        scenario,
    }))
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().collect();
    let Some(options) = parse_args(&args)? else {
        return Ok(());
    };

    let log_level = std::env::var(LOG_ENV).unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .with_env_filter(&log_level)
        .with_writer(std::io::stderr)
        .init();

    info!("hpdstorm {} starting", VERSION);

    let settings_file = options.config.unwrap_or_else(settings_path);
    let settings = load_settings(&settings_file)
        .with_context(|| format!("loading settings from {:?}", settings_file))?;

    let scenario = load_scenario(&options.scenario)
        .with_context(|| format!("loading scenario {:?}", options.scenario))?;

    logger::init_event_log(options.event_log.as_deref()).context("opening event log")?;

    let sim = Simulation::new(&scenario, &settings).context("setting up simulation")?;

    let report = tokio::select! {
        report = sim.run(&scenario.steps) => report.context("running scenario")?,
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted, reporting partial state");
            sim.report()
        }
    };

    sim.shutdown().await;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
