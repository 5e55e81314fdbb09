use std::env;
use std::fs::File;
use std::io::BufWriter;
use std::process::ExitCode;

use tracing::info;
use tracing_subscriber::EnvFilter;

use gridtwin::cli::{CliOptions, StrategyArg, USAGE};
use gridtwin::config::ScenarioConfig;
use gridtwin::error::GridError;
use gridtwin::orchestrator::{Orchestrator, Phase, Strategy};
use gridtwin::snapshot::PolicySnapshot;
use gridtwin::telemetry::{TelemetryRecord, TelemetryWriter};

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args: Vec<String> = env::args().skip(1).collect();
    let opts = match CliOptions::parse(&args) {
        Ok(opts) => opts,
        Err(e) => {
            eprintln!("error: {e}\n\n{USAGE}");
            return ExitCode::from(2);
        }
    };
    if opts.help {
        print!("{USAGE}");
        return ExitCode::SUCCESS;
    }

    match run(opts) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::from(1)
        }
    }
}

fn load_config(opts: &CliOptions) -> Result<ScenarioConfig, GridError> {
    let mut cfg = match &opts.scenario_file {
        Some(path) => ScenarioConfig::from_toml_file(path)?,
        None => ScenarioConfig::from_preset(&opts.preset)?,
    };
    if let Some(seed) = opts.seed {
        cfg.simulation.seed = seed;
    }
    if opts.no_forecast {
        cfg.forecast.enabled = false;
    }
    Ok(cfg)
}

fn run(opts: CliOptions) -> Result<(), GridError> {
    let cfg = load_config(&opts)?;

    let mut errors = cfg.validate().into_iter();
    if let Some(first) = errors.next() {
        eprintln!("{first}");
        for e in errors {
            eprintln!("{e}");
        }
        return Err(first.into());
    }
    if opts.validate_only {
        println!("scenario ok");
        return Ok(());
    }

    let strategy = match opts.strategy {
        StrategyArg::Legacy => Strategy::Legacy,
        StrategyArg::Ppo => Strategy::Learned,
    };
    let mut orch = Orchestrator::new(cfg, strategy)?;
    if opts.compare {
        orch.enable_comparison();
    }

    if strategy == Strategy::Learned {
        match &opts.policy_in {
            Some(path) => {
                let snapshot = PolicySnapshot::load(path)?;
                info!(
                    path = %path.display(),
                    trained_episodes = snapshot.trained_episodes,
                    "loaded policy"
                );
                orch.install_policy(snapshot.policy)?;
            }
            None => {
                info!(episodes = opts.episodes, "training policy");
                let summary = orch.train(opts.episodes)?;
                info!(
                    mean_reward = summary.mean_reward(),
                    updates = summary.updates,
                    discarded = summary.discarded_updates,
                    "training finished"
                );
            }
        }
        if let Some(path) = &opts.policy_out {
            if let Some(policy) = orch.policy() {
                PolicySnapshot::new(policy.clone(), orch.trained_episodes()).save(path)?;
                info!(path = %path.display(), "saved policy");
            }
        }
    }

    let mut telemetry = match &opts.telemetry {
        Some(path) => {
            let file = File::create(path).map_err(|e| GridError::Telemetry {
                message: format!("create \"{}\": {e}", path.display()),
            })?;
            Some(
                TelemetryWriter::new(BufWriter::new(file)).map_err(|e| GridError::Telemetry {
                    message: format!("header: {e}"),
                })?,
            )
        }
        None => None,
    };

    orch.start()?;
    let pacing = if opts.step_rate_hz > 0.0 {
        Some(std::time::Duration::from_secs_f32(1.0 / opts.step_rate_hz))
    } else {
        None
    };
    let mut pending_events = opts.events.iter().copied().peekable();
    let mut steps_done = 0;
    while orch.phase() == Phase::Running {
        if let Some(delay) = pacing {
            std::thread::sleep(delay);
        }
        while let Some(&(step, kind)) = pending_events.peek() {
            if step > steps_done {
                break;
            }
            pending_events.next();
            orch.inject_event(kind);
        }

        let status = orch.step()?;
        steps_done = status.step;
        if let Some(writer) = telemetry.as_mut() {
            writer
                .record(&TelemetryRecord {
                    state: &status.state,
                    action: &status.action,
                    controller: status.controller,
                    rationale: &status.rationale,
                    fallback_active: status.fallback_active,
                    reward: status.reward,
                })
                .map_err(|e| GridError::Telemetry {
                    message: format!("write: {e}"),
                })?;
        }
    }
    if let Some(writer) = telemetry.as_mut() {
        writer.flush().map_err(|e| GridError::Telemetry {
            message: format!("flush: {e}"),
        })?;
    }

    println!("{}", orch.stats_report());
    if let Some(baseline) = orch.comparison_report() {
        println!("=== legacy baseline ===");
        println!("{baseline}");
    }
    Ok(())
}
