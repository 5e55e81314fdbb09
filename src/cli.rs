//! Command-line argument parsing.

use std::path::PathBuf;

use crate::twin::event::EventKind;

pub const USAGE: &str = "\
gridtwin - microgrid digital twin with a learned controller

USAGE:
    gridtwin [OPTIONS]

OPTIONS:
    --preset <NAME>        built-in scenario: baseline, stress, high_renewables
    --scenario <FILE>      load scenario from a TOML file (overrides --preset)
    --strategy <NAME>      controller: legacy or ppo [default: ppo]
    --episodes <N>         training episodes before running [default: 20]
    --seed <N>             override the scenario seed
    --policy-in <FILE>     load a trained policy instead of training
    --policy-out <FILE>    save the policy after training
    --telemetry <FILE>     write per-step CSV telemetry
    --event <STEP:KIND>    inject an event at a step (repeatable);
                           kinds: cloud_burst, wind_lull, demand_surge, battery_fault
    --step-rate <HZ>       pace the loop at this many steps per second
                           [default: 0, unthrottled]
    --no-forecast          disable forecast features in the observation
    --compare              run an identically seeded legacy baseline alongside
    --validate             validate the scenario and exit
    -h, --help             print this help
";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyArg {
    Legacy,
    Ppo,
}

/// Parsed command-line options.
#[derive(Debug, Clone)]
pub struct CliOptions {
    pub preset: String,
    pub scenario_file: Option<PathBuf>,
    pub strategy: StrategyArg,
    pub episodes: usize,
    pub seed: Option<u64>,
    pub policy_in: Option<PathBuf>,
    pub policy_out: Option<PathBuf>,
    pub telemetry: Option<PathBuf>,
    pub events: Vec<(usize, EventKind)>,
    pub step_rate_hz: f32,
    pub no_forecast: bool,
    pub compare: bool,
    pub validate_only: bool,
    pub help: bool,
}

impl Default for CliOptions {
    fn default() -> Self {
        Self {
            preset: "baseline".to_string(),
            scenario_file: None,
            strategy: StrategyArg::Ppo,
            episodes: 20,
            seed: None,
            policy_in: None,
            policy_out: None,
            telemetry: None,
            events: Vec::new(),
            step_rate_hz: 0.0,
            no_forecast: false,
            compare: false,
            validate_only: false,
            help: false,
        }
    }
}

fn value<'a>(
    args: &'a [String],
    i: &mut usize,
    flag: &str,
) -> Result<&'a str, String> {
    *i += 1;
    args.get(*i)
        .map(|s| s.as_str())
        .ok_or_else(|| format!("{flag} requires a value"))
}

fn parse_event(raw: &str) -> Result<(usize, EventKind), String> {
    let (step, kind) = raw
        .split_once(':')
        .ok_or_else(|| format!("event \"{raw}\" must look like STEP:KIND"))?;
    let step = step
        .parse::<usize>()
        .map_err(|_| format!("event step \"{step}\" is not a number"))?;
    let kind =
        EventKind::parse(kind).ok_or_else(|| format!("unknown event kind \"{kind}\""))?;
    Ok((step, kind))
}

impl CliOptions {
    /// Parses options from the arguments after the program name.
    pub fn parse(args: &[String]) -> Result<Self, String> {
        let mut opts = Self::default();
        let mut i = 0;
        while i < args.len() {
            match args[i].as_str() {
                "--preset" => opts.preset = value(args, &mut i, "--preset")?.to_string(),
                "--scenario" => {
                    opts.scenario_file = Some(PathBuf::from(value(args, &mut i, "--scenario")?));
                }
                "--strategy" => {
                    opts.strategy = match value(args, &mut i, "--strategy")? {
                        "legacy" => StrategyArg::Legacy,
                        "ppo" => StrategyArg::Ppo,
                        other => return Err(format!("unknown strategy \"{other}\"")),
                    };
                }
                "--episodes" => {
                    let v = value(args, &mut i, "--episodes")?;
                    opts.episodes = v
                        .parse()
                        .map_err(|_| format!("episodes \"{v}\" is not a number"))?;
                }
                "--seed" => {
                    let v = value(args, &mut i, "--seed")?;
                    opts.seed =
                        Some(v.parse().map_err(|_| format!("seed \"{v}\" is not a number"))?);
                }
                "--policy-in" => {
                    opts.policy_in = Some(PathBuf::from(value(args, &mut i, "--policy-in")?));
                }
                "--policy-out" => {
                    opts.policy_out = Some(PathBuf::from(value(args, &mut i, "--policy-out")?));
                }
                "--telemetry" => {
                    opts.telemetry = Some(PathBuf::from(value(args, &mut i, "--telemetry")?));
                }
                "--event" => {
                    opts.events.push(parse_event(value(args, &mut i, "--event")?)?);
                }
                "--step-rate" => {
                    let v = value(args, &mut i, "--step-rate")?;
                    opts.step_rate_hz = v
                        .parse()
                        .map_err(|_| format!("step rate \"{v}\" is not a number"))?;
                    if opts.step_rate_hz < 0.0 {
                        return Err("step rate must be >= 0".to_string());
                    }
                }
                "--no-forecast" => opts.no_forecast = true,
                "--compare" => opts.compare = true,
                "--validate" => opts.validate_only = true,
                "-h" | "--help" => opts.help = true,
                other => return Err(format!("unknown option \"{other}\"")),
            }
            i += 1;
        }
        opts.events.sort_by_key(|(step, _)| *step);
        Ok(opts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<CliOptions, String> {
        let args: Vec<String> = args.iter().map(|s| s.to_string()).collect();
        CliOptions::parse(&args)
    }

    #[test]
    fn defaults_when_no_args() {
        let opts = parse(&[]).unwrap();
        assert_eq!(opts.preset, "baseline");
        assert_eq!(opts.strategy, StrategyArg::Ppo);
        assert_eq!(opts.episodes, 20);
        assert!(!opts.compare);
    }

    #[test]
    fn parses_strategy_and_seed() {
        let opts = parse(&["--strategy", "legacy", "--seed", "7"]).unwrap();
        assert_eq!(opts.strategy, StrategyArg::Legacy);
        assert_eq!(opts.seed, Some(7));
    }

    #[test]
    fn rejects_unknown_option() {
        assert!(parse(&["--bogus"]).is_err());
    }

    #[test]
    fn rejects_missing_value() {
        assert!(parse(&["--seed"]).is_err());
    }

    #[test]
    fn parses_and_sorts_events() {
        let opts = parse(&[
            "--event",
            "200:demand_surge",
            "--event",
            "50:cloud_burst",
        ])
        .unwrap();
        assert_eq!(opts.events[0], (50, EventKind::CloudBurst));
        assert_eq!(opts.events[1], (200, EventKind::DemandSurge));
    }

    #[test]
    fn parses_step_rate_and_forecast_toggle() {
        let opts = parse(&["--step-rate", "10", "--no-forecast"]).unwrap();
        assert_eq!(opts.step_rate_hz, 10.0);
        assert!(opts.no_forecast);
        assert!(parse(&["--step-rate", "-2"]).is_err());
    }

    #[test]
    fn rejects_malformed_event() {
        assert!(parse(&["--event", "cloud_burst"]).is_err());
        assert!(parse(&["--event", "x:cloud_burst"]).is_err());
        assert!(parse(&["--event", "10:earthquake"]).is_err());
    }
}
