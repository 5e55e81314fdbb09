//! Digital twin of a renewable microgrid driven by a learned
//! controller.
//!
//! The crate simulates a solar-wind-battery microgrid ([`twin`]),
//! trains a PPO policy to operate it ([`rl`]), and supervises the live
//! control loop with a rule-based fallback ([`orchestrator`]). A
//! short-horizon [`forecast`] feeds predicted generation and demand
//! into the policy's observation.

pub mod cli;
pub mod config;
pub mod controller;
pub mod error;
pub mod forecast;
pub mod orchestrator;
pub mod rl;
pub mod snapshot;
pub mod stats;
pub mod telemetry;
pub mod twin;

pub use config::ScenarioConfig;
pub use error::GridError;
pub use orchestrator::{Orchestrator, Phase, Strategy};
