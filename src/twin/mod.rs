//! Digital twin of the microgrid: physical state, weather and resource
//! models, disturbance events, and the stepping engine.

pub mod engine;
pub mod event;
pub mod types;
pub mod weather;

pub use engine::DigitalTwin;
pub use event::{ActiveEvent, EventKind};
pub use types::{
    ACTION_DIM, Action, GridState, OBS_BASE_DIM, OBS_FORECAST_DIM, Observation, SafetyViolation,
    StepEconomics, StepOutcome, Termination,
};
