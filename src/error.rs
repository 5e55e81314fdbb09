//! Error taxonomy for the control core.

use std::error::Error;
use std::fmt;

use crate::config::ConfigError;

/// Errors surfaced by the twin, trainer, and orchestrator.
///
/// Configuration problems are fatal and detected before any step executes.
/// Numeric instability is recoverable: the offending step or update is
/// discarded and the last valid state is kept. A runaway loop halts the
/// orchestrator with a warning rather than hanging the process.
#[derive(Debug)]
pub enum GridError {
    /// Invalid hyperparameter or shape mismatch, caught up front.
    Configuration(ConfigError),
    /// A non-finite value appeared in a reward, state, or gradient.
    NumericInstability {
        /// Where the non-finite value was observed (e.g., "reward", "policy update").
        context: String,
    },
    /// The step loop reached its configured maximum.
    RunawayLoop {
        /// The configured step bound that was hit.
        max_steps: usize,
    },
    /// A policy snapshot could not be read, written, or understood.
    Snapshot {
        /// What failed (path, schema mismatch, serialization error).
        message: String,
    },
    /// Telemetry output could not be written.
    Telemetry {
        /// What failed (path or write error).
        message: String,
    },
}

impl fmt::Display for GridError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GridError::Configuration(e) => write!(f, "{e}"),
            GridError::NumericInstability { context } => {
                write!(f, "numeric instability: non-finite value in {context}")
            }
            GridError::RunawayLoop { max_steps } => {
                write!(f, "runaway loop: step count exceeded maximum of {max_steps}")
            }
            GridError::Snapshot { message } => {
                write!(f, "snapshot error: {message}")
            }
            GridError::Telemetry { message } => {
                write!(f, "telemetry error: {message}")
            }
        }
    }
}

impl Error for GridError {}

impl From<ConfigError> for GridError {
    fn from(e: ConfigError) -> Self {
        GridError::Configuration(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_context() {
        let e = GridError::NumericInstability {
            context: "reward".to_string(),
        };
        assert!(format!("{e}").contains("reward"));

        let e = GridError::RunawayLoop { max_steps: 1000 };
        assert!(format!("{e}").contains("1000"));
    }
}
