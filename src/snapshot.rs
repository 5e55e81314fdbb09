//! Policy snapshot persistence.
//!
//! Trained policies are saved as versioned JSON so a run can load a
//! policy trained earlier instead of training from scratch. The schema
//! string is checked on load.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::GridError;
use crate::rl::policy::PolicyNetwork;

/// Schema identifier embedded in every snapshot file.
pub const SNAPSHOT_SCHEMA_V1: &str = "gridtwin-policy-v1";

/// A serializable policy with provenance metadata.
#[derive(Debug, Serialize, Deserialize)]
pub struct PolicySnapshot {
    pub schema: String,
    /// Episodes the policy was trained for when saved.
    pub trained_episodes: usize,
    /// Observation dimension the policy expects.
    pub obs_dim: usize,
    pub policy: PolicyNetwork,
}

impl PolicySnapshot {
    pub fn new(policy: PolicyNetwork, trained_episodes: usize) -> Self {
        Self {
            schema: SNAPSHOT_SCHEMA_V1.to_string(),
            trained_episodes,
            obs_dim: policy.obs_dim(),
            policy,
        }
    }

    /// Writes the snapshot as JSON.
    ///
    /// # Errors
    ///
    /// Returns [`GridError::Snapshot`] on serialization or IO failure.
    pub fn save(&self, path: &Path) -> Result<(), GridError> {
        let json = serde_json::to_string(self).map_err(|e| GridError::Snapshot {
            message: format!("serialize: {e}"),
        })?;
        fs::write(path, json).map_err(|e| GridError::Snapshot {
            message: format!("write \"{}\": {e}", path.display()),
        })
    }

    /// Reads and validates a snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`GridError::Snapshot`] on IO or parse failure, an
    /// unknown schema, or a policy with non-finite weights.
    pub fn load(path: &Path) -> Result<Self, GridError> {
        let json = fs::read_to_string(path).map_err(|e| GridError::Snapshot {
            message: format!("read \"{}\": {e}", path.display()),
        })?;
        let snapshot: PolicySnapshot =
            serde_json::from_str(&json).map_err(|e| GridError::Snapshot {
                message: format!("parse \"{}\": {e}", path.display()),
            })?;
        if snapshot.schema != SNAPSHOT_SCHEMA_V1 {
            return Err(GridError::Snapshot {
                message: format!(
                    "unsupported schema \"{}\", expected \"{SNAPSHOT_SCHEMA_V1}\"",
                    snapshot.schema
                ),
            });
        }
        if !snapshot.policy.is_finite() {
            return Err(GridError::Snapshot {
                message: "policy contains non-finite weights".to_string(),
            });
        }
        Ok(snapshot)
    }
}
