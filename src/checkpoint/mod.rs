//! Resumption checkpoints for interpreters.
//!
//! The interpreter persists nothing itself. Each time it enters a resumable
//! state (other than the one it last recorded) it hands a [`ResumeState`] to
//! the installed checkpointer. An outside persistence layer stores it and,
//! after a restart, passes it to
//! [`Interpreter::resume`](crate::interp::Interpreter::resume).

use crate::builder::Machine;
use crate::interp::PsmError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod error;

pub use error::CheckpointError;

/// Version identifier for the checkpoint format
pub const CHECKPOINT_VERSION: u32 = 1;

/// The minimal fact needed to reconstruct an interpreter at a matching state.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResumeState {
    /// Checkpoint format version
    pub version: u32,

    /// Unique checkpoint identifier
    pub id: String,

    /// Name of the machine the interpreter was running
    pub machine: String,

    /// Last resumable state entered, if any
    pub last_resumable_state: Option<String>,

    /// When the checkpoint was taken
    pub saved_at: DateTime<Utc>,
}

impl ResumeState {
    pub fn new(machine: impl Into<String>, last_resumable_state: Option<String>) -> Self {
        Self {
            version: CHECKPOINT_VERSION,
            id: uuid::Uuid::new_v4().to_string(),
            machine: machine.into(),
            last_resumable_state,
            saved_at: Utc::now(),
        }
    }

    pub fn last_resumable_state(&self) -> Option<&str> {
        self.last_resumable_state.as_deref()
    }

    /// Index of the saved state within `machine`.
    pub(crate) fn resolve<C>(&self, machine: &Machine<C>) -> Result<usize, PsmError> {
        let name = self.last_resumable_state().ok_or_else(|| {
            PsmError::IllegalResumptionState("no resumable state was saved".to_string())
        })?;
        if self.machine != machine.name() {
            return Err(PsmError::IllegalResumptionState(format!(
                "saved for machine '{}', not '{}'",
                self.machine,
                machine.name()
            )));
        }
        machine.state_index(name).ok_or_else(|| {
            PsmError::IllegalResumptionState(format!(
                "'{}' is not a state of machine '{}'",
                name,
                machine.name()
            ))
        })
    }

    pub fn to_json(&self) -> Result<String, CheckpointError> {
        serde_json::to_string(self).map_err(|e| CheckpointError::encode("JSON", e))
    }

    pub fn from_json(json: &str) -> Result<Self, CheckpointError> {
        let state: Self = serde_json::from_str(json).map_err(|e| CheckpointError::decode("JSON", e))?;
        state.check_version()
    }

    pub fn to_binary(&self) -> Result<Vec<u8>, CheckpointError> {
        bincode::serialize(self).map_err(|e| CheckpointError::encode("binary", e))
    }

    pub fn from_binary(bytes: &[u8]) -> Result<Self, CheckpointError> {
        let state: Self = bincode::deserialize(bytes).map_err(|e| CheckpointError::decode("binary", e))?;
        state.check_version()
    }

    fn check_version(self) -> Result<Self, CheckpointError> {
        if self.version != CHECKPOINT_VERSION {
            return Err(CheckpointError::UnsupportedVersion {
                machine: self.machine,
                found: self.version,
                supported: CHECKPOINT_VERSION,
            });
        }
        Ok(self)
    }
}
