//! Resume state errors.

use thiserror::Error;

/// Failure to save or restore a [`ResumeState`](super::ResumeState).
#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("Could not encode resume state as {format}: {reason}")]
    Encode { format: &'static str, reason: String },

    #[error("Could not decode resume state from {format}: {reason}")]
    Decode { format: &'static str, reason: String },

    /// Saved by a build with a different resume state layout.
    #[error("Resume state for machine '{machine}' has format version {found}, expected {supported}")]
    UnsupportedVersion {
        machine: String,
        found: u32,
        supported: u32,
    },
}

impl CheckpointError {
    pub(crate) fn encode(format: &'static str, err: impl std::fmt::Display) -> Self {
        Self::Encode {
            format,
            reason: err.to_string(),
        }
    }

    pub(crate) fn decode(format: &'static str, err: impl std::fmt::Display) -> Self {
        Self::Decode {
            format,
            reason: err.to_string(),
        }
    }
}
