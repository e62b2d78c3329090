//! Execution manager errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("Execution manager is not running")]
    NotRunning,

    #[error("Execution manager is already running")]
    AlreadyRunning,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to build worker runtime: {0}")]
    RuntimeBuild(String),
}
