//! Runtime errors raised by interpreters.

use crate::executor::ExecutorError;
use thiserror::Error;

/// Errors that escape `init`, `resume`, and `handle_event`.
///
/// None of these are recovered from inside the interpreter; the component
/// that owns the protocol run decides whether to abort, restart, or escalate.
#[derive(Debug, Error)]
pub enum PsmError {
    #[error("Interpreter has not been started")]
    NotStarted,

    #[error("Interpreter has already been started")]
    AlreadyStarted,

    #[error("State '{state}' has no response to event {event}")]
    UnknownEvent { state: String, event: &'static str },

    #[error("No state named '{0}'")]
    UnknownState(String),

    #[error("More than {limit} chained events in state '{state}', loop suspected")]
    MaxChainedEvents { state: String, limit: usize },

    #[error("Action '{action}' in state '{state}' failed: {source}")]
    Action {
        action: String,
        state: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync + 'static>,
    },

    #[error("Action '{action}' in state '{state}' panicked: {message}")]
    ActionPanicked {
        action: String,
        state: String,
        message: String,
    },

    #[error("Illegal event {event}: {reason}")]
    IllegalEvent {
        event: &'static str,
        reason: &'static str,
    },

    #[error("Illegal resumption state: {0}")]
    IllegalResumptionState(String),

    #[error("No timer service installed, cannot arm a state deadline")]
    NoTimerService,

    #[error("Event category '{category}' does not carry messages")]
    NotMessageCategory { category: &'static str },

    #[error("No event registered for opcode {0}")]
    UnknownOpcode(String),

    #[error(transparent)]
    Executor(#[from] ExecutorError),
}

impl PsmError {
    /// True for errors caused by calling the interpreter out of order.
    pub fn is_misuse(&self) -> bool {
        matches!(self, Self::NotStarted | Self::AlreadyStarted)
    }
}
