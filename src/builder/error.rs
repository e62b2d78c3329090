//! Build errors for states and machines.

use thiserror::Error;

/// A single structural defect found while validating a machine definition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Defect {
    #[error("Machine name is empty")]
    EmptyMachineName,

    #[error("Machine has no states")]
    NoStates,

    #[error("State name is empty (position {index})")]
    EmptyStateName { index: usize },

    #[error("State '{name}' is defined more than once")]
    DuplicateState { name: String },

    #[error("State '{state}' response {index} matches the reserved Wait event")]
    ReservedPattern { state: String, index: usize },

    #[error("State '{state}' response {index} has an empty transition target")]
    EmptyTarget { state: String, index: usize },

    #[error(
        "State '{state}' response {later_index} ({later}) is unreachable behind response {earlier_index} ({earlier})"
    )]
    UnreachableResponse {
        state: String,
        earlier: &'static str,
        earlier_index: usize,
        later: &'static str,
        later_index: usize,
    },

    #[error("State '{state}' is marked success or failure but is not final")]
    TerminalNotFinal { state: String },

    #[error("State '{state}' transitions to unknown state '{target}'")]
    UnknownTarget { state: String, target: String },

    #[error("Initial state '{name}' is not a state of this machine")]
    UnknownInitialState { name: String },
}

/// Errors that can occur when building a machine.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error(
        "Machine '{machine}' has {count} structural defect(s): {list}",
        count = .defects.len(),
        list = render(.defects)
    )]
    Invalid {
        machine: String,
        defects: Vec<Defect>,
    },
}

impl BuildError {
    /// Every defect found, in discovery order.
    pub fn defects(&self) -> &[Defect] {
        match self {
            Self::Invalid { defects, .. } => defects,
        }
    }
}

fn render(defects: &[Defect]) -> String {
    defects
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
