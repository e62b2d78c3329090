//! Validated, immutable protocol machines.

use crate::builder::error::{BuildError, Defect};
use crate::core::State;
use std::collections::HashMap;
use std::fmt;
use stillwater::validation::Validation;
use stillwater::NonEmptyVec;

/// An immutable set of states with a designated initial state.
///
/// All structural checks happen once, in [`Machine::new`]. A machine is
/// meant to be wrapped in an `Arc` and shared by every interpreter that
/// runs it.
pub struct Machine<C> {
    name: String,
    states: Vec<State<C>>,
    index: HashMap<String, usize>,
    initial: usize,
}

impl<C> Machine<C> {
    /// Assemble and validate a machine.
    ///
    /// Every defect found in the states and in the machine as a whole is
    /// reported in a single [`BuildError::Invalid`].
    pub fn new(
        name: impl Into<String>,
        states: Vec<State<C>>,
        initial: &str,
    ) -> Result<Self, BuildError> {
        let name = name.into();
        let mut checks: Vec<Validation<(), NonEmptyVec<Defect>>> = Vec::new();

        if name.is_empty() {
            checks.push(Validation::fail(Defect::EmptyMachineName));
        }
        if states.is_empty() {
            checks.push(Validation::fail(Defect::NoStates));
        }

        let mut index = HashMap::with_capacity(states.len());
        for (position, state) in states.iter().enumerate() {
            if state.name().is_empty() {
                checks.push(Validation::fail(Defect::EmptyStateName { index: position }));
            }
            if index.insert(state.name().to_string(), position).is_some() {
                checks.push(Validation::fail(Defect::DuplicateState {
                    name: state.name().to_string(),
                }));
            }
            checks.push(state.validate());
        }

        for state in &states {
            for target in state.responses().iter().filter_map(|r| r.transition_target()) {
                if !target.is_empty() && !index.contains_key(target) {
                    checks.push(Validation::fail(Defect::UnknownTarget {
                        state: state.name().to_string(),
                        target: target.to_string(),
                    }));
                }
            }
        }

        let initial_index = index.get(initial).copied();
        if initial_index.is_none() {
            checks.push(Validation::fail(Defect::UnknownInitialState {
                name: initial.to_string(),
            }));
        }

        match Validation::all_vec(checks) {
            Validation::Success(_) => {}
            Validation::Failure(errors) => {
                let defects: Vec<Defect> = errors.iter().cloned().collect();
                tracing::error!(machine = %name, defects = defects.len(), "Invalid machine definition");
                return Err(BuildError::Invalid {
                    machine: name,
                    defects,
                });
            }
        }

        let initial = initial_index.ok_or_else(|| BuildError::Invalid {
            machine: name.clone(),
            defects: vec![Defect::UnknownInitialState {
                name: initial.to_string(),
            }],
        })?;

        tracing::debug!(machine = %name, states = states.len(), "Machine built");

        Ok(Self {
            name,
            states,
            index,
            initial,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn states(&self) -> &[State<C>] {
        &self.states
    }

    pub fn initial_state(&self) -> &State<C> {
        &self.states[self.initial]
    }

    /// Look up a state by name.
    pub fn get_state(&self, name: &str) -> Option<&State<C>> {
        self.index.get(name).map(|&i| &self.states[i])
    }

    pub(crate) fn initial_index(&self) -> usize {
        self.initial
    }

    pub(crate) fn state_index(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    pub(crate) fn state_at(&self, index: usize) -> &State<C> {
        &self.states[index]
    }
}

impl<C> fmt::Debug for Machine<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Machine")
            .field("name", &self.name)
            .field("states", &self.states)
            .field("initial", &self.states[self.initial].name())
            .finish()
    }
}
