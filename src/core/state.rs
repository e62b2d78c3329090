//! States and their response tables.
//!
//! A state is a name, an optional entry action, and an ordered table of
//! responses. The table is first-match-wins, so it must list narrower
//! patterns before broader ones; [`State::validate`] rejects tables where an
//! earlier pattern would shadow a later one.

use crate::builder::error::Defect;
use crate::core::event::{Event, EventCategory, WAIT};
use crate::interp::action::{Action, Wait};
use serde::{Deserialize, Serialize};
use std::fmt;
use stillwater::validation::Validation;
use stillwater::NonEmptyVec;

/// Outcome recorded on a final state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Terminal {
    /// Final, but neither success nor failure was declared.
    Neither,
    Success,
    Failure,
}

/// What a response does when its pattern matches.
pub enum Outcome<C> {
    /// Move to the named state and enter it.
    Transition(String),
    /// Run an action in the current state.
    Action(Action<C>),
}

impl<C> Clone for Outcome<C> {
    fn clone(&self) -> Self {
        match self {
            Self::Transition(target) => Self::Transition(target.clone()),
            Self::Action(action) => Self::Action(action.clone()),
        }
    }
}

impl<C> fmt::Debug for Outcome<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transition(target) => f.debug_tuple("Transition").field(target).finish(),
            Self::Action(action) => f.debug_tuple("Action").field(action).finish(),
        }
    }
}

/// One row of a state's response table.
pub struct Response<C> {
    pattern: &'static EventCategory,
    outcome: Outcome<C>,
}

impl<C> Response<C> {
    /// Respond to `pattern` by moving to the state named `target`.
    pub fn transition(pattern: &'static EventCategory, target: impl Into<String>) -> Self {
        Self {
            pattern,
            outcome: Outcome::Transition(target.into()),
        }
    }

    /// Respond to `pattern` by running `action`.
    pub fn action(pattern: &'static EventCategory, action: Action<C>) -> Self {
        Self {
            pattern,
            outcome: Outcome::Action(action),
        }
    }

    /// Respond to `pattern` by waiting.
    pub fn wait(pattern: &'static EventCategory, wait: Wait) -> Self {
        Self::action(pattern, Action::Wait(wait))
    }

    pub fn pattern(&self) -> &'static EventCategory {
        self.pattern
    }

    pub fn outcome(&self) -> &Outcome<C> {
        &self.outcome
    }

    pub fn matches(&self, event: &Event) -> bool {
        event.isa(self.pattern)
    }

    pub fn transition_target(&self) -> Option<&str> {
        match &self.outcome {
            Outcome::Transition(target) => Some(target),
            Outcome::Action(_) => None,
        }
    }
}

impl<C> fmt::Debug for Response<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Response")
            .field("pattern", &self.pattern.name())
            .field("outcome", &self.outcome)
            .finish()
    }
}

/// A state of a protocol machine.
///
/// # Example
///
/// ```rust
/// use protocol_sm::core::{EventCategory, Response, State, ELSE};
/// use protocol_sm::interp::Wait;
///
/// static REPLY: EventCategory = EventCategory::new("Reply");
///
/// let waiting: State<()> = State::new("WaitReply")
///     .entry_wait(Wait::Forever)
///     .respond(Response::transition(&REPLY, "Done"))
///     .respond(Response::transition(&ELSE, "Error"));
/// assert!(!waiting.is_final());
///
/// let done: State<()> = State::new("Done").succeed();
/// assert!(done.is_final());
/// ```
pub struct State<C> {
    name: String,
    entry: Option<Action<C>>,
    responses: Vec<Response<C>>,
    resumable: bool,
    terminal: Terminal,
}

impl<C> State<C> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entry: None,
            responses: Vec::new(),
            resumable: false,
            terminal: Terminal::Neither,
        }
    }

    /// Set the action run when the state is entered.
    pub fn entry(mut self, action: Action<C>) -> Self {
        self.entry = Some(action);
        self
    }

    /// Wait on entry, optionally arming a deadline.
    pub fn entry_wait(self, wait: Wait) -> Self {
        self.entry(Action::Wait(wait))
    }

    /// Append a response. Order matters: the first match wins.
    pub fn respond(mut self, response: Response<C>) -> Self {
        self.responses.push(response);
        self
    }

    pub fn responses_from(mut self, responses: impl IntoIterator<Item = Response<C>>) -> Self {
        self.responses.extend(responses);
        self
    }

    /// Mark the state as a resumption point.
    pub fn resumable(mut self) -> Self {
        self.resumable = true;
        self
    }

    /// Declare this final state a successful outcome.
    pub fn succeed(mut self) -> Self {
        self.terminal = Terminal::Success;
        self
    }

    /// Declare this final state a failed outcome.
    pub fn fail(mut self) -> Self {
        self.terminal = Terminal::Failure;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn entry_action(&self) -> Option<&Action<C>> {
        self.entry.as_ref()
    }

    pub fn responses(&self) -> &[Response<C>] {
        &self.responses
    }

    pub fn is_resumable(&self) -> bool {
        self.resumable
    }

    /// A state is final iff it has no responses.
    pub fn is_final(&self) -> bool {
        self.responses.is_empty()
    }

    pub fn terminal(&self) -> Terminal {
        self.terminal
    }

    pub fn is_success(&self) -> bool {
        self.terminal == Terminal::Success
    }

    pub fn is_failure(&self) -> bool {
        self.terminal == Terminal::Failure
    }

    /// First response whose pattern subsumes `event`.
    pub fn get_response(&self, event: &Event) -> Option<&Response<C>> {
        self.responses.iter().find(|r| r.matches(event))
    }

    /// Check the response table and terminal marking, collecting every defect.
    pub fn validate(&self) -> Validation<(), NonEmptyVec<Defect>> {
        let mut checks: Vec<Validation<(), NonEmptyVec<Defect>>> = Vec::new();

        for (index, response) in self.responses.iter().enumerate() {
            if std::ptr::eq(response.pattern, &WAIT) {
                checks.push(Validation::fail(Defect::ReservedPattern {
                    state: self.name.clone(),
                    index,
                }));
            }
            if response.transition_target() == Some("") {
                checks.push(Validation::fail(Defect::EmptyTarget {
                    state: self.name.clone(),
                    index,
                }));
            }
        }

        for (earlier_index, earlier) in self.responses.iter().enumerate() {
            for (offset, later) in self.responses[earlier_index + 1..].iter().enumerate() {
                if later.pattern.isa(earlier.pattern) {
                    checks.push(Validation::fail(Defect::UnreachableResponse {
                        state: self.name.clone(),
                        earlier: earlier.pattern.name(),
                        earlier_index,
                        later: later.pattern.name(),
                        later_index: earlier_index + 1 + offset,
                    }));
                }
            }
        }

        if self.terminal != Terminal::Neither && !self.is_final() {
            checks.push(Validation::fail(Defect::TerminalNotFinal {
                state: self.name.clone(),
            }));
        }

        Validation::all_vec(checks).map(|_| ())
    }
}

impl<C> fmt::Debug for State<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("State")
            .field("name", &self.name)
            .field("entry", &self.entry)
            .field("responses", &self.responses)
            .field("resumable", &self.resumable)
            .field("terminal", &self.terminal)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::event::{ELSE, ERROR, TIMEOUT};

    static SCHED: EventCategory = EventCategory::new("Sched");
    static OK: EventCategory = EventCategory::new("Ok");

    fn defects(state: &State<()>) -> Vec<Defect> {
        match state.validate() {
            Validation::Success(_) => Vec::new(),
            Validation::Failure(errors) => errors.iter().cloned().collect(),
        }
    }

    #[test]
    fn state_without_responses_is_final() {
        let state: State<()> = State::new("Done");
        assert!(state.is_final());
        assert_eq!(state.terminal(), Terminal::Neither);
    }

    #[test]
    fn get_response_is_first_match() {
        let state: State<()> = State::new("Wait")
            .respond(Response::transition(&TIMEOUT, "Retry"))
            .respond(Response::transition(&ERROR, "Abort"))
            .respond(Response::transition(&ELSE, "Other"));

        let timeout = state.get_response(&Event::new(&TIMEOUT)).unwrap();
        assert_eq!(timeout.transition_target(), Some("Retry"));

        let error = state.get_response(&Event::new(&ERROR)).unwrap();
        assert_eq!(error.transition_target(), Some("Abort"));

        let other = state.get_response(&Event::new(&SCHED)).unwrap();
        assert_eq!(other.transition_target(), Some("Other"));
    }

    #[test]
    fn error_response_also_matches_timeout() {
        let state: State<()> = State::new("Wait").respond(Response::transition(&ERROR, "Abort"));
        assert!(state.get_response(&Event::new(&TIMEOUT)).is_some());
        assert!(state.get_response(&Event::new(&SCHED)).is_none());
    }

    #[test]
    fn well_ordered_table_validates() {
        let state: State<()> = State::new("Wait")
            .respond(Response::transition(&TIMEOUT, "Retry"))
            .respond(Response::transition(&ERROR, "Abort"))
            .respond(Response::wait(&SCHED, Wait::Forever))
            .respond(Response::transition(&ELSE, "Other"));
        assert!(state.validate().is_success());
    }

    #[test]
    fn broader_pattern_before_narrower_is_rejected() {
        let state: State<()> = State::new("Wait")
            .respond(Response::transition(&ERROR, "Abort"))
            .respond(Response::transition(&TIMEOUT, "Retry"));

        let found = defects(&state);
        assert_eq!(found.len(), 1);
        assert!(matches!(
            &found[0],
            Defect::UnreachableResponse {
                earlier: "Error",
                later: "Timeout",
                earlier_index: 0,
                later_index: 1,
                ..
            }
        ));
    }

    #[test]
    fn anything_after_else_is_rejected() {
        let state: State<()> = State::new("Wait")
            .respond(Response::transition(&ELSE, "Other"))
            .respond(Response::transition(&OK, "Fine"));
        assert_eq!(defects(&state).len(), 1);
    }

    #[test]
    fn duplicate_patterns_are_rejected() {
        let state: State<()> = State::new("Wait")
            .respond(Response::transition(&OK, "A"))
            .respond(Response::transition(&OK, "B"));
        assert_eq!(defects(&state).len(), 1);
    }

    #[test]
    fn wait_pattern_is_reserved() {
        let state: State<()> = State::new("Wait").respond(Response::transition(&WAIT, "X"));
        let found = defects(&state);
        assert!(found
            .iter()
            .any(|d| matches!(d, Defect::ReservedPattern { index: 0, .. })));
    }

    #[test]
    fn empty_target_is_rejected() {
        let state: State<()> = State::new("Wait").respond(Response::transition(&OK, ""));
        assert!(matches!(
            defects(&state).as_slice(),
            [Defect::EmptyTarget { index: 0, .. }]
        ));
    }

    #[test]
    fn success_marking_requires_final_state() {
        let state: State<()> = State::new("Almost")
            .respond(Response::transition(&OK, "Done"))
            .succeed();
        assert!(matches!(
            defects(&state).as_slice(),
            [Defect::TerminalNotFinal { .. }]
        ));

        let done: State<()> = State::new("Done").fail();
        assert!(done.validate().is_success());
        assert!(done.is_failure());
    }

    #[test]
    fn all_defects_are_collected() {
        let state: State<()> = State::new("Bad")
            .respond(Response::transition(&ELSE, ""))
            .respond(Response::transition(&WAIT, "X"))
            .succeed();
        // empty target, reserved pattern, unreachable after Else, terminal on non-final
        assert_eq!(defects(&state).len(), 4);
    }
}
