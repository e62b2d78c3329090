//! The dispatch loop.

use crate::builder::Machine;
use crate::checkpoint::ResumeState;
use crate::core::{Event, Outcome, State, Terminal, RESUME, START, TIMEOUT};
use crate::interp::action::Action;
use crate::interp::monitor::{EventMonitor, Step};
use crate::interp::timer::{DeadlineStamp, TimerHandle, TimerService};
use crate::interp::PsmError;
use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

/// Default bound on events produced internally within one external call.
pub const DEFAULT_MAX_CHAINED_EVENTS: usize = 10;

type Checkpointer = Box<dyn FnMut(&ResumeState) + Send>;

/// Coarse lifecycle position of an interpreter.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunStatus {
    /// Neither `init` nor `resume` has been called.
    Uninitialized,
    /// Dispatching; only observable from inside an action.
    Running,
    /// Idle in a non-final state until the next event.
    Waiting,
    /// In a final state.
    Final(Terminal),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    Uninitialized,
    Started,
}

struct PendingDeadline {
    stamp: DeadlineStamp,
    handle: TimerHandle,
}

/// One run of a [`Machine`] with caller-supplied context.
///
/// The interpreter serializes its own dispatch through `&mut self`. Waiting
/// holds no thread: `handle_event` simply returns, and the next call picks
/// up where the run left off.
///
/// # Example
///
/// ```rust
/// use protocol_sm::builder::Machine;
/// use protocol_sm::core::{Event, EventCategory, Response, State};
/// use protocol_sm::interp::{Action, Interpreter};
/// use std::sync::Arc;
///
/// static SEND: EventCategory = EventCategory::new("Send");
/// static REPLY: EventCategory = EventCategory::new("Reply");
///
/// let machine = Machine::new(
///     "Ping",
///     vec![
///         State::new("Init")
///             .entry(Action::signal("send", Event::new(&SEND)))
///             .respond(Response::transition(&SEND, "WaitReply")),
///         State::new("WaitReply").respond(Response::transition(&REPLY, "Done")),
///         State::new("Done").succeed(),
///     ],
///     "Init",
/// )
/// .unwrap();
///
/// let mut interp = Interpreter::new(Arc::new(machine), ());
/// interp.init().unwrap();
/// assert!(interp.is_waiting());
///
/// interp.handle_event(Event::new(&REPLY)).unwrap();
/// assert!(interp.is_final_state());
/// assert!(interp.final_state().unwrap().is_success());
/// ```
pub struct Interpreter<C> {
    machine: Arc<Machine<C>>,
    context: C,
    phase: Phase,
    current: Option<usize>,
    waiting: bool,
    event_count: u64,
    pending: Option<PendingDeadline>,
    arms: u64,
    timers: Option<Arc<dyn TimerService>>,
    monitor: Option<Box<dyn EventMonitor>>,
    checkpointer: Option<Checkpointer>,
    last_resumable: Option<String>,
    max_chained_events: usize,
}

impl<C> Interpreter<C> {
    pub fn new(machine: Arc<Machine<C>>, context: C) -> Self {
        Self {
            machine,
            context,
            phase: Phase::Uninitialized,
            current: None,
            waiting: false,
            event_count: 0,
            pending: None,
            arms: 0,
            timers: None,
            monitor: None,
            checkpointer: None,
            last_resumable: None,
            max_chained_events: DEFAULT_MAX_CHAINED_EVENTS,
        }
    }

    pub fn with_max_chained_events(mut self, limit: usize) -> Self {
        self.max_chained_events = limit;
        self
    }

    pub fn with_timer_service(mut self, timers: Arc<dyn TimerService>) -> Self {
        self.timers = Some(timers);
        self
    }

    pub fn set_timer_service(&mut self, timers: Arc<dyn TimerService>) {
        self.timers = Some(timers);
    }

    pub fn set_monitor<M>(&mut self, monitor: M)
    where
        M: EventMonitor + 'static,
    {
        self.monitor = Some(Box::new(monitor));
    }

    /// Install a callback that receives a [`ResumeState`] whenever a new
    /// resumable state is entered.
    pub fn set_checkpointer<F>(&mut self, checkpointer: F)
    where
        F: FnMut(&ResumeState) + Send + 'static,
    {
        self.checkpointer = Some(Box::new(checkpointer));
    }

    pub fn machine(&self) -> &Arc<Machine<C>> {
        &self.machine
    }

    pub fn context(&self) -> &C {
        &self.context
    }

    pub fn context_mut(&mut self) -> &mut C {
        &mut self.context
    }

    /// Enter the initial state, triggered by a [`START`] event.
    pub fn init(&mut self) -> Result<(), PsmError> {
        self.begin()?;
        tracing::debug!(machine = %self.machine.name(), "Starting interpreter");
        let start = Event::new(&START);
        self.event_count += 1;
        let next = self.enter(self.machine.initial_index(), &start)?;
        self.run(next)
    }

    /// Enter the state saved in `saved`, triggered by a [`RESUME`] event.
    /// Used instead of [`Interpreter::init`].
    pub fn resume(&mut self, saved: &ResumeState) -> Result<(), PsmError> {
        if self.phase != Phase::Uninitialized {
            return Err(PsmError::AlreadyStarted);
        }
        let index = saved.resolve(&self.machine)?;
        self.begin()?;
        self.last_resumable = saved.last_resumable_state.clone();
        tracing::debug!(
            machine = %self.machine.name(),
            state = %self.machine.state_at(index).name(),
            "Resuming interpreter"
        );
        let resume = Event::new(&RESUME);
        self.event_count += 1;
        let next = self.enter(index, &resume)?;
        self.run(next)
    }

    /// Deliver an external event and dispatch until the run waits again or
    /// reaches a final state.
    pub fn handle_event(&mut self, event: Event) -> Result<(), PsmError> {
        if self.phase != Phase::Started {
            return Err(PsmError::NotStarted);
        }
        if event.is_wait() {
            return Err(PsmError::IllegalEvent {
                event: event.name(),
                reason: "the wait event is reserved for the interpreter",
            });
        }
        self.waiting = false;
        self.run(Some(event))
    }

    /// Deliver a fired deadline. A timeout event is dispatched only if no
    /// event has been processed since the deadline was armed; otherwise the
    /// firing is stale and ignored. Returns whether a timeout was delivered.
    pub fn handle_deadline(&mut self, stamp: DeadlineStamp) -> Result<bool, PsmError> {
        let current = matches!(&self.pending, Some(p) if p.stamp == stamp);
        if !current || stamp.seq != self.event_count {
            tracing::trace!(
                armed_at = stamp.seq,
                arm = stamp.arm,
                event_count = self.event_count,
                "Ignoring stale deadline"
            );
            return Ok(false);
        }
        self.pending = None;
        tracing::debug!(state = ?self.current_state().map(State::name), "State deadline expired");
        self.handle_event(Event::new(&TIMEOUT))?;
        Ok(true)
    }

    /// Arm (or re-arm) a one-shot deadline for the current state.
    pub fn set_current_state_timeout(&mut self, after: Duration) -> Result<(), PsmError> {
        let timers = self.timers.clone().ok_or(PsmError::NoTimerService)?;
        self.cancel_current_state_timeout();
        let stamp = DeadlineStamp {
            seq: self.event_count,
            arm: self.arms,
        };
        self.arms += 1;
        let handle = timers.schedule(after, stamp);
        tracing::trace!(after_ms = after.as_millis() as u64, seq = stamp.seq, "Armed state deadline");
        self.pending = Some(PendingDeadline { stamp, handle });
        Ok(())
    }

    pub fn cancel_current_state_timeout(&mut self) {
        if let Some(pending) = self.pending.take() {
            pending.handle.cancel();
        }
    }

    pub fn has_pending_timeout(&self) -> bool {
        self.pending.is_some()
    }

    pub fn is_waiting(&self) -> bool {
        self.waiting
    }

    pub fn is_started(&self) -> bool {
        self.phase == Phase::Started
    }

    pub fn current_state(&self) -> Option<&State<C>> {
        self.current.map(|i| self.machine.state_at(i))
    }

    pub fn is_final_state(&self) -> bool {
        self.current_state().is_some_and(State::is_final)
    }

    /// The current state, if it is final.
    pub fn final_state(&self) -> Option<&State<C>> {
        self.current_state().filter(|s| s.is_final())
    }

    pub fn status(&self) -> RunStatus {
        match self.current_state() {
            None => RunStatus::Uninitialized,
            Some(state) if state.is_final() => RunStatus::Final(state.terminal()),
            Some(_) if self.waiting => RunStatus::Waiting,
            Some(_) => RunStatus::Running,
        }
    }

    /// Number of events processed so far, including internal ones.
    pub fn event_count(&self) -> u64 {
        self.event_count
    }

    pub fn last_resumable_state(&self) -> Option<&str> {
        self.last_resumable.as_deref()
    }

    fn begin(&mut self) -> Result<(), PsmError> {
        if self.phase != Phase::Uninitialized {
            return Err(PsmError::AlreadyStarted);
        }
        self.phase = Phase::Started;
        Ok(())
    }

    fn run(&mut self, mut next: Option<Event>) -> Result<(), PsmError> {
        let mut remaining = self.max_chained_events;
        while let Some(event) = next.take() {
            if remaining == 0 {
                let state = self.current_state().map(State::name).unwrap_or_default().to_string();
                tracing::warn!(state = %state, limit = self.max_chained_events, "Chained event limit reached");
                return Err(PsmError::MaxChainedEvents {
                    state,
                    limit: self.max_chained_events,
                });
            }
            remaining -= 1;
            next = self.step(event)?;
        }
        Ok(())
    }

    fn step(&mut self, event: Event) -> Result<Option<Event>, PsmError> {
        self.event_count += 1;
        self.cancel_current_state_timeout();

        let machine = Arc::clone(&self.machine);
        let index = self.current.ok_or(PsmError::NotStarted)?;
        let state = machine.state_at(index);
        let response = state
            .get_response(&event)
            .ok_or_else(|| PsmError::UnknownEvent {
                state: state.name().to_string(),
                event: event.name(),
            })?;

        match response.outcome() {
            Outcome::Transition(target) => {
                let target = machine
                    .state_index(target)
                    .ok_or_else(|| PsmError::UnknownState(target.clone()))?;
                self.enter(target, &event)
            }
            Outcome::Action(action) => self.perform(index, action, &event),
        }
    }

    fn enter(&mut self, index: usize, event: &Event) -> Result<Option<Event>, PsmError> {
        let machine = Arc::clone(&self.machine);
        let state = machine.state_at(index);
        let from = self.current.map(|i| machine.state_at(i).name());

        self.notify(Step::Enter {
            from,
            event,
            to: state.name(),
        });
        tracing::debug!(
            machine = %machine.name(),
            from = ?from,
            to = %state.name(),
            event = %event,
            "Entering state"
        );

        self.current = Some(index);
        self.waiting = false;
        if state.is_resumable() {
            self.checkpoint(state.name());
        }

        match state.entry_action() {
            Some(action) => self.perform(index, action, event),
            None => {
                self.notify(Step::Wait {
                    state: state.name(),
                    event,
                });
                self.waiting = true;
                Ok(None)
            }
        }
    }

    fn perform(
        &mut self,
        index: usize,
        action: &Action<C>,
        event: &Event,
    ) -> Result<Option<Event>, PsmError> {
        let machine = Arc::clone(&self.machine);
        let state = machine.state_at(index).name();

        match action {
            Action::Wait(wait) => {
                self.notify(Step::Wait { state, event });
                self.waiting = true;
                if let Some(after) = wait.timeout_for(event) {
                    self.set_current_state_timeout(after)?;
                }
                Ok(None)
            }
            Action::Call(call) => {
                self.notify(Step::Action {
                    state,
                    event,
                    action: call.name(),
                });
                tracing::trace!(state = %state, action = %call.name(), event = %event, "Running action");

                let outcome = panic::catch_unwind(AssertUnwindSafe(|| call.invoke(event, self)));
                match outcome {
                    Ok(Ok(next)) if next.is_wait() => Err(PsmError::IllegalEvent {
                        event: next.name(),
                        reason: "only a wait action may suspend the interpreter",
                    }),
                    Ok(Ok(next)) => Ok(Some(next)),
                    Ok(Err(source)) => Err(PsmError::Action {
                        action: call.name().to_string(),
                        state: state.to_string(),
                        source: source.into(),
                    }),
                    Err(payload) => Err(PsmError::ActionPanicked {
                        action: call.name().to_string(),
                        state: state.to_string(),
                        message: panic_message(payload.as_ref()),
                    }),
                }
            }
        }
    }

    fn notify(&mut self, step: Step<'_>) {
        if let Some(monitor) = self.monitor.as_mut() {
            monitor.observe(&step);
        }
    }

    fn checkpoint(&mut self, name: &str) {
        if self.last_resumable.as_deref() == Some(name) {
            return;
        }
        self.last_resumable = Some(name.to_string());
        if let Some(checkpointer) = self.checkpointer.as_mut() {
            let saved = ResumeState::new(self.machine.name(), Some(name.to_string()));
            tracing::debug!(state = %name, id = %saved.id, "Checkpointing resumable state");
            checkpointer(&saved);
        }
    }
}

impl<C> Drop for Interpreter<C> {
    fn drop(&mut self) {
        self.cancel_current_state_timeout();
    }
}

impl<C> fmt::Debug for Interpreter<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Interpreter")
            .field("machine", &self.machine.name())
            .field("current", &self.current_state().map(State::name))
            .field("waiting", &self.waiting)
            .field("event_count", &self.event_count)
            .field("pending_timeout", &self.pending.is_some())
            .finish()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
