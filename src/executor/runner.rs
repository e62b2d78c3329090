//! Asynchronous front end for an interpreter.
//!
//! An [`InterpRunner`] owns one [`Interpreter`] behind a mailbox. Callers
//! enqueue work from any thread; a single runner task on the
//! [`ExecutionManager`] pool drains the queue in order, so the interpreter
//! is only ever touched by one thread at a time. State deadlines armed by
//! the interpreter come back through the same queue.

use crate::builder::Machine;
use crate::checkpoint::ResumeState;
use crate::core::{Event, State};
use crate::executor::ExecutionManager;
use crate::interp::{
    DeadlineStamp, Interpreter, PsmError, RunStatus, TimerHandle, TimerService,
};
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

/// Receives an error raised while processing enqueued work.
pub type ErrorHandler = Box<dyn FnOnce(PsmError) + Send>;

type Followup<C> = Box<dyn FnOnce(&mut Interpreter<C>) + Send>;

enum Envelope<C> {
    Start(Option<ErrorHandler>),
    Resume(ResumeState, Option<ErrorHandler>),
    Event {
        event: Event,
        on_error: Option<ErrorHandler>,
        then: Option<Followup<C>>,
    },
    Deadline(DeadlineStamp),
}

#[derive(Clone, Debug)]
struct Snapshot {
    state: Option<String>,
    waiting: bool,
    status: RunStatus,
}

impl Snapshot {
    fn of<C>(interp: &Interpreter<C>) -> Self {
        Self {
            state: interp.current_state().map(|s| s.name().to_string()),
            waiting: interp.is_waiting(),
            status: interp.status(),
        }
    }
}

struct Slot<C> {
    queue: VecDeque<Envelope<C>>,
    // Checked out by the active runner.
    interp: Option<Interpreter<C>>,
    runner_active: bool,
    busy: bool,
    started: bool,
    closed: bool,
    snapshot: Snapshot,
}

struct Mailbox<C> {
    slot: Mutex<Slot<C>>,
    changed: Condvar,
    manager: Arc<ExecutionManager>,
    machine: Arc<Machine<C>>,
}

/// Handle to an interpreter driven by the execution manager.
///
/// Clones share the same interpreter.
///
/// # Example
///
/// ```rust
/// use protocol_sm::builder::Machine;
/// use protocol_sm::core::{Event, EventCategory, Response, State};
/// use protocol_sm::executor::{ExecutionManager, ExecutorConfig, InterpRunner};
/// use protocol_sm::interp::Interpreter;
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// static DONE: EventCategory = EventCategory::new("Done");
///
/// let machine = Arc::new(
///     Machine::<()>::new(
///         "Once",
///         vec![
///             State::new("Idle").respond(Response::transition(&DONE, "Finished")),
///             State::new("Finished").succeed(),
///         ],
///         "Idle",
///     )
///     .unwrap(),
/// );
///
/// let manager = Arc::new(ExecutionManager::new(ExecutorConfig::minimal()).unwrap());
/// manager.start().unwrap();
///
/// let runner = InterpRunner::new(Arc::clone(&manager), Interpreter::new(machine, ()));
/// runner.enqueue_start(None).unwrap();
/// runner.enqueue_event(Event::new(&DONE), None).unwrap();
///
/// assert!(runner.wait_final(Duration::from_secs(5)));
/// assert_eq!(runner.final_state().as_deref(), Some("Finished"));
/// manager.stop();
/// ```
pub struct InterpRunner<C> {
    mailbox: Arc<Mailbox<C>>,
}

impl<C: Send + 'static> InterpRunner<C> {
    /// Wrap `interp`, replacing its timer service with one that delivers
    /// deadlines through this runner's queue.
    pub fn new(manager: Arc<ExecutionManager>, mut interp: Interpreter<C>) -> Self {
        let machine = Arc::clone(interp.machine());
        let mailbox = Arc::new_cyclic(|weak: &Weak<Mailbox<C>>| {
            interp.set_timer_service(Arc::new(MailboxTimers {
                mailbox: weak.clone(),
                manager: Arc::clone(&manager),
            }));
            Mailbox {
                slot: Mutex::new(Slot {
                    queue: VecDeque::new(),
                    snapshot: Snapshot::of(&interp),
                    interp: Some(interp),
                    runner_active: false,
                    busy: false,
                    started: false,
                    closed: false,
                }),
                changed: Condvar::new(),
                manager,
                machine,
            }
        });
        Self { mailbox }
    }

    /// Queue a start. Fails immediately if a start or resume was already
    /// queued.
    pub fn enqueue_start(&self, on_error: Option<ErrorHandler>) -> Result<(), PsmError> {
        self.mailbox.post(Envelope::Start(on_error), |slot| {
            if slot.started {
                return Err(PsmError::AlreadyStarted);
            }
            slot.started = true;
            Ok(())
        })
    }

    /// Queue a resume from `saved`. The saved state is checked against the
    /// machine before anything is queued.
    pub fn enqueue_resume(
        &self,
        saved: ResumeState,
        on_error: Option<ErrorHandler>,
    ) -> Result<(), PsmError> {
        saved.resolve(&self.mailbox.machine)?;
        self.mailbox.post(Envelope::Resume(saved, on_error), |slot| {
            if slot.started {
                return Err(PsmError::AlreadyStarted);
            }
            slot.started = true;
            Ok(())
        })
    }

    /// Queue an event. Fails immediately if nothing has been started.
    pub fn enqueue_event(&self, event: Event, on_error: Option<ErrorHandler>) -> Result<(), PsmError> {
        self.enqueue(event, on_error, None)
    }

    /// Queue an event, then run `then` against the interpreter once the
    /// event has been handled successfully.
    pub fn enqueue_event_then<F>(
        &self,
        event: Event,
        on_error: Option<ErrorHandler>,
        then: F,
    ) -> Result<(), PsmError>
    where
        F: FnOnce(&mut Interpreter<C>) + Send + 'static,
    {
        self.enqueue(event, on_error, Some(Box::new(then)))
    }

    fn enqueue(
        &self,
        event: Event,
        on_error: Option<ErrorHandler>,
        then: Option<Followup<C>>,
    ) -> Result<(), PsmError> {
        let envelope = Envelope::Event {
            event,
            on_error,
            then,
        };
        self.mailbox.post(envelope, |slot| {
            if !slot.started {
                return Err(PsmError::NotStarted);
            }
            Ok(())
        })
    }

    /// Drop queued work and stop processing. The interpreter is left where
    /// it is; later enqueues are ignored.
    pub fn abandon(&self) {
        let mut slot = self.mailbox.slot.lock();
        if slot.closed {
            return;
        }
        slot.closed = true;
        let dropped = slot.queue.len();
        slot.queue.clear();
        if let Some(interp) = slot.interp.as_mut() {
            interp.cancel_current_state_timeout();
        }
        tracing::debug!(machine = %self.mailbox.machine.name(), dropped, "Runner abandoned");
        self.mailbox.changed.notify_all();
    }

    /// Name of the current state as of the last processed envelope.
    pub fn current_state(&self) -> Option<String> {
        self.mailbox.slot.lock().snapshot.state.clone()
    }

    pub fn is_waiting(&self) -> bool {
        self.mailbox.slot.lock().snapshot.waiting
    }

    pub fn is_final_state(&self) -> bool {
        matches!(self.status(), RunStatus::Final(_))
    }

    pub fn final_state(&self) -> Option<String> {
        let slot = self.mailbox.slot.lock();
        match slot.snapshot.status {
            RunStatus::Final(_) => slot.snapshot.state.clone(),
            _ => None,
        }
    }

    pub fn status(&self) -> RunStatus {
        self.mailbox.slot.lock().snapshot.status
    }

    /// Block until the queue is empty and nothing is being processed.
    /// Returns false on timeout.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        self.mailbox
            .wait_for(timeout, |slot| slot.queue.is_empty() && !slot.busy)
    }

    /// Block until the interpreter reaches a final state. Returns false on
    /// timeout.
    pub fn wait_final(&self, timeout: Duration) -> bool {
        self.mailbox
            .wait_for(timeout, |slot| matches!(slot.snapshot.status, RunStatus::Final(_)))
    }
}

impl<C> Clone for InterpRunner<C> {
    fn clone(&self) -> Self {
        Self {
            mailbox: Arc::clone(&self.mailbox),
        }
    }
}

impl<C> std::fmt::Debug for InterpRunner<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let slot = self.mailbox.slot.lock();
        f.debug_struct("InterpRunner")
            .field("machine", &self.mailbox.machine.name())
            .field("state", &slot.snapshot.state)
            .field("queued", &slot.queue.len())
            .field("runner_active", &slot.runner_active)
            .finish()
    }
}

impl<C: Send + 'static> Mailbox<C> {
    fn post<F>(self: &Arc<Self>, envelope: Envelope<C>, admit: F) -> Result<(), PsmError>
    where
        F: FnOnce(&mut Slot<C>) -> Result<(), PsmError>,
    {
        let mut slot = self.slot.lock();
        if slot.closed {
            tracing::trace!(machine = %self.machine.name(), "Ignoring work for abandoned runner");
            return Ok(());
        }
        admit(&mut slot)?;
        slot.queue.push_back(envelope);
        self.changed.notify_all();
        if slot.runner_active {
            return Ok(());
        }
        slot.runner_active = true;
        drop(slot);

        let mailbox = Arc::clone(self);
        if let Err(e) = self.manager.execute(move || mailbox.drain()) {
            let mut slot = self.slot.lock();
            slot.runner_active = false;
            self.changed.notify_all();
            return Err(e.into());
        }
        Ok(())
    }

    fn drain(self: Arc<Self>) {
        let mut slot = self.slot.lock();
        let Some(mut interp) = slot.interp.take() else {
            slot.runner_active = false;
            return;
        };
        let idle_time = self.manager.runner_idle_time();

        loop {
            if let Some(envelope) = slot.queue.pop_front() {
                slot.busy = true;
                MutexGuard::unlocked(&mut slot, || self.process(&mut interp, envelope));
                slot.busy = false;
                slot.snapshot = Snapshot::of(&interp);
                self.changed.notify_all();
                continue;
            }
            if slot.closed || interp.is_final_state() {
                break;
            }
            let timed_out = self.changed.wait_for(&mut slot, idle_time).timed_out();
            if timed_out && slot.queue.is_empty() {
                break;
            }
        }

        slot.interp = Some(interp);
        slot.runner_active = false;
        self.changed.notify_all();
    }

    fn process(&self, interp: &mut Interpreter<C>, envelope: Envelope<C>) {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| match envelope {
            Envelope::Start(on_error) => report(interp.init(), on_error),
            Envelope::Resume(saved, on_error) => report(interp.resume(&saved), on_error),
            Envelope::Event {
                event,
                on_error,
                then,
            } => {
                let result = interp.handle_event(event);
                let handled = result.is_ok();
                report(result, on_error);
                if let (true, Some(then)) = (handled, then) {
                    then(interp);
                }
            }
            Envelope::Deadline(stamp) => report(interp.handle_deadline(stamp).map(|_| ()), None),
        }));
        if outcome.is_err() {
            tracing::error!(
                machine = %self.machine.name(),
                state = ?interp.current_state().map(State::name),
                "Error handler or follow-up panicked"
            );
        }
    }

    fn wait_for<F>(&self, timeout: Duration, done: F) -> bool
    where
        F: Fn(&Slot<C>) -> bool,
    {
        let deadline = Instant::now() + timeout;
        let mut slot = self.slot.lock();
        while !done(&slot) {
            if self.changed.wait_until(&mut slot, deadline).timed_out() {
                return done(&slot);
            }
        }
        true
    }
}

fn report(result: Result<(), PsmError>, on_error: Option<ErrorHandler>) {
    let Err(err) = result else {
        return;
    };
    match on_error {
        Some(handler) => handler(err),
        None => tracing::warn!(error = %err, "Unhandled interpreter error"),
    }
}

struct MailboxTimers<C> {
    mailbox: Weak<Mailbox<C>>,
    manager: Arc<ExecutionManager>,
}

impl<C: Send + 'static> TimerService for MailboxTimers<C> {
    fn schedule(&self, after: Duration, stamp: DeadlineStamp) -> TimerHandle {
        let mailbox = self.mailbox.clone();
        let deliver = move || {
            if let Some(mailbox) = mailbox.upgrade() {
                if let Err(e) = mailbox.post(Envelope::Deadline(stamp), |_| Ok(())) {
                    tracing::warn!(error = %e, seq = stamp.seq(), "Could not deliver deadline");
                }
            }
        };
        self.manager.schedule(after, deliver).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Deadline not armed");
            TimerHandle::inert()
        })
    }
}
