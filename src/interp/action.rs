//! Actions bound to state entries and responses.

use crate::core::Event;
use crate::interp::Interpreter;
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Signature of a protocol author's handler.
pub type ActionFn<C> =
    dyn Fn(&Event, &mut Interpreter<C>) -> anyhow::Result<Event> + Send + Sync;

/// How long a waiting state waits before a timeout is delivered.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Wait {
    /// No deadline.
    Forever,
    /// Fixed deadline. A zero duration means no deadline.
    After(Duration),
    /// Deadline in milliseconds taken from the triggering event's user value.
    /// A missing or zero value means no deadline.
    InTrigger,
}

impl Wait {
    /// Deadline to arm for a wait triggered by `event`, if any.
    pub fn timeout_for(&self, event: &Event) -> Option<Duration> {
        let duration = match self {
            Self::Forever => return None,
            Self::After(duration) => *duration,
            Self::InTrigger => Duration::from_millis(event.user_val()?),
        };
        (!duration.is_zero()).then_some(duration)
    }
}

/// A named handler closure.
pub struct CallAction<C> {
    name: Arc<str>,
    run: Arc<ActionFn<C>>,
}

impl<C> CallAction<C> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn invoke(&self, event: &Event, interp: &mut Interpreter<C>) -> anyhow::Result<Event> {
        (self.run)(event, interp)
    }
}

impl<C> Clone for CallAction<C> {
    fn clone(&self) -> Self {
        Self {
            name: Arc::clone(&self.name),
            run: Arc::clone(&self.run),
        }
    }
}

/// Work run on entering a state or in response to an event.
///
/// An action either waits (suspending the interpreter) or calls a handler
/// that produces the next event.
///
/// # Example
///
/// ```rust
/// use protocol_sm::core::{Event, EventCategory};
/// use protocol_sm::interp::{Action, Interpreter};
///
/// static SENT: EventCategory = EventCategory::new("Sent");
///
/// let send = Action::call("send_poll", |_event, interp: &mut Interpreter<Vec<String>>| {
///     interp.context_mut().push("poll".to_string());
///     Ok(Event::new(&SENT))
/// });
/// assert_eq!(send.name(), "send_poll");
/// ```
pub enum Action<C> {
    Wait(Wait),
    Call(CallAction<C>),
}

impl<C> Action<C> {
    /// Bind a handler under `name`. The name identifies the action in
    /// monitor steps, logs, and wrapped errors.
    pub fn call<F>(name: impl Into<String>, run: F) -> Self
    where
        F: Fn(&Event, &mut Interpreter<C>) -> anyhow::Result<Event> + Send + Sync + 'static,
    {
        let name: String = name.into();
        Self::Call(CallAction {
            name: Arc::from(name),
            run: Arc::new(run),
        })
    }

    /// Bind a handler that needs the triggering event's message payload.
    ///
    /// The action fails if the event carries no payload of type `M`.
    pub fn on_message<M, F>(name: impl Into<String>, run: F) -> Self
    where
        M: Any + Send + Sync,
        F: Fn(&M, &Event, &mut Interpreter<C>) -> anyhow::Result<Event> + Send + Sync + 'static,
    {
        let name: String = name.into();
        let label = name.clone();
        Self::call(name, move |event, interp| {
            let message = event.message::<M>().ok_or_else(|| {
                anyhow::anyhow!(
                    "{} expected a {} payload on {}",
                    label,
                    std::any::type_name::<M>(),
                    event.name()
                )
            })?;
            run(message, event, interp)
        })
    }

    /// Action that always returns `event`.
    pub fn signal(name: impl Into<String>, event: Event) -> Self {
        Self::call(name, move |_, _| Ok(event.clone()))
    }

    pub fn wait(wait: Wait) -> Self {
        Self::Wait(wait)
    }

    pub fn is_wait(&self) -> bool {
        matches!(self, Self::Wait(_))
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Wait(_) => "wait",
            Self::Call(call) => call.name(),
        }
    }
}

impl<C> Clone for Action<C> {
    fn clone(&self) -> Self {
        match self {
            Self::Wait(wait) => Self::Wait(*wait),
            Self::Call(call) => Self::Call(call.clone()),
        }
    }
}

impl<C> fmt::Debug for Action<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Wait(wait) => f.debug_tuple("Wait").field(wait).finish(),
            Self::Call(call) => f.debug_tuple("Call").field(&call.name()).finish(),
        }
    }
}
