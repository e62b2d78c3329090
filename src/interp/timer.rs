//! State deadline timers.
//!
//! The interpreter does not own a clock. It asks a [`TimerService`] to call
//! back after a delay with a [`DeadlineStamp`], and the owner of the
//! interpreter feeds that stamp to
//! [`Interpreter::handle_deadline`](crate::interp::Interpreter::handle_deadline).
//! The stamp records the event counter at arm time, so a deadline that fires
//! after the interpreter has moved on is ignored. It also carries an arm
//! generation, so re-arming within one step retires the earlier firing.

use std::fmt;
use std::time::Duration;

/// Identifies the arming of one state deadline.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct DeadlineStamp {
    pub(crate) seq: u64,
    pub(crate) arm: u64,
}

impl DeadlineStamp {
    /// Event counter value when the deadline was armed.
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// How many deadlines this interpreter had armed before this one.
    pub fn arm(&self) -> u64 {
        self.arm
    }
}

/// Cancels a scheduled deadline when asked. Dropping it does not cancel.
pub struct TimerHandle {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl TimerHandle {
    pub fn new<F>(cancel: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// A handle with nothing to cancel.
    pub fn inert() -> Self {
        Self { cancel: None }
    }

    pub fn cancel(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl fmt::Debug for TimerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimerHandle")
            .field("armed", &self.cancel.is_some())
            .finish()
    }
}

/// External timer facility used to deliver state deadlines.
pub trait TimerService: Send + Sync {
    /// Arrange for `stamp` to be delivered back to the interpreter after
    /// `after` has elapsed.
    fn schedule(&self, after: Duration, stamp: DeadlineStamp) -> TimerHandle;
}
