//! Running machines.
//!
//! An [`Interpreter`] is one run of a [`Machine`](crate::builder::Machine)
//! over caller-owned context. Actions are closures that receive the
//! triggering event and the interpreter, and return the next event.

pub mod action;
pub mod error;
pub mod interpreter;
pub mod monitor;
pub mod timer;

pub use action::{Action, ActionFn, CallAction, Wait};
pub use error::PsmError;
pub use interpreter::{Interpreter, RunStatus, DEFAULT_MAX_CHAINED_EVENTS};
pub use monitor::{EventMonitor, Step};
pub use timer::{DeadlineStamp, TimerHandle, TimerService};
