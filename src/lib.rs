//! protocol-sm: a declarative state machine interpreter for network protocols
//!
//! A protocol author declares states, entry actions, and per-state tables
//! mapping event categories to responses. The interpreter runs that
//! declaration: it dispatches events, runs actions, follows transitions, and
//! suspends between events without holding a thread.
//!
//! # Core Concepts
//!
//! - **Events**: values of statically declared categories arranged in a
//!   single-parent hierarchy, matched by subsumption
//! - **States**: an optional entry action plus an ordered response table,
//!   validated for unreachable responses when the machine is built
//! - **Interpreter**: one run of a machine with its own context, deadline
//!   timer, and optional monitor and checkpointer
//! - **Executor**: a bounded worker pool and a per-interpreter mailbox for
//!   driving many interpreters concurrently
//!
//! # Example
//!
//! ```rust
//! use protocol_sm::{event_categories, Action, Event, Interpreter, Machine, Response, State};
//! use std::sync::Arc;
//!
//! event_categories! {
//!     SENT = "Sent";
//!     REPLY = "Reply";
//!     NAK = "Nak" under protocol_sm::core::ERROR;
//! }
//!
//! let machine = Machine::new(
//!     "Exchange",
//!     vec![
//!         State::new("Init")
//!             .entry(Action::call("send", |_, interp: &mut Interpreter<u32>| {
//!                 *interp.context_mut() += 1;
//!                 Ok(Event::new(&SENT))
//!             }))
//!             .respond(Response::transition(&SENT, "WaitReply")),
//!         State::new("WaitReply")
//!             .respond(Response::transition(&REPLY, "Done"))
//!             .respond(Response::transition(&NAK, "Init")),
//!         State::new("Done").succeed(),
//!     ],
//!     "Init",
//! )
//! .unwrap();
//!
//! let mut interp = Interpreter::new(Arc::new(machine), 0);
//! interp.init().unwrap();
//! interp.handle_event(Event::new(&NAK)).unwrap();
//! interp.handle_event(Event::new(&REPLY)).unwrap();
//!
//! assert_eq!(*interp.context(), 2);
//! assert!(interp.final_state().unwrap().is_success());
//! ```

pub mod builder;
pub mod checkpoint;
pub mod core;
pub mod executor;
pub mod interp;

// Re-export commonly used types
pub use builder::{BuildError, Machine};
pub use checkpoint::ResumeState;
pub use core::{Event, EventCategory, Response, State, Terminal};
pub use executor::{ExecutionManager, ExecutorConfig, InterpRunner};
pub use interp::{Action, Interpreter, PsmError, Wait};
