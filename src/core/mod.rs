//! Core declarative types.
//!
//! This module contains the static description of a protocol:
//! - Event categories and event values
//! - States and their response tables
//! - State entry history

pub mod event;
mod history;
mod state;

pub use event::{Event, EventCategory, EventTable, ELSE, ERROR, RESUME, START, TIMEOUT, WAIT};
pub use history::{HistoryRecorder, StateEntry, StateHistory};
pub use state::{Outcome, Response, State, Terminal};
