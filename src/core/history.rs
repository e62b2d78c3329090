//! State entry history.
//!
//! [`StateHistory`] is an immutable record of the states a run has entered.
//! [`HistoryRecorder`] builds one from an interpreter's monitor steps.

use crate::interp::{EventMonitor, Step};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Record of entering one state.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StateEntry {
    /// State entered
    pub state: String,
    /// Name of the event category that caused the entry
    pub trigger: String,
    /// When the entry happened
    pub at: DateTime<Utc>,
}

/// Ordered history of state entries.
///
/// `record` returns a new history; the receiver is left unchanged.
///
/// # Example
///
/// ```rust
/// use protocol_sm::core::{StateEntry, StateHistory};
/// use chrono::Utc;
///
/// let history = StateHistory::new()
///     .record(StateEntry { state: "Init".into(), trigger: "Start".into(), at: Utc::now() })
///     .record(StateEntry { state: "WaitReply".into(), trigger: "Send".into(), at: Utc::now() });
///
/// assert_eq!(history.get_path(), vec!["Init", "WaitReply"]);
/// ```
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StateHistory {
    entries: Vec<StateEntry>,
}

impl StateHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, entry: StateEntry) -> Self {
        let mut entries = self.entries.clone();
        entries.push(entry);
        Self { entries }
    }

    /// Names of the states entered, in order.
    pub fn get_path(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.state.as_str()).collect()
    }

    /// Time between the first and last entry.
    ///
    /// Returns `None` if nothing was recorded.
    pub fn duration(&self) -> Option<Duration> {
        let (first, last) = (self.entries.first()?, self.entries.last()?);
        last.at.signed_duration_since(first.at).to_std().ok()
    }

    pub fn entries(&self) -> &[StateEntry] {
        &self.entries
    }

    pub fn last(&self) -> Option<&StateEntry> {
        self.entries.last()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Monitor that records every state entry into a shared [`StateHistory`].
///
/// Clones share the same history, so one clone can be installed on an
/// interpreter while another is kept for inspection.
#[derive(Clone, Debug, Default)]
pub struct HistoryRecorder {
    history: Arc<Mutex<StateHistory>>,
}

impl HistoryRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// A copy of the history recorded so far.
    pub fn snapshot(&self) -> StateHistory {
        self.history.lock().clone()
    }
}

impl EventMonitor for HistoryRecorder {
    fn observe(&mut self, step: &Step<'_>) {
        if let Step::Enter { event, to, .. } = step {
            let mut history = self.history.lock();
            *history = history.record(StateEntry {
                state: (*to).to_string(),
                trigger: event.name().to_string(),
                at: Utc::now(),
            });
        }
    }
}
