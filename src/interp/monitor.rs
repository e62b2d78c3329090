//! Observation hook for interpreter micro-steps.

use crate::core::Event;

/// One micro-step of the dispatch loop, reported before it happens.
#[derive(Clone, Copy, Debug)]
pub enum Step<'a> {
    /// About to enter `to`. `from` is `None` when entering the first state.
    Enter {
        from: Option<&'a str>,
        event: &'a Event,
        to: &'a str,
    },
    /// About to run the named action in `state`.
    Action {
        state: &'a str,
        event: &'a Event,
        action: &'a str,
    },
    /// About to wait in `state`.
    Wait { state: &'a str, event: &'a Event },
}

impl Step<'_> {
    pub fn event(&self) -> &Event {
        match self {
            Self::Enter { event, .. } | Self::Action { event, .. } | Self::Wait { event, .. } => {
                event
            }
        }
    }
}

/// Receives every [`Step`] an interpreter takes.
pub trait EventMonitor: Send {
    fn observe(&mut self, step: &Step<'_>);
}

impl<F> EventMonitor for F
where
    F: FnMut(&Step<'_>) + Send,
{
    fn observe(&mut self, step: &Step<'_>) {
        self(step)
    }
}
