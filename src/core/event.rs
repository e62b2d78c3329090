//! Event categories, events, and the subsumption relation.
//!
//! A category is declared once as a `static` item and compared by identity.
//! Each category names at most one parent; every category implicitly sits
//! below [`ELSE`], so a response keyed on `ELSE` matches anything.

use crate::interp::PsmError;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;

/// Wildcard category. Subsumes every other category.
pub static ELSE: EventCategory = EventCategory::new("Else");

/// Delivered when an interpreter enters its initial state.
pub static START: EventCategory = EventCategory::new("Start");

/// Delivered when an interpreter is resumed at a saved state.
pub static RESUME: EventCategory = EventCategory::new("Resume");

/// Generic error category.
pub static ERROR: EventCategory = EventCategory::new("Error");

/// Delivered when a state deadline expires. A sub-category of [`ERROR`].
pub static TIMEOUT: EventCategory = EventCategory::new("Timeout").under(&ERROR);

/// Reserved for the interpreter's suspension mechanism. No response may be
/// keyed on it and no ordinary action may return it.
pub static WAIT: EventCategory = EventCategory::new("Wait");

/// A declared kind of event.
///
/// # Example
///
/// ```rust
/// use protocol_sm::core::{EventCategory, ERROR, TIMEOUT};
///
/// static NAK: EventCategory = EventCategory::new("Nak").under(&ERROR);
///
/// assert!(NAK.isa(&ERROR));
/// assert!(TIMEOUT.isa(&ERROR));
/// assert!(!ERROR.isa(&NAK));
/// ```
pub struct EventCategory {
    name: &'static str,
    parent: Option<&'static EventCategory>,
    carries_message: bool,
}

impl EventCategory {
    /// Declare a category directly below the wildcard.
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            parent: None,
            carries_message: false,
        }
    }

    /// Place this category below `parent`.
    pub const fn under(mut self, parent: &'static EventCategory) -> Self {
        self.parent = Some(parent);
        self
    }

    /// Mark this category as carrying an inbound message payload.
    pub const fn carrying_message(mut self) -> Self {
        self.carries_message = true;
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn parent(&self) -> Option<&'static EventCategory> {
        self.parent
    }

    pub fn carries_message(&self) -> bool {
        self.carries_message
    }

    /// True iff `other` is this category or one of its ancestors.
    pub fn isa(&self, other: &EventCategory) -> bool {
        if std::ptr::eq(other, &ELSE) {
            return true;
        }
        let mut cursor = Some(self);
        while let Some(category) = cursor {
            if std::ptr::eq(category, other) {
                return true;
            }
            cursor = category.parent;
        }
        false
    }

    /// Ancestor chain from this category up to (and excluding) the wildcard.
    pub fn lineage(&self) -> Vec<&str> {
        let mut names = vec![self.name];
        let mut cursor = self.parent;
        while let Some(category) = cursor {
            names.push(category.name);
            cursor = category.parent;
        }
        names
    }
}

impl PartialEq for EventCategory {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self, other)
    }
}

impl Eq for EventCategory {}

impl fmt::Debug for EventCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventCategory")
            .field("name", &self.name)
            .field("parent", &self.parent.map(|p| p.name))
            .field("carries_message", &self.carries_message)
            .finish()
    }
}

impl fmt::Display for EventCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

type Payload = Arc<dyn Any + Send + Sync>;

/// A signal delivered to an interpreter.
///
/// Prototype events carry only their category. Inbound messages are
/// instantiated from a prototype with [`Event::with_message`].
#[derive(Clone)]
pub struct Event {
    category: &'static EventCategory,
    user_val: Option<u64>,
    message: Option<Payload>,
}

impl Event {
    pub const fn new(category: &'static EventCategory) -> Self {
        Self {
            category,
            user_val: None,
            message: None,
        }
    }

    pub fn category(&self) -> &'static EventCategory {
        self.category
    }

    pub fn name(&self) -> &'static str {
        self.category.name
    }

    /// True iff `other` subsumes this event's category.
    pub fn isa(&self, other: &EventCategory) -> bool {
        self.category.isa(other)
    }

    /// Event-to-event form of [`Event::isa`], comparing categories only.
    pub fn isa_event(&self, other: &Event) -> bool {
        self.category.isa(other.category)
    }

    pub fn is_wait(&self) -> bool {
        std::ptr::eq(self.category, &WAIT)
    }

    /// Copy of this event carrying a numeric value.
    pub fn with_user_val(&self, value: u64) -> Self {
        Self {
            user_val: Some(value),
            ..self.clone()
        }
    }

    pub fn user_val(&self) -> Option<u64> {
        self.user_val
    }

    /// New instance of the same category carrying `message`.
    ///
    /// Fails if the category was not declared as a message category.
    pub fn with_message<M>(&self, message: M) -> Result<Self, PsmError>
    where
        M: Any + Send + Sync,
    {
        if !self.category.carries_message {
            return Err(PsmError::NotMessageCategory {
                category: self.category.name,
            });
        }
        Ok(Self {
            category: self.category,
            user_val: self.user_val,
            message: Some(Arc::new(message)),
        })
    }

    pub fn has_message(&self) -> bool {
        self.message.is_some()
    }

    /// The payload, if present and of type `M`.
    pub fn message<M: Any>(&self) -> Option<&M> {
        self.message.as_deref().and_then(|m| m.downcast_ref::<M>())
    }
}

impl From<&'static EventCategory> for Event {
    fn from(category: &'static EventCategory) -> Self {
        Event::new(category)
    }
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("category", &self.category.name)
            .field("user_val", &self.user_val)
            .field("has_message", &self.message.is_some())
            .finish()
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.category.name)
    }
}

/// Maps inbound message opcodes to message category prototypes.
pub struct EventTable<K> {
    entries: HashMap<K, &'static EventCategory>,
}

impl<K: Eq + Hash + fmt::Debug> EventTable<K> {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Register `category` for `opcode`. The category must carry messages.
    pub fn insert(
        mut self,
        opcode: K,
        category: &'static EventCategory,
    ) -> Result<Self, PsmError> {
        if !category.carries_message {
            return Err(PsmError::NotMessageCategory {
                category: category.name,
            });
        }
        self.entries.insert(opcode, category);
        Ok(self)
    }

    pub fn category(&self, opcode: &K) -> Option<&'static EventCategory> {
        self.entries.get(opcode).copied()
    }

    /// Instantiate the prototype registered for `opcode` with `message`.
    pub fn from_message<M>(&self, opcode: &K, message: M) -> Result<Event, PsmError>
    where
        M: Any + Send + Sync,
    {
        let category = self
            .category(opcode)
            .ok_or_else(|| PsmError::UnknownOpcode(format!("{opcode:?}")))?;
        Event::new(category).with_message(message)
    }
}

impl<K: Eq + Hash + fmt::Debug> Default for EventTable<K> {
    fn default() -> Self {
        Self::new()
    }
}
