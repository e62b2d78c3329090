//! Macros for declaring event categories.

/// Declare a group of `static` [`EventCategory`](crate::core::EventCategory)
/// items.
///
/// Each line names a static, its display name, and optionally a parent
/// (`under PARENT`). Prefix with `message` for categories whose events carry
/// a payload.
///
/// # Example
///
/// ```
/// use protocol_sm::event_categories;
/// use protocol_sm::core::{Event, ERROR};
///
/// event_categories! {
///     pub VOTE_MSG = "VoteMsg";
///     pub message POLL = "Poll" under VOTE_MSG;
///     pub message VOTE = "Vote" under VOTE_MSG;
///     pub BAD_VOTE = "BadVote" under ERROR;
/// }
///
/// let poll = Event::new(&POLL).with_message(42u32).unwrap();
/// assert!(poll.isa(&VOTE_MSG));
/// assert!(!VOTE_MSG.carries_message());
/// assert!(Event::new(&BAD_VOTE).isa(&ERROR));
/// ```
#[macro_export]
macro_rules! event_categories {
    () => {};

    (
        $(#[$meta:meta])*
        $vis:vis message $name:ident = $label:literal $(under $parent:path)? ;
        $($rest:tt)*
    ) => {
        $(#[$meta])*
        $vis static $name: $crate::core::EventCategory =
            $crate::core::EventCategory::new($label)$(.under(&$parent))?.carrying_message();
        $crate::event_categories!($($rest)*);
    };

    (
        $(#[$meta:meta])*
        $vis:vis $name:ident = $label:literal $(under $parent:path)? ;
        $($rest:tt)*
    ) => {
        $(#[$meta])*
        $vis static $name: $crate::core::EventCategory =
            $crate::core::EventCategory::new($label)$(.under(&$parent))?;
        $crate::event_categories!($($rest)*);
    };
}
