//! Property-based tests for the event hierarchy and machine validation.
//!
//! These tests use proptest to verify properties hold across
//! many randomly generated inputs.

use chrono::Utc;
use protocol_sm::builder::{BuildError, Defect};
use protocol_sm::core::{
    EventCategory, Response, State, StateEntry, StateHistory, ELSE, ERROR, TIMEOUT,
};
use protocol_sm::{event_categories, Event, Machine};
use proptest::prelude::*;

event_categories! {
    MSG = "Msg";
    message POLL = "Poll" under MSG;
    message VOTE = "Vote" under MSG;
    REPAIR = "Repair" under VOTE;
    NAK = "Nak" under ERROR;
    TICK = "Tick";
}

fn categories() -> [&'static EventCategory; 9] {
    [&ELSE, &ERROR, &TIMEOUT, &MSG, &POLL, &VOTE, &REPAIR, &NAK, &TICK]
}

prop_compose! {
    fn arbitrary_category()(index in 0..9usize) -> &'static EventCategory {
        categories()[index]
    }
}

prop_compose! {
    fn arbitrary_name()(name in "[A-Z][a-z]{2,8}") -> String {
        name
    }
}

proptest! {
    #[test]
    fn isa_is_reflexive(category in arbitrary_category()) {
        prop_assert!(category.isa(category));
        prop_assert!(Event::new(category).isa(category));
    }

    #[test]
    fn everything_isa_else(category in arbitrary_category()) {
        prop_assert!(category.isa(&ELSE));
    }

    #[test]
    fn isa_follows_lineage(a in arbitrary_category(), b in arbitrary_category()) {
        let expected = std::ptr::eq(b, &ELSE) || a.lineage().contains(&b.name());
        prop_assert_eq!(a.isa(b), expected);
    }

    #[test]
    fn isa_is_antisymmetric(a in arbitrary_category(), b in arbitrary_category()) {
        if a.isa(b) && b.isa(a) {
            prop_assert_eq!(a, b);
        }
    }

    #[test]
    fn isa_is_transitive(
        a in arbitrary_category(),
        b in arbitrary_category(),
        c in arbitrary_category(),
    ) {
        if a.isa(b) && b.isa(c) {
            prop_assert!(a.isa(c));
        }
    }

    #[test]
    fn response_order_validation(first in arbitrary_category(), second in arbitrary_category()) {
        let state: State<()> = State::new("Listen")
            .respond(Response::transition(first, "Listen"))
            .respond(Response::transition(second, "Listen"));
        let unreachable = second.isa(first);

        let result = Machine::new("Order", vec![state], "Listen");
        prop_assert_eq!(result.is_err(), unreachable);
        if let Err(BuildError::Invalid { defects, .. }) = result {
            let has_unreachable = defects
                .iter()
                .any(|d| matches!(d, Defect::UnreachableResponse { .. }));
            prop_assert!(has_unreachable);
        }
    }

    #[test]
    fn dangling_target_is_rejected(target in arbitrary_name()) {
        prop_assume!(target != "Start");
        let result = Machine::<()>::new(
            "Dangling",
            vec![State::new("Start").respond(Response::transition(&TICK, target.clone()))],
            "Start",
        );

        match result {
            Err(BuildError::Invalid { defects, .. }) => {
                let expected = Defect::UnknownTarget { state: "Start".to_string(), target };
                prop_assert!(defects.contains(&expected));
            }
            Ok(_) => prop_assert!(false, "dangling target was accepted"),
        }
    }

    #[test]
    fn history_preserves_order(names in prop::collection::vec(arbitrary_name(), 1..10)) {
        let mut history = StateHistory::new();
        for name in &names {
            history = history.record(StateEntry {
                state: name.clone(),
                trigger: "Start".to_string(),
                at: Utc::now(),
            });
        }

        let path: Vec<String> = history.get_path().into_iter().map(str::to_string).collect();
        prop_assert_eq!(path, names);
    }
}
