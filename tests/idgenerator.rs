//! Integration tests for the process-wide ID generator hook.
//!
//! The generator is global state, so all assertions live in a single test
//! function to keep them ordered.

use std::sync::atomic::{AtomicU64, Ordering};

use chronicle::{Aggregate, DomainEvent, Event, Root, RootError, id};
use uuid::Uuid;

#[derive(Default)]
struct Person {
    root: Root,
}

struct Born;

impl DomainEvent for Born {
    const REASON: &'static str = "Born";
}

impl Aggregate for Person {
    const TYPE_NAME: &'static str = "Person";

    fn root(&self) -> &Root {
        &self.root
    }

    fn root_mut(&mut self) -> &mut Root {
        &mut self.root
    }

    fn transition(&mut self, _event: &Event) {}
}

#[test]
fn the_generator_hook_controls_assigned_ids() {
    // A counting generator produces predictable IDs.
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    id::set_id_func(|| Uuid::from_u128(u128::from(COUNTER.fetch_add(1, Ordering::SeqCst) + 1)));

    for expected in 1..10_u128 {
        let mut person = Person::default();
        person.track_change(Born).unwrap();
        assert_eq!(person.id(), Uuid::from_u128(expected));
    }

    // A generator returning nil makes tracking fail.
    id::set_id_func(Uuid::nil);
    let mut person = Person::default();
    assert_eq!(person.track_change(Born), Err(RootError::IdGeneration));
    assert!(person.id().is_nil());
    assert!(!person.unsaved_events());

    // An externally assigned ID sidesteps the generator entirely.
    let id = Uuid::from_u128(0xdead_beef);
    let mut person = Person::default();
    person.set_id(id).unwrap();
    person.track_change(Born).unwrap();
    assert_eq!(person.id(), id);

    // Back to the default time-ordered generator.
    id::set_id_func(id::new_id);
    let mut person = Person::default();
    person.track_change(Born).unwrap();
    assert!(!person.id().is_nil());
    assert_eq!(person.id().get_version_num(), 7);
}
