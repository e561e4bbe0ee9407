//! Aggregate identifier generation.
//!
//! New aggregates receive their ID from a process-wide generator the first
//! time a change is tracked. The default produces time-ordered UUID v7
//! values; [`set_id_func`] swaps in a custom generator, which is intended to
//! happen once at startup (deterministic IDs in tests, externally issued IDs,
//! etc.).

use std::sync::{LazyLock, RwLock};

use uuid::Uuid;

type IdFn = Box<dyn Fn() -> Uuid + Send + Sync>;

static ID_FUNC: LazyLock<RwLock<IdFn>> = LazyLock::new(|| RwLock::new(Box::new(new_id)));

/// The default generator: a time-ordered UUID v7 with millisecond precision.
#[must_use]
pub fn new_id() -> Uuid {
    Uuid::now_v7()
}

/// Replace the process-wide aggregate ID generator.
///
/// Returning [`Uuid::nil`] from the generator makes the next tracked change
/// fail with [`RootError::IdGeneration`](crate::aggregate::RootError).
pub fn set_id_func(f: impl Fn() -> Uuid + Send + Sync + 'static) {
    *ID_FUNC.write().expect("id generator lock poisoned") = Box::new(f);
}

pub(crate) fn next_id() -> Uuid {
    (ID_FUNC.read().expect("id generator lock poisoned"))()
}
