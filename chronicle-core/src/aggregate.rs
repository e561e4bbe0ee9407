//! Aggregate root bookkeeping and the aggregate author contract.
//!
//! User aggregates embed a [`Root`] and implement [`Aggregate`]: a stable
//! [`TYPE_NAME`](Aggregate::TYPE_NAME), access to the embedded root, and the
//! [`transition`](Aggregate::transition) function that folds an event into
//! state. The provided [`track_change`](Aggregate::track_change) methods are
//! what command methods call to record new events.
//!
//! Implementing [`SnapshotAggregate`] (serde-backed, with overridable
//! `marshal`/`unmarshal` hooks) additionally makes the aggregate eligible for
//! snapshotting.

use std::sync::Arc;

use chrono::Utc;
use serde::{Serialize, de::DeserializeOwned};
use thiserror::Error;
use uuid::Uuid;

use crate::{
    codec::{self, Codec},
    event::{DomainEvent, Event, Metadata, Version},
    id,
};

/// Errors from aggregate-root bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RootError {
    /// [`set_id`](Root::set_id) was called on an aggregate that already has
    /// an ID.
    #[error("cannot set the id of an aggregate that already has one")]
    AlreadyExists,
    /// The installed ID generator returned the nil UUID.
    #[error("the id generator returned the nil uuid")]
    IdGeneration,
}

/// Bookkeeping state embedded in every aggregate.
///
/// Tracks the aggregate's identity, the version of the last persisted event,
/// and the events recorded since the last save. Not thread-safe: an aggregate
/// instance must be mutated by at most one thread at a time.
#[derive(Debug, Clone, Default)]
pub struct Root {
    id: Uuid,
    version: Version,
    global_version: Version,
    pending: Vec<Event>,
}

impl Root {
    /// The aggregate ID, or [`Uuid::nil`] if none has been assigned yet.
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// Assign an ID from the outside instead of the generator.
    ///
    /// # Errors
    ///
    /// Returns [`RootError::AlreadyExists`] if an ID is already set.
    pub fn set_id(&mut self, id: Uuid) -> Result<(), RootError> {
        if !self.id.is_nil() {
            return Err(RootError::AlreadyExists);
        }
        self.id = id;
        Ok(())
    }

    /// The version of the last pending event, or of the last persisted event
    /// when nothing is pending.
    #[must_use]
    pub fn version(&self) -> Version {
        self.pending.last().map_or(self.version, |event| event.version)
    }

    /// The global version of the last persisted event.
    #[must_use]
    pub const fn global_version(&self) -> Version {
        self.global_version
    }

    /// A defensive copy of the pending events.
    ///
    /// Mutating the returned vector does not affect the aggregate.
    #[must_use]
    pub fn events(&self) -> Vec<Event> {
        self.pending.clone()
    }

    /// Whether any tracked events have not been saved yet.
    #[must_use]
    pub fn unsaved_events(&self) -> bool {
        !self.pending.is_empty()
    }

    fn next_version(&self) -> Version {
        self.version() + 1
    }

    pub(crate) fn pending_mut(&mut self) -> &mut [Event] {
        &mut self.pending
    }

    /// Advance to the last pending event's versions and clear the buffer.
    /// Called by the repository after a successful save.
    pub(crate) fn update(&mut self) {
        if let Some(last) = self.pending.last() {
            self.version = last.version;
            self.global_version = last.global_version;
            self.pending.clear();
        }
    }

    /// Reset to a persisted position. Pending events are always cleared: the
    /// restored state represents durable history.
    pub(crate) fn set_internals(&mut self, id: Uuid, version: Version, global_version: Version) {
        self.id = id;
        self.version = version;
        self.global_version = global_version;
        self.pending.clear();
    }
}

/// A consistency boundary: the unit of event append and version tracking.
///
/// Implementors supply the stable type name, access to the embedded [`Root`],
/// and the transition function. Everything else is provided.
///
/// ```ignore
/// #[derive(Default)]
/// struct Person {
///     root: Root,
///     name: String,
///     age: u32,
/// }
///
/// impl Aggregate for Person {
///     const TYPE_NAME: &'static str = "Person";
///
///     fn root(&self) -> &Root { &self.root }
///     fn root_mut(&mut self) -> &mut Root { &mut self.root }
///
///     fn transition(&mut self, event: &Event) {
///         if let Some(born) = event.data_as::<Born>() {
///             self.name = born.name.clone();
///         }
///     }
/// }
/// ```
pub trait Aggregate {
    /// Stable name of the aggregate type.
    ///
    /// Combined with the aggregate ID to key the event stream, and persisted
    /// with every event, so it must not change between releases.
    const TYPE_NAME: &'static str;

    fn root(&self) -> &Root;

    fn root_mut(&mut self) -> &mut Root;

    /// Fold one event into the aggregate's in-memory state.
    ///
    /// Called synchronously when a change is tracked and again during replay.
    /// Must be pure with respect to the event and idempotent over the same
    /// input.
    fn transition(&mut self, event: &Event);

    /// Record a state change and apply it to the current instance.
    ///
    /// Command methods call this with the event payload describing what
    /// happened. An aggregate ID is generated on first use.
    ///
    /// # Errors
    ///
    /// Returns [`RootError::IdGeneration`] if the installed ID generator
    /// returned the nil UUID.
    fn track_change<D>(&mut self, data: D) -> Result<(), RootError>
    where
        Self: Sized,
        D: DomainEvent + Send + Sync + 'static,
    {
        track(self, data, None)
    }

    /// Like [`track_change`](Self::track_change), with metadata attached to
    /// the recorded event.
    ///
    /// # Errors
    ///
    /// Returns [`RootError::IdGeneration`] if the installed ID generator
    /// returned the nil UUID.
    fn track_change_with_metadata<D>(&mut self, data: D, metadata: Metadata) -> Result<(), RootError>
    where
        Self: Sized,
        D: DomainEvent + Send + Sync + 'static,
    {
        track(self, data, Some(metadata))
    }

    /// Rebuild state by applying persisted events in order.
    ///
    /// Updates the root's identity and versions to the last event's. Does not
    /// clear pending events; during a load the pending buffer is already
    /// empty.
    fn build_from_history(&mut self, events: &[Event])
    where
        Self: Sized,
    {
        for event in events {
            self.transition(event);
            let root = self.root_mut();
            root.id = event.aggregate_id;
            root.version = event.version;
            root.global_version = event.global_version;
        }
    }

    /// The aggregate ID, or [`Uuid::nil`] if none has been assigned yet.
    fn id(&self) -> Uuid {
        self.root().id()
    }

    /// Assign an ID from the outside instead of the generator.
    ///
    /// # Errors
    ///
    /// Returns [`RootError::AlreadyExists`] if an ID is already set.
    fn set_id(&mut self, id: Uuid) -> Result<(), RootError> {
        self.root_mut().set_id(id)
    }

    /// The version of the last pending event, or of the last persisted event
    /// when nothing is pending.
    fn version(&self) -> Version {
        self.root().version()
    }

    /// The global version of the last persisted event.
    fn global_version(&self) -> Version {
        self.root().global_version()
    }

    /// A defensive copy of the pending events.
    fn events(&self) -> Vec<Event> {
        self.root().events()
    }

    /// Whether any tracked events have not been saved yet.
    fn unsaved_events(&self) -> bool {
        self.root().unsaved_events()
    }
}

fn track<A, D>(aggregate: &mut A, data: D, metadata: Option<Metadata>) -> Result<(), RootError>
where
    A: Aggregate,
    D: DomainEvent + Send + Sync + 'static,
{
    let root = aggregate.root_mut();
    if root.id.is_nil() {
        let id = id::next_id();
        if id.is_nil() {
            return Err(RootError::IdGeneration);
        }
        root.id = id;
    }
    let event = Event {
        aggregate_id: root.id,
        aggregate_type: A::TYPE_NAME.to_owned(),
        version: root.next_version(),
        global_version: 0,
        timestamp: Utc::now(),
        data: Arc::new(data),
        metadata,
    };
    root.pending.push(event.clone());
    aggregate.transition(&event);
    Ok(())
}

/// An [`Aggregate`] whose state can be captured in a snapshot.
///
/// The default hooks serialize the whole aggregate through the snapshot
/// handler's codec. Mark the embedded root `#[serde(skip)]`; its identity and
/// versions are carried by the snapshot record and restored separately.
/// Override `marshal`/`unmarshal` for a custom snapshot encoding.
pub trait SnapshotAggregate: Aggregate + Serialize + DeserializeOwned {
    /// Serialize the aggregate state for a snapshot.
    ///
    /// # Errors
    ///
    /// Returns a codec error if serialization fails.
    fn marshal<C: Codec>(&self, codec: &C) -> Result<Vec<u8>, codec::Error> {
        codec
            .serialize(self)
            .map_err(|e| codec::Error::Serialization(Box::new(e)))
    }

    /// Restore the aggregate state from snapshot bytes.
    ///
    /// # Errors
    ///
    /// Returns a codec error if deserialization fails.
    fn unmarshal<C: Codec>(&mut self, codec: &C, state: &[u8]) -> Result<(), codec::Error> {
        *self = codec
            .deserialize(state)
            .map_err(|e| codec::Error::Deserialization(Box::new(e)))?;
        Ok(())
    }
}
