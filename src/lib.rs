#![doc = include_str!("../README.md")]

pub use chronicle_core::{
    aggregate,
    aggregate::{Aggregate, Root, RootError, SnapshotAggregate},
    codec,
    codec::{Codec, JsonCodec, Registry},
    event,
    event::{DomainEvent, Event, EventData, Metadata, Version},
    id,
    repository,
    repository::Repository,
    snapshot,
    snapshot::{Snapshot, SnapshotHandler, SnapshotStore},
    store,
    store::{EventIterator, EventStore},
    stream,
    stream::{EventStream, Subscription},
};

#[cfg(feature = "test-util")]
pub use chronicle_core::test;
