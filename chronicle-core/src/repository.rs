//! Save/load orchestration across store, stream, and snapshots.
//!
//! The [`Repository`] is the user-facing facade: it forwards an aggregate's
//! pending events to the event store, publishes them to subscribers once they
//! are durable, and rebuilds aggregates from snapshots and event replay.
//!
//! Snapshot support follows a type-state pattern: a repository starts without
//! a snapshot store and [`with_snapshots`](Repository::with_snapshots) swaps
//! in a [`SnapshotHandler`], which narrows `get` to aggregates that implement
//! [`SnapshotAggregate`].

use thiserror::Error;
use uuid::Uuid;

use crate::{
    aggregate::{Aggregate, SnapshotAggregate},
    codec::Codec,
    snapshot::{self, SnapshotHandler, SnapshotStore},
    store::{self, EventIterator, EventStore},
    stream::EventStream,
};

/// Error type for [`Repository::get`].
#[derive(Debug, Error)]
pub enum GetError {
    /// Neither a snapshot nor any events exist for the aggregate.
    #[error("aggregate not found")]
    AggregateNotFound,
    #[error(transparent)]
    Store(#[from] store::Error),
    /// A snapshot load failed with something other than "not found".
    #[error("snapshot load failed: {0}")]
    Snapshot(#[source] snapshot::Error),
}

/// Error type for [`Repository::save_snapshot`].
#[derive(Debug, Error)]
pub enum SaveSnapshotError {
    /// The repository was built without a snapshot store.
    #[error("no snapshot store has been initialized")]
    NoSnapshotStore,
    #[error(transparent)]
    Snapshot(#[from] snapshot::Error),
}

/// Marker for a repository without snapshot support. The default mode.
pub struct NoSnapshots;

/// Snapshot-enabled repository mode holding the handler.
pub struct Snapshots<SS, C>(SnapshotHandler<SS, C>);

/// Coordinates aggregates, the event store, snapshots, and subscribers.
pub struct Repository<S, M = NoSnapshots> {
    store: S,
    stream: EventStream,
    snapshots: M,
}

impl<S: EventStore> Repository<S> {
    /// Create a repository without snapshot support.
    #[must_use]
    pub fn new(store: S) -> Self {
        Self {
            store,
            stream: EventStream::new(),
            snapshots: NoSnapshots,
        }
    }
}

impl<S: EventStore, M> Repository<S, M> {
    /// Enable snapshot support.
    ///
    /// Loading through the returned repository requires aggregates to
    /// implement [`SnapshotAggregate`].
    #[must_use]
    pub fn with_snapshots<SS, C>(self, handler: SnapshotHandler<SS, C>) -> Repository<S, Snapshots<SS, C>>
    where
        SS: SnapshotStore,
        C: Codec,
    {
        Repository {
            store: self.store,
            stream: self.stream,
            snapshots: Snapshots(handler),
        }
    }

    /// The event subscribers attached to this repository.
    #[must_use]
    pub const fn subscribers(&self) -> &EventStream {
        &self.stream
    }

    #[must_use]
    pub const fn event_store(&self) -> &S {
        &self.store
    }

    /// Persist the aggregate's pending events.
    ///
    /// Once the batch is durable, every event is published to the stream with
    /// its assigned global version, and the aggregate's root advances to the
    /// saved position with pending cleared. With nothing pending this is a
    /// no-op.
    ///
    /// # Errors
    ///
    /// Returns the store's error unchanged; the aggregate is left untouched,
    /// so the caller can reload and retry after a
    /// [`Concurrency`](store::Error::Concurrency) failure.
    pub async fn save<A: Aggregate>(&self, aggregate: &mut A) -> Result<(), store::Error> {
        if !aggregate.root().unsaved_events() {
            return Ok(());
        }
        self.store.save(aggregate.root_mut().pending_mut()).await?;

        let events = aggregate.root().events();
        tracing::debug!(
            aggregate_type = A::TYPE_NAME,
            events = events.len(),
            "aggregate saved"
        );
        for event in &events {
            self.stream.publish(event);
        }
        aggregate.root_mut().update();
        Ok(())
    }

    /// Replay the stream tail after the aggregate's current version.
    async fn replay<A: Aggregate>(&self, id: Uuid, aggregate: &mut A) -> Result<(), GetError> {
        let after_version = aggregate.root().version();
        let mut iterator = match self.store.get(id, A::TYPE_NAME, after_version).await {
            Ok(iterator) => iterator,
            // An empty stream is only fatal when there is no snapshot state
            // to fall back on.
            Err(store::Error::NoEvents) if after_version == 0 => {
                return Err(GetError::AggregateNotFound);
            }
            Err(store::Error::NoEvents) => return Ok(()),
            Err(error) => return Err(error.into()),
        };
        while let Some(event) = iterator.next().await? {
            aggregate.build_from_history(std::slice::from_ref(&event));
        }
        if aggregate.root().version() == 0 {
            // Some stores yield an immediately drained iterator instead of
            // the no-events error.
            return Err(GetError::AggregateNotFound);
        }
        Ok(())
    }
}

impl<S: EventStore> Repository<S, NoSnapshots> {
    /// Rebuild an aggregate by replaying its events into `aggregate`.
    ///
    /// # Errors
    ///
    /// Returns [`GetError::AggregateNotFound`] when the stream does not
    /// exist, or the store's error.
    pub async fn get<A: Aggregate>(&self, id: Uuid, aggregate: &mut A) -> Result<(), GetError> {
        self.replay(id, aggregate).await
    }

    /// Always fails: this repository has no snapshot store.
    ///
    /// # Errors
    ///
    /// Returns [`SaveSnapshotError::NoSnapshotStore`].
    pub async fn save_snapshot<A: SnapshotAggregate>(
        &self,
        _aggregate: &A,
    ) -> Result<(), SaveSnapshotError> {
        Err(SaveSnapshotError::NoSnapshotStore)
    }
}

impl<S, SS, C> Repository<S, Snapshots<SS, C>>
where
    S: EventStore,
    SS: SnapshotStore,
    C: Codec,
{
    /// Rebuild an aggregate from its snapshot, then replay the events that
    /// came after it.
    ///
    /// A missing snapshot is not an error; the aggregate is then rebuilt from
    /// events alone.
    ///
    /// # Errors
    ///
    /// Returns [`GetError::AggregateNotFound`] when neither snapshot nor
    /// events exist, a snapshot error other than "not found", or the store's
    /// error.
    pub async fn get<A: SnapshotAggregate>(
        &self,
        id: Uuid,
        aggregate: &mut A,
    ) -> Result<(), GetError> {
        match self.snapshots.0.get(id, aggregate).await {
            Ok(()) => {}
            Err(snapshot::Error::NotFound) => {}
            Err(error) => return Err(GetError::Snapshot(error)),
        }
        self.replay(id, aggregate).await
    }

    /// Capture the aggregate's current state in the snapshot store.
    ///
    /// # Errors
    ///
    /// Returns the snapshot handler's error: an unset ID, unsaved events, a
    /// marshal failure, or a store failure.
    pub async fn save_snapshot<A: SnapshotAggregate>(
        &self,
        aggregate: &A,
    ) -> Result<(), SaveSnapshotError> {
        self.snapshots.0.save(aggregate).await.map_err(Into::into)
    }
}
