//! Snapshot capture and restore.
//!
//! A [`Snapshot`] is the serialized state of an aggregate at a persisted
//! version. The [`SnapshotHandler`] sits between the repository and a
//! [`SnapshotStore`]: it validates the aggregate, runs the
//! `marshal`/`unmarshal` hooks, and keeps the root's identity and versions in
//! step with the stored record.

use std::future::Future;

use thiserror::Error;
use uuid::Uuid;

use crate::{
    aggregate::SnapshotAggregate,
    codec::{self, Codec, JsonCodec},
    event::Version,
};

pub mod inmemory;

/// Error type for snapshot operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The aggregate has no ID yet; there is nothing to key the snapshot by.
    #[error("aggregate id is empty")]
    EmptyId,
    /// The aggregate has pending events; a snapshot must represent durable
    /// state.
    #[error("aggregate holds unsaved events")]
    UnsavedEvents,
    /// No snapshot exists for the requested aggregate.
    #[error("snapshot not found")]
    NotFound,
    /// The marshal or unmarshal hook failed.
    #[error(transparent)]
    Codec(#[from] codec::Error),
    /// Backend-specific failure.
    #[error("snapshot store error: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync + 'static>),
}

/// Serialized aggregate state at a persisted version.
#[derive(Clone, Debug)]
pub struct Snapshot {
    pub aggregate_id: Uuid,
    pub aggregate_type: String,
    pub version: Version,
    pub global_version: Version,
    pub state: Vec<u8>,
}

/// Abstraction over snapshot persistence.
///
/// One current snapshot per `(aggregate id, aggregate type)`; saving again
/// replaces the prior value.
pub trait SnapshotStore: Send + Sync {
    /// Write a snapshot, overwriting any existing one for the same aggregate.
    ///
    /// # Errors
    ///
    /// Returns a backend-specific error when persistence fails.
    fn save(&self, snapshot: Snapshot) -> impl Future<Output = Result<(), Error>> + Send;

    /// Read the current snapshot for an aggregate.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] when no snapshot exists.
    fn get<'a>(
        &'a self,
        id: Uuid,
        aggregate_type: &'a str,
    ) -> impl Future<Output = Result<Snapshot, Error>> + Send + 'a;
}

/// Captures and restores aggregate snapshots through a [`SnapshotStore`].
pub struct SnapshotHandler<SS, C = JsonCodec> {
    store: SS,
    codec: C,
}

impl<SS, C> SnapshotHandler<SS, C>
where
    SS: SnapshotStore,
    C: Codec,
{
    #[must_use]
    pub const fn new(store: SS, codec: C) -> Self {
        Self { store, codec }
    }

    /// Capture the aggregate's current state as a snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EmptyId`] for an aggregate without an ID,
    /// [`Error::UnsavedEvents`] when tracked events have not been saved, a
    /// codec error from the marshal hook, or a store error.
    pub async fn save<A: SnapshotAggregate>(&self, aggregate: &A) -> Result<(), Error> {
        let root = aggregate.root();
        if root.id().is_nil() {
            return Err(Error::EmptyId);
        }
        if root.unsaved_events() {
            return Err(Error::UnsavedEvents);
        }
        let state = aggregate.marshal(&self.codec)?;
        let snapshot = Snapshot {
            aggregate_id: root.id(),
            aggregate_type: A::TYPE_NAME.to_owned(),
            version: root.version(),
            global_version: root.global_version(),
            state,
        };
        tracing::debug!(
            aggregate_type = A::TYPE_NAME,
            version = snapshot.version,
            "saving snapshot"
        );
        self.store.save(snapshot).await
    }

    /// Restore an aggregate from its current snapshot.
    ///
    /// On success the root is positioned at the snapshot's versions with
    /// pending events cleared.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] when no snapshot exists, a codec error
    /// from the unmarshal hook, or a store error.
    pub async fn get<A: SnapshotAggregate>(
        &self,
        id: Uuid,
        aggregate: &mut A,
    ) -> Result<(), Error> {
        let snapshot = self.store.get(id, A::TYPE_NAME).await?;
        aggregate.unmarshal(&self.codec, &snapshot.state)?;
        aggregate.root_mut().set_internals(
            snapshot.aggregate_id,
            snapshot.version,
            snapshot.global_version,
        );
        tracing::debug!(
            aggregate_type = A::TYPE_NAME,
            version = snapshot.version,
            "aggregate restored from snapshot"
        );
        Ok(())
    }
}
