//! The event-store contract and batch validation.
//!
//! An [`EventStore`] is an append-only log of events per
//! `(aggregate type, aggregate id)` stream with optimistic concurrency:
//! a batch only lands if its first version continues the stream exactly
//! where it currently ends. [`validate_events`] checks the batch rules and is
//! exported for backend authors; [`inmemory`] is the reference
//! implementation.

use std::future::Future;

use thiserror::Error;
use uuid::Uuid;

use crate::{
    codec,
    event::{Event, Version},
};

pub mod inmemory;

/// Error type for event-store operations.
///
/// The sentinel variants are part of the store contract; backend-specific
/// failures ride in [`Error::Backend`].
#[derive(Debug, Error)]
pub enum Error {
    /// Save was called with an empty batch.
    #[error("event batch is empty")]
    EmptySave,
    /// No events exist for the requested stream.
    ///
    /// Stores may return this from `get`, or hand back an iterator that is
    /// immediately drained; consumers must handle both.
    #[error("no events")]
    NoEvents,
    /// The batch does not continue the stream at its current version.
    #[error("concurrency error: expected version {expected}, found {found}")]
    Concurrency { expected: Version, found: Version },
    /// The batch holds events for more than one aggregate ID.
    #[error("events hold more than one aggregate id")]
    MultipleAggregates,
    /// The batch holds events for more than one aggregate type.
    #[error("events hold more than one aggregate type")]
    MultipleTypes,
    /// An event in the batch has an empty reason.
    #[error("event holds no reason")]
    ReasonMissing,
    /// Payload encoding or decoding failed, or the payload type is not
    /// registered. Fatal for aggregate rehydration: skipping an event would
    /// break version contiguity.
    #[error(transparent)]
    Codec(#[from] codec::Error),
    /// Backend-specific failure.
    #[error("event store error: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync + 'static>),
}

impl Error {
    /// Wrap a backend-specific error.
    pub fn backend(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Backend(Box::new(err))
    }
}

/// Check that a batch is fit to append to a stream currently at
/// `current_version`.
///
/// Verifies, in order: the batch is non-empty, every event carries
/// `aggregate_id` and the first event's aggregate type, versions are strictly
/// consecutive starting at `current_version + 1`, and every event has a
/// non-empty reason.
///
/// # Errors
///
/// Returns the corresponding [`Error`] variant for the first rule violated.
pub fn validate_events(
    aggregate_id: Uuid,
    current_version: Version,
    events: &[Event],
) -> Result<(), Error> {
    let Some(first) = events.first() else {
        return Err(Error::EmptySave);
    };
    let aggregate_type = first.aggregate_type.as_str();
    let mut current = current_version;

    for event in events {
        if event.aggregate_id != aggregate_id {
            return Err(Error::MultipleAggregates);
        }
        if event.aggregate_type != aggregate_type {
            return Err(Error::MultipleTypes);
        }
        if current + 1 != event.version {
            return Err(Error::Concurrency {
                expected: current + 1,
                found: event.version,
            });
        }
        if event.reason().is_empty() {
            return Err(Error::ReasonMissing);
        }
        current = event.version;
    }
    Ok(())
}

/// Like [`validate_events`], for backends that append without consulting the
/// stored version: the batch only has to be internally consistent, starting
/// from its own first version.
///
/// # Errors
///
/// Returns the corresponding [`Error`] variant for the first rule violated.
pub fn validate_events_no_version_check(
    aggregate_id: Uuid,
    events: &[Event],
) -> Result<(), Error> {
    let Some(first) = events.first() else {
        return Err(Error::EmptySave);
    };
    let Some(current) = first.version.checked_sub(1) else {
        return Err(Error::Concurrency {
            expected: 1,
            found: 0,
        });
    };
    validate_events(aggregate_id, current, events)
}

/// Abstraction over event persistence.
///
/// Implementations must uphold the stream invariants: batches are atomic,
/// local versions are contiguous per stream, and global versions are strictly
/// increasing in durable-append order across all streams. Concurrent saves to
/// the same stream must serialize so that at most one batch continues the
/// stream and the loser fails with [`Error::Concurrency`].
pub trait EventStore: Send + Sync {
    /// Iterator type returned by [`get`](Self::get).
    type Iter: EventIterator;

    /// Append a batch of events to a single stream.
    ///
    /// On success every event in the slice has been made durable and its
    /// `global_version` updated in place, so the caller can publish the very
    /// records it built. On failure the store is unchanged.
    ///
    /// # Errors
    ///
    /// Returns a validation error (see [`validate_events`]) or a
    /// backend-specific error. No partial batches: any failure leaves the
    /// store untouched.
    fn save<'a>(
        &'a self,
        events: &'a mut [Event],
    ) -> impl Future<Output = Result<(), Error>> + Send + 'a;

    /// Open a forward-only iterator over a stream's events with
    /// `version > after_version`, in ascending version order.
    ///
    /// # Errors
    ///
    /// May return [`Error::NoEvents`] when nothing matches; stores may
    /// instead return an iterator that yields `Ok(None)` immediately.
    fn get<'a>(
        &'a self,
        id: Uuid,
        aggregate_type: &'a str,
        after_version: Version,
    ) -> impl Future<Output = Result<Self::Iter, Error>> + Send + 'a;
}

/// Lazy, forward-only cursor over a stream.
///
/// Backend resources held by the iterator are released on drop, so every
/// exit path (including early termination) cleans up.
pub trait EventIterator: Send {
    /// The next event, or `Ok(None)` once the iterator is drained.
    ///
    /// Each call is a suspension point; cancellation between steps must not
    /// corrupt the store.
    ///
    /// # Errors
    ///
    /// Returns a store or decode error for the current position.
    fn next(&mut self) -> impl Future<Output = Result<Option<Event>, Error>> + Send + '_;
}
