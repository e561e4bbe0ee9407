//! In-memory event store for tests and examples.
//!
//! [`Store`] keeps serialized event records in a hash map of streams guarded
//! by an `RwLock`, with a process-wide counter assigning global versions.
//! Events round-trip through the payload [`Registry`] exactly like they would
//! against a durable backend.

use std::{
    collections::{HashMap, VecDeque},
    future::Future,
    sync::{Arc, RwLock},
};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{
    codec::{Codec, JsonCodec, Registry},
    event::{Event, Metadata, Version},
    store::{Error, EventIterator, EventStore, validate_events},
};

/// Serialized event record as held by the store.
#[derive(Clone)]
struct Record {
    aggregate_id: Uuid,
    aggregate_type: String,
    version: Version,
    global_version: Version,
    timestamp: DateTime<Utc>,
    reason: String,
    data: Vec<u8>,
    metadata: Option<Metadata>,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct StreamKey {
    aggregate_type: String,
    aggregate_id: Uuid,
}

impl StreamKey {
    fn new(aggregate_type: &str, aggregate_id: Uuid) -> Self {
        Self {
            aggregate_type: aggregate_type.to_owned(),
            aggregate_id,
        }
    }
}

#[derive(Default)]
struct Inner {
    streams: HashMap<StreamKey, Vec<Record>>,
    /// Every record in durable-append order, for [`Store::global_events`].
    log: Vec<Record>,
    next_global: Version,
}

/// Thread-safe in-memory event store.
///
/// Cloning is cheap and clones share the same storage.
#[derive(Clone)]
pub struct Store<C = JsonCodec> {
    registry: Arc<Registry<C>>,
    inner: Arc<RwLock<Inner>>,
}

impl<C: Codec> Store<C> {
    #[must_use]
    pub fn new(registry: Arc<Registry<C>>) -> Self {
        Self {
            registry,
            inner: Arc::new(RwLock::new(Inner::default())),
        }
    }

    /// Read up to `count` events with `global_version >= start`, in global
    /// order, across all streams.
    ///
    /// Events whose `(aggregate type, reason)` is not registered are skipped;
    /// unlike aggregate rehydration, a bulk read has no contiguity to
    /// preserve.
    ///
    /// # Errors
    ///
    /// Returns a codec error if a resolvable event fails to decode.
    pub fn global_events(&self, start: Version, count: usize) -> Result<Vec<Event>, Error> {
        let inner = self.inner.read().expect("event store lock poisoned");
        let mut events = Vec::new();
        for record in inner.log.iter().filter(|r| r.global_version >= start) {
            if events.len() == count {
                break;
            }
            if !self
                .registry
                .resolves(&record.aggregate_type, &record.reason)
            {
                tracing::trace!(
                    aggregate_type = %record.aggregate_type,
                    reason = %record.reason,
                    "skipping unregistered event in global read"
                );
                continue;
            }
            events.push(decode_record(&self.registry, record.clone())?);
        }
        Ok(events)
    }
}

impl<C> EventStore for Store<C>
where
    C: Codec + Send + Sync + 'static,
{
    type Iter = Iter<C>;

    #[tracing::instrument(skip(self, events), fields(event_count = events.len()))]
    fn save<'a>(
        &'a self,
        events: &'a mut [Event],
    ) -> impl Future<Output = Result<(), Error>> + Send + 'a {
        let result = (|| {
            let Some(first) = events.first() else {
                return Err(Error::EmptySave);
            };
            let key = StreamKey::new(&first.aggregate_type, first.aggregate_id);

            // Encode before taking the write lock so a failure leaves the
            // store untouched.
            let mut encoded = Vec::with_capacity(events.len());
            for event in events.iter() {
                encoded.push(self.registry.encode(event.data.as_ref())?);
            }

            let mut inner = self.inner.write().expect("event store lock poisoned");
            let current_version = inner
                .streams
                .get(&key)
                .and_then(|stream| stream.last())
                .map_or(0, |record| record.version);
            validate_events(key.aggregate_id, current_version, events)?;

            for (event, data) in events.iter_mut().zip(encoded) {
                inner.next_global += 1;
                event.global_version = inner.next_global;
                let record = Record {
                    aggregate_id: event.aggregate_id,
                    aggregate_type: event.aggregate_type.clone(),
                    version: event.version,
                    global_version: event.global_version,
                    timestamp: event.timestamp,
                    reason: event.reason().to_owned(),
                    data,
                    metadata: event.metadata.clone(),
                };
                inner.streams.entry(key.clone()).or_default().push(record.clone());
                inner.log.push(record);
            }
            drop(inner);
            tracing::debug!(
                aggregate_type = %key.aggregate_type,
                "events appended to stream"
            );
            Ok(())
        })();
        std::future::ready(result)
    }

    #[tracing::instrument(skip(self, id))]
    fn get<'a>(
        &'a self,
        id: Uuid,
        aggregate_type: &'a str,
        after_version: Version,
    ) -> impl Future<Output = Result<Self::Iter, Error>> + Send + 'a {
        let result = (|| {
            let inner = self.inner.read().expect("event store lock poisoned");
            let Some(stream) = inner.streams.get(&StreamKey::new(aggregate_type, id)) else {
                return Err(Error::NoEvents);
            };
            let records: VecDeque<Record> = stream
                .iter()
                .filter(|record| record.version > after_version)
                .cloned()
                .collect();
            tracing::trace!(matched = records.len(), "opened stream iterator");
            Ok(Iter {
                records,
                registry: Arc::clone(&self.registry),
            })
        })();
        std::future::ready(result)
    }
}

/// Iterator over a snapshot of one stream's records.
pub struct Iter<C = JsonCodec> {
    records: VecDeque<Record>,
    registry: Arc<Registry<C>>,
}

impl<C> EventIterator for Iter<C>
where
    C: Codec + Send + Sync + 'static,
{
    fn next(&mut self) -> impl Future<Output = Result<Option<Event>, Error>> + Send + '_ {
        let result = match self.records.pop_front() {
            None => Ok(None),
            Some(record) => decode_record(&self.registry, record).map(Some),
        };
        std::future::ready(result)
    }
}

fn decode_record<C: Codec>(registry: &Registry<C>, record: Record) -> Result<Event, Error> {
    let data = registry.decode(&record.aggregate_type, &record.reason, &record.data)?;
    Ok(Event {
        aggregate_id: record.aggregate_id,
        aggregate_type: record.aggregate_type,
        version: record.version,
        global_version: record.global_version,
        timestamp: record.timestamp,
        data,
        metadata: record.metadata,
    })
}
