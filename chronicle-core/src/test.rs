//! Reusable contract checks for event-store implementations.
//!
//! Backend authors point [`verify_event_store`] at a factory for their store
//! and get the full contract battery: round-trips, after-version reads, every
//! batch-validation failure, the no-events sentinel, global-order assignment,
//! and concurrent saves. Each check runs against a fresh store built from the
//! shared test [`registry`].
//!
//! ```ignore
//! #[tokio::test]
//! async fn passes_the_event_store_acceptance_suite() {
//!     chronicle_core::test::verify_event_store(MyStore::new).await;
//! }
//! ```

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    aggregate::{Aggregate, Root},
    codec::{JsonCodec, Registry},
    event::{DomainEvent, Event, Metadata, Version},
    store::{Error, EventIterator, EventStore},
};

const AGGREGATE_TYPE: &str = "FrequentFlierAccount";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
enum Status {
    Red,
    Silver,
    Gold,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct FrequentFlierAccountCreated {
    account_id: String,
    opening_miles: i64,
    opening_tier_points: i64,
}

impl DomainEvent for FrequentFlierAccountCreated {
    const REASON: &'static str = "FrequentFlierAccountCreated";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
struct StatusMatched {
    new_status: Status,
}

impl DomainEvent for StatusMatched {
    const REASON: &'static str = "StatusMatched";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
struct FlightTaken {
    miles_added: i64,
    tier_points_added: i64,
}

impl DomainEvent for FlightTaken {
    const REASON: &'static str = "FlightTaken";
}

/// Payload with an empty reason, for exercising the reason check.
#[derive(Debug, Serialize, Deserialize)]
struct Unnamed;

impl DomainEvent for Unnamed {
    const REASON: &'static str = "";
}

#[derive(Default)]
struct FrequentFlierAccount {
    root: Root,
}

impl Aggregate for FrequentFlierAccount {
    const TYPE_NAME: &'static str = AGGREGATE_TYPE;

    fn root(&self) -> &Root {
        &self.root
    }

    fn root_mut(&mut self) -> &mut Root {
        &mut self.root
    }

    fn transition(&mut self, _event: &Event) {}
}

/// The payload registry used by every suite check.
#[must_use]
pub fn registry() -> Arc<Registry> {
    let mut registry = Registry::new(JsonCodec);
    registry
        .register::<FrequentFlierAccount>()
        .event::<FrequentFlierAccountCreated>()
        .event::<StatusMatched>()
        .event::<FlightTaken>()
        .event::<Unnamed>();
    Arc::new(registry)
}

fn event(
    id: Uuid,
    version: Version,
    data: Arc<dyn crate::event::EventData>,
) -> Event {
    let mut metadata = Metadata::new();
    metadata.insert("test".to_owned(), serde_json::json!("hello"));
    Event {
        aggregate_id: id,
        aggregate_type: AGGREGATE_TYPE.to_owned(),
        version,
        global_version: 0,
        timestamp: Utc::now(),
        data,
        metadata: Some(metadata),
    }
}

fn flight(id: Uuid, version: Version, miles_added: i64) -> Event {
    event(
        id,
        version,
        Arc::new(FlightTaken {
            miles_added,
            tier_points_added: 5,
        }),
    )
}

/// Six events for one account, versions 1 through 6.
fn test_events(id: Uuid) -> Vec<Event> {
    vec![
        event(
            id,
            1,
            Arc::new(FrequentFlierAccountCreated {
                account_id: "1234567".to_owned(),
                opening_miles: 10_000,
                opening_tier_points: 0,
            }),
        ),
        event(
            id,
            2,
            Arc::new(StatusMatched {
                new_status: Status::Silver,
            }),
        ),
        flight(id, 3, 2525),
        flight(id, 4, 2512),
        flight(id, 5, 5600),
        flight(id, 6, 3000),
    ]
}

/// Two follow-up events, versions 7 and 8.
fn test_events_part_two(id: Uuid) -> Vec<Event> {
    vec![flight(id, 7, 5600), flight(id, 8, 3000)]
}

async fn drain<S: EventStore>(store: &S, id: Uuid, after_version: Version) -> Vec<Event> {
    let mut iterator = store
        .get(id, AGGREGATE_TYPE, after_version)
        .await
        .expect("get should succeed for a saved stream");
    let mut events = Vec::new();
    while let Some(event) = iterator.next().await.expect("iterator step should succeed") {
        events.push(event);
    }
    events
}

/// Run the full acceptance battery; `factory` is called once per check.
///
/// # Panics
///
/// Panics when the store violates any part of the contract.
pub async fn verify_event_store<S, F>(factory: F)
where
    S: EventStore + Clone + Send + Sync + 'static,
    F: Fn(Arc<Registry>) -> S,
{
    saves_and_reads_events(&factory(registry())).await;
    reads_events_after_version(&factory(registry())).await;
    rejects_an_empty_batch(&factory(registry())).await;
    rejects_events_from_multiple_aggregates(&factory(registry())).await;
    rejects_events_from_multiple_aggregate_types(&factory(registry())).await;
    rejects_events_in_the_wrong_order(&factory(registry())).await;
    rejects_a_stale_batch(&factory(registry())).await;
    rejects_an_event_without_a_reason(&factory(registry())).await;
    reports_no_events_for_unknown_streams(&factory(registry())).await;
    assigns_increasing_global_versions(&factory(registry())).await;
    handles_concurrent_saves(factory(registry())).await;
    serializes_concurrent_saves_to_one_stream(factory(registry())).await;
}

/// Saved batches come back complete, in order, with payload and metadata
/// intact.
pub async fn saves_and_reads_events<S: EventStore>(store: &S) {
    let id = Uuid::now_v7();
    let mut events = test_events(id);
    store.save(&mut events).await.expect("save should succeed");

    let fetched = drain(store, id, 0).await;
    assert_eq!(fetched.len(), 6, "wrong number of events returned");
    assert_eq!(fetched[0].version, 1);
    assert_eq!(fetched[0].aggregate_id, id);
    assert_eq!(fetched[0].aggregate_type, AGGREGATE_TYPE);
    assert_eq!(fetched[0].reason(), "FrequentFlierAccountCreated");
    assert_eq!(
        fetched[0].metadata.as_ref().expect("metadata")["test"],
        serde_json::json!("hello")
    );
    let created = fetched[0]
        .data_as::<FrequentFlierAccountCreated>()
        .expect("wrong payload type");
    assert_eq!(created.opening_miles, 10_000);

    let mut part_two = test_events_part_two(id);
    store.save(&mut part_two).await.expect("second save should succeed");

    let fetched = drain(store, id, 0).await;
    assert_eq!(fetched.len(), 8, "wrong number of events after second save");
    let versions: Vec<Version> = fetched.iter().map(|e| e.version).collect();
    assert_eq!(versions, (1..=8).collect::<Vec<_>>());
}

/// `get` with an after-version yields only the strictly newer events.
pub async fn reads_events_after_version<S: EventStore>(store: &S) {
    let id = Uuid::now_v7();
    store
        .save(&mut test_events(id))
        .await
        .expect("save should succeed");

    let fetched = drain(store, id, 1).await;
    assert_eq!(fetched.len(), 5, "wrong number of events returned");
    assert_eq!(fetched[0].version, 2);
}

/// An empty batch must be rejected.
pub async fn rejects_an_empty_batch<S: EventStore>(store: &S) {
    let result = store.save(&mut []).await;
    assert!(
        matches!(result, Err(Error::EmptySave)),
        "an empty batch must not be saved"
    );
}

/// A batch mixing aggregate IDs must be rejected.
pub async fn rejects_events_from_multiple_aggregates<S: EventStore>(store: &S) {
    let id = Uuid::now_v7();
    let mut events = test_events(id);
    events.push(flight(Uuid::now_v7(), 7, 100));

    let result = store.save(&mut events).await;
    assert!(
        matches!(result, Err(Error::MultipleAggregates)),
        "a batch spanning two aggregates must not be saved"
    );
}

/// A batch mixing aggregate types must be rejected.
pub async fn rejects_events_from_multiple_aggregate_types<S: EventStore>(store: &S) {
    let id = Uuid::now_v7();
    let mut events = test_events(id);
    events[1].aggregate_type = "OtherAggregateType".to_owned();

    let result = store.save(&mut events).await;
    assert!(
        matches!(result, Err(Error::MultipleTypes)),
        "a batch spanning two aggregate types must not be saved"
    );
}

/// A batch with non-consecutive versions must be rejected.
pub async fn rejects_events_in_the_wrong_order<S: EventStore>(store: &S) {
    let id = Uuid::now_v7();
    let mut events = test_events(id);
    events.push(flight(id, 1, 100));

    let result = store.save(&mut events).await;
    assert!(
        matches!(result, Err(Error::Concurrency { .. })),
        "a batch with out-of-order versions must not be saved"
    );
}

/// A batch that does not continue the stored stream must be rejected.
pub async fn rejects_a_stale_batch<S: EventStore>(store: &S) {
    let id = Uuid::now_v7();
    let result = store.save(&mut test_events_part_two(id)).await;
    assert!(
        matches!(result, Err(Error::Concurrency { .. })),
        "a batch out of sync with the stored stream must not be saved"
    );
}

/// An event whose reason is empty must be rejected.
pub async fn rejects_an_event_without_a_reason<S: EventStore>(store: &S) {
    let id = Uuid::now_v7();
    let mut events = vec![event(id, 1, Arc::new(Unnamed))];

    let result = store.save(&mut events).await;
    assert!(
        matches!(result, Err(Error::ReasonMissing)),
        "an event without a reason must not be saved"
    );
}

/// An unknown stream either fails with the no-events sentinel or yields an
/// immediately drained iterator; both are valid.
pub async fn reports_no_events_for_unknown_streams<S: EventStore>(store: &S) {
    match store.get(Uuid::now_v7(), AGGREGATE_TYPE, 0).await {
        Err(Error::NoEvents) => {}
        Err(error) => panic!("unexpected error for an unknown stream: {error}"),
        Ok(mut iterator) => assert!(
            iterator
                .next()
                .await
                .expect("iterator step should succeed")
                .is_none(),
            "an unknown stream must not yield events"
        ),
    }
}

/// Saved batches receive strictly increasing global versions, visible to the
/// caller through the saved slice.
pub async fn assigns_increasing_global_versions<S: EventStore>(store: &S) {
    let mut events = test_events(Uuid::now_v7());
    store.save(&mut events).await.expect("save should succeed");
    let last_global = events.last().expect("batch is non-empty").global_version;
    assert!(last_global > 0, "global version should be set on save");

    let mut other = vec![flight(Uuid::now_v7(), 1, 100)];
    store.save(&mut other).await.expect("save should succeed");
    assert!(
        other[0].global_version > last_global,
        "global versions should keep increasing across streams"
    );
}

/// Concurrent saves to distinct streams all succeed and all remain readable.
///
/// Outcomes are collected through the task handles, never through shared
/// mutable state.
pub async fn handles_concurrent_saves<S>(store: S)
where
    S: EventStore + Clone + Send + Sync + 'static,
{
    let ids: Vec<Uuid> = (0..10).map(|_| Uuid::now_v7()).collect();

    let saves: Vec<_> = ids
        .iter()
        .map(|&id| {
            let store = store.clone();
            tokio::spawn(async move { store.save(&mut test_events(id)).await })
        })
        .collect();
    for save in saves {
        save.await
            .expect("save task panicked")
            .expect("concurrent save to a distinct stream failed");
    }

    let reads: Vec<_> = ids
        .iter()
        .map(|&id| {
            let store = store.clone();
            tokio::spawn(async move {
                let mut iterator = store.get(id, AGGREGATE_TYPE, 0).await?;
                let mut count = 0;
                while let Some(_event) = iterator.next().await? {
                    count += 1;
                }
                Ok::<usize, Error>(count)
            })
        })
        .collect();
    for read in reads {
        let count = read
            .await
            .expect("read task panicked")
            .expect("concurrent read failed");
        assert_eq!(count, 6, "wrong number of events fetched");
    }
}

/// Concurrent saves to the same stream serialize: exactly one batch lands and
/// the loser fails with the concurrency sentinel.
pub async fn serializes_concurrent_saves_to_one_stream<S>(store: S)
where
    S: EventStore + Clone + Send + Sync + 'static,
{
    let id = Uuid::now_v7();
    let tasks: Vec<_> = (0..2)
        .map(|_| {
            let store = store.clone();
            tokio::spawn(async move { store.save(&mut test_events(id)).await })
        })
        .collect();

    let mut outcomes = Vec::new();
    for task in tasks {
        outcomes.push(task.await.expect("save task panicked"));
    }

    assert_eq!(
        outcomes.iter().filter(|outcome| outcome.is_ok()).count(),
        1,
        "exactly one concurrent batch should land"
    );
    assert!(
        outcomes
            .iter()
            .any(|outcome| matches!(outcome, Err(Error::Concurrency { .. }))),
        "the losing batch should fail with the concurrency sentinel"
    );

    let events = drain(&store, id, 0).await;
    assert_eq!(events.len(), 6, "the winning batch should remain readable");
}
