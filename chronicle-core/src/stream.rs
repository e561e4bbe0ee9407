//! Synchronous in-process event fanout.
//!
//! The [`EventStream`] delivers saved events to subscribers in the publishing
//! thread, before the repository's save returns. Five filters are available:
//! everything ([`all`](EventStream::all)), single aggregate instances
//! ([`aggregate_id`](EventStream::aggregate_id)), whole aggregate types
//! ([`aggregate`](EventStream::aggregate)), payload types
//! ([`event`](EventStream::event)), and name pairs
//! ([`name`](EventStream::name)).
//!
//! For one published event the lists are walked in that order, each in
//! subscription-registration order. A handler that publishes again re-enters
//! dispatch depth-first. A panicking handler is isolated and logged; the
//! remaining handlers still run.

use std::{
    any::{Any, TypeId},
    collections::HashMap,
    panic::{self, AssertUnwindSafe},
    sync::{
        Arc, RwLock,
        atomic::{AtomicBool, Ordering},
    },
};

use uuid::Uuid;

use crate::{aggregate::Aggregate, event::Event};

type Handler = Box<dyn Fn(&Event) + Send + Sync>;

struct Entry {
    handler: Handler,
    active: AtomicBool,
}

type Entries = Vec<Arc<Entry>>;

#[derive(Default)]
struct Lists {
    all: Entries,
    /// Keyed by aggregate type, then aggregate ID.
    specific_aggregates: HashMap<String, HashMap<Uuid, Entries>>,
    aggregate_types: HashMap<String, Entries>,
    /// Keyed by the payload's concrete type.
    specific_events: HashMap<TypeId, Entries>,
    /// Keyed by aggregate type, then reason.
    names: HashMap<String, HashMap<String, Entries>>,
}

/// Registration keys for one subscription.
enum Filter {
    All,
    AggregateIds(Vec<(String, Uuid)>),
    AggregateType(String),
    Payload(TypeId),
    Names {
        aggregate_type: String,
        reasons: Vec<String>,
    },
}

/// In-process fanout of saved events.
///
/// Cloning is cheap and clones share the same subscriber lists, so a handler
/// may hold a clone and publish into the stream it was called from.
#[derive(Clone, Default)]
pub struct EventStream {
    lists: Arc<RwLock<Lists>>,
}

impl EventStream {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to every published event.
    pub fn all(&self, handler: impl Fn(&Event) + Send + Sync + 'static) -> Subscription {
        self.subscription(handler, Filter::All)
    }

    /// Subscribe to events of specific aggregate instances.
    ///
    /// An event matches when both its aggregate type and ID equal one of the
    /// given aggregates'.
    pub fn aggregate_id<A: Aggregate>(
        &self,
        handler: impl Fn(&Event) + Send + Sync + 'static,
        aggregates: &[&A],
    ) -> Subscription {
        let keys = aggregates
            .iter()
            .map(|aggregate| (A::TYPE_NAME.to_owned(), aggregate.root().id()))
            .collect();
        self.subscription(handler, Filter::AggregateIds(keys))
    }

    /// Subscribe to every event of one aggregate type.
    pub fn aggregate<A: Aggregate>(
        &self,
        handler: impl Fn(&Event) + Send + Sync + 'static,
    ) -> Subscription {
        self.subscription(handler, Filter::AggregateType(A::TYPE_NAME.to_owned()))
    }

    /// Subscribe to every event whose payload is of type `D`, regardless of
    /// the aggregate it belongs to.
    pub fn event<D: crate::event::EventData>(
        &self,
        handler: impl Fn(&Event) + Send + Sync + 'static,
    ) -> Subscription {
        self.subscription(handler, Filter::Payload(TypeId::of::<D>()))
    }

    /// Subscribe by persisted names: an aggregate type plus a set of reasons.
    pub fn name(
        &self,
        handler: impl Fn(&Event) + Send + Sync + 'static,
        aggregate_type: &str,
        reasons: &[&str],
    ) -> Subscription {
        self.subscription(
            handler,
            Filter::Names {
                aggregate_type: aggregate_type.to_owned(),
                reasons: reasons.iter().map(|&reason| reason.to_owned()).collect(),
            },
        )
    }

    fn subscription(
        &self,
        handler: impl Fn(&Event) + Send + Sync + 'static,
        filter: Filter,
    ) -> Subscription {
        Subscription {
            lists: Arc::clone(&self.lists),
            entry: Arc::new(Entry {
                handler: Box::new(handler),
                active: AtomicBool::new(false),
            }),
            filter,
        }
    }

    /// Deliver one event to every matching armed subscriber.
    ///
    /// Dispatch happens on the calling thread against a consistent snapshot
    /// of the subscriber lists, so handlers are free to subscribe,
    /// unsubscribe, or publish.
    pub fn publish(&self, event: &Event) {
        let matching = {
            let lists = self.lists.read().expect("event stream lock poisoned");
            let mut matching: Entries = Vec::new();
            matching.extend(lists.all.iter().cloned());
            if let Some(entries) = lists
                .specific_aggregates
                .get(event.aggregate_type.as_str())
                .and_then(|by_id| by_id.get(&event.aggregate_id))
            {
                matching.extend(entries.iter().cloned());
            }
            if let Some(entries) = lists.aggregate_types.get(event.aggregate_type.as_str()) {
                matching.extend(entries.iter().cloned());
            }
            let payload: &dyn Any = event.data.as_ref();
            if let Some(entries) = lists.specific_events.get(&payload.type_id()) {
                matching.extend(entries.iter().cloned());
            }
            if let Some(entries) = lists
                .names
                .get(event.aggregate_type.as_str())
                .and_then(|by_reason| by_reason.get(event.reason()))
            {
                matching.extend(entries.iter().cloned());
            }
            matching
        };

        for entry in matching {
            if !entry.active.load(Ordering::Acquire) {
                continue;
            }
            if panic::catch_unwind(AssertUnwindSafe(|| (entry.handler)(event))).is_err() {
                tracing::error!(
                    aggregate_type = %event.aggregate_type,
                    reason = event.reason(),
                    "event handler panicked during publish"
                );
            }
        }
    }
}

/// Handle to one registered handler.
///
/// A subscription delivers nothing until [`subscribe`](Self::subscribe) arms
/// it. The handle may outlive the stream's owner; the subscriber lists live
/// as long as any holder.
pub struct Subscription {
    lists: Arc<RwLock<Lists>>,
    entry: Arc<Entry>,
    filter: Filter,
}

impl Subscription {
    /// Arm the subscription. Idempotent.
    pub fn subscribe(&self) {
        if self.entry.active.swap(true, Ordering::AcqRel) {
            return;
        }
        let mut lists = self.lists.write().expect("event stream lock poisoned");
        match &self.filter {
            Filter::All => lists.all.push(Arc::clone(&self.entry)),
            Filter::AggregateIds(keys) => {
                for (aggregate_type, id) in keys {
                    lists
                        .specific_aggregates
                        .entry(aggregate_type.clone())
                        .or_default()
                        .entry(*id)
                        .or_default()
                        .push(Arc::clone(&self.entry));
                }
            }
            Filter::AggregateType(aggregate_type) => lists
                .aggregate_types
                .entry(aggregate_type.clone())
                .or_default()
                .push(Arc::clone(&self.entry)),
            Filter::Payload(type_id) => lists
                .specific_events
                .entry(*type_id)
                .or_default()
                .push(Arc::clone(&self.entry)),
            Filter::Names {
                aggregate_type,
                reasons,
            } => {
                for reason in reasons {
                    lists
                        .names
                        .entry(aggregate_type.clone())
                        .or_default()
                        .entry(reason.clone())
                        .or_default()
                        .push(Arc::clone(&self.entry));
                }
            }
        }
    }

    /// Disarm the subscription and remove it from its lists. Idempotent.
    pub fn unsubscribe(&self) {
        if !self.entry.active.swap(false, Ordering::AcqRel) {
            return;
        }
        let remove = |entries: &mut Entries| {
            entries.retain(|entry| !Arc::ptr_eq(entry, &self.entry));
        };
        let mut lists = self.lists.write().expect("event stream lock poisoned");
        match &self.filter {
            Filter::All => remove(&mut lists.all),
            Filter::AggregateIds(keys) => {
                for (aggregate_type, id) in keys {
                    if let Some(by_id) = lists.specific_aggregates.get_mut(aggregate_type) {
                        if let Some(entries) = by_id.get_mut(id) {
                            remove(entries);
                        }
                        by_id.retain(|_, entries| !entries.is_empty());
                    }
                }
                lists
                    .specific_aggregates
                    .retain(|_, by_id| !by_id.is_empty());
            }
            Filter::AggregateType(aggregate_type) => {
                if let Some(entries) = lists.aggregate_types.get_mut(aggregate_type) {
                    remove(entries);
                }
                lists.aggregate_types.retain(|_, entries| !entries.is_empty());
            }
            Filter::Payload(type_id) => {
                if let Some(entries) = lists.specific_events.get_mut(type_id) {
                    remove(entries);
                }
                lists.specific_events.retain(|_, entries| !entries.is_empty());
            }
            Filter::Names {
                aggregate_type,
                reasons,
            } => {
                if let Some(by_reason) = lists.names.get_mut(aggregate_type) {
                    for reason in reasons {
                        if let Some(entries) = by_reason.get_mut(reason) {
                            remove(entries);
                        }
                    }
                    by_reason.retain(|_, entries| !entries.is_empty());
                }
                lists.names.retain(|_, by_reason| !by_reason.is_empty());
            }
        }
    }
}
