//! Event records and payload markers.
//!
//! An [`Event`] is the immutable unit of history: identity, local and global
//! version, a timestamp, the payload, and optional metadata. Payloads are
//! ordinary structs marked with [`DomainEvent`]; the blanket [`EventData`]
//! impl lifts them into the type-erased form the stream and stores work with.

use std::{any::Any, collections::HashMap, fmt, sync::Arc};

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Local and global event version. Local versions are contiguous from 1 per
/// stream; global versions are assigned by the event store at append time.
pub type Version = u64;

/// Free-form metadata attached to an event, unrelated to domain state.
pub type Metadata = HashMap<String, serde_json::Value>;

/// Marker trait for event payload types.
///
/// [`Self::REASON`] is the payload's stable name. It is persisted with every
/// event and used to resolve the payload type when reading the stream back,
/// so it must not change between releases.
pub trait DomainEvent {
    const REASON: &'static str;
}

/// Object-safe view of an event payload.
///
/// This is what [`Event::data`] stores. You never implement this trait
/// yourself; the blanket impl covers every [`DomainEvent`].
pub trait EventData: Any + Send + Sync {
    fn reason(&self) -> &'static str;
}

impl<T: DomainEvent + Any + Send + Sync> EventData for T {
    fn reason(&self) -> &'static str {
        T::REASON
    }
}

/// A single recorded state change of one aggregate.
///
/// Events are created by the aggregate root when a change is tracked and
/// become immutable once appended to a store. `global_version` is zero until
/// the event store assigns it during save.
#[derive(Clone)]
pub struct Event {
    /// The stream this event belongs to.
    pub aggregate_id: Uuid,
    /// The stream's type tag ([`Aggregate::TYPE_NAME`]).
    ///
    /// [`Aggregate::TYPE_NAME`]: crate::aggregate::Aggregate::TYPE_NAME
    pub aggregate_type: String,
    /// Local version; the first event of a stream has version 1.
    pub version: Version,
    /// Global version, assigned by the event store at append time.
    pub global_version: Version,
    /// Wall-clock time when the change was tracked, not when it was appended.
    pub timestamp: DateTime<Utc>,
    /// The payload; its concrete type determines the event's reason.
    pub data: Arc<dyn EventData>,
    /// Optional application metadata.
    pub metadata: Option<Metadata>,
}

impl Event {
    /// The stable name of the payload's concrete type.
    #[must_use]
    pub fn reason(&self) -> &'static str {
        self.data.reason()
    }

    /// Downcast the payload to a concrete type.
    ///
    /// Returns `None` if the payload is of a different type. Aggregate
    /// transition functions use this to dispatch on the payload:
    ///
    /// ```ignore
    /// fn transition(&mut self, event: &Event) {
    ///     if let Some(born) = event.data_as::<Born>() {
    ///         self.name = born.name.clone();
    ///     }
    /// }
    /// ```
    #[must_use]
    pub fn data_as<D: EventData>(&self) -> Option<&D> {
        let data: &dyn Any = self.data.as_ref();
        data.downcast_ref::<D>()
    }
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("aggregate_id", &self.aggregate_id)
            .field("aggregate_type", &self.aggregate_type)
            .field("version", &self.version)
            .field("global_version", &self.global_version)
            .field("timestamp", &self.timestamp)
            .field("reason", &self.reason())
            .field("metadata", &self.metadata)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct ValueAdded {
        amount: i32,
    }

    impl DomainEvent for ValueAdded {
        const REASON: &'static str = "ValueAdded";
    }

    struct ValueSubtracted;

    impl DomainEvent for ValueSubtracted {
        const REASON: &'static str = "ValueSubtracted";
    }

    fn event(data: Arc<dyn EventData>) -> Event {
        Event {
            aggregate_id: Uuid::now_v7(),
            aggregate_type: "Counter".to_owned(),
            version: 1,
            global_version: 0,
            timestamp: Utc::now(),
            data,
            metadata: None,
        }
    }

    #[test]
    fn reason_comes_from_the_payload_type() {
        let event = event(Arc::new(ValueAdded { amount: 3 }));
        assert_eq!(event.reason(), "ValueAdded");
    }

    #[test]
    fn data_as_downcasts_to_the_concrete_payload() {
        let event = event(Arc::new(ValueAdded { amount: 3 }));
        let payload = event.data_as::<ValueAdded>().expect("payload type");
        assert_eq!(payload.amount, 3);
    }

    #[test]
    fn data_as_returns_none_for_other_payload_types() {
        let event = event(Arc::new(ValueAdded { amount: 3 }));
        assert!(event.data_as::<ValueSubtracted>().is_none());
    }

    #[test]
    fn debug_output_names_the_reason_instead_of_the_payload() {
        let event = event(Arc::new(ValueAdded { amount: 3 }));
        let rendered = format!("{event:?}");
        assert!(rendered.contains("ValueAdded"));
        assert!(rendered.contains("Counter"));
    }
}
