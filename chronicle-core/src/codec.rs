//! Serialization strategy and the payload registry.
//!
//! [`Codec`] converts payload values to bytes and back; [`JsonCodec`] is the
//! reference implementation. The [`Registry`] is the type-resolution half of
//! the serializer: it binds `(aggregate type, reason)` to a decoder producing
//! a fresh payload value, and each payload's `TypeId` to an encoder. Stores
//! use it to persist events and to resolve payload types when reading a
//! stream back.

use std::{
    any::{Any, TypeId},
    collections::HashMap,
    marker::PhantomData,
    sync::Arc,
};

use serde::{Serialize, de::DeserializeOwned};
use thiserror::Error;

use crate::{
    aggregate::Aggregate,
    event::{DomainEvent, EventData},
};

/// Serialisation strategy used by event and snapshot stores.
pub trait Codec {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Serialize a value for persistence.
    ///
    /// # Errors
    ///
    /// Returns an error from the codec if the value cannot be serialized.
    fn serialize<T>(&self, value: &T) -> Result<Vec<u8>, Self::Error>
    where
        T: Serialize;

    /// Deserialize a value from stored bytes.
    ///
    /// # Errors
    ///
    /// Returns an error from the codec if the bytes cannot be decoded.
    fn deserialize<T>(&self, data: &[u8]) -> Result<T, Self::Error>
    where
        T: DeserializeOwned;
}

/// JSON codec backed by `serde_json`.
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    type Error = serde_json::Error;

    fn serialize<T>(&self, value: &T) -> Result<Vec<u8>, Self::Error>
    where
        T: Serialize,
    {
        serde_json::to_vec(value)
    }

    fn deserialize<T>(&self, data: &[u8]) -> Result<T, Self::Error>
    where
        T: DeserializeOwned,
    {
        serde_json::from_slice(data)
    }
}

/// Error type for codec and registry operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The payload type was never registered for its aggregate.
    #[error("payload with reason `{reason}` is not registered for encoding")]
    UnregisteredPayload { reason: &'static str },
    /// No payload is registered under the given `(aggregate type, reason)`.
    #[error("no payload registered for aggregate `{aggregate_type}` and reason `{reason}`")]
    UnknownReason {
        aggregate_type: String,
        reason: String,
    },
    #[error("serialization error: {0}")]
    Serialization(#[source] Box<dyn std::error::Error + Send + Sync + 'static>),
    #[error("deserialization error: {0}")]
    Deserialization(#[source] Box<dyn std::error::Error + Send + Sync + 'static>),
}

type EncodeFn<C> = fn(&C, &dyn EventData) -> Result<Vec<u8>, Error>;
type DecodeFn<C> = fn(&C, &[u8]) -> Result<Arc<dyn EventData>, Error>;

/// Binds aggregate and payload types to their persisted names.
///
/// Registration happens once at startup; afterwards the registry is shared
/// immutably (typically behind an [`Arc`]) with every store that needs to
/// encode or decode events:
///
/// ```
/// use chronicle_core::codec::{JsonCodec, Registry};
/// # use chronicle_core::aggregate::{Aggregate, Root};
/// # use chronicle_core::event::{DomainEvent, Event};
/// # use serde::{Deserialize, Serialize};
/// # #[derive(Default)]
/// # struct Order { root: Root }
/// # impl Aggregate for Order {
/// #     const TYPE_NAME: &'static str = "Order";
/// #     fn root(&self) -> &Root { &self.root }
/// #     fn root_mut(&mut self) -> &mut Root { &mut self.root }
/// #     fn transition(&mut self, _event: &Event) {}
/// # }
/// # #[derive(Serialize, Deserialize)]
/// # struct Placed;
/// # impl DomainEvent for Placed { const REASON: &'static str = "Placed"; }
///
/// let mut registry = Registry::new(JsonCodec);
/// registry.register::<Order>().event::<Placed>();
/// ```
pub struct Registry<C = JsonCodec> {
    codec: C,
    encoders: HashMap<TypeId, EncodeFn<C>>,
    decoders: HashMap<String, HashMap<String, DecodeFn<C>>>,
}

impl<C: Codec> Registry<C> {
    #[must_use]
    pub fn new(codec: C) -> Self {
        Self {
            codec,
            encoders: HashMap::new(),
            decoders: HashMap::new(),
        }
    }

    #[must_use]
    pub const fn codec(&self) -> &C {
        &self.codec
    }

    /// Start registering event payloads for the aggregate `A`.
    ///
    /// The aggregate's [`TYPE_NAME`](Aggregate::TYPE_NAME) and each payload's
    /// [`REASON`](DomainEvent::REASON) become the persisted names.
    pub fn register<A: Aggregate>(&mut self) -> AggregateEvents<'_, C, A> {
        AggregateEvents {
            registry: self,
            _aggregate: PhantomData,
        }
    }

    /// Encode a payload to bytes using its registered encoder.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnregisteredPayload`] if the payload's type was never
    /// registered, or a serialization error from the codec.
    pub fn encode(&self, data: &dyn EventData) -> Result<Vec<u8>, Error> {
        let any: &dyn Any = data;
        let encode = self
            .encoders
            .get(&any.type_id())
            .ok_or(Error::UnregisteredPayload {
                reason: data.reason(),
            })?;
        encode(&self.codec, data)
    }

    /// Decode a payload from bytes, resolving the concrete type from
    /// `(aggregate_type, reason)`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownReason`] if nothing is registered under the
    /// pair, or a deserialization error from the codec.
    pub fn decode(
        &self,
        aggregate_type: &str,
        reason: &str,
        data: &[u8],
    ) -> Result<Arc<dyn EventData>, Error> {
        let decode = self
            .decoders
            .get(aggregate_type)
            .and_then(|by_reason| by_reason.get(reason))
            .ok_or_else(|| Error::UnknownReason {
                aggregate_type: aggregate_type.to_owned(),
                reason: reason.to_owned(),
            })?;
        decode(&self.codec, data)
    }

    /// Whether `(aggregate_type, reason)` resolves to a registered payload.
    ///
    /// Bulk readers use this to skip events they cannot decode.
    #[must_use]
    pub fn resolves(&self, aggregate_type: &str, reason: &str) -> bool {
        self.decoders
            .get(aggregate_type)
            .is_some_and(|by_reason| by_reason.contains_key(reason))
    }
}

/// Registration builder returned by [`Registry::register`].
pub struct AggregateEvents<'r, C, A> {
    registry: &'r mut Registry<C>,
    _aggregate: PhantomData<fn() -> A>,
}

impl<C: Codec, A: Aggregate> AggregateEvents<'_, C, A> {
    /// Register one payload type for the aggregate.
    pub fn event<D>(self) -> Self
    where
        D: DomainEvent + Serialize + DeserializeOwned + Send + Sync + 'static,
    {
        self.registry
            .encoders
            .insert(TypeId::of::<D>(), encode_payload::<C, D>);
        self.registry
            .decoders
            .entry(A::TYPE_NAME.to_owned())
            .or_default()
            .insert(D::REASON.to_owned(), decode_payload::<C, D>);
        self
    }
}

fn encode_payload<C, D>(codec: &C, data: &dyn EventData) -> Result<Vec<u8>, Error>
where
    C: Codec,
    D: DomainEvent + Serialize + Send + Sync + 'static,
{
    let any: &dyn Any = data;
    let payload = any
        .downcast_ref::<D>()
        .ok_or(Error::UnregisteredPayload { reason: D::REASON })?;
    codec
        .serialize(payload)
        .map_err(|e| Error::Serialization(Box::new(e)))
}

fn decode_payload<C, D>(codec: &C, data: &[u8]) -> Result<Arc<dyn EventData>, Error>
where
    C: Codec,
    D: DomainEvent + DeserializeOwned + Send + Sync + 'static,
{
    let payload: D = codec
        .deserialize(data)
        .map_err(|e| Error::Deserialization(Box::new(e)))?;
    Ok(Arc::new(payload))
}
