//! Core traits and types for the chronicle event-sourcing library.
//!
//! This crate provides the foundational abstractions for event sourcing:
//!
//! - [`aggregate`] - Aggregate-root bookkeeping (`Root`, `Aggregate`,
//!   `SnapshotAggregate`)
//! - [`event`] - Event records and payload markers (`Event`, `DomainEvent`)
//! - [`repository`] - Save/load orchestration (`Repository`)
//! - [`store`] - Event persistence contract (`EventStore`) with batch
//!   validation and an in-memory reference implementation
//! - [`snapshot`] - Snapshot capture and restore (`SnapshotStore`,
//!   `SnapshotHandler`)
//! - [`stream`] - Synchronous in-process fanout (`EventStream`) with five
//!   subscription filters
//! - [`codec`] - Serialization strategy (`Codec`, `JsonCodec`) and the
//!   payload registry
//! - [`id`] - The process-wide aggregate ID generator hook
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//!
//! use chronicle_core::{
//!     codec::{JsonCodec, Registry},
//!     repository::Repository,
//!     store::inmemory,
//! };
//!
//! // Create an in-memory store and repository
//! let registry = Arc::new(Registry::new(JsonCodec));
//! let repository = Repository::new(inmemory::Store::new(registry));
//! ```
//!
//! Most users should depend on the [`chronicle`](https://docs.rs/chronicle)
//! crate, which re-exports these types with a cleaner API surface.

pub mod aggregate;
pub mod codec;
pub mod event;
pub mod id;
pub mod repository;
pub mod snapshot;
pub mod store;
pub mod stream;

// Test utilities module: public when feature enabled, internal for crate tests
#[cfg(feature = "test-util")]
pub mod test;

#[cfg(all(test, not(feature = "test-util")))]
pub(crate) mod test;
