//! In-memory snapshot store for tests and examples.

use std::{
    collections::HashMap,
    future::Future,
    sync::{Arc, RwLock},
};

use uuid::Uuid;

use crate::snapshot::{Error, Snapshot, SnapshotStore};

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct SnapshotKey {
    aggregate_type: String,
    aggregate_id: Uuid,
}

impl SnapshotKey {
    fn new(aggregate_type: &str, aggregate_id: Uuid) -> Self {
        Self {
            aggregate_type: aggregate_type.to_owned(),
            aggregate_id,
        }
    }
}

/// Thread-safe in-memory snapshot store.
///
/// Cloning is cheap and clones share the same storage.
#[derive(Clone, Default)]
pub struct Store {
    snapshots: Arc<RwLock<HashMap<SnapshotKey, Snapshot>>>,
}

impl Store {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl SnapshotStore for Store {
    fn save(&self, snapshot: Snapshot) -> impl Future<Output = Result<(), Error>> + Send {
        let key = SnapshotKey::new(&snapshot.aggregate_type, snapshot.aggregate_id);
        let mut snapshots = self.snapshots.write().expect("snapshot store lock poisoned");
        snapshots.insert(key, snapshot);
        drop(snapshots);
        std::future::ready(Ok(()))
    }

    fn get<'a>(
        &'a self,
        id: Uuid,
        aggregate_type: &'a str,
    ) -> impl Future<Output = Result<Snapshot, Error>> + Send + 'a {
        let snapshots = self.snapshots.read().expect("snapshot store lock poisoned");
        let result = snapshots
            .get(&SnapshotKey::new(aggregate_type, id))
            .cloned()
            .ok_or(Error::NotFound);
        std::future::ready(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(id: Uuid, aggregate_type: &str, version: u64) -> Snapshot {
        Snapshot {
            aggregate_id: id,
            aggregate_type: aggregate_type.to_owned(),
            version,
            global_version: version,
            state: br#"{"value":1}"#.to_vec(),
        }
    }

    #[tokio::test]
    async fn stores_and_returns_a_snapshot() {
        let store = Store::new();
        let id = Uuid::now_v7();
        store.save(snapshot(id, "Counter", 3)).await.unwrap();

        let loaded = store.get(id, "Counter").await.unwrap();
        assert_eq!(loaded.version, 3);
        assert_eq!(loaded.aggregate_id, id);
    }

    #[tokio::test]
    async fn save_overwrites_the_existing_snapshot() {
        let store = Store::new();
        let id = Uuid::now_v7();
        store.save(snapshot(id, "Counter", 3)).await.unwrap();
        store.save(snapshot(id, "Counter", 8)).await.unwrap();

        let loaded = store.get(id, "Counter").await.unwrap();
        assert_eq!(loaded.version, 8);
    }

    #[tokio::test]
    async fn snapshots_are_keyed_by_type_as_well_as_id() {
        let store = Store::new();
        let id = Uuid::now_v7();
        store.save(snapshot(id, "Counter", 3)).await.unwrap();

        assert!(matches!(
            store.get(id, "Order").await,
            Err(Error::NotFound)
        ));
    }

    #[tokio::test]
    async fn missing_snapshot_is_not_found() {
        let store = Store::new();
        assert!(matches!(
            store.get(Uuid::now_v7(), "Counter").await,
            Err(Error::NotFound)
        ));
    }
}
