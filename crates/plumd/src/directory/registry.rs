use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;
use tracing::debug;

use super::model::{DeviceRecord, HouseRecord, LoadRecord, RecordKind, RoomRecord};
use crate::error::{Error, Result};

/// Per-id slot. Waiters subscribe before the record exists; the fetch that
/// produces it fills the slot and wakes them.
type Slot<T> = watch::Sender<Option<Arc<T>>>;

/// Write-once cache of directory records of one kind.
///
/// Records are memoized for the lifetime of the cache. Nothing is ever
/// evicted.
pub struct RecordCache<T> {
    kind: RecordKind,
    slots: Mutex<HashMap<String, Slot<T>>>,
}

impl<T> RecordCache<T> {
    pub fn new(kind: RecordKind) -> Self {
        Self {
            kind,
            slots: Mutex::new(HashMap::new()),
        }
    }

    fn with_slot<R>(&self, id: &str, f: impl FnOnce(&Slot<T>) -> R) -> R {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        let slot = slots
            .entry(id.to_string())
            .or_insert_with(|| watch::channel(None).0);
        f(slot)
    }

    /// Store a record and wake anyone waiting on its id.
    pub fn insert(&self, id: &str, record: T) -> Arc<T> {
        let record = Arc::new(record);
        self.with_slot(id, |slot| {
            slot.send_replace(Some(record.clone()));
        });
        debug!("Cached {} record {}", self.kind, id);
        record
    }

    /// The record for `id`, if it has arrived.
    pub fn get(&self, id: &str) -> Option<Arc<T>> {
        let slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        slots.get(id).and_then(|slot| slot.borrow().clone())
    }

    /// Number of records that have arrived.
    pub fn len(&self) -> usize {
        let slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        slots.values().filter(|slot| slot.borrow().is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Wait until the record for `id` arrives, or fail with
    /// [`Error::DirectoryTimeout`] once `timeout` has passed.
    pub async fn wait(&self, id: &str, timeout: Duration) -> Result<Arc<T>> {
        let mut rx = self.with_slot(id, |slot| slot.subscribe());

        let waited = tokio::time::timeout(timeout, async {
            let value = rx.wait_for(Option::is_some).await.ok()?;
            value.clone()
        })
        .await;

        match waited {
            Ok(Some(record)) => Ok(record),
            _ => Err(Error::DirectoryTimeout {
                kind: self.kind,
                id: id.to_string(),
                after: timeout,
            }),
        }
    }
}

/// Everything fetched from the directory, shared between the
/// [`DirectoryClient`](super::DirectoryClient) that fills it and the
/// reconciler that waits on it.
pub struct DirectoryRegistry {
    houses: RecordCache<HouseRecord>,
    rooms: RecordCache<RoomRecord>,
    loads: RecordCache<LoadRecord>,
    devices: RecordCache<DeviceRecord>,
}

impl DirectoryRegistry {
    pub fn new() -> Self {
        Self {
            houses: RecordCache::new(RecordKind::House),
            rooms: RecordCache::new(RecordKind::Room),
            loads: RecordCache::new(RecordKind::Load),
            devices: RecordCache::new(RecordKind::Device),
        }
    }

    pub fn houses(&self) -> &RecordCache<HouseRecord> {
        &self.houses
    }

    pub fn rooms(&self) -> &RecordCache<RoomRecord> {
        &self.rooms
    }

    pub fn loads(&self) -> &RecordCache<LoadRecord> {
        &self.loads
    }

    pub fn devices(&self) -> &RecordCache<DeviceRecord> {
        &self.devices
    }
}

impl Default for DirectoryRegistry {
    fn default() -> Self {
        Self::new()
    }
}
