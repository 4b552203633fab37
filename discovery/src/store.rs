use crate::record::{ConfigurationRecord, DestinationId};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// A complete, immutable view of every published configuration record.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Snapshot {
    records: HashMap<DestinationId, Arc<ConfigurationRecord>>,
}

impl Snapshot {
    pub fn get(&self, id: &DestinationId) -> Option<&Arc<ConfigurationRecord>> {
        self.records.get(id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&DestinationId, &Arc<ConfigurationRecord>)> {
        self.records.iter()
    }
}

impl FromIterator<(DestinationId, ConfigurationRecord)> for Snapshot {
    fn from_iter<T: IntoIterator<Item = (DestinationId, ConfigurationRecord)>>(iter: T) -> Self {
        Snapshot {
            records: iter
                .into_iter()
                .map(|(id, record)| (id, Arc::new(record)))
                .collect(),
        }
    }
}

/// Assembles the next snapshot in isolation from the published one.
///
/// Records that are equal to the previous cycle's keep the previous `Arc`,
/// so an unchanged destination is shared between both snapshots.
pub struct SnapshotBuilder<'a> {
    previous: &'a Snapshot,
    records: HashMap<DestinationId, Arc<ConfigurationRecord>>,
}

impl<'a> SnapshotBuilder<'a> {
    pub fn new(previous: &'a Snapshot) -> Self {
        SnapshotBuilder {
            previous,
            records: HashMap::with_capacity(previous.len()),
        }
    }

    pub fn insert(&mut self, id: DestinationId, record: ConfigurationRecord) {
        let record = match self.previous.get(&id) {
            Some(existing) if **existing == record => existing.clone(),
            _ => Arc::new(record),
        };
        self.records.insert(id, record);
    }

    /// Carries the previously published record for `id` into the new
    /// snapshot. Returns false when there was nothing to carry over.
    pub fn preserve(&mut self, id: &DestinationId) -> bool {
        match self.previous.get(id) {
            Some(existing) => {
                self.records.insert(id.clone(), existing.clone());
                true
            }
            None => false,
        }
    }

    pub fn build(self) -> Snapshot {
        Snapshot {
            records: self.records,
        }
    }
}

/// Shared configuration store read by every request and written by the
/// scanner.
///
/// Readers clone the current `Arc<Snapshot>` under a short read lock and
/// never hold the lock while using it. Publishing swaps the `Arc`, so a
/// reader sees either the previous or the new snapshot in full.
pub struct ConfigStore {
    current: RwLock<Arc<Snapshot>>,
    // Used by the readiness probe. Set once the first snapshot is published.
    ready: AtomicBool,
}

impl ConfigStore {
    pub fn new() -> Self {
        ConfigStore {
            current: RwLock::new(Arc::new(Snapshot::default())),
            ready: AtomicBool::new(false),
        }
    }

    /// A store that starts out with `snapshot` already published.
    pub fn from_snapshot(snapshot: Snapshot) -> Self {
        ConfigStore {
            current: RwLock::new(Arc::new(snapshot)),
            ready: AtomicBool::new(true),
        }
    }

    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.current.read().clone()
    }

    pub fn lookup(&self, id: &DestinationId) -> Option<Arc<ConfigurationRecord>> {
        self.current.read().get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.current.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Relaxed)
    }

    pub(crate) fn publish(&self, snapshot: Snapshot) {
        let next = Arc::new(snapshot);
        *self.current.write() = next;
        self.ready.store(true, Ordering::Relaxed);
    }
}

impl Default for ConfigStore {
    fn default() -> Self {
        Self::new()
    }
}
