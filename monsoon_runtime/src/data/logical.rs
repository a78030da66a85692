use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use log::debug;
use monsoon_core::types::{DataInstanceId, DataLocation};

use super::SharedDiskRegistry;

#[derive(Default)]
struct InstanceEntry {
    locations: HashSet<DataLocation>,
    size_hint: Option<u64>,
    persistent: Option<String>,
}

#[derive(Default)]
struct StoreInner {
    entries: HashMap<DataInstanceId, InstanceEntry>,
    /// Which instances have a replica on which shared disk; the inverse
    /// direction lives in the entries' location sets.
    on_disk: HashMap<String, HashSet<DataInstanceId>>,
}

/// Physical replica bookkeeping for every live data instance. Mutated from
/// the serializer thread and from transfer completions.
#[derive(Default)]
pub struct LogicalDataStore {
    inner: Mutex<StoreInner>,
}

impl LogicalDataStore {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn register_location(&self, instance: DataInstanceId, location: DataLocation) {
        let mut s = self.inner.lock().unwrap();
        if let DataLocation::Shared { ref disk, .. } = location {
            s.on_disk
                .entry(disk.clone())
                .or_insert_with(HashSet::new)
                .insert(instance);
        }
        let entry = s.entries.entry(instance).or_insert_with(Default::default);
        if let DataLocation::Persistent { ref id } = location {
            entry.persistent = Some(id.clone());
        }
        entry.locations.insert(location);
    }

    pub fn remove_location(&self, instance: DataInstanceId, location: &DataLocation) {
        let mut s = self.inner.lock().unwrap();
        if let Some(e) = s.entries.get_mut(&instance) {
            e.locations.remove(location);
            if location.is_persistent() && !e.locations.iter().any(|l| l.is_persistent()) {
                e.persistent = None;
            }
        }
        if let DataLocation::Shared { ref disk, .. } = *location {
            let drop_disk = {
                let still_there = s
                    .entries
                    .get(&instance)
                    .map(|e| {
                        e.locations.iter().any(|l| match *l {
                            DataLocation::Shared { disk: ref d, .. } => d == disk,
                            _ => false,
                        })
                    })
                    .unwrap_or(false);
                !still_there
            };
            if drop_disk {
                if let Some(set) = s.on_disk.get_mut(disk) {
                    set.remove(&instance);
                }
            }
        }
    }

    pub fn set_size_hint(&self, instance: DataInstanceId, bytes: u64) {
        let mut s = self.inner.lock().unwrap();
        s.entries
            .entry(instance)
            .or_insert_with(Default::default)
            .size_hint = Some(bytes);
    }

    pub fn persistent_id(&self, instance: DataInstanceId) -> Option<String> {
        let s = self.inner.lock().unwrap();
        s.entries.get(&instance).and_then(|e| e.persistent.clone())
    }

    pub fn locations(&self, instance: DataInstanceId) -> Vec<DataLocation> {
        let s = self.inner.lock().unwrap();
        s.entries
            .get(&instance)
            .map(|e| e.locations.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn has_replica(&self, instance: DataInstanceId) -> bool {
        let s = self.inner.lock().unwrap();
        s.entries
            .get(&instance)
            .map(|e| !e.locations.is_empty())
            .unwrap_or(false)
    }

    /// Drop an instance entirely, returning the locations it had so that
    /// the caller can schedule physical deletions.
    pub fn remove_instance(&self, instance: DataInstanceId) -> Vec<DataLocation> {
        let mut s = self.inner.lock().unwrap();
        let locations = match s.entries.remove(&instance) {
            Some(e) => e.locations.into_iter().collect::<Vec<_>>(),
            None => return Vec::new(),
        };
        for loc in locations.iter() {
            if let DataLocation::Shared { ref disk, .. } = *loc {
                if let Some(set) = s.on_disk.get_mut(disk) {
                    set.remove(&instance);
                }
            }
        }
        debug!("instance {} dropped with {} replicas", instance, locations.len());
        locations
    }

    /// Whether some replica of the instance is reachable from `host`
    /// without a transfer.
    pub fn is_resident_on(
        &self,
        instance: DataInstanceId,
        host: &str,
        disks: &SharedDiskRegistry,
    ) -> bool {
        let s = self.inner.lock().unwrap();
        match s.entries.get(&instance) {
            Some(e) => e
                .locations
                .iter()
                .any(|l| disks.resolve(l, host).is_some() || l.is_persistent()),
            None => false,
        }
    }

    /// Bytes of the given instances already reachable from `host`. Used by
    /// the locality scheduling policy; instances without a size hint count
    /// as one byte so presence still scores.
    pub fn bytes_resident_on(
        &self,
        host: &str,
        instances: &[DataInstanceId],
        disks: &SharedDiskRegistry,
    ) -> u64 {
        let s = self.inner.lock().unwrap();
        let mut total = 0;
        for inst in instances {
            if let Some(e) = s.entries.get(inst) {
                let reachable = e
                    .locations
                    .iter()
                    .any(|l| disks.resolve(l, host).is_some());
                if reachable {
                    total += e.size_hint.unwrap_or(1);
                }
            }
        }
        total
    }

    pub fn instances_on_disk(&self, disk: &str) -> Vec<DataInstanceId> {
        let s = self.inner.lock().unwrap();
        s.on_disk
            .get(disk)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }
}
