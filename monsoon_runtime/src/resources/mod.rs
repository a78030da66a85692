//! Worker descriptors and capacity accounting. Descriptors are added and
//! removed by a lifecycle thread and read by the scheduler; the pool map
//! sits behind a read-write lock and each resource behind its own mutex.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, RwLock};

use error_chain::bail;
use log::{debug, info};

use monsoon_core::errors::Result;
use monsoon_core::types::{Capacity, ResourceSpec};

#[derive(Debug)]
pub struct ResourceState {
    /// Capacity not reserved by queued or running tasks.
    pub free: Capacity,
    pub queued: u32,
    pub running: u32,
    /// Released resources keep their descriptor but take no new work.
    pub released: bool,
}

pub struct ResourceEntry {
    pub spec: ResourceSpec,
    /// Stable index used by scheduling tie-breaks.
    pub index: usize,
    /// Sandbox directory for inputs staged onto this resource.
    pub working_dir: PathBuf,
    pub state: Mutex<ResourceState>,
}

impl ResourceEntry {
    pub fn load(&self) -> u32 {
        let s = self.state.lock().unwrap();
        s.queued + s.running
    }

    pub fn is_released(&self) -> bool {
        self.state.lock().unwrap().released
    }

    /// Try to reserve capacity for one task; fails when the resource is
    /// released or the free capacity does not cover the request.
    pub fn try_reserve(&self, cap: &Capacity) -> bool {
        let mut s = self.state.lock().unwrap();
        if s.released || !s.free.fits(cap) {
            return false;
        }
        s.free.remove(cap);
        s.queued += 1;
        true
    }

    pub fn mark_running(&self) {
        let mut s = self.state.lock().unwrap();
        assert!(s.queued > 0);
        s.queued -= 1;
        s.running += 1;
    }

    pub fn release_reservation(&self, cap: &Capacity, was_running: bool) {
        let mut s = self.state.lock().unwrap();
        if was_running {
            assert!(s.running > 0);
            s.running -= 1;
        } else {
            assert!(s.queued > 0);
            s.queued -= 1;
        }
        s.free.add(cap);
    }
}

#[derive(Default)]
struct PoolInner {
    entries: HashMap<String, Arc<ResourceEntry>>,
    next_index: usize,
}

pub struct ResourcePool {
    inner: RwLock<PoolInner>,
    work_root: PathBuf,
}

impl ResourcePool {
    pub fn new(work_root: PathBuf) -> Self {
        ResourcePool {
            inner: RwLock::new(Default::default()),
            work_root,
        }
    }

    pub fn add(&self, spec: ResourceSpec) -> Result<Arc<ResourceEntry>> {
        let mut inner = self.inner.write().unwrap();
        if inner.entries.contains_key(&spec.name) {
            bail!("resource '{}' is already registered", spec.name);
        }
        let index = inner.next_index;
        inner.next_index += 1;
        let entry = Arc::new(ResourceEntry {
            working_dir: self.work_root.join(&spec.name),
            state: Mutex::new(ResourceState {
                free: spec.capacity(),
                queued: 0,
                running: 0,
                released: false,
            }),
            index,
            spec,
        });
        info!("resource {} registered", entry.spec.name);
        inner.entries.insert(entry.spec.name.clone(), entry.clone());
        Ok(entry)
    }

    pub fn remove(&self, name: &str) -> Option<Arc<ResourceEntry>> {
        let mut inner = self.inner.write().unwrap();
        let removed = inner.entries.remove(name);
        if removed.is_some() {
            info!("resource {} removed", name);
        }
        removed
    }

    pub fn get(&self, name: &str) -> Option<Arc<ResourceEntry>> {
        self.inner.read().unwrap().entries.get(name).cloned()
    }

    /// Snapshot ordered by the stable index.
    pub fn list(&self) -> Vec<Arc<ResourceEntry>> {
        let inner = self.inner.read().unwrap();
        let mut entries: Vec<_> = inner.entries.values().cloned().collect();
        entries.sort_by_key(|e| e.index);
        entries
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().unwrap().entries.is_empty()
    }

    /// Release every idle resource of a stalled application wait. Returns
    /// how many were released.
    pub fn release_idle(&self) -> usize {
        let mut released = 0;
        for entry in self.list() {
            let mut s = entry.state.lock().unwrap();
            if !s.released && s.running == 0 && s.queued == 0 {
                s.released = true;
                released += 1;
                debug!("resource {} released", entry.spec.name);
            }
        }
        released
    }

    /// Bring back the minimum needed to finish a stalled application: the
    /// first released resource, by stable index.
    pub fn reacquire_minimum(&self) -> Option<String> {
        for entry in self.list() {
            let mut s = entry.state.lock().unwrap();
            if s.released {
                s.released = false;
                debug!("resource {} reacquired", entry.spec.name);
                return Some(entry.spec.name.clone());
            }
        }
        None
    }

    /// Restore every released resource, used when new work arrives.
    pub fn reacquire_all(&self) {
        for entry in self.list() {
            entry.state.lock().unwrap().released = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use monsoon_core::types::{ProcessorKind, ProcessorSpec};

    fn spec(name: &str, cores: u32) -> ResourceSpec {
        ResourceSpec {
            name: name.into(),
            host: name.into(),
            processors: vec![ProcessorSpec {
                name: "main".into(),
                architecture: "x86_64".into(),
                speed_ghz: 2.0,
                cores,
                kind: ProcessorKind::Cpu,
            }],
            memory_mb: 1_024,
            memory_virtual_mb: 0,
            storage_mb: 0,
            operating_system: String::new(),
            software: Default::default(),
            queues: Default::default(),
            images: Default::default(),
        }
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let pool = ResourcePool::new(::std::env::temp_dir().join("monsoon_pool"));
        pool.add(spec("n1", 4)).unwrap();
        assert!(pool.add(spec("n1", 8)).is_err());
    }

    #[test]
    fn reservation_respects_capacity() {
        let pool = ResourcePool::new(::std::env::temp_dir().join("monsoon_pool"));
        let entry = pool.add(spec("n1", 2)).unwrap();
        let one_core = Capacity {
            cores: 1,
            memory_mb: 0,
            gpus: 0,
        };
        assert!(entry.try_reserve(&one_core));
        assert!(entry.try_reserve(&one_core));
        assert!(!entry.try_reserve(&one_core));
        entry.mark_running();
        entry.release_reservation(&one_core, true);
        assert!(entry.try_reserve(&one_core));
    }

    #[test]
    fn stall_release_skips_busy_resources() {
        let pool = ResourcePool::new(::std::env::temp_dir().join("monsoon_pool"));
        let busy = pool.add(spec("busy", 2)).unwrap();
        pool.add(spec("idle", 2)).unwrap();
        let cap = Capacity {
            cores: 1,
            memory_mb: 0,
            gpus: 0,
        };
        assert!(busy.try_reserve(&cap));
        assert_eq!(pool.release_idle(), 1);
        assert!(pool.get("idle").unwrap().is_released());
        assert!(!busy.is_released());
        assert_eq!(pool.reacquire_minimum(), Some("idle".to_string()));
        assert!(!pool.get("idle").unwrap().is_released());
        assert_eq!(pool.reacquire_minimum(), None);
    }
}
