//! Data versioning: every declared access is turned into a versioned
//! `DataAccessId`, reader counts keep superseded versions alive while they
//! are still read, and obsolete versions are evicted.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use log::debug;

use monsoon_core::errors::{ErrorKind, Result};
use monsoon_core::logging::{Event, EventLog};
use monsoon_core::types::{
    DataAccessId, DataId, DataInstanceId, DataLocation, Direction, Version,
};

use crate::data::{FileOps, LogicalDataStore, SharedDiskRegistry};

struct DatumInfo {
    logical: String,
    current: Version,
    /// Live reader count per version. Versions absent from the map have no
    /// readers.
    readers: HashMap<Version, u32>,
    /// Main-program accesses opened through the API and not yet closed.
    open_accesses: Vec<DataAccessId>,
    deletion_deferred: bool,
}

impl DatumInfo {
    fn reader_count(&self, version: Version) -> u32 {
        self.readers.get(&version).cloned().unwrap_or(0)
    }

    fn total_readers(&self) -> u32 {
        self.readers.values().sum()
    }
}

pub struct DataInfoProvider {
    by_name: HashMap<String, DataId>,
    data: HashMap<DataId, DatumInfo>,
    next_id: DataId,
    store: Arc<LogicalDataStore>,
    disks: Arc<SharedDiskRegistry>,
    fileops: Arc<FileOps>,
    logger: Arc<Mutex<Box<dyn EventLog>>>,
    master_host: String,
}

impl DataInfoProvider {
    pub fn new(
        store: Arc<LogicalDataStore>,
        disks: Arc<SharedDiskRegistry>,
        fileops: Arc<FileOps>,
        logger: Arc<Mutex<Box<dyn EventLog>>>,
        master_host: String,
    ) -> Self {
        DataInfoProvider {
            by_name: HashMap::new(),
            data: HashMap::new(),
            next_id: 0,
            store,
            disks,
            fileops,
            logger,
            master_host,
        }
    }

    pub fn data_id(&self, logical: &str) -> Option<DataId> {
        self.by_name.get(logical).cloned()
    }

    pub fn current_version(&self, logical: &str) -> Option<Version> {
        self.data_id(logical)
            .and_then(|id| self.data.get(&id))
            .map(|d| d.current)
    }

    pub fn reader_count(&self, instance: DataInstanceId) -> u32 {
        self.data
            .get(&instance.data_id())
            .map(|d| d.reader_count(instance.version()))
            .unwrap_or(0)
    }

    fn create_datum(&mut self, logical: &str) -> DataId {
        self.next_id += 1;
        let id = self.next_id;
        self.by_name.insert(logical.to_string(), id);
        self.data.insert(
            id,
            DatumInfo {
                logical: logical.to_string(),
                current: 1,
                readers: HashMap::new(),
                open_accesses: Vec::new(),
                deletion_deferred: false,
            },
        );
        debug!("datum '{}' registered as {}", logical, id);
        id
    }

    /// Register a logical datum, optionally with an existing replica of
    /// its initial version.
    pub fn register_data(
        &mut self,
        logical: &str,
        initial: Option<DataLocation>,
    ) -> Result<DataId> {
        let id = match self.data_id(logical) {
            Some(id) => id,
            None => self.create_datum(logical),
        };
        if let Some(location) = initial {
            let current = self.data[&id].current;
            self.store
                .register_location(DataInstanceId::new(id, current), location);
        }
        Ok(id)
    }

    /// Produce the versioned access for one declared parameter access.
    pub fn register_access(
        &mut self,
        logical: &str,
        direction: Direction,
    ) -> Result<DataAccessId> {
        match direction {
            Direction::In => {
                let id = self
                    .data_id(logical)
                    .ok_or_else(|| ErrorKind::DataNotFound(logical.to_string()))?;
                let datum = self.data.get_mut(&id).unwrap();
                let read = DataInstanceId::new(id, datum.current);
                *datum.readers.entry(datum.current).or_insert(0) += 1;
                Ok(DataAccessId::Read { read })
            }
            Direction::Out => {
                match self.data_id(logical) {
                    None => {
                        let id = self.create_datum(logical);
                        Ok(DataAccessId::Write {
                            written: DataInstanceId::new(id, 1),
                        })
                    }
                    Some(id) => {
                        let (obsolete, written) = {
                            let datum = self.data.get_mut(&id).unwrap();
                            let old = datum.current;
                            datum.current += 1;
                            let obsolete = if datum.reader_count(old) == 0 {
                                Some(DataInstanceId::new(id, old))
                            } else {
                                None
                            };
                            (obsolete, DataInstanceId::new(id, datum.current))
                        };
                        if let Some(instance) = obsolete {
                            // persistent objects outlive their version chain
                            if self.store.persistent_id(instance).is_none() {
                                self.evict(instance);
                            }
                        }
                        Ok(DataAccessId::Write { written })
                    }
                }
            }
            Direction::InOut => {
                let id = self
                    .data_id(logical)
                    .ok_or_else(|| ErrorKind::DataNotFound(logical.to_string()))?;
                let datum = self.data.get_mut(&id).unwrap();
                let read = DataInstanceId::new(id, datum.current);
                *datum.readers.entry(datum.current).or_insert(0) += 1;
                // other readers of the read instance must keep seeing it
                let preserve_source = datum.reader_count(datum.current) > 1;
                datum.current += 1;
                let written = DataInstanceId::new(id, datum.current);
                Ok(DataAccessId::ReadWrite {
                    read,
                    written,
                    preserve_source,
                })
            }
        }
    }

    /// A main-program access produced through the API; tracked so that
    /// `close_file` can complete it later.
    pub fn register_open_access(
        &mut self,
        logical: &str,
        direction: Direction,
    ) -> Result<DataAccessId> {
        let access = self.register_access(logical, direction)?;
        let id = access
            .read_instance()
            .or_else(|| access.written_instance())
            .unwrap()
            .data_id();
        if let Some(datum) = self.data.get_mut(&id) {
            datum.open_accesses.push(access);
        }
        Ok(access)
    }

    pub fn close_file(&mut self, logical: &str) {
        let access = match self
            .data_id(logical)
            .and_then(|id| self.data.get_mut(&id))
            .and_then(|d| {
                if d.open_accesses.is_empty() {
                    None
                } else {
                    Some(d.open_accesses.remove(0))
                }
            }) {
            Some(access) => access,
            None => {
                debug!("close of '{}' without an open access", logical);
                return;
            }
        };
        self.complete_access(&access);
    }

    /// A reader of the access finished; superseded versions whose last
    /// reader left are evicted, deferred deletions may fire.
    pub fn complete_access(&mut self, access: &DataAccessId) {
        let read = match access.read_instance() {
            Some(read) => read,
            None => return,
        };
        let id = read.data_id();
        let (evict_read, delete_all) = {
            let datum = match self.data.get_mut(&id) {
                Some(datum) => datum,
                None => return,
            };
            let count = {
                let count = datum.readers.entry(read.version()).or_insert(0);
                if *count > 0 {
                    *count -= 1;
                }
                *count
            };
            if count == 0 {
                datum.readers.remove(&read.version());
            }
            let evict_read = count == 0 && read.version() < datum.current;
            let delete_all = datum.deletion_deferred && datum.total_readers() == 0;
            (evict_read, delete_all)
        };
        if delete_all {
            let logical = self.data[&id].logical.clone();
            debug!("deferred delete of '{}' fires", logical);
            self.drop_datum(id);
        } else if evict_read && self.store.persistent_id(read).is_none() {
            self.evict(read);
        }
    }

    /// Delete a logical datum. Deletion is deferred while readers remain;
    /// returns whether it happened immediately.
    pub fn delete_data(&mut self, logical: &str) -> Result<bool> {
        let id = self
            .data_id(logical)
            .ok_or_else(|| ErrorKind::DataNotFound(logical.to_string()))?;
        let has_readers = self.data[&id].total_readers() > 0;
        if has_readers {
            self.data.get_mut(&id).unwrap().deletion_deferred = true;
            debug!("delete of '{}' deferred behind live readers", logical);
            return Ok(false);
        }
        self.drop_datum(id);
        Ok(true)
    }

    fn drop_datum(&mut self, id: DataId) {
        let datum = match self.data.remove(&id) {
            Some(datum) => datum,
            None => return,
        };
        self.by_name.remove(&datum.logical);
        for version in 1..=datum.current {
            self.evict(DataInstanceId::new(id, version));
        }
    }

    /// Drop every replica of an instance and schedule the physical
    /// deletions that this process can reach.
    fn evict(&self, instance: DataInstanceId) {
        let locations = self.store.remove_instance(instance);
        if locations.is_empty() {
            return;
        }
        for location in locations {
            if location.is_persistent() {
                continue;
            }
            if let Some(path) = self.disks.resolve(&location, &self.master_host) {
                let _ = self.fileops.delete_async(path, None);
            }
        }
        self.logger
            .lock()
            .unwrap()
            .add_event(Event::InstanceEvicted { instance });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use monsoon_core::logging::NullLog;

    fn provider() -> (DataInfoProvider, Arc<FileOps>) {
        let fileops = Arc::new(FileOps::new());
        let logger: Arc<Mutex<Box<dyn EventLog>>> = Arc::new(Mutex::new(Box::new(NullLog)));
        let provider = DataInfoProvider::new(
            Arc::new(LogicalDataStore::new()),
            Arc::new(SharedDiskRegistry::new()),
            fileops.clone(),
            logger,
            "master".to_string(),
        );
        (provider, fileops)
    }

    #[test]
    fn version_advances_only_on_writes() {
        let (mut p, fileops) = provider();
        p.register_access("d", Direction::Out).unwrap();
        assert_eq!(p.current_version("d"), Some(1));
        p.register_access("d", Direction::In).unwrap();
        assert_eq!(p.current_version("d"), Some(1));
        p.register_access("d", Direction::InOut).unwrap();
        assert_eq!(p.current_version("d"), Some(2));
        p.register_access("d", Direction::Out).unwrap();
        assert_eq!(p.current_version("d"), Some(3));
        fileops.shutdown();
    }

    #[test]
    fn read_of_unknown_datum_fails() {
        let (mut p, fileops) = provider();
        let err = p.register_access("ghost", Direction::In).unwrap_err();
        match *err.kind() {
            ErrorKind::DataNotFound(ref name) => assert_eq!(name, "ghost"),
            ref other => panic!("unexpected error {:?}", other),
        }
        assert!(p.register_access("ghost", Direction::InOut).is_err());
        fileops.shutdown();
    }

    #[test]
    fn preserve_source_tracks_other_readers() {
        let (mut p, fileops) = provider();
        p.register_access("d", Direction::Out).unwrap();
        // no other readers: source may be consumed
        match p.register_access("d", Direction::InOut).unwrap() {
            DataAccessId::ReadWrite {
                preserve_source, ..
            } => assert!(!preserve_source),
            other => panic!("unexpected access {:?}", other),
        }
        p.register_access("d", Direction::Out).unwrap();
        let r = p.register_access("d", Direction::In).unwrap();
        match p.register_access("d", Direction::InOut).unwrap() {
            DataAccessId::ReadWrite {
                read,
                preserve_source,
                ..
            } => {
                assert!(preserve_source);
                assert_eq!(read, r.read_instance().unwrap());
            }
            other => panic!("unexpected access {:?}", other),
        }
        fileops.shutdown();
    }

    #[test]
    fn delete_defers_until_readers_finish() {
        let (mut p, fileops) = provider();
        p.register_access("d", Direction::Out).unwrap();
        let read = p.register_access("d", Direction::In).unwrap();
        assert_eq!(p.delete_data("d").unwrap(), false);
        assert!(p.data_id("d").is_some());
        p.complete_access(&read);
        assert!(p.data_id("d").is_none());
        fileops.shutdown();
    }

    #[test]
    fn persistent_version_survives_supersession() {
        let (mut p, fileops) = provider();
        p.register_access("d", Direction::Out).unwrap();
        let inst1 = DataInstanceId::new(p.data_id("d").unwrap(), 1);
        p.store.register_location(
            inst1,
            DataLocation::Persistent {
                id: "psco-7".into(),
            },
        );
        // superseded with no readers, but the binding must stay
        p.register_access("d", Direction::Out).unwrap();
        assert_eq!(p.store.persistent_id(inst1), Some("psco-7".to_string()));
        assert!(p.store.has_replica(inst1));
        // the same holds when the last reader of a persistent version leaves
        let read = p.register_access("d", Direction::In).unwrap();
        let inst2 = read.read_instance().unwrap();
        p.store.register_location(
            inst2,
            DataLocation::Persistent {
                id: "psco-8".into(),
            },
        );
        p.register_access("d", Direction::Out).unwrap();
        p.complete_access(&read);
        assert_eq!(p.store.persistent_id(inst2), Some("psco-8".to_string()));
        fileops.shutdown();
    }

    #[test]
    fn superseded_version_evicts_when_last_reader_leaves() {
        let (mut p, fileops) = provider();
        p.register_access("d", Direction::Out).unwrap();
        let inst1 = DataInstanceId::new(p.data_id("d").unwrap(), 1);
        p.store.register_location(
            inst1,
            DataLocation::Private {
                host: "elsewhere".into(),
                path: "/data/x".into(),
            },
        );
        let read = p.register_access("d", Direction::In).unwrap();
        p.register_access("d", Direction::Out).unwrap();
        // the old version is still read, so the replica survives
        assert!(p.store.has_replica(inst1));
        p.complete_access(&read);
        assert!(!p.store.has_replica(inst1));
        fileops.shutdown();
    }
}
