//! Transfer orchestration: resolves a source replica set and a target host
//! into the cheapest plan, coalesces duplicate requests and retries with
//! alternative sources.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use log::{debug, warn};

use monsoon_core::comm::TransferBackend;
use monsoon_core::errors::{Error, ErrorKind, Result};
use monsoon_core::logging::{Event, EventLog};
use monsoon_core::sys::fs;
use monsoon_core::types::{DataInstanceId, DataLocation};

use super::{FileOps, LogicalDataStore, SharedDiskRegistry};

#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct TransferKey {
    pub instance: DataInstanceId,
    pub target_host: String,
}

/// Completion callback of one transfer request; receives the physical path
/// of the replica as seen from the target host.
pub type TransferWaiter = Box<dyn FnOnce(Result<PathBuf>) + Send>;

/// One input of a staging group.
pub struct StageRequest {
    pub param_index: usize,
    pub instance: DataInstanceId,
    pub preserve_source: bool,
    /// The task will mutate this input in place; it always gets a private
    /// copy, never the source replica itself.
    pub writable: bool,
    pub target_path: PathBuf,
}

#[derive(Clone, Debug)]
pub struct StagedInput {
    pub param_index: usize,
    pub path: PathBuf,
}

/// Pseudo-path handed to callers for objects resolved by the external
/// object store rather than a filesystem.
pub fn persistent_path(psco: &str) -> PathBuf {
    PathBuf::from(format!("psco://{}", psco))
}

enum Plan {
    /// A replica is already reachable from the target host.
    AlreadyVisible { path: PathBuf },
    /// Replica and target share a host.
    LocalCopy {
        source: DataLocation,
        src: PathBuf,
        tgt: PathBuf,
        can_move: bool,
    },
    /// Source host and target host mount a common disk; one copy into the
    /// disk makes the data visible on the target.
    DiskCopy {
        source_key: String,
        src_host: String,
        src: PathBuf,
        disk: String,
        rel: PathBuf,
        src_disk_path: PathBuf,
        resolved: PathBuf,
    },
    /// Plain host-to-host copy.
    Remote {
        source_key: String,
        src_host: String,
        src: PathBuf,
        tgt: PathBuf,
    },
}

pub struct TransferManager {
    pending: Mutex<HashMap<TransferKey, Vec<TransferWaiter>>>,
    store: Arc<LogicalDataStore>,
    disks: Arc<SharedDiskRegistry>,
    fileops: Arc<FileOps>,
    backend: Mutex<Box<dyn TransferBackend>>,
    logger: Arc<Mutex<Box<dyn EventLog>>>,
    master_host: String,
}

impl TransferManager {
    pub fn new(
        store: Arc<LogicalDataStore>,
        disks: Arc<SharedDiskRegistry>,
        fileops: Arc<FileOps>,
        backend: Box<dyn TransferBackend>,
        logger: Arc<Mutex<Box<dyn EventLog>>>,
        master_host: String,
    ) -> Self {
        TransferManager {
            pending: Mutex::new(HashMap::new()),
            store,
            disks,
            fileops,
            backend: Mutex::new(backend),
            logger,
            master_host,
        }
    }

    /// Make `instance` available on `target_host`, at `target_path` when a
    /// copy is needed. Requests for the same (instance, host) pair coalesce
    /// into one wire copy; every waiter is notified when it completes.
    pub fn request(
        self: &Arc<Self>,
        instance: DataInstanceId,
        preserve_source: bool,
        writable: bool,
        target_host: String,
        target_path: PathBuf,
        waiter: TransferWaiter,
    ) {
        if let Some(psco) = self.store.persistent_id(instance) {
            // persisted objects are served by the object store on any host
            waiter(Ok(persistent_path(&psco)));
            return;
        }
        if preserve_source && !writable {
            // zero-copy fast path, nothing to coalesce
            for loc in self.store.locations(instance) {
                if let Some(path) = self.disks.resolve(&loc, &target_host) {
                    waiter(Ok(path));
                    return;
                }
            }
        }
        let key = TransferKey {
            instance,
            target_host: target_host.clone(),
        };
        {
            let mut pending = self.pending.lock().unwrap();
            if let Some(waiters) = pending.get_mut(&key) {
                debug!("transfer {:?} coalesced", key);
                waiters.push(waiter);
                return;
            }
            pending.insert(key.clone(), vec![waiter]);
        }
        self.logger.lock().unwrap().add_event(Event::TransferStarted {
            instance,
            target_host: target_host.clone(),
        });
        let mgr = self.clone();
        let submit = self.fileops.submit(
            super::FilePriority::Low,
            super::fileops::FileOp::Composed(Box::new(move || {
                let result =
                    mgr.execute(instance, preserve_source, writable, &target_host, &target_path);
                mgr.finish(
                    TransferKey {
                        instance,
                        target_host,
                    },
                    result,
                );
                Ok(())
            })),
            None,
        );
        if let Err(e) = submit {
            self.finish(key, Err(e));
        }
    }

    /// Plan-execute loop with source fallback; runs on the LOW lane.
    fn execute(
        &self,
        instance: DataInstanceId,
        preserve_source: bool,
        writable: bool,
        target_host: &str,
        target_path: &Path,
    ) -> Result<PathBuf> {
        // the binding may have appeared while this request sat in the queue
        if let Some(psco) = self.store.persistent_id(instance) {
            return Ok(persistent_path(&psco));
        }
        let mut exclude = HashSet::new();
        let mut last_error: Option<Error> = None;
        loop {
            let plan = match self.plan(
                instance,
                preserve_source,
                writable,
                target_host,
                target_path,
                &exclude,
            ) {
                Some(plan) => plan,
                None => {
                    return Err(match last_error {
                        Some(e) => e,
                        None => ErrorKind::TransferFailed(format!(
                            "no replica of {} reachable towards {}",
                            instance, target_host
                        ))
                        .into(),
                    });
                }
            };
            match self.run_plan(instance, target_host, plan) {
                Ok((path, failed_source)) => {
                    debug_assert!(failed_source.is_none());
                    return Ok(path);
                }
                Err((e, Some(source_key))) => {
                    warn!(
                        "transfer of {} from source {} failed, replanning: {}",
                        instance, source_key, e
                    );
                    exclude.insert(source_key);
                    last_error = Some(e);
                }
                Err((e, None)) => return Err(e),
            }
        }
    }

    fn plan(
        &self,
        instance: DataInstanceId,
        preserve_source: bool,
        writable: bool,
        target_host: &str,
        target_path: &Path,
        exclude: &HashSet<String>,
    ) -> Option<Plan> {
        // persistent entries are never staged as files
        let locations: Vec<DataLocation> = self
            .store
            .locations(instance)
            .into_iter()
            .filter(|l| !l.is_persistent() && !exclude.contains(&l.location_key()))
            .collect();

        // a replica already registered at the requested target needs no work
        let target_location = DataLocation::Private {
            host: target_host.to_string(),
            path: target_path.to_path_buf(),
        };
        for loc in locations.iter() {
            if loc.same_target(&target_location) {
                return Some(Plan::AlreadyVisible {
                    path: target_path.to_path_buf(),
                });
            }
        }

        if preserve_source && !writable {
            for loc in locations.iter() {
                if let Some(path) = self.disks.resolve(loc, target_host) {
                    return Some(Plan::AlreadyVisible { path });
                }
            }
        }

        // replica on the target host itself: local copy, or move when the
        // source need not survive
        for loc in locations.iter() {
            if let Some(src) = self.disks.resolve(loc, target_host) {
                return Some(Plan::LocalCopy {
                    source: loc.clone(),
                    src,
                    tgt: target_path.to_path_buf(),
                    can_move: !preserve_source,
                });
            }
        }

        // shared-disk shortcut between source and target hosts
        for loc in locations.iter() {
            if let DataLocation::Private {
                ref host, ref path, ..
            } = *loc
            {
                if let Some(disk) = self.disks.common_disk(host, target_host) {
                    let rel = PathBuf::from(instance.renaming());
                    let src_mp = self.disks.mountpoint(host, &disk)?;
                    let tgt_mp = self.disks.mountpoint(target_host, &disk)?;
                    return Some(Plan::DiskCopy {
                        source_key: loc.location_key(),
                        src_host: host.clone(),
                        src: path.clone(),
                        disk,
                        rel: rel.clone(),
                        src_disk_path: src_mp.join(&rel),
                        resolved: tgt_mp.join(&rel),
                    });
                }
            }
        }

        // last resort: host-to-host copy from any private replica
        for loc in locations.iter() {
            if let DataLocation::Private {
                ref host, ref path, ..
            } = *loc
            {
                return Some(Plan::Remote {
                    source_key: loc.location_key(),
                    src_host: host.clone(),
                    src: path.clone(),
                    tgt: target_path.to_path_buf(),
                });
            }
        }
        None
    }

    /// Execute one plan. On failure, returns the key of the source to
    /// exclude from the next attempt (when another source may still work).
    fn run_plan(
        &self,
        instance: DataInstanceId,
        target_host: &str,
        plan: Plan,
    ) -> ::std::result::Result<(PathBuf, Option<String>), (Error, Option<String>)> {
        match plan {
            Plan::AlreadyVisible { path } => Ok((path, None)),
            Plan::LocalCopy {
                source,
                src,
                tgt,
                can_move,
            } => {
                let result = if can_move {
                    fs::move_path(&src, &tgt)
                } else {
                    fs::copy_path(&src, &tgt, true)
                };
                match result {
                    Ok(()) => {
                        if can_move {
                            self.store.remove_location(instance, &source);
                        }
                        self.register(
                            instance,
                            DataLocation::Private {
                                host: target_host.to_string(),
                                path: tgt.clone(),
                            },
                            &tgt,
                        );
                        Ok((tgt, None))
                    }
                    Err(e) => Err((e, Some(source.location_key()))),
                }
            }
            Plan::DiskCopy {
                source_key,
                src_host,
                src,
                disk,
                rel,
                src_disk_path,
                resolved,
            } => {
                let result = if src_host == self.master_host {
                    fs::copy_path(&src, &src_disk_path, true)
                } else {
                    self.backend.lock().unwrap().copy_ssh(
                        &src_host,
                        &src,
                        &src_host,
                        &src_disk_path,
                    )
                };
                match result {
                    Ok(()) => {
                        self.register(
                            instance,
                            DataLocation::Shared {
                                disk,
                                path: rel,
                            },
                            &resolved,
                        );
                        self.store.register_location(
                            instance,
                            DataLocation::Private {
                                host: target_host.to_string(),
                                path: resolved.clone(),
                            },
                        );
                        Ok((resolved, None))
                    }
                    Err(e) => Err((e, Some(source_key))),
                }
            }
            Plan::Remote {
                source_key,
                src_host,
                src,
                tgt,
            } => {
                let result = self
                    .backend
                    .lock()
                    .unwrap()
                    .copy_ssh(&src_host, &src, target_host, &tgt);
                match result {
                    Ok(()) => {
                        self.register(
                            instance,
                            DataLocation::Private {
                                host: target_host.to_string(),
                                path: tgt.clone(),
                            },
                            &tgt,
                        );
                        Ok((tgt, None))
                    }
                    Err(e) => Err((e, Some(source_key))),
                }
            }
        }
    }

    fn register(&self, instance: DataInstanceId, location: DataLocation, local_probe: &Path) {
        self.store.register_location(instance, location);
        // size hints only come for free when the replica is visible here
        if let Ok(meta) = ::std::fs::metadata(local_probe) {
            self.store.set_size_hint(instance, meta.len());
        }
    }

    fn finish(&self, key: TransferKey, result: Result<PathBuf>) {
        let waiters = {
            let mut pending = self.pending.lock().unwrap();
            pending.remove(&key).unwrap_or_default()
        };
        self.logger
            .lock()
            .unwrap()
            .add_event(Event::TransferCompleted {
                instance: key.instance,
                target_host: key.target_host.clone(),
            });
        match result {
            Ok(path) => {
                for waiter in waiters {
                    waiter(Ok(path.clone()));
                }
            }
            Err(e) => {
                let message = e.to_string();
                for waiter in waiters {
                    waiter(Err(ErrorKind::TransferFailed(message.clone()).into()));
                }
            }
        }
    }

    /// Stage a set of task inputs onto one host; `done` fires once, with
    /// every input resolved or with the first failure.
    pub fn stage_set(
        self: &Arc<Self>,
        requests: Vec<StageRequest>,
        target_host: &str,
        done: Box<dyn FnOnce(Result<Vec<StagedInput>>) + Send>,
    ) {
        if requests.is_empty() {
            done(Ok(Vec::new()));
            return;
        }
        struct GroupInner {
            remaining: usize,
            results: Vec<Option<StagedInput>>,
            failed: Option<String>,
            done: Option<Box<dyn FnOnce(Result<Vec<StagedInput>>) + Send>>,
        }
        let group = Arc::new(Mutex::new(GroupInner {
            remaining: requests.len(),
            results: (0..requests.len()).map(|_| None).collect(),
            failed: None,
            done: Some(done),
        }));
        for (slot, req) in requests.into_iter().enumerate() {
            let group = group.clone();
            let param_index = req.param_index;
            self.request(
                req.instance,
                req.preserve_source,
                req.writable,
                target_host.to_string(),
                req.target_path,
                Box::new(move |result| {
                    let mut g = group.lock().unwrap();
                    match result {
                        Ok(path) => g.results[slot] = Some(StagedInput { param_index, path }),
                        Err(e) => {
                            if g.failed.is_none() {
                                g.failed = Some(e.to_string());
                            }
                        }
                    }
                    g.remaining -= 1;
                    if g.remaining == 0 {
                        let done = g.done.take().unwrap();
                        match g.failed.take() {
                            Some(message) => {
                                done(Err(ErrorKind::TransferFailed(message).into()))
                            }
                            None => {
                                let staged =
                                    g.results.drain(..).map(|r| r.unwrap()).collect();
                                done(Ok(staged));
                            }
                        }
                    }
                }),
            );
        }
    }
}
