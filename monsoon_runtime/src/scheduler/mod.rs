//! Ready-task scheduling: constraint matching, capacity reservation, input
//! staging, dispatch through the invoker and completion bookkeeping.

pub mod policy;
pub mod registry;
pub mod timeout;

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{debug, warn};

use monsoon_core::comm::{ExecutionStatus, Invoker, OutputSink, ResolvedInput, TaskLaunch};
use monsoon_core::errors::ErrorKind;
use monsoon_core::logging::{Event, EventLog};
use monsoon_core::types::{
    AppId, Capacity, DataAccessId, DataInstanceId, DataLocation, EngineKind, ResourceSpec,
    TaskId, TaskSpec,
};

use crate::ap::request::{APRequest, ApHandle, TaskEndRequest, TaskEndStatus};
use crate::ap::request::{InputsFailedRequest, InputsReadyRequest};
use crate::data::transfer::{StageRequest, StagedInput};
use crate::data::{LogicalDataStore, SharedDiskRegistry, TransferManager};
use crate::graph::{TaskRef, TaskRefMethods, TaskState};
use crate::resources::{ResourceEntry, ResourcePool};

use self::policy::{ResourceView, SchedulingPolicy, TaskView};
use self::timeout::TimeoutMonitor;

pub use self::registry::{ConnectorRegistry, SchedulerRegistry};

/// Outcome of handing a ready task to the scheduler.
#[derive(Debug, Eq, PartialEq)]
pub enum SubmitOutcome {
    Queued,
    /// No known resource can ever satisfy the constraints.
    Blocked,
}

struct ReadyEntry {
    tref: TaskRef,
    /// Replicated instances are pinned to one resource each.
    pinned: Option<String>,
}

struct InstanceInfo {
    tref: TaskRef,
    capacity: Capacity,
    launched: bool,
}

pub struct TaskScheduler {
    policy: Box<dyn SchedulingPolicy>,
    pool: Arc<ResourcePool>,
    transfers: Arc<TransferManager>,
    store: Arc<LogicalDataStore>,
    disks: Arc<SharedDiskRegistry>,
    invoker: Box<dyn Invoker>,
    logger: Arc<Mutex<Box<dyn EventLog>>>,
    ap: ApHandle,
    timeouts: TimeoutMonitor,

    ready: Vec<ReadyEntry>,
    blocked: Vec<TaskRef>,
    running: HashMap<(TaskId, String), InstanceInfo>,
    /// Resources already used by each distributed task group.
    distributed_used: HashMap<(AppId, String), HashSet<String>>,
}

/// First implementation the resource can satisfy, with the capacity to
/// reserve for it. MPI implementations are scaled by processes-per-node.
fn feasible_impl(spec: &TaskSpec, resource: &ResourceSpec) -> Option<(usize, Capacity)> {
    for (idx, implementation) in spec.implementations.iter().enumerate() {
        let constraints = match implementation.engine {
            EngineKind::Mpi {
                processes_per_node, ..
            } => implementation
                .constraints
                .scale_up_by(processes_per_node.max(1)),
            _ => implementation.constraints.clone(),
        };
        if constraints.satisfied_by(resource) {
            return Some((idx, constraints.required_capacity()));
        }
    }
    None
}

fn read_instances(accesses: &[DataAccessId]) -> Vec<DataInstanceId> {
    accesses.iter().filter_map(|a| a.read_instance()).collect()
}

impl TaskScheduler {
    pub fn new(
        policy: Box<dyn SchedulingPolicy>,
        pool: Arc<ResourcePool>,
        transfers: Arc<TransferManager>,
        store: Arc<LogicalDataStore>,
        disks: Arc<SharedDiskRegistry>,
        invoker: Box<dyn Invoker>,
        logger: Arc<Mutex<Box<dyn EventLog>>>,
        ap: ApHandle,
    ) -> Self {
        let timeouts = TimeoutMonitor::start(ap.clone());
        TaskScheduler {
            policy,
            pool,
            transfers,
            store,
            disks,
            invoker,
            logger,
            ap,
            timeouts,
            ready: Vec::new(),
            blocked: Vec::new(),
            running: HashMap::new(),
            distributed_used: HashMap::new(),
        }
    }

    /// Accept a task whose predecessors are all done.
    pub fn submit_ready(&mut self, tref: &TaskRef) -> SubmitOutcome {
        let entries = self.pool.list();
        let feasible: Vec<&Arc<ResourceEntry>> = entries
            .iter()
            .filter(|e| feasible_impl(&tref.get().spec, &e.spec).is_some())
            .collect();
        if !entries.is_empty() && feasible.is_empty() {
            debug!("task {} has unsatisfiable constraints", tref.task_id());
            self.blocked.push(tref.clone());
            return SubmitOutcome::Blocked;
        }
        if tref.get().spec.flags.is_replicated && !feasible.is_empty() {
            tref.get_mut().remaining_instances = feasible.len() as u32;
            for entry in feasible {
                self.ready.push(ReadyEntry {
                    tref: tref.clone(),
                    pinned: Some(entry.spec.name.clone()),
                });
            }
        } else {
            self.ready.push(ReadyEntry {
                tref: tref.clone(),
                pinned: None,
            });
        }
        self.try_schedule();
        SubmitOutcome::Queued
    }

    fn group_key(tref: &TaskRef) -> (AppId, String) {
        let t = tref.get();
        let group = t
            .spec
            .flags
            .group
            .clone()
            .unwrap_or_else(|| t.spec.signature.clone());
        (t.spec.id.app_id(), group)
    }

    /// Greedy assignment: score every feasible (task, resource) pair, pick
    /// the best, reserve, stage; repeat until nothing fits.
    pub fn try_schedule(&mut self) {
        loop {
            let entries = self.pool.list();
            if entries.is_empty() || self.ready.is_empty() {
                return;
            }
            let mut best: Option<(usize, Arc<ResourceEntry>, usize, Capacity, policy::Score,
                                  ResourceView, TaskView)> = None;
            for (ready_idx, ready) in self.ready.iter().enumerate() {
                let task_view = {
                    let t = ready.tref.get();
                    TaskView {
                        submission_index: t.submission_index,
                        prioritary: t.spec.flags.prioritary,
                    }
                };
                let inputs = read_instances(&ready.tref.get().accesses);
                let distributed_taken = if ready.tref.get().spec.flags.is_distributed {
                    self.distributed_used
                        .get(&Self::group_key(&ready.tref))
                        .cloned()
                        .unwrap_or_default()
                } else {
                    HashSet::new()
                };
                for entry in entries.iter() {
                    if let Some(ref pin) = ready.pinned {
                        if &entry.spec.name != pin {
                            continue;
                        }
                    }
                    if distributed_taken.contains(&entry.spec.name) {
                        continue;
                    }
                    let (impl_idx, capacity) =
                        match feasible_impl(&ready.tref.get().spec, &entry.spec) {
                            Some(found) => found,
                            None => continue,
                        };
                    {
                        let state = entry.state.lock().unwrap();
                        if state.released || !state.free.fits(&capacity) {
                            continue;
                        }
                    }
                    let resource_view = {
                        let state = entry.state.lock().unwrap();
                        ResourceView {
                            name: entry.spec.name.clone(),
                            index: entry.index,
                            queued: state.queued,
                            running: state.running,
                            resident_bytes: self.store.bytes_resident_on(
                                &entry.spec.host,
                                &inputs,
                                &self.disks,
                            ),
                        }
                    };
                    let score = self.policy.score(&task_view, &resource_view);
                    let candidate_rank = (task_view.prioritary, score);
                    let replace = match best {
                        None => true,
                        Some((_, _, _, _, best_score, ref best_view, ref best_task)) => {
                            let best_rank = (best_task.prioritary, best_score);
                            if candidate_rank != best_rank {
                                candidate_rank > best_rank
                            } else {
                                self.policy.tie_break(&resource_view, best_view, &task_view)
                                    == ::std::cmp::Ordering::Greater
                            }
                        }
                    };
                    if replace {
                        best = Some((
                            ready_idx,
                            entry.clone(),
                            impl_idx,
                            capacity.clone(),
                            score,
                            resource_view,
                            task_view.clone(),
                        ));
                    }
                }
            }
            let (ready_idx, entry, impl_idx, capacity, _, _, _) = match best {
                Some(found) => found,
                None => return,
            };
            if !entry.try_reserve(&capacity) {
                // raced with a lifecycle change, re-evaluate
                continue;
            }
            let ready = self.ready.remove(ready_idx);
            self.dispatch(ready.tref, entry, impl_idx, capacity);
        }
    }

    fn dispatch(
        &mut self,
        tref: TaskRef,
        entry: Arc<ResourceEntry>,
        impl_idx: usize,
        capacity: Capacity,
    ) {
        let resource_name = entry.spec.name.clone();
        let task_id = tref.task_id();
        debug!("task {} staged on {}", task_id, resource_name);
        if tref.get().spec.flags.is_distributed {
            let key = Self::group_key(&tref);
            let total = self.pool.list().len();
            let used = self
                .distributed_used
                .entry(key)
                .or_insert_with(HashSet::new);
            used.insert(resource_name.clone());
            if used.len() >= total {
                used.clear();
            }
        }
        {
            let mut t = tref.get_mut();
            t.chosen_impl = impl_idx;
            t.state = TaskState::Staging(resource_name.clone());
        }
        self.running.insert(
            (task_id, resource_name.clone()),
            InstanceInfo {
                tref: tref.clone(),
                capacity,
                launched: false,
            },
        );

        let mut requests = Vec::new();
        {
            let t = tref.get();
            for (idx, access) in t.accesses.iter().enumerate() {
                let read = match access.read_instance() {
                    Some(read) => read,
                    None => continue,
                };
                if self.store.persistent_id(read).is_some() {
                    continue;
                }
                // a read-write input is staged under the written renaming:
                // it becomes the working copy the task mutates in place
                let writable = access.written_instance().is_some();
                let file_name = match access.written_instance() {
                    Some(written) => written.renaming(),
                    None => read.renaming(),
                };
                requests.push(StageRequest {
                    param_index: idx,
                    instance: read,
                    preserve_source: access.preserve_source(),
                    writable,
                    target_path: entry.working_dir.join(file_name),
                });
            }
        }
        let ap = self.ap.clone();
        let callback_resource = resource_name.clone();
        self.transfers.stage_set(
            requests,
            &entry.spec.host,
            Box::new(move |result| {
                let request = match result {
                    Ok(staged) => APRequest::InputsReady(InputsReadyRequest {
                        task: task_id,
                        resource: callback_resource,
                        staged,
                    }),
                    Err(e) => APRequest::InputsFailed(InputsFailedRequest {
                        task: task_id,
                        resource: callback_resource,
                        message: e.to_string(),
                    }),
                };
                let _ = ap.enqueue(request);
            }),
        );
    }

    /// All inputs of a staged instance arrived; launch it.
    pub fn inputs_ready(&mut self, tref: &TaskRef, resource: &str, staged: Vec<StagedInput>) {
        let task_id = tref.task_id();
        let key = (task_id, resource.to_string());
        if !self.running.contains_key(&key) {
            debug!("stale staging completion for task {}", task_id);
            return;
        }
        let entry = match self.pool.get(resource) {
            Some(entry) => entry,
            None => {
                warn!("resource {} vanished before launch of {}", resource, task_id);
                return;
            }
        };
        entry.mark_running();
        if let Some(info) = self.running.get_mut(&key) {
            info.launched = true;
        }
        tref.get_mut().state = TaskState::Running(resource.to_string());

        let launch = {
            let t = tref.get();
            let mut inputs = Vec::new();
            for staged_input in staged {
                let param = &t.spec.params[staged_input.param_index];
                let name = if param.name.is_empty() {
                    param.data.clone()
                } else {
                    param.name.clone()
                };
                inputs.push(ResolvedInput {
                    name,
                    path: staged_input.path,
                });
            }
            let mut outputs = Vec::new();
            for (idx, access) in t.accesses.iter().enumerate() {
                if let Some(written) = access.written_instance() {
                    let param = &t.spec.params[idx];
                    outputs.push(OutputSink {
                        name: if param.name.is_empty() {
                            param.data.clone()
                        } else {
                            param.name.clone()
                        },
                        path: entry.working_dir.join(written.renaming()),
                        stream: param.stream,
                    });
                }
            }
            TaskLaunch {
                task: task_id,
                implementation: t.spec.implementations[t.chosen_impl].clone(),
                resource: resource.to_string(),
                inputs,
                outputs,
            }
        };

        let timeout_ms = tref.get().spec.flags.timeout_ms;
        if timeout_ms > 0 {
            self.timeouts.arm(task_id, Duration::from_millis(timeout_ms));
        }
        self.logger.lock().unwrap().add_event(Event::TaskStarted {
            task: task_id,
            resource: resource.to_string(),
        });

        let ap = self.ap.clone();
        let fail_by_ev = tref.get().spec.flags.fail_by_exit_value;
        let done_resource = resource.to_string();
        let done = Box::new(move |status: ExecutionStatus| {
            let status = match status {
                ExecutionStatus::Completed { exit_code } => {
                    if fail_by_ev && exit_code != 0 {
                        TaskEndStatus::Failed {
                            message: ErrorKind::TaskExecFailed(task_id, exit_code).to_string(),
                        }
                    } else {
                        TaskEndStatus::Completed
                    }
                }
                ExecutionStatus::Failed { message } => TaskEndStatus::Failed { message },
                ExecutionStatus::Cancelled => TaskEndStatus::Cancelled,
            };
            let _ = ap.enqueue(APRequest::TaskEnd(TaskEndRequest {
                task: task_id,
                resource: Some(done_resource),
                status,
            }));
        });
        if let Err(e) = self.invoker.execute(launch, done) {
            warn!("invoker rejected task {}: {}", task_id, e);
            let _ = self.ap.enqueue(APRequest::TaskEnd(TaskEndRequest {
                task: task_id,
                resource: Some(resource.to_string()),
                status: TaskEndStatus::Failed {
                    message: e.to_string(),
                },
            }));
        }
    }

    /// Input staging failed after source fallback was exhausted; free the
    /// reservation so the failure policy can decide what happens next.
    pub fn inputs_failed(&mut self, tref: &TaskRef, resource: &str) {
        let key = (tref.task_id(), resource.to_string());
        if let Some(info) = self.running.remove(&key) {
            if let Some(entry) = self.pool.get(resource) {
                entry.release_reservation(&info.capacity, info.launched);
            }
        }
    }

    /// One instance reported a terminal state. Returns `true` when this
    /// was the last live instance of the task.
    pub fn instance_end(
        &mut self,
        tref: &TaskRef,
        resource: Option<&str>,
        success: bool,
    ) -> bool {
        let task_id = tref.task_id();
        let removed: Vec<((TaskId, String), InstanceInfo)> = match resource {
            Some(name) => {
                let key = (task_id, name.to_string());
                self.running.remove(&key).map(|i| (key, i)).into_iter().collect()
            }
            None => {
                // synthetic end (timeout): every instance goes down
                let keys: Vec<(TaskId, String)> = self
                    .running
                    .keys()
                    .filter(|k| k.0 == task_id)
                    .cloned()
                    .collect();
                keys.into_iter()
                    .filter_map(|k| self.running.remove(&k).map(|i| (k, i)))
                    .collect()
            }
        };
        for (key, info) in removed.iter() {
            let resource_name = &key.1;
            if let Some(entry) = self.pool.get(resource_name) {
                entry.release_reservation(&info.capacity, info.launched);
            }
            if success {
                self.register_outputs(tref, resource_name);
            }
        }
        let finished_instances = removed.len().max(1) as u32;
        let last = {
            let mut t = tref.get_mut();
            t.remaining_instances = t.remaining_instances.saturating_sub(finished_instances);
            t.remaining_instances == 0
        };
        if last {
            self.timeouts.disarm(task_id);
        }
        last
    }

    /// Record the produced outputs of a completed instance as replicas on
    /// the executing host.
    fn register_outputs(&self, tref: &TaskRef, resource: &str) {
        let entry = match self.pool.get(resource) {
            Some(entry) => entry,
            None => return,
        };
        let t = tref.get();
        for access in t.accesses.iter() {
            if let Some(written) = access.written_instance() {
                let path = entry.working_dir.join(written.renaming());
                self.store.register_location(
                    written,
                    DataLocation::Private {
                        host: entry.spec.host.clone(),
                        path: path.clone(),
                    },
                );
                if let Ok(meta) = ::std::fs::metadata(&path) {
                    self.store.set_size_hint(written, meta.len());
                }
            }
        }
    }

    /// Abort whatever the scheduler still holds for the task.
    pub fn cancel_task(&mut self, tref: &TaskRef) {
        let task_id = tref.task_id();
        self.ready.retain(|r| r.tref != *tref);
        self.blocked.retain(|t| t != tref);
        let keys: Vec<(TaskId, String)> = self
            .running
            .keys()
            .filter(|k| k.0 == task_id)
            .cloned()
            .collect();
        let mut was_running = false;
        for key in keys {
            if let Some(info) = self.running.remove(&key) {
                if let Some(entry) = self.pool.get(&key.1) {
                    entry.release_reservation(&info.capacity, info.launched);
                }
                was_running |= info.launched;
            }
        }
        if was_running {
            if let Err(e) = self.invoker.cancel(task_id) {
                warn!("cancel of task {} failed: {}", task_id, e);
            }
        }
        self.timeouts.disarm(task_id);
    }

    /// A resource joined: blocked tasks may have become satisfiable.
    /// Returns them; the caller re-submits each.
    pub fn resource_added(&mut self) -> Vec<TaskRef> {
        let entries = self.pool.list();
        let mut unblocked = Vec::new();
        let mut still_blocked = Vec::new();
        for tref in self.blocked.drain(..) {
            let feasible = entries
                .iter()
                .any(|e| feasible_impl(&tref.get().spec, &e.spec).is_some());
            if feasible {
                unblocked.push(tref);
            } else {
                still_blocked.push(tref);
            }
        }
        self.blocked = still_blocked;
        self.try_schedule();
        unblocked
    }

    /// A resource left: its staged and running instances are lost. Returns
    /// the affected tasks for failure handling.
    pub fn resource_removed(&mut self, name: &str) -> Vec<TaskRef> {
        let keys: Vec<(TaskId, String)> = self
            .running
            .keys()
            .filter(|k| k.1 == name)
            .cloned()
            .collect();
        let mut affected = Vec::new();
        for key in keys {
            if let Some(info) = self.running.remove(&key) {
                self.timeouts.disarm(key.0);
                affected.push(info.tref);
            }
        }
        affected
    }

    pub fn shutdown(&mut self) {
        self.timeouts.shutdown();
    }
}
