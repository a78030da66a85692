//! The access processor: a bounded request queue with a single consumer
//! thread. Every public call becomes a typed request; effects are applied
//! in dequeue order, so the provider, the analyser and the scheduler run
//! without any locking of their own.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{sync_channel, Receiver, SyncSender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use futures::sync::oneshot;
use futures::Future;
use log::{debug, info, warn};

use monsoon_core::comm::Invoker;
use monsoon_core::errors::{ErrorKind, Result};
use monsoon_core::logging::{AppEndReason, Event, EventLog};
use monsoon_core::types::{
    AppId, DataAccessId, DataId, DataLocation, Direction, OnFailure, ParamSpec, ResourceSpec,
    TaskId, TaskSpec,
};

use super::analyser::TaskAnalyser;
use super::datainfo::DataInfoProvider;
use super::request::*;
use crate::data::transfer::persistent_path;
use crate::data::{FileOps, LogicalDataStore, SharedDiskRegistry, TransferManager};
use crate::graph::{AppRef, TaskRef, TaskRefMethods, TaskState};
use crate::resources::ResourcePool;
use crate::scheduler::policy::SchedulingPolicy;
use crate::scheduler::{SubmitOutcome, TaskScheduler};

/// Everything the consumer thread needs to build its components.
pub struct ApComponents {
    pub policy: Box<dyn SchedulingPolicy>,
    pub invoker: Box<dyn Invoker>,
    pub pool: Arc<ResourcePool>,
    pub store: Arc<LogicalDataStore>,
    pub disks: Arc<SharedDiskRegistry>,
    pub transfers: Arc<TransferManager>,
    pub fileops: Arc<FileOps>,
    pub logger: Arc<Mutex<Box<dyn EventLog>>>,
    pub master_host: String,
    /// Directory where files opened by the main program are staged.
    pub open_dir: PathBuf,
    pub queue_capacity: usize,
}

pub struct AccessProcessor {
    handle: ApHandle,
    /// Raw sender that bypasses the accepting flag; used to deliver the
    /// final shutdown request.
    sender: SyncSender<APRequest>,
    accepting: Arc<AtomicBool>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl AccessProcessor {
    pub fn start(components: ApComponents) -> AccessProcessor {
        let (sender, receiver) = sync_channel(components.queue_capacity);
        let accepting = Arc::new(AtomicBool::new(true));
        let handle = ApHandle::new(sender.clone(), accepting.clone());
        let thread_handle = handle.clone();
        let thread = thread::Builder::new()
            .name("access-processor".into())
            .spawn(move || consumer_loop(components, thread_handle, receiver))
            .expect("cannot spawn the access processor");
        AccessProcessor {
            handle,
            sender,
            accepting,
            thread: Mutex::new(Some(thread)),
        }
    }

    pub fn handle(&self) -> ApHandle {
        self.handle.clone()
    }

    fn call<T, F>(&self, build: F) -> Result<T>
    where
        F: FnOnce(Replier<T>) -> APRequest,
    {
        let (sx, rx) = oneshot::channel();
        self.handle.enqueue(build(sx))?;
        match rx.wait() {
            Ok(result) => result,
            Err(_) => Err(ErrorKind::ShutdownInProgress.into()),
        }
    }

    pub fn register_data(
        &self,
        app: AppId,
        logical: &str,
        initial: Option<DataLocation>,
    ) -> Result<DataId> {
        let logical = logical.to_string();
        self.call(|reply| {
            APRequest::RegisterData(RegisterDataRequest {
                app,
                logical,
                initial,
                reply,
            })
        })
    }

    pub fn analyse_access(
        &self,
        app: AppId,
        logical: &str,
        direction: Direction,
    ) -> Result<DataAccessId> {
        let logical = logical.to_string();
        self.call(|reply| {
            APRequest::AnalyseAccess(AnalyseAccessRequest {
                app,
                logical,
                direction,
                reply,
            })
        })
    }

    pub fn submit(&self, app: AppId, spec: TaskSpec) -> Result<TaskId> {
        self.call(|reply| APRequest::SubmitTask(SubmitTaskRequest { app, spec, reply }))
    }

    /// Blocks until the requested version is present on the master host
    /// and returns its physical path.
    pub fn open_file(&self, app: AppId, logical: &str, direction: Direction) -> Result<PathBuf> {
        let access = self.analyse_access(app, logical, direction)?;
        self.call(|reply| APRequest::TransferOpenFile(TransferOpenFileRequest { access, reply }))
    }

    pub fn close_file(&self, app: AppId, logical: &str) -> Result<()> {
        self.handle.enqueue(APRequest::CloseFile(CloseFileRequest {
            app,
            logical: logical.to_string(),
        }))
    }

    pub fn delete_file(&self, app: AppId, logical: &str) -> Result<bool> {
        let logical = logical.to_string();
        self.call(|reply| APRequest::DeleteFile(DeleteFileRequest { app, logical, reply }))
    }

    pub fn barrier(&self, app: AppId) -> Result<()> {
        self.call(|reply| APRequest::Barrier(BarrierRequest { app, reply }))
    }

    pub fn barrier_group(&self, app: AppId, group: &str) -> Result<()> {
        let group = group.to_string();
        self.call(|reply| APRequest::BarrierGroup(BarrierGroupRequest { app, group, reply }))
    }

    /// Two-phase termination: returns once every task of the application
    /// has completed and, if the wait stalled, resources were reacquired.
    pub fn end_of_app(&self, app: AppId) -> Result<()> {
        self.call(|reply| APRequest::EndOfApp(EndOfAppRequest { app, reply }))
    }

    pub fn cancel_app(&self, app: AppId) -> Result<()> {
        self.call(|reply| APRequest::CancelApp(CancelAppRequest { app, reply }))
    }

    pub fn add_resource(&self, spec: ResourceSpec) -> Result<()> {
        self.call(|reply| APRequest::AddResource(AddResourceRequest { spec, reply }))
    }

    pub fn remove_resource(&self, name: &str) -> Result<()> {
        let name = name.to_string();
        self.call(|reply| APRequest::RemoveResource(RemoveResourceRequest { name, reply }))
    }

    /// Reject new requests, drain the queue and join the consumer.
    pub fn shutdown(&self) {
        if !self.accepting.swap(false, Ordering::SeqCst) {
            return;
        }
        let (sx, rx) = oneshot::channel();
        if self.sender.send(APRequest::Shutdown(sx)).is_ok() {
            let _ = rx.wait();
        }
        if let Some(thread) = self.thread.lock().unwrap().take() {
            let _ = thread.join();
        }
    }
}

impl Drop for AccessProcessor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn consumer_loop(components: ApComponents, handle: ApHandle, receiver: Receiver<APRequest>) {
    debug!("access processor started");
    let mut core = ApCore::new(components, handle);
    for request in receiver.iter() {
        let stop = match request {
            APRequest::Shutdown(reply) => {
                let _ = reply.send(Ok(()));
                true
            }
            other => {
                core.handle(other);
                false
            }
        };
        core.logger.lock().unwrap().flush();
        if stop {
            break;
        }
    }
    core.scheduler.shutdown();
    info!("access processor finished");
}

struct ApCore {
    provider: DataInfoProvider,
    analyser: TaskAnalyser,
    scheduler: TaskScheduler,
    pool: Arc<ResourcePool>,
    store: Arc<LogicalDataStore>,
    transfers: Arc<TransferManager>,
    logger: Arc<Mutex<Box<dyn EventLog>>>,
    master_host: String,
    open_dir: PathBuf,
}

impl ApCore {
    fn new(components: ApComponents, handle: ApHandle) -> ApCore {
        let provider = DataInfoProvider::new(
            components.store.clone(),
            components.disks.clone(),
            components.fileops.clone(),
            components.logger.clone(),
            components.master_host.clone(),
        );
        let scheduler = TaskScheduler::new(
            components.policy,
            components.pool.clone(),
            components.transfers.clone(),
            components.store.clone(),
            components.disks.clone(),
            components.invoker,
            components.logger.clone(),
            handle,
        );
        ApCore {
            provider,
            analyser: TaskAnalyser::new(),
            scheduler,
            pool: components.pool,
            store: components.store,
            transfers: components.transfers,
            logger: components.logger,
            master_host: components.master_host,
            open_dir: components.open_dir,
        }
    }

    fn handle(&mut self, request: APRequest) {
        debug!("processing request '{}'", request.kind());
        match request {
            APRequest::RegisterData(r) => self.on_register_data(r),
            APRequest::AnalyseAccess(r) => self.on_analyse_access(r),
            APRequest::SubmitTask(r) => self.on_submit(r),
            APRequest::TransferOpenFile(r) => self.on_transfer_open_file(r),
            APRequest::CloseFile(r) => self.provider.close_file(&r.logical),
            APRequest::DeleteFile(r) => {
                let result = self.provider.delete_data(&r.logical);
                let _ = r.reply.send(result);
            }
            APRequest::Barrier(r) => self.on_barrier(r),
            APRequest::BarrierGroup(r) => self.on_barrier_group(r),
            APRequest::EndOfApp(r) => self.on_end_of_app(r),
            APRequest::TaskEnd(r) => self.on_task_end(r),
            APRequest::CancelApp(r) => self.on_cancel_app(r),
            APRequest::InputsReady(r) => self.on_inputs_ready(r),
            APRequest::InputsFailed(r) => self.on_inputs_failed(r),
            APRequest::AddResource(r) => self.on_add_resource(r),
            APRequest::RemoveResource(r) => self.on_remove_resource(r),
            APRequest::Shutdown(_) => unreachable!("handled by the consumer loop"),
        }
    }

    /// Look up the application, logging its birth on first contact.
    fn app(&mut self, id: AppId) -> AppRef {
        if !self.analyser.graph.apps.contains_key(&id) {
            self.logger
                .lock()
                .unwrap()
                .add_event(Event::AppNew { app: id });
        }
        self.analyser.graph.app(id)
    }

    fn on_register_data(&mut self, r: RegisterDataRequest) {
        let aref = self.app(r.app);
        if aref.get().state == crate::graph::AppState::Cancelled {
            let _ = r.reply.send(Err(ErrorKind::AppCancelled(r.app).into()));
            return;
        }
        let result = self.provider.register_data(&r.logical, r.initial);
        let _ = r.reply.send(result);
    }

    fn on_analyse_access(&mut self, r: AnalyseAccessRequest) {
        let aref = self.app(r.app);
        if aref.get().state == crate::graph::AppState::Cancelled {
            let _ = r.reply.send(Err(ErrorKind::AppCancelled(r.app).into()));
            return;
        }
        let result = self.provider.register_open_access(&r.logical, r.direction);
        let _ = r.reply.send(result);
    }

    fn on_submit(&mut self, r: SubmitTaskRequest) {
        let aref = self.app(r.app);
        {
            let a = aref.get();
            if a.state == crate::graph::AppState::Cancelled {
                let _ = r.reply.send(Err(ErrorKind::AppCancelled(r.app).into()));
                return;
            }
            if a.no_more_tasks {
                let _ = r.reply.send(Err(format!(
                    "application {} no longer accepts submissions",
                    r.app
                )
                .into()));
                return;
            }
        }
        if aref.get().state == crate::graph::AppState::Registered {
            aref.get_mut().state = crate::graph::AppState::Running;
        }
        // new work revives any resources parked by a stalled wait
        self.pool.reacquire_all();
        let result = if r.spec.flags.is_reduce {
            self.submit_reduce(&aref, r.spec)
        } else {
            self.submit_one(&aref, r.spec)
        };
        let _ = r.reply.send(result);
    }

    fn submit_one(&mut self, aref: &AppRef, mut spec: TaskSpec) -> Result<TaskId> {
        let app_id = aref.get().id;
        let task_id = TaskId::new(app_id, aref.get_mut().new_task_id());
        spec.id = task_id;
        if spec.implementations.is_empty() {
            return Err(format!("task {} has no implementations", task_id).into());
        }

        let mut accesses = Vec::with_capacity(spec.params.len());
        for param in spec.params.iter() {
            match self.provider.register_access(&param.data, param.direction) {
                Ok(access) => accesses.push(access),
                Err(e) => {
                    for access in accesses.iter() {
                        self.provider.complete_access(access);
                    }
                    return Err(e);
                }
            }
        }

        let index = self.analyser.graph.next_submission_index();
        let tref = TaskRef::new(aref, spec, accesses, index);
        self.analyser.graph.tasks.insert(task_id, tref.clone());
        self.logger.lock().unwrap().add_event(Event::TaskSubmitted {
            task: task_id,
            signature: tref.get().spec.signature.clone(),
        });
        if self.analyser.process_task(&tref) {
            self.make_ready(&tref);
        }
        Ok(task_id)
    }

    /// Materialise a reduce task as a binary tree of chunked sub-tasks.
    /// The returned id is the root of the tree, the sub-task producing the
    /// declared output.
    fn submit_reduce(&mut self, aref: &AppRef, spec: TaskSpec) -> Result<TaskId> {
        let inputs: Vec<ParamSpec> = spec
            .params
            .iter()
            .filter(|p| p.direction == Direction::In)
            .cloned()
            .collect();
        let output = spec
            .params
            .iter()
            .find(|p| p.direction == Direction::Out)
            .cloned()
            .ok_or_else(|| format!("reduce task '{}' has no output parameter", spec.signature))?;
        let chunk = (spec.flags.reduce_chunk_size as usize).max(2);

        let mut level: Vec<ParamSpec> = inputs;
        let mut tier = 0;
        let mut last_id = None;
        while !level.is_empty() {
            let final_tier = level.len() <= chunk;
            let mut next_level = Vec::new();
            for (i, group) in level.chunks(chunk).enumerate() {
                let out_param = if final_tier {
                    output.clone()
                } else {
                    ParamSpec {
                        data: format!("{}__r{}_{}", output.data, tier, i),
                        direction: Direction::Out,
                        stream: Default::default(),
                        prefix: String::new(),
                        name: String::new(),
                    }
                };
                let mut params: Vec<ParamSpec> = group.to_vec();
                next_level.push(ParamSpec {
                    data: out_param.data.clone(),
                    direction: Direction::In,
                    stream: Default::default(),
                    prefix: String::new(),
                    name: String::new(),
                });
                params.push(out_param);
                let mut flags = spec.flags.clone();
                flags.is_reduce = false;
                let sub = TaskSpec {
                    id: Default::default(),
                    signature: spec.signature.clone(),
                    implementations: spec.implementations.clone(),
                    params,
                    num_returns: spec.num_returns,
                    flags,
                    user: spec.user.clone(),
                };
                last_id = Some(self.submit_one(aref, sub)?);
            }
            if final_tier {
                break;
            }
            level = next_level;
            tier += 1;
        }
        last_id.ok_or_else(|| format!("reduce task '{}' has no inputs", spec.signature).into())
    }

    fn make_ready(&mut self, tref: &TaskRef) {
        self.logger.lock().unwrap().add_event(Event::TaskReady {
            task: tref.task_id(),
        });
        match self.scheduler.submit_ready(tref) {
            SubmitOutcome::Queued => {}
            SubmitOutcome::Blocked => {
                warn!(
                    "constraints of task {} are unsatisfiable on every resource",
                    tref.task_id()
                );
                tref.get_mut().state = TaskState::Blocked;
                let aref = tref.get().app.clone();
                aref.get_mut().blocked += 1;
                self.check_app_waiters(&aref);
            }
        }
    }

    fn on_transfer_open_file(&mut self, r: TransferOpenFileRequest) {
        let access = r.access;
        let written = access.written_instance();
        match access.read_instance() {
            None => {
                // write-only open: no input transfer, hand out the target
                let written = written.unwrap();
                let target = self.open_dir.join(written.renaming());
                self.store.register_location(
                    written,
                    DataLocation::Private {
                        host: self.master_host.clone(),
                        path: target.clone(),
                    },
                );
                let _ = r.reply.send(Ok(target));
            }
            Some(read) => {
                if let Some(psco) = self.store.persistent_id(read) {
                    let _ = r.reply.send(Ok(persistent_path(&psco)));
                    return;
                }
                let name = match written {
                    Some(written) => written.renaming(),
                    None => read.renaming(),
                };
                let target = self.open_dir.join(name);
                let reply = r.reply;
                let store = self.store.clone();
                let master = self.master_host.clone();
                self.transfers.request(
                    read,
                    access.preserve_source(),
                    written.is_some(),
                    self.master_host.clone(),
                    target,
                    Box::new(move |result| {
                        if let (Ok(ref path), Some(written)) = (&result, written) {
                            // the staged copy becomes the written version
                            store.remove_location(
                                read,
                                &DataLocation::Private {
                                    host: master.clone(),
                                    path: path.clone(),
                                },
                            );
                            store.register_location(
                                written,
                                DataLocation::Private {
                                    host: master,
                                    path: path.clone(),
                                },
                            );
                        }
                        let _ = reply.send(result);
                    }),
                );
            }
        }
    }

    fn on_barrier(&mut self, r: BarrierRequest) {
        let aref = self.app(r.app);
        let push = {
            let a = aref.get();
            match a.state {
                crate::graph::AppState::Cancelled => Some(Err(ErrorKind::AppCancelled(r.app))),
                _ if a.failure.is_some() => {
                    Some(Err(ErrorKind::Msg(a.failure.clone().unwrap())))
                }
                _ if a.outstanding == 0 => Some(Ok(())),
                _ if a.only_blocked_remain() => Some(Err(ErrorKind::Blocked)),
                _ => None,
            }
        };
        match push {
            Some(result) => {
                let _ = r.reply.send(result.map_err(|k| k.into()));
            }
            None => aref.get_mut().barriers.push(r.reply),
        }
    }

    fn on_barrier_group(&mut self, r: BarrierGroupRequest) {
        let aref = self.app(r.app);
        let outstanding = aref.get().groups.get(&r.group).cloned().unwrap_or(0);
        if aref.get().state == crate::graph::AppState::Cancelled {
            let _ = r.reply.send(Err(ErrorKind::AppCancelled(r.app).into()));
        } else if outstanding == 0 {
            let _ = r.reply.send(Ok(()));
        } else {
            aref.get_mut()
                .group_barriers
                .entry(r.group)
                .or_insert_with(Vec::new)
                .push(r.reply);
        }
    }

    fn on_end_of_app(&mut self, r: EndOfAppRequest) {
        let aref = self.app(r.app);
        info!("no more tasks for application {}", r.app);
        aref.get_mut().no_more_tasks = true;
        let (state, outstanding, only_blocked) = {
            let a = aref.get();
            (a.state, a.outstanding, a.only_blocked_remain())
        };
        if state == crate::graph::AppState::Cancelled {
            let _ = r.reply.send(Err(ErrorKind::AppCancelled(r.app).into()));
            return;
        }
        if outstanding == 0 {
            self.terminate_app(&aref);
            let _ = r.reply.send(Ok(()));
            return;
        }
        if only_blocked {
            let _ = r.reply.send(Err(ErrorKind::Blocked.into()));
            return;
        }
        // tasks remain: stall the application and let the resources go
        info!("application {} becomes stalled", r.app);
        {
            let mut a = aref.get_mut();
            a.state = crate::graph::AppState::Stalled;
            a.was_stalled = true;
            a.end_of_app = Some(r.reply);
        }
        let released = self.pool.release_idle();
        debug!("{} resources released while {} stalls", released, r.app);
    }

    fn terminate_app(&mut self, aref: &AppRef) {
        let app_id = aref.get().id;
        aref.get_mut().state = crate::graph::AppState::Terminated;
        self.logger.lock().unwrap().add_event(Event::AppEnd {
            app: app_id,
            reason: AppEndReason::Completed,
        });
    }

    fn on_task_end(&mut self, r: TaskEndRequest) {
        let tref = match self.analyser.graph.task_by_id(r.task) {
            Some(tref) => tref,
            None => {
                debug!("task end for unknown task {}", r.task);
                return;
            }
        };
        match tref.get().state {
            TaskState::Staging(_) | TaskState::Running(_) => {}
            ref other => {
                debug!("stale task end for {} in state {:?}", r.task, other);
                return;
            }
        }
        let resource = r.resource.as_ref().map(|s| s.as_str());
        match r.status {
            TaskEndStatus::Completed => {
                let last = self.scheduler.instance_end(&tref, resource, true);
                if last {
                    self.finalize_task(&tref, TaskState::Finished);
                }
            }
            TaskEndStatus::Cancelled => {
                self.scheduler.instance_end(&tref, resource, false);
                self.finalize_task(&tref, TaskState::Cancelled);
            }
            TaskEndStatus::Failed { message } => self.handle_failure(&tref, message),
            TaskEndStatus::TimedOut => {
                let message = ErrorKind::TaskTimedOut(r.task).to_string();
                self.handle_failure(&tref, message);
            }
        }
    }

    /// Route an execution failure through the task's on-failure policy.
    fn handle_failure(&mut self, tref: &TaskRef, message: String) {
        warn!("task {} failed: {}", tref.task_id(), message);
        // kill and unbook every live instance of the task
        self.scheduler.cancel_task(tref);
        let policy = tref.get().spec.flags.on_failure;
        let retries_left = tref.get().retries_left;
        match policy {
            OnFailure::Retry if retries_left > 0 => {
                {
                    let mut t = tref.get_mut();
                    t.retries_left -= 1;
                    t.remaining_instances = 1;
                    t.state = TaskState::Ready;
                }
                info!(
                    "resubmitting task {} ({} retries left)",
                    tref.task_id(),
                    retries_left - 1
                );
                self.make_ready(tref);
            }
            OnFailure::Ignore => {
                self.log_task_failed(tref, &message);
                debug!("failure of task {} ignored", tref.task_id());
                self.finalize_task(tref, TaskState::Finished);
            }
            OnFailure::CancelSuccessors => {
                self.log_task_failed(tref, &message);
                let cone = self.analyser.transitive_successors(tref);
                self.cancel_tasks(&cone);
                self.finalize_task(tref, TaskState::Failed);
            }
            OnFailure::Fail | OnFailure::Retry => {
                self.log_task_failed(tref, &message);
                let aref = tref.get().app.clone();
                aref.get_mut().failure = Some(message);
                let others: Vec<TaskRef> = aref
                    .get()
                    .tasks
                    .iter()
                    .filter(|t| *t != tref && !t.get().state.is_terminal())
                    .cloned()
                    .collect();
                self.cancel_tasks(&others);
                self.finalize_task(tref, TaskState::Failed);
                self.logger.lock().unwrap().add_event(Event::AppEnd {
                    app: aref.get().id,
                    reason: AppEndReason::Error,
                });
            }
        }
    }

    fn log_task_failed(&mut self, tref: &TaskRef, message: &str) {
        self.logger.lock().unwrap().add_event(Event::TaskFailed {
            task: tref.task_id(),
            message: message.to_string(),
        });
    }

    /// Cancel a set of tasks at once. All are marked first so that the
    /// successor release of one cannot schedule another.
    fn cancel_tasks(&mut self, tasks: &[TaskRef]) {
        let mut marked = Vec::new();
        for tref in tasks {
            if tref.get().state.is_terminal() {
                continue;
            }
            let prior = tref.get().state.clone();
            tref.get_mut().state = TaskState::Cancelled;
            self.scheduler.cancel_task(tref);
            marked.push((tref.clone(), prior));
        }
        for (tref, prior) in marked {
            self.finalize_marked(&tref, prior);
        }
    }

    fn finalize_task(&mut self, tref: &TaskRef, state: TaskState) {
        let prior = tref.get().state.clone();
        tref.get_mut().state = state;
        self.finalize_marked(tref, prior);
    }

    /// Common tail of every terminal transition: release read instances,
    /// wake successors, update application accounting and waiters.
    fn finalize_marked(&mut self, tref: &TaskRef, prior: TaskState) {
        let task_id = tref.task_id();
        match tref.get().state {
            TaskState::Finished => {
                self.logger
                    .lock()
                    .unwrap()
                    .add_event(Event::TaskFinished { task: task_id });
            }
            TaskState::Failed | TaskState::Cancelled => {}
            ref other => panic!("finalizing task {} in state {:?}", task_id, other),
        }

        let accesses = tref.get().accesses.clone();
        for access in accesses.iter() {
            self.provider.complete_access(access);
        }

        let newly_ready = self.analyser.release_successors(tref);

        let aref = tref.get().app.clone();
        let group = tref.get().spec.flags.group.clone();
        let group_done = {
            let mut a = aref.get_mut();
            debug_assert!(a.outstanding > 0);
            a.outstanding -= 1;
            if prior == TaskState::Blocked {
                a.blocked -= 1;
            }
            match group {
                Some(ref g) => {
                    let count = a.groups.get_mut(g).expect("unknown task group");
                    *count -= 1;
                    *count == 0
                }
                None => false,
            }
        };
        if group_done {
            let group = group.unwrap();
            let waiters = aref.get_mut().group_barriers.remove(&group);
            if let Some(waiters) = waiters {
                for waiter in waiters {
                    let _ = waiter.send(Ok(()));
                }
            }
        }

        self.analyser.cleanup_task(tref);

        for t in newly_ready {
            self.make_ready(&t);
        }
        self.check_app_waiters(&aref);
        self.scheduler.try_schedule();
    }

    /// Release whatever the application's waiters are entitled to.
    fn check_app_waiters(&mut self, aref: &AppRef) {
        enum Verdict {
            Cancelled(AppId),
            Failed(String),
            Done,
            Blocked,
            Wait,
        }
        let verdict = {
            let a = aref.get();
            if a.state == crate::graph::AppState::Cancelled {
                Verdict::Cancelled(a.id)
            } else if let Some(ref failure) = a.failure {
                Verdict::Failed(failure.clone())
            } else if a.outstanding == 0 {
                Verdict::Done
            } else if a.only_blocked_remain() {
                Verdict::Blocked
            } else {
                Verdict::Wait
            }
        };
        let make_err: Option<Box<dyn Fn() -> monsoon_core::errors::Error>> = match verdict {
            Verdict::Wait => return,
            Verdict::Done => None,
            Verdict::Cancelled(id) => Some(Box::new(move || ErrorKind::AppCancelled(id).into())),
            Verdict::Failed(message) => {
                Some(Box::new(move || ErrorKind::Msg(message.clone()).into()))
            }
            Verdict::Blocked => Some(Box::new(|| ErrorKind::Blocked.into())),
        };

        let barriers: Vec<Replier<()>> = aref.get_mut().barriers.drain(..).collect();
        for barrier in barriers {
            let _ = barrier.send(match make_err {
                Some(ref make) => Err(make()),
                None => Ok(()),
            });
        }

        // end-of-app completes only when the counter reaches zero or the
        // wait can never succeed
        let end_of_app = aref.get_mut().end_of_app.take();
        if let Some(reply) = end_of_app {
            match make_err {
                Some(ref make) => {
                    let _ = reply.send(Err(make()));
                }
                None => {
                    let no_more = aref.get().no_more_tasks;
                    if no_more {
                        if aref.get().was_stalled {
                            // phase two: the caller resumes with resources
                            let reacquired = self.pool.reacquire_minimum();
                            debug!(
                                "application {} ready to continue on {:?}",
                                aref.get().id,
                                reacquired
                            );
                        }
                        self.terminate_app(aref);
                        let _ = reply.send(Ok(()));
                    } else {
                        aref.get_mut().end_of_app = Some(reply);
                    }
                }
            }
        }
    }

    fn on_cancel_app(&mut self, r: CancelAppRequest) {
        let aref = self.app(r.app);
        if !aref.get().is_live() {
            let _ = r.reply.send(Ok(()));
            return;
        }
        info!("cancelling application {}", r.app);
        aref.get_mut().state = crate::graph::AppState::Cancelled;
        let live: Vec<TaskRef> = aref
            .get()
            .tasks
            .iter()
            .filter(|t| !t.get().state.is_terminal())
            .cloned()
            .collect();
        self.cancel_tasks(&live);
        // barriers parked before the cancel fail now
        self.check_app_waiters(&aref);
        self.logger.lock().unwrap().add_event(Event::AppEnd {
            app: r.app,
            reason: AppEndReason::Cancelled,
        });
        let _ = r.reply.send(Ok(()));
    }

    fn on_inputs_ready(&mut self, r: InputsReadyRequest) {
        let tref = match self.analyser.graph.task_by_id(r.task) {
            Some(tref) => tref,
            None => return,
        };
        // per-instance staleness is resolved against the scheduler's
        // dispatch bookkeeping; replicated tasks stage once per resource
        match tref.get().state {
            TaskState::Staging(_) | TaskState::Running(_) => {}
            ref other => {
                debug!("stale staging completion for {} in state {:?}", r.task, other);
                return;
            }
        }
        self.scheduler.inputs_ready(&tref, &r.resource, r.staged);
    }

    fn on_inputs_failed(&mut self, r: InputsFailedRequest) {
        let tref = match self.analyser.graph.task_by_id(r.task) {
            Some(tref) => tref,
            None => return,
        };
        if tref.get().state.is_terminal() {
            return;
        }
        self.scheduler.inputs_failed(&tref, &r.resource);
        let message = format!(
            "{}: {}",
            ErrorKind::InputUnavailable(r.task),
            r.message
        );
        self.handle_failure(&tref, message);
    }

    fn on_add_resource(&mut self, r: AddResourceRequest) {
        let name = r.spec.name.clone();
        let result = self.pool.add(r.spec).map(|_| ());
        if result.is_ok() {
            self.logger
                .lock()
                .unwrap()
                .add_event(Event::ResourceNew { resource: name });
            self.pool.reacquire_all();
            let unblocked = self.scheduler.resource_added();
            for tref in unblocked {
                let aref = tref.get().app.clone();
                aref.get_mut().blocked -= 1;
                tref.get_mut().state = TaskState::Ready;
                self.make_ready(&tref);
            }
        }
        let _ = r.reply.send(result);
    }

    fn on_remove_resource(&mut self, r: RemoveResourceRequest) {
        let removed = self.pool.remove(&r.name);
        if removed.is_some() {
            self.logger.lock().unwrap().add_event(Event::ResourceRemoved {
                resource: r.name.clone(),
                reason: "lifecycle request".to_string(),
            });
        }
        let affected = self.scheduler.resource_removed(&r.name);
        for tref in affected {
            if tref.get().state.is_terminal() {
                continue;
            }
            let message = format!("resource {} left while hosting the task", r.name);
            self.handle_failure(&tref, message);
        }
        let _ = r.reply.send(Ok(()));
    }
}
