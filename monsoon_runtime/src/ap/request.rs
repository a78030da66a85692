//! Typed requests of the access-processor queue. Every user-facing call
//! becomes one of these variants; requests that carry a result hold the
//! caller's reply channel.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::SyncSender;
use std::sync::Arc;

use futures::sync::oneshot;

use monsoon_core::errors::{ErrorKind, Result};
use monsoon_core::types::{
    AppId, DataAccessId, DataId, DataLocation, Direction, ResourceSpec, TaskId, TaskSpec,
};

use crate::data::transfer::StagedInput;

/// Reply channel of one outstanding request: a single `Ok` or `Err` value.
pub type Replier<T> = oneshot::Sender<Result<T>>;

/// Terminal status of one task instance as reported to the serializer.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum TaskEndStatus {
    Completed,
    Failed { message: String },
    Cancelled,
    TimedOut,
}

pub struct RegisterDataRequest {
    pub app: AppId,
    pub logical: String,
    pub initial: Option<DataLocation>,
    pub reply: Replier<DataId>,
}

pub struct AnalyseAccessRequest {
    pub app: AppId,
    pub logical: String,
    pub direction: Direction,
    pub reply: Replier<DataAccessId>,
}

pub struct SubmitTaskRequest {
    pub app: AppId,
    /// Task descriptor; the id field is assigned by the serializer.
    pub spec: TaskSpec,
    pub reply: Replier<TaskId>,
}

pub struct TransferOpenFileRequest {
    pub access: DataAccessId,
    pub reply: Replier<PathBuf>,
}

pub struct CloseFileRequest {
    pub app: AppId,
    pub logical: String,
}

pub struct DeleteFileRequest {
    pub app: AppId,
    pub logical: String,
    /// Replies `true` when the datum was dropped immediately, `false` when
    /// the deletion was deferred behind live readers.
    pub reply: Replier<bool>,
}

pub struct BarrierRequest {
    pub app: AppId,
    pub reply: Replier<()>,
}

pub struct BarrierGroupRequest {
    pub app: AppId,
    pub group: String,
    pub reply: Replier<()>,
}

pub struct EndOfAppRequest {
    pub app: AppId,
    pub reply: Replier<()>,
}

pub struct TaskEndRequest {
    pub task: TaskId,
    /// Resource of the reporting instance; `None` for synthetic ends such
    /// as timeouts.
    pub resource: Option<String>,
    pub status: TaskEndStatus,
}

pub struct CancelAppRequest {
    pub app: AppId,
    pub reply: Replier<()>,
}

pub struct InputsReadyRequest {
    pub task: TaskId,
    pub resource: String,
    pub staged: Vec<StagedInput>,
}

pub struct InputsFailedRequest {
    pub task: TaskId,
    pub resource: String,
    pub message: String,
}

pub struct AddResourceRequest {
    pub spec: ResourceSpec,
    pub reply: Replier<()>,
}

pub struct RemoveResourceRequest {
    pub name: String,
    pub reply: Replier<()>,
}

pub enum APRequest {
    RegisterData(RegisterDataRequest),
    AnalyseAccess(AnalyseAccessRequest),
    SubmitTask(SubmitTaskRequest),
    TransferOpenFile(TransferOpenFileRequest),
    CloseFile(CloseFileRequest),
    DeleteFile(DeleteFileRequest),
    Barrier(BarrierRequest),
    BarrierGroup(BarrierGroupRequest),
    EndOfApp(EndOfAppRequest),
    TaskEnd(TaskEndRequest),
    CancelApp(CancelAppRequest),
    InputsReady(InputsReadyRequest),
    InputsFailed(InputsFailedRequest),
    AddResource(AddResourceRequest),
    RemoveResource(RemoveResourceRequest),
    Shutdown(Replier<()>),
}

impl APRequest {
    pub fn kind(&self) -> &'static str {
        match *self {
            APRequest::RegisterData(_) => "register_data",
            APRequest::AnalyseAccess(_) => "analyse_access",
            APRequest::SubmitTask(_) => "submit_task",
            APRequest::TransferOpenFile(_) => "transfer_open_file",
            APRequest::CloseFile(_) => "close_file",
            APRequest::DeleteFile(_) => "delete_file",
            APRequest::Barrier(_) => "barrier",
            APRequest::BarrierGroup(_) => "barrier_group",
            APRequest::EndOfApp(_) => "end_of_app",
            APRequest::TaskEnd(_) => "task_end",
            APRequest::CancelApp(_) => "cancel_app",
            APRequest::InputsReady(_) => "inputs_ready",
            APRequest::InputsFailed(_) => "inputs_failed",
            APRequest::AddResource(_) => "add_resource",
            APRequest::RemoveResource(_) => "remove_resource",
            APRequest::Shutdown(_) => "shutdown",
        }
    }
}

/// Cloneable enqueue handle used by worker callbacks, transfer groups and
/// the timeout monitor. Enqueueing blocks when the bounded queue is full.
#[derive(Clone)]
pub struct ApHandle {
    sender: SyncSender<APRequest>,
    accepting: Arc<AtomicBool>,
}

impl ApHandle {
    pub(crate) fn new(sender: SyncSender<APRequest>, accepting: Arc<AtomicBool>) -> Self {
        ApHandle { sender, accepting }
    }

    pub fn enqueue(&self, request: APRequest) -> Result<()> {
        if !self.accepting.load(Ordering::SeqCst) {
            return Err(ErrorKind::ShutdownInProgress.into());
        }
        self.sender
            .send(request)
            .map_err(|_| ErrorKind::ShutdownInProgress)?;
        Ok(())
    }
}
