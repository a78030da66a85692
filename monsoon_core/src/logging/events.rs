use chrono::{DateTime, Utc};
use serde_derive::{Deserialize, Serialize};

use crate::types::{AppId, DataInstanceId, TaskId};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum AppEndReason {
    /// All tasks completed and the application requested termination.
    Completed,
    /// The application was cancelled by the user.
    Cancelled,
    /// A task failure propagated to the application level.
    Error,
}

/// Runtime events kept in the persistent event log.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Event {
    ResourceNew { resource: String },
    ResourceRemoved { resource: String, reason: String },
    AppNew { app: AppId },
    AppEnd { app: AppId, reason: AppEndReason },
    TaskSubmitted { task: TaskId, signature: String },
    TaskReady { task: TaskId },
    TaskStarted { task: TaskId, resource: String },
    TaskFinished { task: TaskId },
    TaskFailed { task: TaskId, message: String },
    TransferStarted { instance: DataInstanceId, target_host: String },
    TransferCompleted { instance: DataInstanceId, target_host: String },
    InstanceEvicted { instance: DataInstanceId },
}

impl Event {
    pub fn event_type(&self) -> &'static str {
        match *self {
            Event::ResourceNew { .. } => "resource_new",
            Event::ResourceRemoved { .. } => "resource_removed",
            Event::AppNew { .. } => "app_new",
            Event::AppEnd { .. } => "app_end",
            Event::TaskSubmitted { .. } => "task_submitted",
            Event::TaskReady { .. } => "task_ready",
            Event::TaskStarted { .. } => "task_started",
            Event::TaskFinished { .. } => "task_finished",
            Event::TaskFailed { .. } => "task_failed",
            Event::TransferStarted { .. } => "transfer_started",
            Event::TransferCompleted { .. } => "transfer_completed",
            Event::InstanceEvicted { .. } => "instance_evicted",
        }
    }

    /// Application the event belongs to, when there is one.
    pub fn app_id(&self) -> Option<AppId> {
        match *self {
            Event::AppNew { app } | Event::AppEnd { app, .. } => Some(app),
            Event::TaskSubmitted { task, .. }
            | Event::TaskReady { task }
            | Event::TaskStarted { task, .. }
            | Event::TaskFinished { task }
            | Event::TaskFailed { task, .. } => Some(task.app_id()),
            _ => None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct EventWrapper {
    pub event: Event,
    pub timestamp: DateTime<Utc>,
}
