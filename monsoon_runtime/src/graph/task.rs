use std::fmt;

use error_chain::bail;
use monsoon_core::errors::Result;
use monsoon_core::types::{DataAccessId, TaskId, TaskSpec};
use monsoon_core::utils::{RcSet, WrappedRcRefCell};

use super::AppRef;

/// Maximum automatic resubmissions of a task whose failure policy is
/// `Retry`.
pub const MAX_TASK_RETRIES: u32 = 3;

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum TaskState {
    /// Waiting for predecessors to finish.
    NotReady,
    /// All predecessors finished, waiting for a resource.
    Ready,
    /// Resource reserved, inputs are being staged.
    Staging(String),
    Running(String),
    Finished,
    Failed,
    Cancelled,
    /// No resource can ever satisfy the constraints.
    Blocked,
}

impl TaskState {
    #[inline]
    pub fn is_terminal(&self) -> bool {
        match *self {
            TaskState::Finished | TaskState::Failed | TaskState::Cancelled => true,
            _ => false,
        }
    }
}

pub struct Task {
    pub spec: TaskSpec,

    /// Current state. The analyser and the scheduler are the only writers.
    pub state: TaskState,

    /// Versioned accesses, aligned with `spec.params`.
    pub accesses: Vec<DataAccessId>,

    /// Predecessors that have not finished yet.
    pub pending_preds: u32,

    /// Tasks depending on an instance this task writes.
    pub successors: RcSet<TaskRef>,

    /// Owning application. Must match the task id.
    pub app: AppRef,

    /// Global submission order, used by ordering policies.
    pub submission_index: u64,

    pub retries_left: u32,

    /// Implementation chosen by the scheduler for the current dispatch.
    pub chosen_impl: usize,

    /// Outstanding instances. 1 for plain tasks, the number of matching
    /// resources for replicated tasks.
    pub remaining_instances: u32,
}

pub type TaskRef = WrappedRcRefCell<Task>;

impl Task {
    #[inline]
    pub fn id(&self) -> TaskId {
        self.spec.id
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Task {}", self.spec.id)
    }
}

/// Inherent-style methods for `TaskRef`, defined as a trait because
/// `TaskRef` is a type alias of a foreign generic type (`WrappedRcRefCell`),
/// and orphan rules forbid inherent `impl` blocks (or an impl of the
/// foreign `ConsistencyCheck` trait) on it from this crate.
pub trait TaskRefMethods {
    fn new(
        app: &AppRef,
        spec: TaskSpec,
        accesses: Vec<DataAccessId>,
        submission_index: u64,
    ) -> Self;
    fn task_id(&self) -> TaskId;
    fn check_consistency(&self) -> Result<()>;
}

impl TaskRefMethods for TaskRef {
    fn new(
        app: &AppRef,
        spec: TaskSpec,
        accesses: Vec<DataAccessId>,
        submission_index: u64,
    ) -> Self {
        assert_eq!(spec.id.app_id(), app.get().id);
        assert_eq!(spec.params.len(), accesses.len());
        let tref = TaskRef::wrap(Task {
            spec,
            state: TaskState::NotReady,
            accesses,
            pending_preds: 0,
            successors: Default::default(),
            app: app.clone(),
            submission_index,
            retries_left: MAX_TASK_RETRIES,
            chosen_impl: 0,
            remaining_instances: 1,
        });
        {
            let mut a = app.get_mut();
            a.tasks.insert(tref.clone());
            a.outstanding += 1;
            if let Some(ref group) = tref.get().spec.flags.group {
                *a.groups.entry(group.clone()).or_insert(0) += 1;
            }
        }
        tref
    }

    fn task_id(&self) -> TaskId {
        self.get().spec.id
    }

    /// Check state and relationship consistency. Only explores adjacent
    /// objects but still may be slow.
    fn check_consistency(&self) -> Result<()> {
        let t = self.get();
        if t.spec.id.app_id() != t.app.get().id {
            bail!("task/app id mismatch in {:?}", t.spec.id);
        }
        if !t.app.get().tasks.contains(self) {
            bail!("app does not own task {:?}", t.spec.id);
        }
        match t.state {
            TaskState::NotReady => {
                if t.pending_preds == 0 {
                    bail!("not-ready task {} without pending predecessors", t.spec.id);
                }
            }
            TaskState::Ready | TaskState::Blocked => {
                if t.pending_preds != 0 {
                    bail!("{:?} task {} with pending predecessors", t.state, t.spec.id);
                }
            }
            TaskState::Staging(_) | TaskState::Running(_) => {
                if t.pending_preds != 0 {
                    bail!("dispatched task {} with pending predecessors", t.spec.id);
                }
                if t.remaining_instances == 0 {
                    bail!("dispatched task {} without live instances", t.spec.id);
                }
            }
            TaskState::Finished | TaskState::Failed | TaskState::Cancelled => {}
        }
        Ok(())
    }

    fn debug_fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "TaskRef {}", self.get().spec.id)
    }
}
