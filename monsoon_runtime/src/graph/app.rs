use std::collections::HashMap;
use std::fmt;

use error_chain::bail;
use monsoon_core::errors::Result;
use monsoon_core::types::{AppId, Id};
use monsoon_core::utils::{RcSet, WrappedRcRefCell};

use super::TaskRef;
use crate::ap::request::Replier;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum AppState {
    Registered,
    Running,
    /// Termination was requested while tasks remain; resources held for the
    /// application are eligible for reclamation.
    Stalled,
    Terminated,
    Cancelled,
}

pub struct App {
    pub id: AppId,

    pub state: AppState,

    /// Submitted tasks that have not reached a terminal state.
    pub outstanding: u32,

    /// Tasks parked because no resource can ever satisfy them.
    pub blocked: u32,

    /// Set once termination has been requested; later submissions fail.
    pub no_more_tasks: bool,

    /// Whether resources were released while this app waited to terminate.
    pub was_stalled: bool,

    /// Message of the failure that was escalated to the application level.
    pub failure: Option<String>,

    pub tasks: RcSet<TaskRef>,

    /// Callers blocked on a plain barrier.
    pub barriers: Vec<Replier<()>>,

    /// Callers blocked on a task-group barrier, keyed by group name.
    pub group_barriers: HashMap<String, Vec<Replier<()>>>,

    /// Outstanding task count per task group.
    pub groups: HashMap<String, u32>,

    /// Caller blocked in end-of-app, released when the last task ends.
    pub end_of_app: Option<Replier<()>>,

    /// Task id counter of this application.
    pub next_task_id: Id,
}

pub type AppRef = WrappedRcRefCell<App>;

impl App {
    pub fn is_live(&self) -> bool {
        match self.state {
            AppState::Registered | AppState::Running | AppState::Stalled => true,
            AppState::Terminated | AppState::Cancelled => false,
        }
    }

    /// Whether the only outstanding work consists of blocked tasks, which
    /// no wait can ever outlive.
    pub fn only_blocked_remain(&self) -> bool {
        self.outstanding > 0 && self.outstanding == self.blocked
    }

    pub fn new_task_id(&mut self) -> Id {
        self.next_task_id += 1;
        self.next_task_id
    }
}

impl fmt::Debug for App {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "App {}", self.id)
    }
}

/// Inherent-style methods for `AppRef`, defined as a trait because
/// `AppRef` is a type alias of a foreign generic type (`WrappedRcRefCell`),
/// and orphan rules forbid inherent `impl` blocks (or an impl of the
/// foreign `ConsistencyCheck` trait) on it from this crate.
pub trait AppRefMethods {
    fn new(id: AppId) -> Self;
    fn app_id(&self) -> AppId;
    fn check_consistency(&self) -> Result<()>;
}

impl AppRefMethods for AppRef {
    fn new(id: AppId) -> Self {
        AppRef::wrap(App {
            id,
            state: AppState::Registered,
            outstanding: 0,
            blocked: 0,
            no_more_tasks: false,
            was_stalled: false,
            failure: None,
            tasks: Default::default(),
            barriers: Vec::new(),
            group_barriers: Default::default(),
            groups: Default::default(),
            end_of_app: None,
            next_task_id: 0,
        })
    }

    fn app_id(&self) -> AppId {
        self.get().id
    }

    fn check_consistency(&self) -> Result<()> {
        let a = self.get();
        let live = a
            .tasks
            .iter()
            .filter(|t| !t.get().state.is_terminal())
            .count() as u32;
        if live != a.outstanding {
            bail!(
                "outstanding counter of app {} is {}, graph says {}",
                a.id,
                a.outstanding,
                live
            );
        }
        if a.blocked > a.outstanding {
            bail!("app {} has more blocked than outstanding tasks", a.id);
        }
        if a.state == AppState::Terminated && a.outstanding != 0 {
            bail!("terminated app {} still has outstanding tasks", a.id);
        }
        Ok(())
    }
}
