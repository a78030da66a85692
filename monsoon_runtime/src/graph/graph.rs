use std::collections::HashMap;

use monsoon_core::types::{AppId, TaskId};

use super::{AppRef, AppRefMethods, TaskRef};

/// Id-keyed view of all live applications and tasks. Owned by the
/// serializer thread; no locking.
#[derive(Default)]
pub struct Graph {
    pub apps: HashMap<AppId, AppRef>,
    pub tasks: HashMap<TaskId, TaskRef>,

    /// Global submission counter feeding the ordering policies.
    submission_counter: u64,
}

impl Graph {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn app(&mut self, id: AppId) -> AppRef {
        self.apps
            .entry(id)
            .or_insert_with(|| AppRef::new(id))
            .clone()
    }

    pub fn app_by_id(&self, id: AppId) -> Option<AppRef> {
        self.apps.get(&id).cloned()
    }

    pub fn task_by_id(&self, id: TaskId) -> Option<TaskRef> {
        self.tasks.get(&id).cloned()
    }

    pub fn next_submission_index(&mut self) -> u64 {
        self.submission_counter += 1;
        self.submission_counter
    }

    /// Drop a terminal task from the graph, unlinking it from its app.
    pub fn remove_task(&mut self, tref: &TaskRef) {
        debug_assert!(tref.get().state.is_terminal());
        let id = tref.get().spec.id;
        tref.get().app.get_mut().tasks.remove(tref);
        self.tasks.remove(&id);
    }
}
