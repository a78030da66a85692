//! Dependency analysis: consumes versioned accesses, builds the implicit
//! task graph and releases successors as tasks reach terminal states.

use std::collections::HashMap;

use log::debug;

use monsoon_core::types::DataInstanceId;

use crate::graph::{Graph, TaskRef, TaskRefMethods, TaskState};

pub struct TaskAnalyser {
    pub graph: Graph,
    /// Producer of each written instance. An edge is drawn from the
    /// producer of every read instance to the reading task.
    last_writer: HashMap<DataInstanceId, TaskRef>,
}

impl TaskAnalyser {
    pub fn new() -> Self {
        TaskAnalyser {
            graph: Graph::new(),
            last_writer: HashMap::new(),
        }
    }

    /// Wire a submitted task into the graph. Returns `true` when the task
    /// has no pending predecessors and is ready to schedule.
    pub fn process_task(&mut self, tref: &TaskRef) -> bool {
        {
            let accesses = tref.get().accesses.clone();
            for access in accesses.iter() {
                if let Some(read) = access.read_instance() {
                    if let Some(writer) = self.last_writer.get(&read) {
                        if writer != tref && !writer.get().state.is_terminal() {
                            let new_edge = writer.get_mut().successors.insert(tref.clone());
                            if new_edge {
                                tref.get_mut().pending_preds += 1;
                            }
                        }
                    }
                }
                if let Some(written) = access.written_instance() {
                    self.last_writer.insert(written, tref.clone());
                }
            }
        }
        let ready = tref.get().pending_preds == 0;
        if ready {
            tref.get_mut().state = TaskState::Ready;
        }
        debug!(
            "task {} analysed, {} predecessors",
            tref.task_id(),
            tref.get().pending_preds
        );
        ready
    }

    /// Mark a task terminal and release its successors. When
    /// `counts_as_written` (success, or failure under the Ignore policy)
    /// dependents may run; otherwise they are only unblocked.
    pub fn release_successors(&mut self, tref: &TaskRef) -> Vec<TaskRef> {
        let successors: Vec<TaskRef> = tref.get_mut().successors.drain().collect();
        let mut ready = Vec::new();
        for succ in successors {
            let became_ready = {
                let mut s = succ.get_mut();
                debug_assert!(s.pending_preds > 0);
                s.pending_preds -= 1;
                s.pending_preds == 0 && s.state == TaskState::NotReady
            };
            if became_ready {
                succ.get_mut().state = TaskState::Ready;
                ready.push(succ);
            }
        }
        ready
    }

    /// Transitive successors that have not reached a terminal state,
    /// farthest first so cancellation can proceed leaf-to-root.
    pub fn transitive_successors(&self, tref: &TaskRef) -> Vec<TaskRef> {
        let mut seen = vec![tref.clone()];
        let mut queue = vec![tref.clone()];
        let mut collected = Vec::new();
        while let Some(current) = queue.pop() {
            for succ in current.get().successors.iter() {
                if !seen.contains(succ) {
                    seen.push(succ.clone());
                    if !succ.get().state.is_terminal() {
                        collected.push(succ.clone());
                    }
                    queue.push(succ.clone());
                }
            }
        }
        collected
    }

    /// Forget a terminal task: writer entries and the graph node.
    pub fn cleanup_task(&mut self, tref: &TaskRef) {
        {
            let t = tref.get();
            for access in t.accesses.iter() {
                if let Some(written) = access.written_instance() {
                    let stale = self
                        .last_writer
                        .get(&written)
                        .map(|w| w == tref)
                        .unwrap_or(false);
                    if stale {
                        self.last_writer.remove(&written);
                    }
                }
            }
        }
        self.graph.remove_task(tref);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use monsoon_core::types::{
        DataAccessId, DataInstanceId, EngineKind, ImplementationSpec, TaskId, TaskSpec,
    };

    fn spec(app: i32, id: i32, params: usize) -> TaskSpec {
        TaskSpec {
            id: TaskId::new(app, id),
            signature: "op()".into(),
            implementations: vec![ImplementationSpec {
                engine: EngineKind::Binary {
                    binary: "/bin/true".into(),
                },
                constraints: Default::default(),
            }],
            params: (0..params)
                .map(|i| monsoon_core::types::ParamSpec {
                    data: format!("p{}", i),
                    direction: monsoon_core::types::Direction::In,
                    stream: Default::default(),
                    prefix: String::new(),
                    name: String::new(),
                })
                .collect(),
            num_returns: 0,
            flags: Default::default(),
            user: Default::default(),
        }
    }

    fn inst(d: i32, v: u32) -> DataInstanceId {
        DataInstanceId::new(d, v)
    }

    fn submit(
        analyser: &mut TaskAnalyser,
        app: i32,
        id: i32,
        accesses: Vec<DataAccessId>,
    ) -> (TaskRef, bool) {
        let aref = analyser.graph.app(app);
        let index = analyser.graph.next_submission_index();
        let tref = TaskRef::new(&aref, spec(app, id, accesses.len()), accesses, index);
        analyser.graph.tasks.insert(tref.task_id(), tref.clone());
        let ready = analyser.process_task(&tref);
        (tref, ready)
    }

    #[test]
    fn writer_before_reader_forms_a_chain() {
        let mut analyser = TaskAnalyser::new();
        let (t1, r1) = submit(
            &mut analyser,
            1,
            1,
            vec![DataAccessId::Write {
                written: inst(1, 1),
            }],
        );
        assert!(r1);
        let (t2, r2) = submit(
            &mut analyser,
            1,
            2,
            vec![DataAccessId::Read { read: inst(1, 1) }],
        );
        assert!(!r2);
        assert_eq!(t2.get().pending_preds, 1);
        t1.get_mut().state = TaskState::Finished;
        let ready = analyser.release_successors(&t1);
        assert_eq!(ready, vec![t2.clone()]);
        assert_eq!(t2.get().state, TaskState::Ready);
    }

    #[test]
    fn predecessors_are_exactly_the_writers_of_read_instances() {
        let mut analyser = TaskAnalyser::new();
        let (t1, _) = submit(
            &mut analyser,
            1,
            1,
            vec![DataAccessId::Write {
                written: inst(1, 1),
            }],
        );
        let (t2, _) = submit(
            &mut analyser,
            1,
            2,
            vec![DataAccessId::Write {
                written: inst(2, 1),
            }],
        );
        // reads both instances plus one nobody wrote
        let (t3, ready) = submit(
            &mut analyser,
            1,
            3,
            vec![
                DataAccessId::Read { read: inst(1, 1) },
                DataAccessId::Read { read: inst(2, 1) },
                DataAccessId::Read { read: inst(9, 1) },
            ],
        );
        assert!(!ready);
        assert_eq!(t3.get().pending_preds, 2);
        assert!(t1.get().successors.contains(&t3));
        assert!(t2.get().successors.contains(&t3));
    }

    #[test]
    fn rw_chain_depends_on_previous_writer() {
        let mut analyser = TaskAnalyser::new();
        let (t1, _) = submit(
            &mut analyser,
            1,
            1,
            vec![DataAccessId::Write {
                written: inst(1, 1),
            }],
        );
        let (t2, ready) = submit(
            &mut analyser,
            1,
            2,
            vec![DataAccessId::ReadWrite {
                read: inst(1, 1),
                written: inst(1, 2),
                preserve_source: false,
            }],
        );
        assert!(!ready);
        let (t3, ready3) = submit(
            &mut analyser,
            1,
            3,
            vec![DataAccessId::Read { read: inst(1, 2) }],
        );
        assert!(!ready3);
        assert!(t2.get().successors.contains(&t3));
        assert!(!t1.get().successors.contains(&t3));
        t1.get_mut().state = TaskState::Finished;
        assert_eq!(analyser.release_successors(&t1), vec![t2]);
    }

    #[test]
    fn duplicate_reads_make_one_edge() {
        let mut analyser = TaskAnalyser::new();
        let (t1, _) = submit(
            &mut analyser,
            1,
            1,
            vec![DataAccessId::Write {
                written: inst(1, 1),
            }],
        );
        let (t2, _) = submit(
            &mut analyser,
            1,
            2,
            vec![
                DataAccessId::Read { read: inst(1, 1) },
                DataAccessId::Read { read: inst(1, 1) },
            ],
        );
        assert_eq!(t2.get().pending_preds, 1);
        assert_eq!(t1.get().successors.len(), 1);
    }

    #[test]
    fn transitive_successors_cover_the_whole_cone() {
        let mut analyser = TaskAnalyser::new();
        let (t1, _) = submit(
            &mut analyser,
            1,
            1,
            vec![DataAccessId::Write {
                written: inst(1, 1),
            }],
        );
        let (t2, _) = submit(
            &mut analyser,
            1,
            2,
            vec![
                DataAccessId::Read { read: inst(1, 1) },
                DataAccessId::Write {
                    written: inst(2, 1),
                },
            ],
        );
        let (t3, _) = submit(
            &mut analyser,
            1,
            3,
            vec![DataAccessId::Read { read: inst(2, 1) }],
        );
        let cone = analyser.transitive_successors(&t1);
        assert_eq!(cone.len(), 2);
        assert!(cone.contains(&t2));
        assert!(cone.contains(&t3));
    }
}
