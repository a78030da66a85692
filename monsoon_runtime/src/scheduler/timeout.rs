//! Per-task timeout monitor. Deadlines are armed at dispatch; an expired
//! deadline is delivered back to the serializer as a synthetic task end.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::debug;

use monsoon_core::types::TaskId;

use crate::ap::request::{APRequest, ApHandle, TaskEndRequest, TaskEndStatus};

struct MonitorShared {
    deadlines: Mutex<HashMap<TaskId, Instant>>,
    wakeup: Condvar,
    stop: AtomicBool,
}

pub struct TimeoutMonitor {
    shared: Arc<MonitorShared>,
    handle: Option<JoinHandle<()>>,
}

impl TimeoutMonitor {
    pub fn start(ap: ApHandle) -> TimeoutMonitor {
        let shared = Arc::new(MonitorShared {
            deadlines: Mutex::new(HashMap::new()),
            wakeup: Condvar::new(),
            stop: AtomicBool::new(false),
        });
        let thread_shared = shared.clone();
        let handle = thread::Builder::new()
            .name("task-timeouts".into())
            .spawn(move || run(thread_shared, ap))
            .expect("cannot spawn the timeout monitor");
        TimeoutMonitor {
            shared,
            handle: Some(handle),
        }
    }

    pub fn arm(&self, task: TaskId, timeout: Duration) {
        let mut deadlines = self.shared.deadlines.lock().unwrap();
        deadlines.insert(task, Instant::now() + timeout);
        self.shared.wakeup.notify_one();
    }

    pub fn disarm(&self, task: TaskId) {
        let mut deadlines = self.shared.deadlines.lock().unwrap();
        deadlines.remove(&task);
    }

    pub fn shutdown(&mut self) {
        self.shared.stop.store(true, Ordering::SeqCst);
        self.shared.wakeup.notify_one();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for TimeoutMonitor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run(shared: Arc<MonitorShared>, ap: ApHandle) {
    let mut deadlines = shared.deadlines.lock().unwrap();
    loop {
        if shared.stop.load(Ordering::SeqCst) {
            return;
        }
        let now = Instant::now();
        let expired: Vec<TaskId> = deadlines
            .iter()
            .filter(|&(_, deadline)| *deadline <= now)
            .map(|(task, _)| *task)
            .collect();
        for task in expired {
            deadlines.remove(&task);
            debug!("task {} exceeded its timeout", task);
            let _ = ap.enqueue(APRequest::TaskEnd(TaskEndRequest {
                task,
                resource: None,
                status: TaskEndStatus::TimedOut,
            }));
        }
        let wait = deadlines
            .values()
            .min()
            .map(|earliest| earliest.saturating_duration_since(now))
            .unwrap_or_else(|| Duration::from_secs(1));
        let (guard, _) = shared
            .wakeup
            .wait_timeout(deadlines, wait.max(Duration::from_millis(1)))
            .unwrap();
        deadlines = guard;
    }
}
