//! Shared helpers for the runtime integration tests: scratch directories,
//! resource descriptions and stub invokers standing in for the external
//! execution adaptors.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use monsoon_core::comm::{
    CompletionSender, ExecutionStatus, Invoker, LocalBackend, TaskLaunch, TransferBackend,
};
use monsoon_core::errors::Result;
use monsoon_core::types::{
    Direction, EngineKind, ImplementationSpec, ParamSpec, ProcessorKind, ProcessorSpec,
    ResourceSpec, TaskId, TaskSpec,
};
use monsoon_runtime::config::RuntimeConfig;

/// Fresh scratch directory under the target temp dir.
pub fn scratch(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("monsoon_it").join(name);
    let _ = fs::remove_dir_all(&dir);
    fs::create_dir_all(&dir).unwrap();
    dir
}

pub fn test_config(home: &PathBuf) -> RuntimeConfig {
    let mut config = RuntimeConfig::new(home.clone());
    config.project.master_host = "localhost".to_string();
    config
}

pub fn resource(name: &str, cores: u32) -> ResourceSpec {
    resource_on(name, "localhost", cores)
}

pub fn resource_on(name: &str, host: &str, cores: u32) -> ResourceSpec {
    ResourceSpec {
        name: name.into(),
        host: host.into(),
        processors: vec![ProcessorSpec {
            name: "main".into(),
            architecture: "x86_64".into(),
            speed_ghz: 2.4,
            cores,
            kind: ProcessorKind::Cpu,
        }],
        memory_mb: 4_096,
        memory_virtual_mb: 8_192,
        storage_mb: 100_000,
        operating_system: "Linux".into(),
        software: Default::default(),
        queues: Default::default(),
        images: Default::default(),
    }
}

pub fn param(data: &str, direction: Direction) -> ParamSpec {
    ParamSpec {
        data: data.into(),
        direction,
        stream: Default::default(),
        prefix: String::new(),
        name: String::new(),
    }
}

pub fn task(signature: &str, params: Vec<ParamSpec>) -> TaskSpec {
    TaskSpec {
        id: TaskId::default(),
        signature: signature.into(),
        implementations: vec![ImplementationSpec {
            engine: EngineKind::Binary {
                binary: "/bin/true".into(),
            },
            constraints: Default::default(),
        }],
        params,
        num_returns: 0,
        flags: Default::default(),
        user: Default::default(),
    }
}

fn produce_outputs(launch: &TaskLaunch) {
    for output in launch.outputs.iter() {
        if let Some(parent) = output.path.parent() {
            let _ = fs::create_dir_all(parent);
        }
        fs::write(&output.path, format!("out:{}", launch.task)).unwrap();
    }
}

/// Invoker that runs every launch instantly and successfully.
#[derive(Clone, Default)]
pub struct AutoInvoker {
    pub launches: Arc<Mutex<Vec<TaskLaunch>>>,
}

impl Invoker for AutoInvoker {
    fn execute(&mut self, launch: TaskLaunch, done: CompletionSender) -> Result<()> {
        produce_outputs(&launch);
        self.launches.lock().unwrap().push(launch);
        done(ExecutionStatus::Completed { exit_code: 0 });
        Ok(())
    }

    fn cancel(&mut self, _task: TaskId) -> Result<()> {
        Ok(())
    }
}

type PendingLaunch = (TaskLaunch, CompletionSender);

/// Invoker that parks every launch until the test completes it.
#[derive(Clone, Default)]
pub struct ManualInvoker {
    pub pending: Arc<Mutex<VecDeque<PendingLaunch>>>,
    pub started: Arc<Mutex<Vec<TaskId>>>,
    pub cancelled: Arc<Mutex<Vec<TaskId>>>,
}

impl Invoker for ManualInvoker {
    fn execute(&mut self, launch: TaskLaunch, done: CompletionSender) -> Result<()> {
        self.started.lock().unwrap().push(launch.task);
        self.pending.lock().unwrap().push_back((launch, done));
        Ok(())
    }

    fn cancel(&mut self, task: TaskId) -> Result<()> {
        self.cancelled.lock().unwrap().push(task);
        Ok(())
    }
}

impl ManualInvoker {
    pub fn started_count(&self) -> usize {
        self.started.lock().unwrap().len()
    }

    /// Wait until at least `n` launches were started.
    pub fn wait_started(&self, n: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if self.started_count() >= n {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        false
    }

    /// Finish the oldest parked launch, writing its outputs first.
    pub fn complete_next(&self, status: ExecutionStatus) -> TaskId {
        let (launch, done) = loop {
            if let Some(entry) = self.pending.lock().unwrap().pop_front() {
                break entry;
            }
            std::thread::sleep(Duration::from_millis(5));
        };
        if let ExecutionStatus::Completed { .. } = status {
            produce_outputs(&launch);
        }
        let task = launch.task;
        done(status);
        task
    }

    /// Finish one specific parked launch.
    pub fn complete_task(&self, task: TaskId, status: ExecutionStatus) {
        let (launch, done) = loop {
            let mut pending = self.pending.lock().unwrap();
            if let Some(pos) = pending.iter().position(|(l, _)| l.task == task) {
                break pending.remove(pos).unwrap();
            }
            drop(pending);
            std::thread::sleep(Duration::from_millis(5));
        };
        if let ExecutionStatus::Completed { .. } = status {
            produce_outputs(&launch);
        }
        done(status);
    }

    /// Input paths of a parked launch.
    pub fn inputs_of(&self, task: TaskId) -> Vec<PathBuf> {
        loop {
            let pending = self.pending.lock().unwrap();
            if let Some((launch, _)) = pending.iter().find(|(l, _)| l.task == task) {
                return launch.inputs.iter().map(|i| i.path.clone()).collect();
            }
            drop(pending);
            std::thread::sleep(Duration::from_millis(5));
        }
    }
}

/// Transfer backend that counts remote copies; used to prove shared-disk
/// shortcuts move zero bytes. Holds a static counter so a capture-free
/// constructor can live in a connector registry.
pub struct CountingBackend {
    inner: LocalBackend,
    pub remote_copies: &'static AtomicUsize,
}

impl CountingBackend {
    pub fn new(counter: &'static AtomicUsize) -> Self {
        CountingBackend {
            inner: LocalBackend,
            remote_copies: counter,
        }
    }
}

impl TransferBackend for CountingBackend {
    fn copy_local(&self, src: &std::path::Path, tgt: &std::path::Path, overwrite: bool) -> Result<()> {
        self.inner.copy_local(src, tgt, overwrite)
    }

    fn copy_ssh(
        &self,
        src_host: &str,
        src: &std::path::Path,
        tgt_host: &str,
        tgt: &std::path::Path,
    ) -> Result<()> {
        self.remote_copies.fetch_add(1, Ordering::SeqCst);
        self.inner.copy_ssh(src_host, src, tgt_host, tgt)
    }

    fn serialize(&self, value: &serde_json::Value, tgt: &std::path::Path) -> Result<()> {
        self.inner.serialize(value, tgt)
    }
}
