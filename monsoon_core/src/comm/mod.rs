//! Interfaces towards the external collaborators: task invokers that run a
//! task on a worker, and transfer backends that move bytes between hosts.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use error_chain::bail;
use log::debug;

use crate::errors::Result;
use crate::types::{ImplementationSpec, StreamBinding, TaskId};

/// Version of the positional argument protocol spoken with external worker
/// scripts. The argument bases below are the canonical contract; changing
/// any of them requires bumping this version.
pub const INVOKER_WIRE_VERSION: u32 = 1;

pub const NUM_BASE_DOCKER_PYTHON_ARGS: usize = 25;
pub const NUM_BASE_DOCKER_BINARY_ARGS: usize = 10;
pub const NUM_BASE_SINGULARITY_PYTHON_ARGS: usize = 21;
pub const NUM_BASE_SINGULARITY_BINARY_ARGS: usize = 8;

/// A resolved input of a task: logical parameter name plus the physical
/// path it was staged to on the executing host.
#[derive(Clone, Debug, PartialEq)]
pub struct ResolvedInput {
    pub name: String,
    pub path: PathBuf,
}

/// Where an output of the task must be produced.
#[derive(Clone, Debug, PartialEq)]
pub struct OutputSink {
    pub name: String,
    pub path: PathBuf,
    pub stream: StreamBinding,
}

/// Everything an invoker needs to run one task instance.
#[derive(Clone, Debug)]
pub struct TaskLaunch {
    pub task: TaskId,
    pub implementation: ImplementationSpec,
    pub resource: String,
    pub inputs: Vec<ResolvedInput>,
    pub outputs: Vec<OutputSink>,
}

/// Terminal status reported by an invoker for one launch.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ExecutionStatus {
    Completed { exit_code: i32 },
    Failed { message: String },
    Cancelled,
}

/// Callback handed to the invoker with each launch; it must be called
/// exactly once, from any thread, when the task reaches a terminal state.
pub type CompletionSender = Box<dyn FnOnce(ExecutionStatus) + Send + 'static>;

/// Downward API to the component that actually executes tasks on workers.
///
/// `execute` must not block: the invoker starts the task and reports its
/// terminal state through the completion sender. `cancel` is a best-effort
/// process signal.
pub trait Invoker: Send {
    fn execute(&mut self, launch: TaskLaunch, done: CompletionSender) -> Result<()>;

    fn cancel(&mut self, task: TaskId) -> Result<()>;
}

/// Downward API to the byte-moving backend.
pub trait TransferBackend: Send {
    /// Copy within the local filesystem namespace of this process.
    fn copy_local(&self, src: &Path, tgt: &Path, overwrite: bool) -> Result<()>;

    /// Copy between two hosts.
    fn copy_ssh(&self, src_host: &str, src: &Path, tgt_host: &str, tgt: &Path) -> Result<()>;

    /// Write a serialized object to a path on the master host.
    fn serialize(&self, value: &::serde_json::Value, tgt: &Path) -> Result<()>;
}

/// Backend for single-host deployments and tests: every "host" shares this
/// process' filesystem, so remote copies degrade to local ones.
#[derive(Debug, Default)]
pub struct LocalBackend;

impl TransferBackend for LocalBackend {
    fn copy_local(&self, src: &Path, tgt: &Path, overwrite: bool) -> Result<()> {
        crate::sys::fs::copy_path(src, tgt, overwrite)
    }

    fn copy_ssh(&self, src_host: &str, src: &Path, tgt_host: &str, tgt: &Path) -> Result<()> {
        debug!(
            "local backend copying {}:{:?} to {}:{:?}",
            src_host, src, tgt_host, tgt
        );
        crate::sys::fs::copy_path(src, tgt, true)
    }

    fn serialize(&self, value: &::serde_json::Value, tgt: &Path) -> Result<()> {
        crate::sys::fs::serialize_to_file(value, tgt)
    }
}

/// Backend driving `scp`/`ssh` child processes.
#[derive(Debug, Default)]
pub struct SshBackend;

impl SshBackend {
    fn run_ssh(&self, host: &str, command: &str) -> Result<()> {
        let mut child = Command::new("ssh")
            .arg("-o StrictHostKeyChecking=no")
            .arg(host)
            .arg("/bin/sh")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| format!("start of 'ssh' failed: {}", e))?;
        {
            let stdin = child.stdin.as_mut().unwrap();
            stdin.write_all(command.as_bytes())?;
            stdin.flush()?;
        }
        let output = child.wait_with_output()?;
        if !output.status.success() {
            bail!(
                "remote command on {} failed: {}",
                host,
                ::std::str::from_utf8(&output.stderr)?
            );
        }
        Ok(())
    }
}

impl TransferBackend for SshBackend {
    fn copy_local(&self, src: &Path, tgt: &Path, overwrite: bool) -> Result<()> {
        crate::sys::fs::copy_path(src, tgt, overwrite)
    }

    fn copy_ssh(&self, src_host: &str, src: &Path, tgt_host: &str, tgt: &Path) -> Result<()> {
        debug!(
            "scp {}:{:?} -> {}:{:?}",
            src_host, src, tgt_host, tgt
        );
        let output = Command::new("scp")
            .arg("-o StrictHostKeyChecking=no")
            .arg("-rBq")
            .arg(format!("{}:{}", src_host, src.display()))
            .arg(format!("{}:{}", tgt_host, tgt.display()))
            .output()
            .map_err(|e| format!("start of 'scp' failed: {}", e))?;
        if !output.status.success() {
            bail!(
                "scp from {} to {} failed: {}",
                src_host,
                tgt_host,
                ::std::str::from_utf8(&output.stderr)?
            );
        }
        Ok(())
    }

    fn serialize(&self, value: &::serde_json::Value, tgt: &Path) -> Result<()> {
        crate::sys::fs::serialize_to_file(value, tgt)
    }
}

impl SshBackend {
    /// Remove a path on a remote host, used when evicting remote replicas.
    pub fn remove_remote(&self, host: &str, path: &Path) -> Result<()> {
        self.run_ssh(host, &format!("rm -rf {:?}\n", path))
    }
}
