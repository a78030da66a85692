//! Local file I/O executor with two single-threaded lanes. The HIGH lane
//! runs composed operations, the LOW lane bulk data movements; each lane
//! preserves FIFO order of submission.

use std::path::PathBuf;
use std::sync::mpsc::{channel, Sender};
use std::sync::Mutex;
use std::thread::{self, JoinHandle};

use futures::sync::oneshot;
use futures::Future;
use log::{debug, warn};

use monsoon_core::errors::{ErrorKind, Result};
use monsoon_core::sys::fs;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum FilePriority {
    High,
    Low,
}

pub enum FileOp {
    Copy {
        src: PathBuf,
        tgt: PathBuf,
        overwrite: bool,
    },
    Move {
        src: PathBuf,
        tgt: PathBuf,
    },
    Delete {
        path: PathBuf,
    },
    Serialize {
        value: ::serde_json::Value,
        tgt: PathBuf,
    },
    Composed(Box<dyn FnOnce() -> Result<()> + Send>),
}

/// Per-operation completion callback; receives `Ok` or the typed error of
/// the failed primitive.
pub type Notifier = Box<dyn FnOnce(Result<()>) + Send>;

type Job = (FileOp, Option<Notifier>);

struct Lane {
    queue: Mutex<Option<Sender<Job>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Lane {
    fn start(name: &str) -> Lane {
        let (sx, rx) = channel::<Job>();
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                for (op, notifier) in rx.iter() {
                    let result = run_op(op);
                    match notifier {
                        Some(notify) => notify(result),
                        None => {
                            if let Err(e) = result {
                                warn!("unobserved file operation failed: {}", e);
                            }
                        }
                    }
                }
                debug!("file-ops lane finished");
            })
            .expect("cannot spawn a file-ops lane");
        Lane {
            queue: Mutex::new(Some(sx)),
            handle: Mutex::new(Some(handle)),
        }
    }

    fn submit(&self, job: Job) -> Result<()> {
        let guard = self.queue.lock().unwrap();
        match *guard {
            Some(ref sender) => {
                sender.send(job).map_err(|_| ErrorKind::ShutdownInProgress)?;
                Ok(())
            }
            None => Err(ErrorKind::ShutdownInProgress.into()),
        }
    }

    fn shutdown(&self) {
        // dropping the sender lets the lane drain and exit
        self.queue.lock().unwrap().take();
        if let Some(handle) = self.handle.lock().unwrap().take() {
            let _ = handle.join();
        }
    }
}

fn run_op(op: FileOp) -> Result<()> {
    match op {
        FileOp::Copy {
            src,
            tgt,
            overwrite,
        } => fs::copy_path(&src, &tgt, overwrite),
        FileOp::Move { src, tgt } => fs::move_path(&src, &tgt),
        FileOp::Delete { path } => fs::delete_path(&path),
        FileOp::Serialize { value, tgt } => fs::serialize_to_file(&value, &tgt),
        FileOp::Composed(f) => f(),
    }
}

pub struct FileOps {
    high: Lane,
    low: Lane,
}

impl FileOps {
    pub fn new() -> FileOps {
        FileOps {
            high: Lane::start("fileops-high"),
            low: Lane::start("fileops-low"),
        }
    }

    /// Enqueue an operation; the notifier fires from the lane thread.
    pub fn submit(
        &self,
        priority: FilePriority,
        op: FileOp,
        notifier: Option<Notifier>,
    ) -> Result<()> {
        let lane = match priority {
            FilePriority::High => &self.high,
            FilePriority::Low => &self.low,
        };
        lane.submit((op, notifier))
    }

    /// Run a composed operation on the HIGH lane.
    pub fn composed_async(
        &self,
        f: Box<dyn FnOnce() -> Result<()> + Send>,
        notifier: Option<Notifier>,
    ) -> Result<()> {
        self.submit(FilePriority::High, FileOp::Composed(f), notifier)
    }

    pub fn copy_async(
        &self,
        src: PathBuf,
        tgt: PathBuf,
        overwrite: bool,
        notifier: Option<Notifier>,
    ) -> Result<()> {
        self.submit(
            FilePriority::Low,
            FileOp::Copy {
                src,
                tgt,
                overwrite,
            },
            notifier,
        )
    }

    pub fn move_async(&self, src: PathBuf, tgt: PathBuf, notifier: Option<Notifier>) -> Result<()> {
        self.submit(FilePriority::Low, FileOp::Move { src, tgt }, notifier)
    }

    pub fn delete_async(&self, path: PathBuf, notifier: Option<Notifier>) -> Result<()> {
        self.submit(FilePriority::Low, FileOp::Delete { path }, notifier)
    }

    pub fn serialize_async(
        &self,
        value: ::serde_json::Value,
        tgt: PathBuf,
        notifier: Option<Notifier>,
    ) -> Result<()> {
        self.submit(FilePriority::Low, FileOp::Serialize { value, tgt }, notifier)
    }

    pub fn copy_sync(&self, src: PathBuf, tgt: PathBuf, overwrite: bool) -> Result<()> {
        self.wait_for(|n| {
            self.submit(
                FilePriority::Low,
                FileOp::Copy {
                    src,
                    tgt,
                    overwrite,
                },
                Some(n),
            )
        })
    }

    pub fn move_sync(&self, src: PathBuf, tgt: PathBuf) -> Result<()> {
        self.wait_for(|n| self.submit(FilePriority::Low, FileOp::Move { src, tgt }, Some(n)))
    }

    pub fn delete_sync(&self, path: PathBuf) -> Result<()> {
        self.wait_for(|n| self.submit(FilePriority::Low, FileOp::Delete { path }, Some(n)))
    }

    fn wait_for<F>(&self, submit: F) -> Result<()>
    where
        F: FnOnce(Notifier) -> Result<()>,
    {
        let (sx, rx) = oneshot::channel::<Result<()>>();
        submit(Box::new(move |result| {
            let _ = sx.send(result);
        }))?;
        match rx.wait() {
            Ok(result) => result,
            Err(_) => Err(ErrorKind::ShutdownInProgress.into()),
        }
    }

    /// Drain both lanes and join their threads.
    pub fn shutdown(&self) {
        self.high.shutdown();
        self.low.shutdown();
    }
}

impl Default for FileOps {
    fn default() -> Self {
        FileOps::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn lanes_preserve_submission_order() {
        let ops = FileOps::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for i in 0..64 {
            let seen = seen.clone();
            ops.composed_async(
                Box::new(move || {
                    seen.lock().unwrap().push(i);
                    Ok(())
                }),
                None,
            )
            .unwrap();
        }
        ops.shutdown();
        let order = seen.lock().unwrap().clone();
        assert_eq!(order, (0..64).collect::<Vec<_>>());
    }

    #[test]
    fn sync_ops_surface_typed_errors() {
        let ops = FileOps::new();
        let missing = ::std::env::temp_dir().join("monsoon_fileops_missing/x");
        let tgt = ::std::env::temp_dir().join("monsoon_fileops_missing/y");
        let err = ops.copy_sync(missing, tgt, true).unwrap_err();
        match *err.kind() {
            ErrorKind::Io(_) => {}
            ref other => panic!("expected io error, got {:?}", other),
        }
        ops.shutdown();
    }

    #[test]
    fn submissions_after_shutdown_are_rejected() {
        let ops = FileOps::new();
        ops.shutdown();
        let err = ops
            .composed_async(Box::new(|| Ok(())), None)
            .unwrap_err();
        match *err.kind() {
            ErrorKind::ShutdownInProgress => {}
            ref other => panic!("unexpected error {:?}", other),
        }
    }
}
