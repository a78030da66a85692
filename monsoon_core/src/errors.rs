#![allow(deprecated)]

use crate::types::{AppId, TaskId};

// Create the Error, ErrorKind, ResultExt and Result types
error_chain! {
    types {
        Error, ErrorKind, ResultExt;
    }
    foreign_links {
        Io(::std::io::Error);
        Json(::serde_json::Error);
        Sqlite(::rusqlite::Error);
        Utf8Err(::std::str::Utf8Error);
    }

    errors {
        DataNotFound(name: String) {
            description("read access to an unwritten logical datum")
            display("logical datum '{}' has never been written", name)
        }
        LocationInvalid(uri: String) {
            description("malformed or unreachable location")
            display("invalid location '{}'", uri)
        }
        TransferFailed(reason: String) {
            description("data transfer failed")
            display("transfer failed: {}", reason)
        }
        InputUnavailable(task: TaskId) {
            description("no remaining source for a task input")
            display("inputs of task {} are unavailable", task)
        }
        TaskExecFailed(task: TaskId, exit_code: i32) {
            description("task execution failed")
            display("task {} failed with exit code {}", task, exit_code)
        }
        TaskTimedOut(task: TaskId) {
            description("task exceeded its timeout")
            display("task {} exceeded its timeout", task)
        }
        ConstraintUnsatisfiable(task: TaskId) {
            description("no resource can ever match the task constraints")
            display("constraints of task {} are unsatisfiable", task)
        }
        Blocked {
            description("application is blocked on unsatisfiable tasks")
        }
        AppCancelled(app: AppId) {
            description("application was cancelled")
            display("application {} was cancelled", app)
        }
        ShutdownInProgress {
            description("runtime is shutting down")
        }
        UnknownScheduler(name: String) {
            description("unknown scheduler selector")
            display("unknown scheduler '{}'", name)
        }
        UnknownConnector(name: String) {
            description("unknown connector selector")
            display("unknown connector '{}'", name)
        }
    }
}

// Explicit alias just to make the IDEs happier
pub type Result<T> = ::std::result::Result<T, Error>;
