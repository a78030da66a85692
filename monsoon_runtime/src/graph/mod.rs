pub mod app;
pub mod graph;
pub mod task;

pub use self::app::{App, AppRef, AppRefMethods, AppState};
pub use self::graph::Graph;
pub use self::task::{Task, TaskRef, TaskRefMethods, TaskState};
