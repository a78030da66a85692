use std::collections::HashMap;

use serde_derive::{Deserialize, Serialize};

use crate::types::{Constraints, Direction, StreamBinding, TaskId, UserAttrs};

/// One declared parameter of a task.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ParamSpec {
    /// Logical name of the accessed datum.
    pub data: String,

    pub direction: Direction,

    #[serde(default)]
    pub stream: StreamBinding,

    #[serde(skip_serializing_if = "String::is_empty")]
    #[serde(default)]
    pub prefix: String,

    #[serde(skip_serializing_if = "String::is_empty")]
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum ContainerEngine {
    Docker,
    Singularity,
}

/// Execution engine of one task implementation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum EngineKind {
    Method {
        class: String,
        method: String,
    },
    Binary {
        binary: String,
    },
    Mpi {
        binary: String,
        runner: String,
        processes_per_node: u32,
    },
    Container {
        engine: ContainerEngine,
        image: String,
        exec: String,
    },
    Service {
        namespace: String,
        service: String,
        operation: String,
    },
}

/// One implementation of a task signature together with its constraints.
/// A task carries one or more of these; the scheduler picks whichever one
/// the chosen resource can satisfy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ImplementationSpec {
    pub engine: EngineKind,

    #[serde(default)]
    pub constraints: Constraints,
}

/// Reaction to an execution failure of the task.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum OnFailure {
    Retry,
    CancelSuccessors,
    Fail,
    Ignore,
}

impl Default for OnFailure {
    fn default() -> Self {
        OnFailure::Retry
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct TaskFlags {
    #[serde(default)]
    pub is_replicated: bool,

    #[serde(default)]
    pub is_distributed: bool,

    #[serde(default)]
    pub is_reduce: bool,

    #[serde(default)]
    pub reduce_chunk_size: u32,

    #[serde(default)]
    pub has_target: bool,

    #[serde(default)]
    pub prioritary: bool,

    #[serde(default)]
    pub fail_by_exit_value: bool,

    #[serde(default)]
    pub on_failure: OnFailure,

    /// 0 disables the timeout.
    #[serde(default)]
    pub timeout_ms: u64,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(default)]
    pub group: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct TaskSpec {
    pub id: TaskId,

    pub signature: String,

    pub implementations: Vec<ImplementationSpec>,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    #[serde(default)]
    pub params: Vec<ParamSpec>,

    #[serde(default)]
    pub num_returns: u32,

    #[serde(default)]
    pub flags: TaskFlags,

    #[serde(skip_serializing_if = "HashMap::is_empty")]
    #[serde(default)]
    pub user: UserAttrs,
}

impl TaskSpec {
    /// Smallest core requirement over all implementations, used for
    /// capacity pre-checks before an implementation is chosen.
    pub fn min_core_count(&self) -> u32 {
        self.implementations
            .iter()
            .map(|i| i.constraints.processor_core_count)
            .min()
            .unwrap_or(1)
    }
}
