pub mod access;
pub mod id;
pub mod location;
pub mod resources;
pub mod spec;

pub type UserValue = ::serde_json::Value;
pub type UserAttrs = ::std::collections::HashMap<String, UserValue>;

pub use self::access::{DataAccessId, Direction, StreamBinding};
pub use self::id::{AppId, DataId, DataInstanceId, Id, TaskId, Version};
pub use self::location::DataLocation;
pub use self::resources::{Capacity, Constraints, ProcessorKind, ProcessorSpec, ResourceSpec};
pub use self::spec::{
    ContainerEngine, EngineKind, ImplementationSpec, OnFailure, ParamSpec, TaskFlags, TaskSpec,
};
