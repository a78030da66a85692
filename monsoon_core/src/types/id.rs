use std::fmt;

use serde_derive::{Deserialize, Serialize};

/// Generic ID type. Negative values have special meaning.
pub type Id = i32;

/// Application ID type.
pub type AppId = i32;

/// Logical data identifier, interned from the caller-visible logical name.
pub type DataId = i32;

/// Version counter of one logical datum. Advances only on write accesses.
pub type Version = u32;

/// ID type for tasks, unique within an application.
#[derive(Copy, Clone, Debug, Default, Ord, Eq, PartialEq, PartialOrd, Hash, Serialize,
         Deserialize)]
pub struct TaskId {
    app_id: AppId,
    id: Id,
}

impl TaskId {
    #[inline]
    pub fn new(app_id: AppId, id: Id) -> Self {
        TaskId { app_id, id }
    }

    #[inline]
    pub fn id(&self) -> Id {
        self.id
    }

    #[inline]
    pub fn app_id(&self) -> AppId {
        self.app_id
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}/{}", self.app_id, self.id)
    }
}

/// A concrete version of a logical datum. Immutable once written.
#[derive(Copy, Clone, Debug, Default, Ord, Eq, PartialEq, PartialOrd, Hash, Serialize,
         Deserialize)]
pub struct DataInstanceId {
    data_id: DataId,
    version: Version,
}

impl DataInstanceId {
    #[inline]
    pub fn new(data_id: DataId, version: Version) -> Self {
        DataInstanceId { data_id, version }
    }

    #[inline]
    pub fn data_id(&self) -> DataId {
        self.data_id
    }

    #[inline]
    pub fn version(&self) -> Version {
        self.version
    }

    /// Instance id of the next version of the same datum.
    #[inline]
    pub fn next_version(&self) -> DataInstanceId {
        DataInstanceId::new(self.data_id, self.version + 1)
    }

    /// Canonical per-instance file name, used as the target name of
    /// transfers and open-file requests.
    pub fn renaming(&self) -> String {
        format!("d{}_v{}", self.data_id, self.version)
    }
}

impl fmt::Display for DataInstanceId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "d{}v{}", self.data_id, self.version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_id_ordering_follows_submission() {
        assert!(TaskId::new(1, 1) < TaskId::new(1, 2));
        assert!(TaskId::new(1, 9) < TaskId::new(2, 0));
    }

    #[test]
    fn renaming_is_unique_per_version() {
        let a = DataInstanceId::new(3, 1);
        let b = a.next_version();
        assert_eq!(a.renaming(), "d3_v1");
        assert_eq!(b.renaming(), "d3_v2");
        assert_ne!(a, b);
    }
}
