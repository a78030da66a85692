use serde_derive::{Deserialize, Serialize};

use crate::types::DataInstanceId;

/// Declared direction of a task parameter.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum Direction {
    In,
    Out,
    InOut,
}

/// Standard stream a file parameter may be bound to on the worker.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum StreamBinding {
    Stdin,
    Stdout,
    Stderr,
    Unspec,
}

impl Default for StreamBinding {
    fn default() -> Self {
        StreamBinding::Unspec
    }
}

/// Versioned access produced for a single declared parameter access.
///
/// A read-write access carries both the instance being read and the
/// instance being written; `preserve_source` is set when other readers of
/// the read instance are still alive, forcing copies instead of moves.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum DataAccessId {
    Read {
        read: DataInstanceId,
    },
    Write {
        written: DataInstanceId,
    },
    ReadWrite {
        read: DataInstanceId,
        written: DataInstanceId,
        preserve_source: bool,
    },
}

impl DataAccessId {
    #[inline]
    pub fn read_instance(&self) -> Option<DataInstanceId> {
        match *self {
            DataAccessId::Read { read } | DataAccessId::ReadWrite { read, .. } => Some(read),
            DataAccessId::Write { .. } => None,
        }
    }

    #[inline]
    pub fn written_instance(&self) -> Option<DataInstanceId> {
        match *self {
            DataAccessId::Write { written } | DataAccessId::ReadWrite { written, .. } => {
                Some(written)
            }
            DataAccessId::Read { .. } => None,
        }
    }

    /// Whether the source replica must survive this access.
    #[inline]
    pub fn preserve_source(&self) -> bool {
        match *self {
            DataAccessId::Read { .. } => true,
            DataAccessId::Write { .. } => false,
            DataAccessId::ReadWrite {
                preserve_source, ..
            } => preserve_source,
        }
    }

    #[inline]
    pub fn direction(&self) -> Direction {
        match *self {
            DataAccessId::Read { .. } => Direction::In,
            DataAccessId::Write { .. } => Direction::Out,
            DataAccessId::ReadWrite { .. } => Direction::InOut,
        }
    }
}
