pub mod consistency;
pub mod wrapped;

use std::collections::HashSet;

pub type RcSet<T> = HashSet<T>;

pub use self::consistency::{ConsistencyCheck, DEBUG_CHECK_CONSISTENCY};
pub use self::wrapped::WrappedRcRefCell;
