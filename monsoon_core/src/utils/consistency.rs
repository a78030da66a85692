use std::sync::atomic::{AtomicBool, Ordering};

use lazy_static::lazy_static;

lazy_static! {
    /// When set, every mutation of the task graph re-validates the touched
    /// nodes. Enabled by tests and debug deployments.
    pub static ref DEBUG_CHECK_CONSISTENCY: AtomicBool = AtomicBool::new(false);
}

/// Common trait for objects with checkable consistency.
pub trait ConsistencyCheck {
    fn check_consistency(&self) -> crate::errors::Result<()>;

    /// Run `check_consistency` depending on `DEBUG_CHECK_CONSISTENCY`.
    fn check_consistency_opt(&self) -> crate::errors::Result<()> {
        if DEBUG_CHECK_CONSISTENCY.load(Ordering::Relaxed) {
            self.check_consistency()
        } else {
            Ok(())
        }
    }
}
