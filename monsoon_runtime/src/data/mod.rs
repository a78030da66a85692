pub mod fileops;
pub mod logical;
pub mod shareddisk;
pub mod transfer;

pub use self::fileops::{FileOp, FileOps, FilePriority};
pub use self::logical::LogicalDataStore;
pub use self::shareddisk::SharedDiskRegistry;
pub use self::transfer::{TransferKey, TransferManager};
