pub mod analyser;
pub mod datainfo;
pub mod processor;
pub mod request;

pub use self::analyser::TaskAnalyser;
pub use self::datainfo::DataInfoProvider;
pub use self::processor::AccessProcessor;
pub use self::request::{APRequest, ApHandle, TaskEndStatus};
