#[macro_use]
extern crate error_chain;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod comm;
pub mod errors;
pub mod logging;
pub mod sys;
pub mod types;
pub mod utils;

pub use crate::errors::{Error, ErrorKind, Result, ResultExt};
