pub mod events;
pub mod sqlite_logger;

pub use self::events::{AppEndReason, Event, EventWrapper};
pub use self::sqlite_logger::{EventLog, NullLog, SqliteLog};
