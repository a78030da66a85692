use std::path::Path;
use std::sync::mpsc::{channel, Sender};
use std::thread;

use chrono::Utc;
use log::{debug, error};
use rusqlite::types::ToSql;
use rusqlite::Connection;

use super::events::{Event, EventWrapper};
use crate::errors::Result;

/// Sink for runtime events. Implementations buffer and flush in bulk; the
/// runtime flushes after every serializer turn.
pub trait EventLog: Send {
    fn add_event(&mut self, event: Event);

    fn flush(&mut self);
}

/// Discards everything. Used by tests and embeddings without an event log.
#[derive(Debug, Default)]
pub struct NullLog;

impl EventLog for NullLog {
    fn add_event(&mut self, _event: Event) {}

    fn flush(&mut self) {}
}

/// Buffered event log writing into an `events` table of an SQLite database
/// on a dedicated writer thread.
pub struct SqliteLog {
    events: Vec<EventWrapper>,
    queue: Sender<Vec<EventWrapper>>,
}

fn save_events(conn: &mut Connection, events: Vec<EventWrapper>) -> Result<()> {
    debug!("saving {} events into log", events.len());
    let tx = conn.transaction()?;
    {
        let mut stmt = tx.prepare_cached(
            "INSERT INTO events (timestamp, event_type, app, event) VALUES (?, ?, ?, ?)",
        )?;
        for e in events.iter() {
            let event_type = e.event.event_type().to_string();
            let app = e.event.app_id();
            let json = ::serde_json::to_string(&e.event)?;
            stmt.execute(&[&e.timestamp as &dyn ToSql, &event_type, &app, &json])?;
        }
    }
    tx.commit()?;
    Ok(())
}

impl SqliteLog {
    pub fn new(log_dir: &Path) -> Result<Self> {
        let conn = Connection::open(log_dir.join("events.db"))?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS events (
                id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
                timestamp TEXT NOT NULL,
                event_type VARCHAR(20) NOT NULL,
                app INTEGER,
                event TEXT NOT NULL
             )",
            &[],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_event_type ON events(event_type)",
            &[],
        )?;
        conn.execute("CREATE INDEX IF NOT EXISTS idx_app ON events(app)", &[])?;

        let (sx, rx) = channel::<Vec<EventWrapper>>();
        thread::Builder::new()
            .name("event-log".into())
            .spawn(move || {
                debug!("event log writer thread started");
                let mut conn = conn;
                for batch in rx.iter() {
                    if let Err(e) = save_events(&mut conn, batch) {
                        error!("cannot save events: {}", e);
                    }
                }
                debug!("event log writer thread finished");
            })
            .expect("cannot spawn the event log thread");

        Ok(SqliteLog {
            events: Vec::new(),
            queue: sx,
        })
    }
}

impl EventLog for SqliteLog {
    fn add_event(&mut self, event: Event) {
        self.events.push(EventWrapper {
            event,
            timestamp: Utc::now(),
        });
    }

    fn flush(&mut self) {
        if self.events.is_empty() {
            return;
        }
        // best effort: a writer that already terminated loses the batch
        let batch = ::std::mem::replace(&mut self.events, Vec::new());
        let _ = self.queue.send(batch);
    }
}

impl Drop for SqliteLog {
    fn drop(&mut self) {
        self.flush();
    }
}
