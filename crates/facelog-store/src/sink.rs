//! Durable recognition log sinks.

use crate::encodings::StoreError;
use facelog_core::{LogSink, RecognitionEvent, SinkError};
use rusqlite::{params, Connection};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

const LOG_SCHEMA_SQL: &str = r"
CREATE TABLE IF NOT EXISTS recognition_logs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    datetime TEXT NOT NULL
);
";

/// A row of the `recognition_logs` table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRow {
    pub id: i64,
    pub name: String,
    pub datetime: String,
}

/// Appends events to the `recognition_logs` table.
pub struct SqliteLogSink {
    conn: Mutex<Connection>,
}

impl SqliteLogSink {
    /// Open or create the log table in the database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Self::init(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(LOG_SCHEMA_SQL)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Most recent rows, newest first.
    pub fn recent(&self, limit: usize) -> Result<Vec<LogRow>, StoreError> {
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        let mut stmt =
            conn.prepare("SELECT id, name, datetime FROM recognition_logs ORDER BY id DESC LIMIT ?1")?;
        let rows = stmt.query_map([limit as i64], |row| {
            Ok(LogRow {
                id: row.get(0)?,
                name: row.get(1)?,
                datetime: row.get(2)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }
}

impl LogSink for SqliteLogSink {
    fn append(&self, event: &RecognitionEvent) -> Result<(), SinkError> {
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        conn.execute(
            "INSERT INTO recognition_logs (name, datetime) VALUES (?1, ?2)",
            params![event.name, event.formatted_timestamp()],
        )
        .map_err(|e| SinkError::Backend(format!("sqlite: {e}")))?;
        Ok(())
    }
}

/// Appends `Recognized: {name}, {timestamp}` lines to a text file.
pub struct TextFileSink {
    path: PathBuf,
    // Serializes writers so lines never interleave.
    lock: Mutex<()>,
}

impl TextFileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl LogSink for TextFileSink {
    fn append(&self, event: &RecognitionEvent) -> Result<(), SinkError> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        writeln!(file, "Recognized: {}, {}", event.name, event.formatted_timestamp())?;
        Ok(())
    }
}

/// Writes each event to every inner sink.
///
/// All sinks are attempted even when one fails; the first error is returned.
#[derive(Default)]
pub struct FanoutSink {
    sinks: Vec<Box<dyn LogSink + Send + Sync>>,
}

impl FanoutSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: impl LogSink + Send + Sync + 'static) -> Self {
        self.sinks.push(Box::new(sink));
        self
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl LogSink for FanoutSink {
    fn append(&self, event: &RecognitionEvent) -> Result<(), SinkError> {
        let mut first_err = None;
        for sink in &self.sinks {
            if let Err(e) = sink.append(event) {
                tracing::warn!(identity = %event.name, error = %e, "sink write failed");
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
