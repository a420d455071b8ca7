use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CoreError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("no usable face vector")]
    NoFaceVector,
    #[error("stored record {name:?} is corrupt: {reason}")]
    StoreCorrupt { name: String, reason: String },
}

/// Failure reported by a [`LogSink`](crate::session::LogSink).
///
/// Sink failures never undo a dedup decision; they are surfaced on the
/// probe outcome and logged.
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("sink i/o failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("sink backend failed: {0}")]
    Backend(String),
    #[error("sink closed")]
    Closed,
}
