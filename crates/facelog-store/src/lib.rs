//! facelog-store: Durable adapters for the recognition engine.
//!
//! SQLite-backed encoding repository plus the log sinks that receive
//! recognition events (SQLite table and append-only text file).

pub mod encodings;
pub mod sink;

pub use encodings::{EncodingRepository, LoadReport, StoreError};
pub use sink::{FanoutSink, LogRow, SqliteLogSink, TextFileSink};
