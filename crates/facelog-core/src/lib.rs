//! facelog-core: Identity matching and windowed log-once gating.
//!
//! Matches face encodings from an external embedding model against an
//! enrolled store, classifies timestamps into recurring daily windows,
//! and emits each identification at most once per window.

pub mod dedup;
pub mod error;
pub mod matcher;
pub mod period;
pub mod session;
pub mod store;
pub mod types;

pub use dedup::{DedupGate, DedupKey, DedupState};
pub use error::{CoreError, SinkError};
pub use matcher::{EuclideanMatcher, MatchPolicy, MatchResult, Matcher, DEFAULT_MATCH_THRESHOLD};
pub use period::{Period, PeriodSchedule, TimeWindow, WindowName};
pub use session::{FrameOutcome, LogSink, Presentation, ProbeOutcome, RecognitionSession};
pub use store::{EncodingStore, RecordRef, Snapshot};
pub use types::{
    BoundingBox, Detection, EmbeddingProvider, EncodingRecord, FaceEncoding, RecognitionEvent,
    LOG_TIMESTAMP_FORMAT,
};
