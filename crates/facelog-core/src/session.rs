//! Per-probe orchestration: match → classify → gate → emit.

use crate::dedup::DedupGate;
use crate::error::{CoreError, SinkError};
use crate::matcher::{MatchResult, Matcher};
use crate::period::{Period, PeriodSchedule, WindowName};
use crate::store::EncodingStore;
use crate::types::{FaceEncoding, RecognitionEvent};
use chrono::NaiveDateTime;
use serde::Serialize;
use std::sync::Arc;

/// Port for durably recording emitted events.
///
/// Implementations should return quickly; slow backends belong behind a
/// queue so probe processing is never held up by log I/O.
pub trait LogSink {
    fn append(&self, event: &RecognitionEvent) -> Result<(), SinkError>;
}

impl<T: LogSink + ?Sized> LogSink for Box<T> {
    fn append(&self, event: &RecognitionEvent) -> Result<(), SinkError> {
        (**self).append(event)
    }
}

impl<T: LogSink + ?Sized> LogSink for Arc<T> {
    fn append(&self, event: &RecognitionEvent) -> Result<(), SinkError> {
        (**self).append(event)
    }
}

/// What the operator display should show after a probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Presentation {
    Recognized,
    Cleared,
}

/// Result of one probe cycle. Every failure is a value here; nothing
/// propagates out of [`RecognitionSession::process`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ProbeOutcome {
    NoFaceVector,
    NoMatch,
    OutOfTime {
        name: String,
    },
    AlreadyLogged {
        name: String,
        window: WindowName,
    },
    Logged {
        event: RecognitionEvent,
        /// Set when the sink rejected the event. The gate has still
        /// recorded the window.
        sink_error: Option<String>,
    },
}

impl ProbeOutcome {
    pub fn presentation(&self) -> Presentation {
        match self {
            Self::Logged { .. } => Presentation::Recognized,
            _ => Presentation::Cleared,
        }
    }

    pub fn event(&self) -> Option<&RecognitionEvent> {
        match self {
            Self::Logged { event, .. } => Some(event),
            _ => None,
        }
    }

    /// Identity the probe matched, whether or not it was logged.
    pub fn identity(&self) -> Option<&str> {
        match self {
            Self::OutOfTime { name } | Self::AlreadyLogged { name, .. } => Some(name.as_str()),
            Self::Logged { event, .. } => Some(event.name.as_str()),
            Self::NoFaceVector | Self::NoMatch => None,
        }
    }
}

/// Outcomes for every face detected in one frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FrameOutcome {
    pub outcomes: Vec<ProbeOutcome>,
    pub presentation: Presentation,
}

pub struct RecognitionSession<S, M> {
    store: Arc<EncodingStore>,
    matcher: M,
    schedule: PeriodSchedule,
    gate: DedupGate,
    sink: S,
}

impl<S: LogSink, M: Matcher> RecognitionSession<S, M> {
    pub fn new(
        store: Arc<EncodingStore>,
        matcher: M,
        schedule: PeriodSchedule,
        gate: DedupGate,
        sink: S,
    ) -> Self {
        Self {
            store,
            matcher,
            schedule,
            gate,
            sink,
        }
    }

    pub fn store(&self) -> &Arc<EncodingStore> {
        &self.store
    }

    pub fn schedule(&self) -> &PeriodSchedule {
        &self.schedule
    }

    pub fn gate(&self) -> &DedupGate {
        &self.gate
    }

    /// Enroll from a capture. `None` (no face found) is rejected without
    /// touching any existing record.
    pub fn enroll(&self, name: &str, encoding: Option<FaceEncoding>) -> Result<(), CoreError> {
        let encoding = encoding.ok_or(CoreError::NoFaceVector)?;
        self.store.enroll(name, encoding)?;
        tracing::info!(identity = name, "identity enrolled");
        Ok(())
    }

    /// Process one probe taken at `timestamp`.
    pub fn process(&self, probe: Option<&FaceEncoding>, timestamp: NaiveDateTime) -> ProbeOutcome {
        let snapshot = self.store.records();
        let name = match self.matcher.find(probe, snapshot.iter()) {
            MatchResult::NoFaceVector => {
                tracing::debug!("probe carried no face vector");
                return ProbeOutcome::NoFaceVector;
            }
            MatchResult::NoMatch => {
                tracing::debug!(enrolled = snapshot.len(), "probe matched no identity");
                return ProbeOutcome::NoMatch;
            }
            MatchResult::Match { name, distance } => {
                tracing::debug!(identity = %name, distance, "probe matched");
                name
            }
        };

        let period = self.schedule.classify(timestamp);
        let Period::Window(window) = period else {
            tracing::debug!(identity = %name, time = %timestamp.time(), "outside every window");
            return ProbeOutcome::OutOfTime { name };
        };

        if !self.gate.should_log(&name, period, timestamp.date()) {
            tracing::debug!(identity = %name, %window, "already logged for window");
            return ProbeOutcome::AlreadyLogged { name, window };
        }

        let event = RecognitionEvent {
            name,
            timestamp,
            window,
        };
        tracing::info!(identity = %event.name, %window, at = %event.formatted_timestamp(), "recognized");

        let sink_error = match self.sink.append(&event) {
            Ok(()) => None,
            Err(e) => {
                tracing::warn!(identity = %event.name, error = %e, "log sink rejected event");
                Some(e.to_string())
            }
        };

        ProbeOutcome::Logged { event, sink_error }
    }

    /// Process every face found in one frame, in detection order.
    ///
    /// A frame without faces counts as a single `NoFaceVector` probe.
    pub fn process_frame(&self, probes: &[FaceEncoding], timestamp: NaiveDateTime) -> FrameOutcome {
        let outcomes: Vec<ProbeOutcome> = if probes.is_empty() {
            vec![self.process(None, timestamp)]
        } else {
            probes.iter().map(|p| self.process(Some(p), timestamp)).collect()
        };

        let presentation = if outcomes.iter().any(|o| o.presentation() == Presentation::Recognized) {
            Presentation::Recognized
        } else {
            Presentation::Cleared
        };

        FrameOutcome {
            outcomes,
            presentation,
        }
    }
}
