use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Timestamp format used for every written log line and table row.
pub const LOG_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %I:%M:%S %p";

/// Face feature vector produced by an external embedding model
/// (128-dimensional for dlib-style encoders).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FaceEncoding {
    values: Vec<f32>,
}

impl FaceEncoding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    pub fn dimension(&self) -> usize {
        self.values.len()
    }

    /// An empty vector means the detector produced nothing usable.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// True when no component is NaN or infinite.
    pub fn is_finite(&self) -> bool {
        self.values.iter().all(|v| v.is_finite())
    }

    /// Euclidean distance between two encodings.
    ///
    /// Encodings of different dimension are not comparable and are
    /// infinitely far apart.
    pub fn euclidean_distance(&self, other: &FaceEncoding) -> f32 {
        if self.values.len() != other.values.len() {
            return f32::INFINITY;
        }
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

impl From<Vec<f32>> for FaceEncoding {
    fn from(values: Vec<f32>) -> Self {
        Self::new(values)
    }
}

/// A named reference encoding owned by the [`EncodingStore`](crate::EncodingStore).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncodingRecord {
    pub name: String,
    pub encoding: FaceEncoding,
}

/// Bounding box of a detected face in image pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub top: u32,
    pub right: u32,
    pub bottom: u32,
    pub left: u32,
}

/// One face found by an [`EmbeddingProvider`].
#[derive(Debug, Clone)]
pub struct Detection {
    pub encoding: FaceEncoding,
    pub bounds: BoundingBox,
}

/// Port to the external face-embedding model.
///
/// The core only consumes the vectors; images never cross into matching.
pub trait EmbeddingProvider {
    type Error: std::error::Error;

    fn detect(&mut self, rgb: &[u8], width: u32, height: u32) -> Result<Vec<Detection>, Self::Error>;
}

/// A successful, deduplicated identification handed to a log sink.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecognitionEvent {
    pub name: String,
    pub timestamp: NaiveDateTime,
    pub window: crate::period::WindowName,
}

impl RecognitionEvent {
    pub fn formatted_timestamp(&self) -> String {
        self.timestamp.format(LOG_TIMESTAMP_FORMAT).to_string()
    }
}
