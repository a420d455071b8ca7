//! Probe-vs-store matching.

use crate::store::RecordRef;
use crate::types::FaceEncoding;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Conventional dlib/face_recognition tolerance in the embedding's native scale.
pub const DEFAULT_MATCH_THRESHOLD: f32 = 0.6;

/// Outcome of matching one probe against the store.
#[derive(Debug, Clone, PartialEq)]
pub enum MatchResult {
    /// The detector produced no usable vector; the store was not scanned.
    NoFaceVector,
    Match { name: String, distance: f32 },
    NoMatch,
}

/// How to choose among several records within threshold.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MatchPolicy {
    /// Return the first record in store order that passes the threshold.
    #[default]
    FirstMatch,
    /// Scan everything and return the closest record within threshold.
    /// Equal distances resolve to the earlier record in store order.
    Nearest,
}

impl FromStr for MatchPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "first" | "first-match" => Ok(Self::FirstMatch),
            "nearest" | "best" => Ok(Self::Nearest),
            other => Err(format!("unknown match policy: {other}")),
        }
    }
}

/// Strategy for comparing a probe encoding against the enrolled records.
///
/// `records` must be supplied in store order; results depend on it.
pub trait Matcher {
    fn find<'a, I>(&self, probe: Option<&FaceEncoding>, records: I) -> MatchResult
    where
        I: IntoIterator<Item = RecordRef<'a>>;
}

/// Euclidean-distance matcher with an inclusive threshold.
#[derive(Debug, Clone, Copy)]
pub struct EuclideanMatcher {
    pub threshold: f32,
    pub policy: MatchPolicy,
}

impl Default for EuclideanMatcher {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_MATCH_THRESHOLD,
            policy: MatchPolicy::FirstMatch,
        }
    }
}

impl EuclideanMatcher {
    pub fn new(threshold: f32, policy: MatchPolicy) -> Self {
        Self { threshold, policy }
    }
}

impl Matcher for EuclideanMatcher {
    fn find<'a, I>(&self, probe: Option<&FaceEncoding>, records: I) -> MatchResult
    where
        I: IntoIterator<Item = RecordRef<'a>>,
    {
        let probe = match probe {
            Some(p) if !p.is_empty() => p,
            _ => return MatchResult::NoFaceVector,
        };

        let mut best: Option<(RecordRef<'a>, f32)> = None;

        for record in records {
            let distance = probe.euclidean_distance(record.encoding);
            // NaN distances fail this test and never match.
            if !(distance <= self.threshold) {
                continue;
            }
            match self.policy {
                MatchPolicy::FirstMatch => {
                    return MatchResult::Match {
                        name: record.name.to_string(),
                        distance,
                    };
                }
                MatchPolicy::Nearest => {
                    // Strict `<` keeps the earlier record on ties.
                    if best.map_or(true, |(_, d)| distance < d) {
                        best = Some((record, distance));
                    }
                }
            }
        }

        match best {
            Some((record, distance)) => MatchResult::Match {
                name: record.name.to_string(),
                distance,
            },
            None => MatchResult::NoMatch,
        }
    }
}
