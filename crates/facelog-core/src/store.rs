//! In-memory encoding store with snapshot reads.
//!
//! Writers build a new map and swap it in under the write lock; readers
//! clone the current `Arc` and scan without holding any lock, so an
//! enrollment can never be observed half-applied mid-scan.

use crate::error::CoreError;
use crate::types::{EncodingRecord, FaceEncoding};
use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

type RecordMap = BTreeMap<String, FaceEncoding>;

#[derive(Debug, Default)]
pub struct EncodingStore {
    records: RwLock<Arc<RecordMap>>,
}

/// Borrowed view of one stored record.
#[derive(Debug, Clone, Copy)]
pub struct RecordRef<'a> {
    pub name: &'a str,
    pub encoding: &'a FaceEncoding,
}

/// Immutable point-in-time view of the store, iterated in name order.
///
/// Iteration is lazy and can be restarted any number of times.
#[derive(Debug, Clone)]
pub struct Snapshot {
    records: Arc<RecordMap>,
}

impl Snapshot {
    pub fn iter(&self) -> impl Iterator<Item = RecordRef<'_>> {
        self.records.iter().map(|(name, encoding)| RecordRef {
            name: name.as_str(),
            encoding,
        })
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn to_records(&self) -> Vec<EncodingRecord> {
        self.iter()
            .map(|r| EncodingRecord {
                name: r.name.to_string(),
                encoding: r.encoding.clone(),
            })
            .collect()
    }
}

impl EncodingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from already-validated records (e.g. loaded from disk).
    pub fn with_records(records: impl IntoIterator<Item = EncodingRecord>) -> Result<Self, CoreError> {
        let store = Self::new();
        for record in records {
            store.enroll(&record.name, record.encoding)?;
        }
        Ok(store)
    }

    /// Add or replace the record for `name`.
    ///
    /// Rejects empty names, non-finite encodings, and encodings whose
    /// dimension differs from the other stored records. An empty encoding
    /// is `NoFaceVector`. On error the store is unchanged.
    pub fn enroll(&self, name: &str, encoding: FaceEncoding) -> Result<(), CoreError> {
        if name.trim().is_empty() {
            return Err(CoreError::InvalidInput("identity name is empty".into()));
        }
        if encoding.is_empty() {
            return Err(CoreError::NoFaceVector);
        }
        if !encoding.is_finite() {
            return Err(CoreError::InvalidInput(format!(
                "encoding for {name:?} contains NaN or infinite values"
            )));
        }

        let mut guard = self.records.write().unwrap_or_else(PoisonError::into_inner);

        if let Some((other, existing)) = guard.iter().find(|(n, _)| n.as_str() != name) {
            if existing.dimension() != encoding.dimension() {
                return Err(CoreError::InvalidInput(format!(
                    "encoding has {} dimensions, store holds {} (e.g. {other:?})",
                    encoding.dimension(),
                    existing.dimension()
                )));
            }
        }

        let mut next = RecordMap::clone(&guard);
        let replaced = next.insert(name.to_string(), encoding).is_some();
        *guard = Arc::new(next);

        tracing::debug!(identity = name, replaced, total = guard.len(), "encoding enrolled");
        Ok(())
    }

    /// Current records in lexicographic name order.
    pub fn records(&self) -> Snapshot {
        let guard = self.records.read().unwrap_or_else(PoisonError::into_inner);
        Snapshot {
            records: Arc::clone(&guard),
        }
    }

    /// Dimension shared by every stored encoding, if any are stored.
    pub fn dimension(&self) -> Option<usize> {
        self.records().iter().next().map(|r| r.encoding.dimension())
    }

    pub fn len(&self) -> usize {
        self.records().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records().is_empty()
    }
}
