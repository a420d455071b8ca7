//! SQLite persistence for enrolled encodings.
//!
//! Vectors are stored as little-endian `f32` blobs tagged with a format
//! version. Rows that fail to decode are skipped on load, never fatal.

use facelog_core::{CoreError, EncodingRecord, FaceEncoding};
use rusqlite::{params, Connection, Row};
use std::path::Path;
use thiserror::Error;

/// Current on-disk encoding format.
const ENCODING_FORMAT_VERSION: i64 = 1;

const SCHEMA_SQL: &str = r"
CREATE TABLE IF NOT EXISTS encodings (
    name TEXT PRIMARY KEY NOT NULL,
    format_version INTEGER NOT NULL,
    dimension INTEGER NOT NULL,
    encoding BLOB NOT NULL,
    enrolled_at TEXT NOT NULL
);
";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Core(#[from] CoreError),
}

/// Records recovered by [`EncodingRepository::load_all`].
#[derive(Debug, Default)]
pub struct LoadReport {
    /// Decodable records in name order, all of one dimension.
    pub records: Vec<EncodingRecord>,
    /// One `StoreCorrupt` per skipped row.
    pub skipped: Vec<CoreError>,
}

pub struct EncodingRepository {
    conn: Connection,
}

impl EncodingRepository {
    /// Open or create the repository at `path`.
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
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self { conn })
    }

    /// Insert or replace the stored record for `record.name`.
    pub fn save(&self, record: &EncodingRecord) -> Result<(), StoreError> {
        if record.name.trim().is_empty() {
            return Err(CoreError::InvalidInput("identity name is empty".into()).into());
        }
        let values = record.encoding.values();
        self.conn.execute(
            "INSERT INTO encodings (name, format_version, dimension, encoding, enrolled_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(name) DO UPDATE SET
                format_version = excluded.format_version,
                dimension = excluded.dimension,
                encoding = excluded.encoding,
                enrolled_at = excluded.enrolled_at",
            params![
                record.name,
                ENCODING_FORMAT_VERSION,
                values.len() as i64,
                encode_f32_blob(values),
                chrono::Local::now().to_rfc3339(),
            ],
        )?;
        tracing::debug!(identity = %record.name, dimension = values.len(), "encoding persisted");
        Ok(())
    }

    /// Load every decodable record, skipping (and reporting) corrupt rows.
    ///
    /// The first good record fixes the dimension; later rows of another
    /// dimension are treated as corrupt so the result can seed a store.
    pub fn load_all(&self) -> Result<LoadReport, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT name, format_version, dimension, encoding FROM encodings ORDER BY name",
        )?;
        let mut rows = stmt.query([])?;

        let mut report = LoadReport::default();
        let mut dimension: Option<usize> = None;

        while let Some(row) = rows.next()? {
            let decoded = decode_row(row).and_then(|record| match dimension {
                Some(d) if d != record.encoding.dimension() => Err(CoreError::StoreCorrupt {
                    name: record.name.clone(),
                    reason: format!(
                        "dimension {} differs from store dimension {d}",
                        record.encoding.dimension()
                    ),
                }),
                _ => Ok(record),
            });

            match decoded {
                Ok(record) => {
                    dimension.get_or_insert(record.encoding.dimension());
                    report.records.push(record);
                }
                Err(err) => {
                    tracing::warn!(error = %err, "skipping corrupt encoding record");
                    report.skipped.push(err);
                }
            }
        }

        tracing::info!(
            loaded = report.records.len(),
            skipped = report.skipped.len(),
            "encodings loaded"
        );
        Ok(report)
    }

    pub fn count(&self) -> Result<usize, StoreError> {
        let n: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM encodings", [], |row| row.get(0))?;
        Ok(n as usize)
    }
}

fn decode_row(row: &Row<'_>) -> Result<EncodingRecord, CoreError> {
    let name: String = row.get(0).map_err(|e| CoreError::StoreCorrupt {
        name: "<unreadable>".into(),
        reason: e.to_string(),
    })?;
    let corrupt = |reason: String| CoreError::StoreCorrupt {
        name: name.clone(),
        reason,
    };

    if name.trim().is_empty() {
        return Err(corrupt("empty identity name".into()));
    }

    let version: i64 = row.get(1).map_err(|e| corrupt(e.to_string()))?;
    if version != ENCODING_FORMAT_VERSION {
        return Err(corrupt(format!("unsupported format version {version}")));
    }

    let dimension: i64 = row.get(2).map_err(|e| corrupt(e.to_string()))?;
    let blob: Vec<u8> = row.get(3).map_err(|e| corrupt(e.to_string()))?;
    let dimension = usize::try_from(dimension).map_err(|_| corrupt(format!("negative dimension {dimension}")))?;

    let values = decode_f32_blob(&blob, dimension).map_err(corrupt)?;
    Ok(EncodingRecord {
        name,
        encoding: FaceEncoding::new(values),
    })
}

fn encode_f32_blob(values: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(std::mem::size_of_val(values));
    for &value in values {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

fn decode_f32_blob(blob: &[u8], dimension: usize) -> Result<Vec<f32>, String> {
    if dimension == 0 {
        return Err("zero-dimension encoding".into());
    }
    let expected = dimension
        .checked_mul(std::mem::size_of::<f32>())
        .ok_or_else(|| format!("dimension {dimension} overflows"))?;
    if blob.len() != expected {
        return Err(format!(
            "blob is {} bytes, expected {expected} for dimension {dimension}",
            blob.len()
        ));
    }

    let mut out = Vec::with_capacity(dimension);
    for chunk in blob.chunks_exact(4) {
        let value = f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        if !value.is_finite() {
            return Err("encoding contains non-finite values".into());
        }
        out.push(value);
    }
    Ok(out)
}
