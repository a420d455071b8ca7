use crate::engine::{EngineError, EngineHandle};
use chrono::NaiveDateTime;
use facelog_core::CoreError;
use zbus::interface;

pub const BUS_NAME: &str = "org.facelog.Attendance1";
pub const OBJECT_PATH: &str = "/org/facelog/Attendance1";

/// D-Bus interface for the facelog recognition daemon.
///
/// Bus name: org.facelog.Attendance1
/// Object path: /org/facelog/Attendance1
pub struct AttendanceService {
    engine: EngineHandle,
}

impl AttendanceService {
    pub fn new(engine: EngineHandle) -> Self {
        Self { engine }
    }
}

#[interface(name = "org.facelog.Attendance1")]
impl AttendanceService {
    /// Enroll (or replace) the encoding for `name`. An empty encoding
    /// means the capture contained no face and is rejected.
    async fn enroll(&self, name: &str, encoding: Vec<f64>) -> zbus::fdo::Result<()> {
        tracing::info!(name, dimension = encoding.len(), "enroll requested");
        self.engine
            .enroll(name.to_string(), to_f32(&encoding))
            .await
            .map_err(to_fdo)
    }

    /// Match a probe taken now. Returns the outcome as JSON.
    async fn recognize(&self, encoding: Vec<f64>) -> zbus::fdo::Result<String> {
        let now = chrono::Local::now().naive_local();
        self.recognize_inner(&encoding, now).await
    }

    /// Match a probe taken at `timestamp` (`YYYY-MM-DD HH:MM:SS`).
    async fn recognize_at(&self, encoding: Vec<f64>, timestamp: &str) -> zbus::fdo::Result<String> {
        let at = parse_timestamp(timestamp)
            .ok_or_else(|| zbus::fdo::Error::InvalidArgs(format!("bad timestamp: {timestamp}")))?;
        self.recognize_inner(&encoding, at).await
    }

    /// List enrolled identity names in store order, as JSON.
    async fn list_identities(&self) -> zbus::fdo::Result<String> {
        let names = self.engine.list().await.map_err(to_fdo)?;
        Ok(serde_json::json!(names).to_string())
    }

    /// Return daemon status information as JSON.
    async fn status(&self) -> zbus::fdo::Result<String> {
        let status = self.engine.status().await.map_err(to_fdo)?;
        serde_json::to_string(&status).map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
    }

    /// Clear every identity's last logged window.
    async fn reset(&self) -> zbus::fdo::Result<bool> {
        tracing::info!("reset requested");
        self.engine.reset().await.map_err(to_fdo)?;
        Ok(true)
    }
}

impl AttendanceService {
    async fn recognize_inner(&self, encoding: &[f64], at: NaiveDateTime) -> zbus::fdo::Result<String> {
        let outcome = self
            .engine
            .recognize(to_f32(encoding), at)
            .await
            .map_err(to_fdo)?;
        serde_json::to_string(&outcome).map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
    }
}

fn to_f32(values: &[f64]) -> Vec<f32> {
    values.iter().map(|&v| v as f32).collect()
}

fn to_fdo(err: EngineError) -> zbus::fdo::Error {
    match err {
        EngineError::Core(CoreError::InvalidInput(msg)) => zbus::fdo::Error::InvalidArgs(msg),
        EngineError::Core(CoreError::NoFaceVector) => {
            zbus::fdo::Error::InvalidArgs("no usable face vector".into())
        }
        other => zbus::fdo::Error::Failed(other.to_string()),
    }
}

/// Accepts `YYYY-MM-DD HH:MM:SS`, with either a space or `T` separator.
pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw.trim(), fmt).ok())
}
