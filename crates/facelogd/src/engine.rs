use crate::config::Config;
use crate::writer::{self, QueuedSink};
use chrono::NaiveDateTime;
use facelog_core::{
    CoreError, DedupGate, EncodingRecord, EncodingStore, EuclideanMatcher, FaceEncoding,
    ProbeOutcome, RecognitionSession,
};
use facelog_store::{EncodingRepository, FanoutSink, SqliteLogSink, StoreError, TextFileSink};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

type Session = RecognitionSession<QueuedSink, EuclideanMatcher>;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Core(#[from] CoreError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Snapshot of engine state for the `Status` call.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub version: &'static str,
    pub enrolled: usize,
    pub dimension: Option<usize>,
    pub tracked_identities: usize,
    pub match_threshold: f32,
    pub match_policy: facelog_core::MatchPolicy,
    pub dedup_key: facelog_core::DedupKey,
    pub current_period: String,
    pub windows: Vec<facelog_core::TimeWindow>,
}

/// Messages sent from D-Bus handlers to the engine thread.
enum EngineRequest {
    Enroll {
        name: String,
        encoding: Vec<f32>,
        reply: oneshot::Sender<Result<(), EngineError>>,
    },
    Recognize {
        encoding: Vec<f32>,
        at: NaiveDateTime,
        reply: oneshot::Sender<ProbeOutcome>,
    },
    List {
        reply: oneshot::Sender<Vec<String>>,
    },
    Status {
        reply: oneshot::Sender<EngineStatus>,
    },
    Reset {
        reply: oneshot::Sender<()>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    async fn request<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> EngineRequest) -> Result<T, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(build(reply_tx))
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)
    }

    /// Enroll (or re-enroll) `name`. An empty encoding means no face was found.
    pub async fn enroll(&self, name: String, encoding: Vec<f32>) -> Result<(), EngineError> {
        self.request(|reply| EngineRequest::Enroll {
            name,
            encoding,
            reply,
        })
        .await?
    }

    /// Run one probe taken at `at` through match, classify and gate.
    pub async fn recognize(&self, encoding: Vec<f32>, at: NaiveDateTime) -> Result<ProbeOutcome, EngineError> {
        self.request(|reply| EngineRequest::Recognize { encoding, at, reply })
            .await
    }

    pub async fn list(&self) -> Result<Vec<String>, EngineError> {
        self.request(|reply| EngineRequest::List { reply }).await
    }

    pub async fn status(&self) -> Result<EngineStatus, EngineError> {
        self.request(|reply| EngineRequest::Status { reply }).await
    }

    /// Forget every identity's last logged window.
    pub async fn reset(&self) -> Result<(), EngineError> {
        self.request(|reply| EngineRequest::Reset { reply }).await
    }

    /// Stop the engine thread and wait until every queued log event has
    /// been written. Requests sent afterwards fail with `ChannelClosed`.
    pub async fn shutdown(&self) -> Result<(), EngineError> {
        self.request(|reply| EngineRequest::Shutdown { reply }).await
    }
}

/// Spawn the engine on a dedicated OS thread.
///
/// Opens the database, loads enrolled encodings (skipping corrupt rows),
/// starts the log writer, then enters a request loop that handles one
/// request at a time. Fails fast at startup if storage is unavailable.
///
/// The loop ends on `Shutdown` or once every handle is dropped; the
/// writer is then drained and joined before the thread exits.
pub fn spawn_engine(config: &Config) -> Result<EngineHandle, EngineError> {
    let schedule = config.schedule()?;
    let repo = EncodingRepository::open(&config.db_path)?;

    let report = repo.load_all()?;
    if !report.skipped.is_empty() {
        tracing::warn!(count = report.skipped.len(), "corrupt encoding records ignored");
    }
    let store = Arc::new(EncodingStore::with_records(report.records)?);
    tracing::info!(
        path = %config.db_path.display(),
        enrolled = store.len(),
        "encoding store ready"
    );

    if let Some(parent) = config.text_log_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let fanout = FanoutSink::new()
        .with(SqliteLogSink::open(&config.db_path)?)
        .with(TextFileSink::new(&config.text_log_path));
    let (queued, writer) = writer::spawn_log_writer(fanout)?;

    let matcher = EuclideanMatcher::new(config.match_threshold, config.match_policy);
    let session = Session::new(
        store,
        matcher,
        schedule,
        DedupGate::new(config.dedup_key),
        queued,
    );

    let (tx, mut rx) = mpsc::channel::<EngineRequest>(config.request_queue.max(1));

    std::thread::Builder::new()
        .name("facelog-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            let mut shutdown_reply = None;
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Enroll {
                        name,
                        encoding,
                        reply,
                    } => {
                        let _ = reply.send(run_enroll(&session, &repo, &name, encoding));
                    }
                    EngineRequest::Recognize { encoding, at, reply } => {
                        let probe = probe_from(encoding);
                        let _ = reply.send(session.process(probe.as_ref(), at));
                    }
                    EngineRequest::List { reply } => {
                        let names = session
                            .store()
                            .records()
                            .iter()
                            .map(|r| r.name.to_string())
                            .collect();
                        let _ = reply.send(names);
                    }
                    EngineRequest::Status { reply } => {
                        let _ = reply.send(status_of(&session, matcher));
                    }
                    EngineRequest::Reset { reply } => {
                        session.gate().reset();
                        tracing::info!("dedup state reset");
                        let _ = reply.send(());
                    }
                    EngineRequest::Shutdown { reply } => {
                        shutdown_reply = Some(reply);
                        break;
                    }
                }
            }

            // Dropping the session closes the log queue.
            drop(session);
            if writer.join().is_err() {
                tracing::error!("log writer panicked; queued events may be lost");
            }
            tracing::info!("engine thread exiting");
            if let Some(reply) = shutdown_reply {
                let _ = reply.send(());
            }
        })?;

    Ok(EngineHandle { tx })
}

/// An empty vector is the wire form of "no usable face".
fn probe_from(values: Vec<f32>) -> Option<FaceEncoding> {
    if values.is_empty() {
        None
    } else {
        Some(FaceEncoding::new(values))
    }
}

/// Add to the in-memory store, then persist. A rejected enrollment never
/// reaches the database.
fn run_enroll(
    session: &Session,
    repo: &EncodingRepository,
    name: &str,
    encoding: Vec<f32>,
) -> Result<(), EngineError> {
    let name = name.trim();
    let encoding = probe_from(encoding);
    session.enroll(name, encoding.clone())?;

    let record = EncodingRecord {
        name: name.to_string(),
        encoding: encoding.ok_or(CoreError::NoFaceVector)?,
    };
    if let Err(e) = repo.save(&record) {
        tracing::warn!(identity = name, error = %e, "enrolled in memory but not persisted");
        return Err(e.into());
    }
    Ok(())
}

fn status_of(session: &Session, matcher: EuclideanMatcher) -> EngineStatus {
    let now = chrono::Local::now().naive_local();
    EngineStatus {
        version: env!("CARGO_PKG_VERSION"),
        enrolled: session.store().len(),
        dimension: session.store().dimension(),
        tracked_identities: session.gate().tracked(),
        match_threshold: matcher.threshold,
        match_policy: matcher.policy,
        dedup_key: session.gate().key(),
        current_period: session.schedule().classify(now).to_string(),
        windows: session.schedule().windows().to_vec(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use facelog_core::WindowName;
    use std::path::Path;
    use std::time::Duration;

    fn at(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 5, 20)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    fn test_config(dir: &Path) -> Config {
        let dir = dir.to_string_lossy().into_owned();
        Config::from_lookup(move |key| match key {
            "FACELOG_DB_PATH" => Some(format!("{dir}/facelog.db")),
            "FACELOG_TEXT_LOG" => Some(format!("{dir}/recognition_log.txt")),
            _ => None,
        })
    }

    async fn wait_for_lines(path: &Path, lines: usize) -> String {
        for _ in 0..100 {
            if let Ok(contents) = std::fs::read_to_string(path) {
                if contents.lines().count() >= lines {
                    return contents;
                }
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        std::fs::read_to_string(path).unwrap_or_default()
    }

    #[tokio::test]
    async fn test_enroll_recognize_and_log() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let engine = spawn_engine(&config).unwrap();
        let bob = vec![0.1, 0.2, 0.3];

        engine.enroll("bob".into(), bob.clone()).await.unwrap();

        let first = engine.recognize(bob.clone(), at(8, 0)).await.unwrap();
        assert_eq!(first.event().unwrap().window, WindowName::Morning);

        let second = engine.recognize(bob.clone(), at(8, 5)).await.unwrap();
        assert!(matches!(second, ProbeOutcome::AlreadyLogged { .. }));

        let third = engine.recognize(bob.clone(), at(12, 0)).await.unwrap();
        assert_eq!(third.event().unwrap().window, WindowName::Lunch);

        let contents = wait_for_lines(&config.text_log_path, 2).await;
        assert_eq!(
            contents,
            "Recognized: bob, 2024-05-20 08:00:00 AM\nRecognized: bob, 2024-05-20 12:00:00 PM\n"
        );

        let rows = SqliteLogSink::open(&config.db_path).unwrap().recent(10).unwrap();
        assert_eq!(rows.len(), 2);
    }

    #[tokio::test]
    async fn test_empty_encoding_rejected_without_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let engine = spawn_engine(&config).unwrap();

        engine.enroll("bob".into(), vec![0.1, 0.2]).await.unwrap();
        let err = engine.enroll("bob".into(), vec![]).await.unwrap_err();
        assert!(matches!(err, EngineError::Core(CoreError::NoFaceVector)));

        let err = engine.enroll(" ".into(), vec![0.1, 0.2]).await.unwrap_err();
        assert!(matches!(err, EngineError::Core(CoreError::InvalidInput(_))));

        let outcome = engine.recognize(vec![0.1, 0.2], at(8, 0)).await.unwrap();
        assert_eq!(outcome.identity(), Some("bob"));
        assert_eq!(EncodingRepository::open(&config.db_path).unwrap().count().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_enrollments_survive_restart() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());

        let engine = spawn_engine(&config).unwrap();
        engine.enroll("carol".into(), vec![0.5, 0.5]).await.unwrap();
        engine.enroll("alice".into(), vec![0.1, 0.1]).await.unwrap();
        drop(engine);

        let restarted = spawn_engine(&config).unwrap();
        assert_eq!(restarted.list().await.unwrap(), vec!["alice", "carol"]);
    }

    #[tokio::test]
    async fn test_status_and_reset() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let engine = spawn_engine(&config).unwrap();

        engine.enroll("bob".into(), vec![0.1]).await.unwrap();
        engine.recognize(vec![0.1], at(8, 0)).await.unwrap();

        let status = engine.status().await.unwrap();
        assert_eq!(status.enrolled, 1);
        assert_eq!(status.dimension, Some(1));
        assert_eq!(status.tracked_identities, 1);
        assert_eq!(status.windows.len(), 4);

        engine.reset().await.unwrap();
        assert_eq!(engine.status().await.unwrap().tracked_identities, 0);
        let again = engine.recognize(vec![0.1], at(8, 1)).await.unwrap();
        assert!(matches!(again, ProbeOutcome::Logged { .. }));
    }

    #[tokio::test]
    async fn test_non_finite_encoding_never_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let engine = spawn_engine(&config).unwrap();

        let err = engine
            .enroll("aaa".into(), vec![f32::NAN, 0.0, 0.0])
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Core(CoreError::InvalidInput(_))));
        engine.enroll("bob".into(), vec![0.2, 0.4, 0.6]).await.unwrap();

        let outcome = engine.recognize(vec![0.2, 0.4, 0.6], at(8, 0)).await.unwrap();
        assert_eq!(outcome.identity(), Some("bob"));
        let stray = engine.recognize(vec![f32::NAN, 0.0, 0.0], at(12, 0)).await.unwrap();
        assert_eq!(stray, ProbeOutcome::NoMatch);

        let report = EncodingRepository::open(&config.db_path).unwrap().load_all().unwrap();
        assert_eq!(report.records.len(), 1);
        assert_eq!(report.records[0].name, "bob");
        assert!(report.skipped.is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_flushes_queued_events() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let engine = spawn_engine(&config).unwrap();

        engine.enroll("bob".into(), vec![0.1, 0.2]).await.unwrap();
        engine.recognize(vec![0.1, 0.2], at(8, 0)).await.unwrap();
        engine.recognize(vec![0.1, 0.2], at(12, 0)).await.unwrap();
        engine.shutdown().await.unwrap();

        // No polling: shutdown returns only after the writer has drained.
        let contents = std::fs::read_to_string(&config.text_log_path).unwrap();
        assert_eq!(contents.lines().count(), 2);
        let rows = SqliteLogSink::open(&config.db_path).unwrap().recent(10).unwrap();
        assert_eq!(rows.len(), 2);

        let err = engine.status().await.unwrap_err();
        assert!(matches!(err, EngineError::ChannelClosed));
    }

    #[tokio::test]
    async fn test_no_face_probe() {
        let dir = tempfile::tempdir().unwrap();
        let engine = spawn_engine(&test_config(dir.path())).unwrap();
        let outcome = engine.recognize(vec![], at(8, 0)).await.unwrap();
        assert_eq!(outcome, ProbeOutcome::NoFaceVector);
    }
}
