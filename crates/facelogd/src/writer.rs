use facelog_core::{LogSink, RecognitionEvent, SinkError};
use tokio::sync::mpsc;

/// Session-side sink that only enqueues; a dedicated thread does the I/O.
#[derive(Clone)]
pub struct QueuedSink {
    tx: mpsc::UnboundedSender<RecognitionEvent>,
}

impl LogSink for QueuedSink {
    fn append(&self, event: &RecognitionEvent) -> Result<(), SinkError> {
        self.tx.send(event.clone()).map_err(|_| SinkError::Closed)
    }
}

/// Spawn the log writer on its own OS thread.
///
/// The thread drains the queue into `sink` until every [`QueuedSink`] is
/// dropped. Write failures are logged and the event is discarded.
pub fn spawn_log_writer<S>(sink: S) -> std::io::Result<(QueuedSink, std::thread::JoinHandle<()>)>
where
    S: LogSink + Send + 'static,
{
    let (tx, mut rx) = mpsc::unbounded_channel::<RecognitionEvent>();

    let handle = std::thread::Builder::new()
        .name("facelog-writer".into())
        .spawn(move || {
            tracing::info!("log writer started");
            let mut written = 0usize;
            while let Some(event) = rx.blocking_recv() {
                match sink.append(&event) {
                    Ok(()) => written += 1,
                    Err(e) => {
                        tracing::warn!(identity = %event.name, error = %e, "failed to write recognition event")
                    }
                }
            }
            tracing::info!(written, "log writer exiting");
        })?;

    Ok((QueuedSink { tx }, handle))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use facelog_core::WindowName;
    use std::sync::{Arc, Mutex};

    #[derive(Default, Clone)]
    struct SharedSink {
        events: Arc<Mutex<Vec<String>>>,
    }

    impl LogSink for SharedSink {
        fn append(&self, event: &RecognitionEvent) -> Result<(), SinkError> {
            self.events.lock().unwrap().push(event.name.clone());
            Ok(())
        }
    }

    fn event(name: &str) -> RecognitionEvent {
        RecognitionEvent {
            name: name.into(),
            timestamp: NaiveDate::from_ymd_opt(2024, 5, 20)
                .unwrap()
                .and_hms_opt(8, 0, 0)
                .unwrap(),
            window: WindowName::Morning,
        }
    }

    #[test]
    fn test_events_drained_in_order() {
        let sink = SharedSink::default();
        let (queued, handle) = spawn_log_writer(sink.clone()).unwrap();

        queued.append(&event("alice")).unwrap();
        queued.append(&event("bob")).unwrap();
        drop(queued);
        handle.join().unwrap();

        assert_eq!(*sink.events.lock().unwrap(), vec!["alice", "bob"]);
    }

    #[test]
    fn test_append_after_writer_exit_is_closed() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let queued = QueuedSink { tx };
        assert!(matches!(queued.append(&event("bob")), Err(SinkError::Closed)));
    }
}
