use std::sync::Arc;

use tokio::sync::mpsc;

use super::{
    DownloadEntry, DownloadHistory, EngineEvent, EventEnvelope, EventHandle, EventRecord,
    EventStore,
};

/// Background task that receives engine events and persists them
///
/// Completed tasks are additionally recorded in the download history
/// ledger when one is attached.
pub struct EventWriter {
    rx: mpsc::Receiver<EventEnvelope>,
    store: Arc<dyn EventStore>,
    history: Option<Arc<dyn DownloadHistory>>,
}

impl EventWriter {
    pub fn new(rx: mpsc::Receiver<EventEnvelope>, store: Arc<dyn EventStore>) -> Self {
        Self {
            rx,
            store,
            history: None,
        }
    }

    pub fn with_history(mut self, history: Arc<dyn DownloadHistory>) -> Self {
        self.history = Some(history);
        self
    }

    /// Run the writer, consuming events until every handle is dropped.
    ///
    /// Spawn this as a background task.
    pub async fn run(mut self) {
        tracing::info!("Event writer started");

        while let Some(envelope) = self.rx.recv().await {
            if let (
                Some(history),
                EngineEvent::TaskCompleted {
                    source,
                    remote_id,
                    path,
                    bytes,
                    ..
                },
            ) = (&self.history, &envelope.event)
            {
                let entry = DownloadEntry {
                    source: source.clone(),
                    remote_id: remote_id.clone(),
                    path: path.clone(),
                    bytes: *bytes,
                    downloaded_at: envelope.timestamp,
                };
                if let Err(e) = history.record(&entry) {
                    tracing::error!("Failed to record download history: {}", e);
                }
            }

            let record = EventRecord {
                id: 0, // Assigned by the store
                timestamp: envelope.timestamp,
                event_type: envelope.event.event_type().to_string(),
                job_id: envelope.event.job_id().map(String::from),
                data: envelope.event,
            };

            if let Err(e) = self.store.insert(&record) {
                tracing::error!("Failed to write engine event: {}", e);
            }
        }

        tracing::info!("Event writer shutting down");
    }
}

/// Create a complete event system
///
/// Returns:
/// - `EventHandle` - for emitting events (clone to share across tasks)
/// - `EventWriter` - spawn with `tokio::spawn(writer.run())`
pub fn create_event_system(
    store: Arc<dyn EventStore>,
    buffer_size: usize,
) -> (EventHandle, EventWriter) {
    let (tx, rx) = mpsc::channel(buffer_size);
    let handle = EventHandle::new(tx);
    let writer = EventWriter::new(rx, store);
    (handle, writer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{EventFilter, SqliteEventLog};

    #[tokio::test]
    async fn test_writer_persists_events() {
        let log = Arc::new(SqliteEventLog::in_memory().unwrap());
        let (handle, writer) = create_event_system(log.clone(), 10);
        let writer_handle = tokio::spawn(writer.run());

        handle
            .emit(EngineEvent::SessionStarted {
                version: "0.1.0".to_string(),
                sources: vec![],
            })
            .await;
        drop(handle);
        writer_handle.await.unwrap();

        let records = log.query(&EventFilter::new()).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].event_type, "session_started");
    }

    #[tokio::test]
    async fn test_writer_records_download_history() {
        let log = Arc::new(SqliteEventLog::in_memory().unwrap());
        let (handle, writer) = create_event_system(log.clone(), 10);
        let writer = writer.with_history(log.clone());
        let writer_handle = tokio::spawn(writer.run());

        handle
            .emit(EngineEvent::TaskCompleted {
                job_id: "j1".to_string(),
                source: "e621".to_string(),
                remote_id: "42".to_string(),
                path: "media/e621/42.png".to_string(),
                bytes: 512,
            })
            .await;
        // Failures don't end up in the ledger.
        handle
            .emit(EngineEvent::TaskFailed {
                job_id: "j1".to_string(),
                source: "e621".to_string(),
                remote_id: "43".to_string(),
                kind: "permanent".to_string(),
                error: "HTTP 404".to_string(),
                attempts: 1,
            })
            .await;
        drop(handle);
        writer_handle.await.unwrap();

        assert!(log.was_downloaded("e621", "42").unwrap());
        assert!(!log.was_downloaded("e621", "43").unwrap());
        assert_eq!(log.query(&EventFilter::new()).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_writer_exits_when_all_handles_drop() {
        let log = Arc::new(SqliteEventLog::in_memory().unwrap());
        let (handle, writer) = create_event_system(log.clone(), 10);
        let handle2 = handle.clone();
        let writer_handle = tokio::spawn(writer.run());

        handle
            .emit(EngineEvent::SessionStopped {
                reason: "shutdown".to_string(),
            })
            .await;

        drop(handle);
        assert!(!writer_handle.is_finished());

        drop(handle2);
        let result =
            tokio::time::timeout(std::time::Duration::from_secs(1), writer_handle).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_writer_continues_on_store_failure() {
        struct FailingStore;
        impl EventStore for FailingStore {
            fn insert(&self, _record: &EventRecord) -> Result<i64, crate::events::EventError> {
                Err(crate::events::EventError::Database("nope".to_string()))
            }
            fn query(
                &self,
                _filter: &EventFilter,
            ) -> Result<Vec<EventRecord>, crate::events::EventError> {
                Ok(vec![])
            }
        }

        let (handle, writer) = create_event_system(Arc::new(FailingStore), 10);
        let writer_handle = tokio::spawn(writer.run());

        handle
            .emit(EngineEvent::JobCancelled {
                job_id: "j1".to_string(),
            })
            .await;
        drop(handle);

        // Writer shuts down cleanly despite insert failures.
        writer_handle.await.unwrap();
    }
}
