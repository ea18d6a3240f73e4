use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

use super::EngineEvent;

/// Envelope wrapping an engine event with its emission time
#[derive(Debug, Clone)]
pub struct EventEnvelope {
    pub timestamp: DateTime<Utc>,
    pub event: EngineEvent,
}

/// Handle for emitting engine events
///
/// Cheaply cloneable and shared across workers. Events are sent through an
/// async channel to be persisted by the `EventWriter`. Emission never fails
/// the caller; a full or closed channel is logged and dropped.
#[derive(Clone)]
pub struct EventHandle {
    tx: mpsc::Sender<EventEnvelope>,
}

impl EventHandle {
    pub fn new(tx: mpsc::Sender<EventEnvelope>) -> Self {
        Self { tx }
    }

    /// Emit an event asynchronously.
    pub async fn emit(&self, event: EngineEvent) {
        let envelope = EventEnvelope {
            timestamp: Utc::now(),
            event,
        };
        if let Err(e) = self.tx.send(envelope).await {
            tracing::error!("Failed to emit engine event: {}", e);
        }
    }

    /// Try to emit without waiting. Returns false if the channel is full
    /// or closed.
    pub fn try_emit(&self, event: EngineEvent) -> bool {
        let envelope = EventEnvelope {
            timestamp: Utc::now(),
            event,
        };
        match self.tx.try_send(envelope) {
            Ok(()) => true,
            Err(e) => {
                tracing::error!("Failed to emit engine event: {}", e);
                false
            }
        }
    }
}
