//! Per-job WebSocket progress subscriptions.
//!
//! `GET /api/v1/jobs/{id}/ws` upgrades and then pushes one JSON
//! `ProgressSnapshot` per state change. The server closes the socket
//! after the final (drained) snapshot, so clients can simply read until
//! end of stream.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    http::StatusCode,
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::metrics::{
    WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_TOTAL, WS_LAG_EVENTS, WS_SNAPSHOTS_SENT,
};
use crate::state::AppState;

/// WebSocket upgrade handler for one job's progress stream.
pub async fn job_ws_handler(
    ws: WebSocketUpgrade,
    Path(job_id): Path<String>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    // Reject unknown jobs before upgrading.
    if state.engine().snapshot(&job_id).await.is_none() {
        return StatusCode::NOT_FOUND.into_response();
    }

    ws.on_upgrade(move |socket| handle_socket(socket, state, job_id))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>, job_id: String) {
    let (mut sender, mut receiver) = socket.split();

    WS_CONNECTIONS_TOTAL.inc();
    WS_CONNECTIONS_ACTIVE.inc();
    debug!(job_id, "WebSocket subscriber connected");

    let subscription = state.engine().subscribe(&job_id).await;

    // Always lead with the current state so a late subscriber is not
    // left waiting for the next change.
    if let Some(snapshot) = state.engine().snapshot(&job_id).await {
        if send_snapshot(&mut sender, &snapshot).await.is_err() {
            WS_CONNECTIONS_ACTIVE.dec();
            return;
        }
    }

    match subscription {
        Some(mut rx) => {
            loop {
                tokio::select! {
                    result = rx.recv() => {
                        match result {
                            Ok(snapshot) => {
                                let drained = snapshot.drained;
                                if send_snapshot(&mut sender, &snapshot).await.is_err() {
                                    break;
                                }
                                if drained {
                                    break;
                                }
                            }
                            Err(broadcast::error::RecvError::Lagged(n)) => {
                                warn!(job_id, skipped = n, "WebSocket subscriber lagged");
                                WS_LAG_EVENTS.inc();
                            }
                            Err(broadcast::error::RecvError::Closed) => {
                                // Job drained; the final snapshot was the
                                // last broadcast before close.
                                break;
                            }
                        }
                    }
                    incoming = receiver.next() => {
                        match incoming {
                            Some(Ok(Message::Close(_))) | None => break,
                            Some(Ok(_)) => {}
                            Some(Err(e)) => {
                                debug!(job_id, "WebSocket receive error: {}", e);
                                break;
                            }
                        }
                    }
                }
            }
        }
        None => {
            // Job already drained; the leading snapshot said so.
        }
    }

    let _ = sender.send(Message::Close(None)).await;
    WS_CONNECTIONS_ACTIVE.dec();
    debug!(job_id, "WebSocket subscriber disconnected");
}

async fn send_snapshot(
    sender: &mut (impl SinkExt<Message> + Unpin),
    snapshot: &magpie_core::ProgressSnapshot,
) -> Result<(), ()> {
    let json = match serde_json::to_string(snapshot) {
        Ok(json) => json,
        Err(e) => {
            warn!("Failed to serialize snapshot: {}", e);
            return Err(());
        }
    };
    WS_SNAPSHOTS_SENT.inc();
    sender
        .send(Message::Text(json.into()))
        .await
        .map_err(|_| ())
}
