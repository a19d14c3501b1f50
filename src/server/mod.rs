//! HTTP/WebSocket front end.
//!
//! Two concurrent activities share the tokio event loop: the axum router
//! (enqueue, flags, queries, WS upgrades) and [`publish_loop`], which drains
//! the outbound mpsc channel into a broadcast channel fanned out to WS
//! clients in arrival order. The mpsc sender is the only sanctioned path from
//! the worker thread into the event loop.

pub mod routes;
pub mod ws;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{broadcast, mpsc};
use tracing::debug;
use uuid::Uuid;

use crate::progress::CancelToken;
use crate::queue::PromptQueue;

/// Queue counters attached to status events.
#[derive(Debug, Clone, Serialize)]
pub struct ExecInfo {
    pub queue_remaining: usize,
}

/// JSON event frames delivered over the WebSocket.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum WsEvent {
    Status { exec_info: ExecInfo },
    /// `node: None` marks the end of a prompt's execution.
    Executing {
        prompt_id: Uuid,
        node: Option<String>,
    },
    Progress {
        value: u32,
        max: u32,
        prompt_id: Option<Uuid>,
        node: Option<String>,
    },
    ExecutionError { prompt_id: Uuid, message: String },
}

#[derive(Debug, Clone)]
pub enum EventPayload {
    Message(WsEvent),
    /// Raw preview artifact, sent as a binary frame.
    Preview(Vec<u8>),
}

/// One outbound event, optionally addressed to a single client.
#[derive(Debug, Clone)]
pub struct Event {
    pub payload: EventPayload,
    /// `None` broadcasts to every connected client.
    pub client_id: Option<String>,
}

impl Event {
    pub fn message(event: WsEvent) -> Self {
        Self {
            payload: EventPayload::Message(event),
            client_id: None,
        }
    }

    pub fn preview(image: Vec<u8>) -> Self {
        Self {
            payload: EventPayload::Preview(image),
            client_id: None,
        }
    }

    pub fn for_client(mut self, client_id: Option<String>) -> Self {
        self.client_id = client_id;
        self
    }
}

/// Sending half of the outbound channel. Safe to use from any thread.
pub type EventSender = mpsc::UnboundedSender<Event>;

/// Last known client session, used for addressing outbound messages.
/// Mutated by the server loop, read by the worker thread.
#[derive(Debug, Default)]
pub struct Session {
    pub client_id: Option<String>,
    pub last_prompt_id: Option<Uuid>,
    pub last_node_id: Option<String>,
}

pub type SharedSession = Arc<Mutex<Session>>;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub queue: Arc<PromptQueue>,
    pub events: EventSender,
    pub broadcast: broadcast::Sender<Event>,
    pub session: SharedSession,
    pub cancel: CancelToken,
}

/// Build the axum router for the daemon.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws::ws_handler))
        .route("/health", get(routes::health))
        .route("/prompt", post(routes::submit_prompt))
        .route("/queue", get(routes::get_queue).post(routes::modify_queue))
        .route("/history", get(routes::get_history).post(routes::modify_history))
        .route("/history/{id}", get(routes::get_history_entry))
        .route("/interrupt", post(routes::interrupt))
        .route("/free", post(routes::free))
        .layer(tower_http::cors::CorsLayer::permissive())
        .with_state(state)
}

/// Drain the outbound channel into the client fan-out, preserving arrival
/// order. A slow client lags on its own broadcast receiver and never stalls
/// delivery to the others.
pub async fn publish_loop(mut rx: mpsc::UnboundedReceiver<Event>, tx: broadcast::Sender<Event>) {
    while let Some(event) = rx.recv().await {
        // No receivers connected is fine — the event is simply dropped.
        let _ = tx.send(event);
    }
    debug!("Outbound channel closed, publish loop exiting");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ws_event_wire_format() {
        let event = WsEvent::Progress {
            value: 3,
            max: 10,
            prompt_id: None,
            node: Some("n4".to_string()),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "progress");
        assert_eq!(json["data"]["value"], 3);
        assert_eq!(json["data"]["node"], "n4");
    }

    #[tokio::test]
    async fn publish_loop_preserves_order() {
        let (tx, rx) = mpsc::unbounded_channel();
        let (btx, mut brx) = broadcast::channel(16);
        tokio::spawn(publish_loop(rx, btx));

        for value in 0..3u32 {
            tx.send(Event::message(WsEvent::Progress {
                value,
                max: 3,
                prompt_id: None,
                node: None,
            }))
            .unwrap();
        }

        for expected in 0..3u32 {
            let event = brx.recv().await.unwrap();
            match event.payload {
                EventPayload::Message(WsEvent::Progress { value, .. }) => {
                    assert_eq!(value, expected);
                }
                other => panic!("unexpected event: {other:?}"),
            }
        }
    }
}
