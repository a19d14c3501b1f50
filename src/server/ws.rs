//! WebSocket event stream for connected clients.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use serde::Deserialize;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::{AppState, Event, EventPayload, ExecInfo, WsEvent};

#[derive(Deserialize)]
pub struct WsQuery {
    #[serde(rename = "clientId")]
    client_id: Option<String>,
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    info!(client_id = ?query.client_id, "WebSocket client connecting");
    ws.on_upgrade(move |socket| handle_socket(socket, state, query.client_id))
}

async fn handle_socket(mut socket: WebSocket, state: AppState, client_id: Option<String>) {
    // The most recent connection becomes the addressed session.
    state.session.lock().client_id = client_id.clone();

    // Subscribe before the initial status so no event is missed in between.
    let mut rx = state.broadcast.subscribe();

    let status = WsEvent::Status {
        exec_info: ExecInfo {
            queue_remaining: state.queue.remaining(),
        },
    };
    if send_event(&mut socket, &Event::message(status)).await.is_err() {
        warn!("Failed to send initial status, client disconnected");
        return;
    }

    loop {
        tokio::select! {
            result = rx.recv() => {
                match result {
                    Ok(event) => {
                        if !addressed_to(&event, client_id.as_deref()) {
                            continue;
                        }
                        if send_event(&mut socket, &event).await.is_err() {
                            debug!("Client disconnected during send");
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        // This client fell behind; others are unaffected.
                        warn!(missed = n, "WS client lagged behind event stream");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        debug!("Event stream closed");
                        break;
                    }
                }
            }

            result = socket.recv() => {
                match result {
                    Some(Ok(Message::Ping(data))) => {
                        if socket.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        info!("WebSocket client disconnected");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "WebSocket error");
                        break;
                    }
                    // Inbound work goes through the REST surface.
                    _ => {}
                }
            }
        }
    }

    // Stop addressing a session that is gone.
    {
        let mut session = state.session.lock();
        if session.client_id == client_id {
            session.client_id = None;
        }
    }
    info!("WebSocket connection closed");
}

fn addressed_to(event: &Event, client_id: Option<&str>) -> bool {
    match event.client_id.as_deref() {
        None => true,
        Some(target) => Some(target) == client_id,
    }
}

async fn send_event(socket: &mut WebSocket, event: &Event) -> Result<(), axum::Error> {
    match &event.payload {
        EventPayload::Message(msg) => {
            let json = serde_json::to_string(msg).map_err(axum::Error::new)?;
            socket.send(Message::Text(json.into())).await
        }
        EventPayload::Preview(bytes) => socket.send(Message::Binary(bytes.clone().into())).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broadcast_events_reach_every_client() {
        let event = Event::message(WsEvent::Status {
            exec_info: ExecInfo { queue_remaining: 0 },
        });
        assert!(addressed_to(&event, Some("c1")));
        assert!(addressed_to(&event, None));
    }

    #[test]
    fn targeted_events_reach_only_their_client() {
        let event = Event::message(WsEvent::Executing {
            prompt_id: uuid::Uuid::new_v4(),
            node: None,
        })
        .for_client(Some("c1".to_string()));

        assert!(addressed_to(&event, Some("c1")));
        assert!(!addressed_to(&event, Some("c2")));
        assert!(!addressed_to(&event, None));
    }
}
