//! REST endpoints — prompt submission, queue/history queries, control flags.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use crate::job::PromptJob;
use crate::queue::{ControlFlag, Priority};

use super::{AppState, Event, ExecInfo, WsEvent};

pub async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": "promptd"
    }))
}

// ── Prompt submission ───────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct PromptRequest {
    prompt: serde_json::Value,
    #[serde(default)]
    client_id: Option<String>,
    /// Jump ahead of everything currently queued.
    #[serde(default)]
    front: bool,
    /// Explicit sequence number override.
    #[serde(default)]
    number: Option<i64>,
}

pub async fn submit_prompt(
    State(state): State<AppState>,
    Json(body): Json<PromptRequest>,
) -> impl IntoResponse {
    if !body.prompt.is_object() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "prompt must be a node map"})),
        );
    }

    let priority = match (body.number, body.front) {
        (Some(n), _) => Priority::At(n),
        (None, true) => Priority::Front,
        (None, false) => Priority::Back,
    };

    let job = PromptJob::new(body.prompt, body.client_id);
    let prompt_id = job.id;
    let number = state.queue.put(job, priority);

    let _ = state.events.send(Event::message(WsEvent::Status {
        exec_info: ExecInfo {
            queue_remaining: state.queue.remaining(),
        },
    }));

    (
        StatusCode::OK,
        Json(json!({"prompt_id": prompt_id, "number": number})),
    )
}

// ── Queue introspection ─────────────────────────────────────────────────

pub async fn get_queue(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "queue_remaining": state.queue.remaining(),
        "pending": state.queue.queued(),
    }))
}

#[derive(Deserialize)]
pub struct ModifyQueueRequest {
    #[serde(default)]
    clear: bool,
    #[serde(default)]
    delete: Vec<Uuid>,
}

pub async fn modify_queue(
    State(state): State<AppState>,
    Json(body): Json<ModifyQueueRequest>,
) -> impl IntoResponse {
    if body.clear {
        state.queue.wipe_queue();
    }
    for id in &body.delete {
        if !state.queue.delete(*id) {
            warn!(prompt_id = %id, "Delete requested for prompt not in queue");
        }
    }

    let _ = state.events.send(Event::message(WsEvent::Status {
        exec_info: ExecInfo {
            queue_remaining: state.queue.remaining(),
        },
    }));

    StatusCode::OK
}

// ── History ─────────────────────────────────────────────────────────────

pub async fn get_history(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.queue.all_history())
}

pub async fn get_history_entry(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let prompt_id = match Uuid::parse_str(&id) {
        Ok(id) => id,
        Err(_) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({"error": "Invalid prompt ID"})),
            );
        }
    };

    match state.queue.history(prompt_id) {
        Some(record) => (StatusCode::OK, Json(json!(record))),
        // Pending and unknown prompts look the same to a history reader.
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({"error": "No completion record"})),
        ),
    }
}

#[derive(Deserialize)]
pub struct ModifyHistoryRequest {
    #[serde(default)]
    clear: bool,
}

pub async fn modify_history(
    State(state): State<AppState>,
    Json(body): Json<ModifyHistoryRequest>,
) -> impl IntoResponse {
    if body.clear {
        state.queue.wipe_history();
    }
    StatusCode::OK
}

// ── Control signals ─────────────────────────────────────────────────────

pub async fn interrupt(State(state): State<AppState>) -> impl IntoResponse {
    info!("Interrupt requested");
    state.cancel.set();
    StatusCode::OK
}

#[derive(Deserialize)]
pub struct FreeRequest {
    #[serde(default)]
    unload_models: bool,
    #[serde(default)]
    free_memory: bool,
}

pub async fn free(
    State(state): State<AppState>,
    Json(body): Json<FreeRequest>,
) -> impl IntoResponse {
    if body.unload_models {
        state.queue.set_flag(ControlFlag::UnloadModels, true);
    }
    if body.free_memory {
        state.queue.set_flag(ControlFlag::FreeMemory, true);
    }
    StatusCode::OK
}
