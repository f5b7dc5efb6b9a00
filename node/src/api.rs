//! # HTTP Façade
//!
//! The axum router exposing the node over a simple JSON protocol. Error
//! bodies are plain text; structured success bodies are JSON.
//!
//! | Method | Path             | Description                                |
//! |--------|------------------|--------------------------------------------|
//! | GET    | `/ping`          | Liveness probe, returns `pong`             |
//! | POST   | `/gossip`        | Ingest a gossip message from a peer        |
//! | POST   | `/pex`           | Answer a peer-exchange request             |
//! | POST   | `/message`       | Submit a complete message locally          |
//! | POST   | `/add_message`   | Submit `{type, payload}`; id is assigned   |
//! | GET    | `/messages`      | List stored message ids                    |
//! | GET    | `/messages/{id}` | Fetch one stored message                   |

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use tower_http::trace::TraceLayer;
use tracing::warn;

use concoin_protocol::gossip::{GossipError, GossipProtocol};
use concoin_protocol::hooks::{HookManager, Phase};
use concoin_protocol::model::{GossipMessage, PexMessage, PexMessageType};
use concoin_protocol::pex::PexProtocol;
use concoin_protocol::storage::{Storage, StorageError};

// ---------------------------------------------------------------------------
// Application State
// ---------------------------------------------------------------------------

/// Shared state for all request handlers. Cheap to clone — everything
/// behind `Arc`.
#[derive(Clone)]
pub struct AppState {
    pub storage: Arc<Storage>,
    pub gossip: Arc<GossipProtocol>,
    pub pex: Arc<PexProtocol>,
    pub hooks: Arc<HookManager>,
}

/// Builds the full router with request tracing attached.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/ping", get(ping_handler))
        .route("/gossip", post(gossip_handler))
        .route("/pex", post(pex_handler))
        .route("/message", post(message_handler))
        .route("/add_message", post(add_message_handler))
        .route("/messages", get(list_messages_handler))
        .route("/messages/{id}", get(get_message_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// `GET /ping` — liveness probe for peers vetting this node.
async fn ping_handler() -> &'static str {
    "pong"
}

/// `POST /gossip` — ingest a message pushed by a peer.
///
/// Duplicates and expired messages are normal operation and return 200;
/// only a hook-validation failure is the peer's problem.
async fn gossip_handler(
    State(state): State<AppState>,
    Json(message): Json<GossipMessage>,
) -> Response {
    match state.gossip.handle_message(message).await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(GossipError::Validation(message_id)) => (
            StatusCode::BAD_REQUEST,
            format!("message validation failed: {message_id}"),
        )
            .into_response(),
    }
}

/// `POST /pex` — answer a peer-exchange request.
async fn pex_handler(State(state): State<AppState>, Json(request): Json<PexMessage>) -> Response {
    if request.kind != PexMessageType::Request {
        return (StatusCode::BAD_REQUEST, "invalid message type").into_response();
    }
    Json(state.pex.handle_pex_request(request).await).into_response()
}

/// `POST /message` — submit a complete, pre-stamped message locally.
async fn message_handler(
    State(state): State<AppState>,
    Json(message): Json<GossipMessage>,
) -> Response {
    submit_message(&state, message).await
}

/// Body of `POST /add_message`.
#[derive(Debug, Deserialize)]
struct AddMessageRequest {
    #[serde(rename = "type")]
    message_type: String,
    payload: serde_json::Value,
}

/// `POST /add_message` — originate a message from `{type, payload}`.
/// The message id, origin, timestamp, and TTL are server-assigned.
async fn add_message_handler(
    State(state): State<AppState>,
    Json(request): Json<AddMessageRequest>,
) -> Response {
    let message = state
        .gossip
        .originate(&request.message_type, request.payload);
    submit_message(&state, message).await
}

/// The local submission pipeline shared by `/message` and `/add_message`:
/// hook validation (push), persistence, hook processing, then spread.
/// A message that fails validation is neither persisted nor spread.
async fn submit_message(state: &AppState, message: GossipMessage) -> Response {
    if !state.hooks.validate_message(&message, Phase::Push) {
        return (
            StatusCode::BAD_REQUEST,
            format!("message validation failed: {}", message.message_id),
        )
            .into_response();
    }

    if let Err(err) = state.storage.save_message(&message) {
        warn!(message_id = %message.message_id, error = %err, "failed to persist message");
        return (StatusCode::INTERNAL_SERVER_ERROR, "failed to save message").into_response();
    }

    state.hooks.process_message(&message, Phase::Push);
    state.gossip.submit(&message).await;

    Json(serde_json::json!({
        "status": "success",
        "message_id": message.message_id,
    }))
    .into_response()
}

/// `GET /messages` — ids of all stored messages.
async fn list_messages_handler(State(state): State<AppState>) -> Response {
    match state.storage.list_message_ids() {
        Ok(ids) => Json(ids).into_response(),
        Err(err) => {
            warn!(error = %err, "failed to list messages");
            (StatusCode::INTERNAL_SERVER_ERROR, "failed to get messages").into_response()
        }
    }
}

/// `GET /messages/{id}` — one stored message, or 404.
async fn get_message_handler(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.storage.get_message(&id) {
        Ok(message) => Json(message).into_response(),
        Err(StorageError::NotFound(_)) => {
            (StatusCode::NOT_FOUND, "message not found").into_response()
        }
        Err(err) => {
            warn!(message_id = %id, error = %err, "failed to read message");
            (StatusCode::INTERNAL_SERVER_ERROR, "failed to get message").into_response()
        }
    }
}
