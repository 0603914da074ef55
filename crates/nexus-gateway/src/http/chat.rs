//! POST /chat, POST /abort — the primary chat surface.

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures_util::Stream;
use nexus_core::types::{Sensitivity, TaskRole};
use nexus_orchestrator::ChatTurnRequest;
use nexus_provider::ChatChunk;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::warn;

use crate::app::AppState;

#[derive(Deserialize)]
pub struct ChatMessage {
    #[allow(dead_code)]
    pub role: String,
    pub content: String,
}

#[derive(Deserialize)]
pub struct ChatRequest {
    #[serde(default, rename = "conversationId")]
    pub conversation_id: Option<String>,
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub stream: bool,
    #[serde(default)]
    pub sensitivity: Option<Sensitivity>,
    #[serde(default)]
    pub role: Option<TaskRole>,
    #[serde(default, rename = "requestId")]
    pub request_id: Option<String>,
}

fn last_user_message(req: &ChatRequest) -> Result<&str, (StatusCode, Json<Value>)> {
    req.messages
        .last()
        .map(|m| m.content.as_str())
        .ok_or_else(|| (StatusCode::BAD_REQUEST, Json(json!({ "success": false, "error": "messages cannot be empty" }))))
}

/// POST /chat — dispatches one chat turn. `stream:true` returns Server-Sent
/// Events; otherwise the full reply is returned as a single JSON body.
pub async fn chat_handler(State(state): State<Arc<AppState>>, Json(req): Json<ChatRequest>) -> Response {
    let message = match last_user_message(&req) {
        Ok(m) => m.to_string(),
        Err(e) => return e.into_response(),
    };
    let request_id = req.request_id.clone().unwrap_or_else(nexus_core::types::new_ephemeral_id);

    let turn = ChatTurnRequest {
        user_id: "default-user".to_string(),
        agent_id: "gateway".to_string(),
        conversation_id: req.conversation_id.clone(),
        message,
        sensitivity: req.sensitivity.unwrap_or(Sensitivity::Public),
        task_role: req.role.unwrap_or(TaskRole::Chat),
        model: None,
        request_id,
    };

    if req.stream {
        stream_turn(state, turn).await.into_response()
    } else {
        non_stream_turn(state, turn).await.into_response()
    }
}

async fn non_stream_turn(state: Arc<AppState>, turn: ChatTurnRequest) -> Response {
    match state.orchestrator.process_turn(turn).await {
        Ok(outcome) => Json(json!({
            "success": true,
            "content": outcome.content,
            "metadata": {
                "modelWay": outcome.model_way,
                "conversationId": outcome.conversation_id,
                "aborted": outcome.aborted,
            },
        }))
        .into_response(),
        Err(e) => {
            warn!(error = %e, "POST /chat failed");
            (
                status_for(&e),
                Json(json!({ "success": false, "error": e.code(), "message": e.to_string() })),
            )
                .into_response()
        }
    }
}

async fn stream_turn(state: Arc<AppState>, turn: ChatTurnRequest) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, Response> {
    let mut rx = state.orchestrator.process_turn_stream(turn).await.map_err(|e| {
        (
            status_for(&e),
            Json(json!({ "success": false, "error": e.code(), "message": e.to_string() })),
        )
            .into_response()
    })?;

    let stream = async_stream::stream! {
        while let Some(chunk) = rx.recv().await {
            match chunk {
                ChatChunk::Delta { delta } => yield Ok(Event::default().data(json!({ "delta": delta }).to_string())),
                ChatChunk::ToolCall { name, arguments } => {
                    yield Ok(Event::default().data(json!({ "toolCall": { "name": name, "arguments": arguments } }).to_string()));
                }
                ChatChunk::Done { finish_reason } => {
                    yield Ok(Event::default().data(json!({ "done": true, "finishReason": finish_reason }).to_string()));
                }
                ChatChunk::Error { message } => {
                    yield Ok(Event::default().event("error").data(message));
                }
            }
        }
    };

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

fn status_for(e: &nexus_core::error::NexusError) -> StatusCode {
    use nexus_core::error::NexusError;
    match e {
        NexusError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        NexusError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
        NexusError::Forbidden(_) => StatusCode::FORBIDDEN,
        NexusError::NotFound(_) => StatusCode::NOT_FOUND,
        NexusError::Conflict(_) => StatusCode::CONFLICT,
        NexusError::BudgetExceeded { .. } => StatusCode::PAYMENT_REQUIRED,
        NexusError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        NexusError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        NexusError::Aborted { .. } => StatusCode::OK,
        NexusError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

#[derive(Deserialize)]
pub struct AbortRequest {
    #[serde(rename = "requestId")]
    pub request_id: String,
}

#[derive(Serialize)]
pub struct AbortResponse {
    pub success: bool,
    pub aborted: bool,
}

/// POST /abort — cooperative cancellation of an in-flight chat turn.
pub async fn abort_handler(State(state): State<Arc<AppState>>, Json(req): Json<AbortRequest>) -> Json<AbortResponse> {
    let aborted = state.orchestrator.abort(&req.request_id);
    Json(AbortResponse { success: true, aborted })
}
