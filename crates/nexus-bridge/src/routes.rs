use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::Stream;
use nexus_core::types::{ConversationSource, MessageRole, Scope, Sensitivity, TaskRole};
use nexus_orchestrator::{ChatTurnRequest, Orchestrator};
use nexus_provider::ChatChunk;
use nexus_store::port::PersistencePort;
use nexus_store::types::ListConversationsFilter;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::warn;

use crate::auth::{authenticate, BridgeIdentity};
use crate::tools::ToolRegistry;

pub struct BridgeState {
    pub api_key: String,
    pub store: Arc<dyn PersistencePort>,
    pub orchestrator: Arc<Orchestrator>,
    pub tools: ToolRegistry,
}

pub fn router(state: Arc<BridgeState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/tools/catalog", get(tools_catalog))
        .route("/tools/execute", post(tools_execute))
        .route("/conversations/sync", post(conversations_sync))
        .route("/conversations", get(conversations_list))
        .route("/conversations/{id}", get(conversation_get))
        .route("/conversations/stream", get(conversations_stream))
        .with_state(state)
}

fn require_auth(state: &BridgeState, headers: &HeaderMap) -> Result<BridgeIdentity, (StatusCode, Json<Value>)> {
    authenticate(headers, &state.api_key).map_err(|reason| {
        (StatusCode::UNAUTHORIZED, Json(json!({ "error": reason })))
    })
}

async fn health_handler(State(state): State<Arc<BridgeState>>) -> Json<Value> {
    let db_ok = state.store.read_health().unwrap_or(false);
    let active = state.orchestrator.router().test_connections().await;
    let mut connections = serde_json::Map::new();
    connections.insert("openclaw".to_string(), json!(db_ok));
    for (name, status) in active {
        connections.insert(name, json!(status));
    }
    Json(json!({ "success": db_ok, "connections": connections }))
}

async fn tools_catalog(
    State(state): State<Arc<BridgeState>>,
    headers: HeaderMap,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    require_auth(&state, &headers)?;
    Ok(Json(json!({
        "success": true,
        "tools": state.tools.catalog(),
        "metadata": { "catalogVersion": crate::tools::CATALOG_VERSION },
    })))
}

#[derive(Deserialize)]
struct ToolExecuteRequest {
    tool: String,
    #[serde(default)]
    arguments: Value,
}

async fn tools_execute(
    State(state): State<Arc<BridgeState>>,
    headers: HeaderMap,
    Json(req): Json<ToolExecuteRequest>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let identity = require_auth(&state, &headers)?;
    let tool = state.tools.get(&req.tool).ok_or_else(|| {
        (StatusCode::NOT_FOUND, Json(json!({ "error": format!("unknown tool: {}", req.tool) })))
    })?;

    match tool.execute(&identity.user_id, &req.arguments).await {
        Ok(result) => Ok(Json(json!({ "success": true, "result": result }))),
        Err(e) => {
            warn!(tool = %req.tool, error = %e, "tool execution failed");
            Ok(Json(json!({ "success": false, "error": e.to_string() })))
        }
    }
}

#[derive(Deserialize)]
struct SyncMessage {
    role: String,
    content: String,
    external_msg_id: String,
}

#[derive(Deserialize)]
struct SyncRequest {
    external_id: String,
    #[serde(default = "default_sync_title")]
    title: String,
    #[serde(default)]
    messages: Vec<SyncMessage>,
}

fn default_sync_title() -> String {
    "Synced conversation".to_string()
}

#[derive(Serialize)]
struct SyncResponse {
    conversation_id: String,
    messages_appended: usize,
}

async fn conversations_sync(
    State(state): State<Arc<BridgeState>>,
    headers: HeaderMap,
    Json(req): Json<SyncRequest>,
) -> Result<Json<SyncResponse>, (StatusCode, Json<Value>)> {
    let identity = require_auth(&state, &headers)?;

    let conversation = state
        .store
        .find_conversation_by_external_id(&identity.user_id, ConversationSource::ToolBridge, &req.external_id)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "error": e.to_string() }))))?;

    let conversation = match conversation {
        Some(c) => c,
        None => state
            .store
            .create_conversation(&identity.user_id, None, &req.title, ConversationSource::ToolBridge, Some(&req.external_id))
            .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "error": e.to_string() }))))?,
    };

    let mut appended = 0;
    for msg in &req.messages {
        let role = msg.role.parse::<MessageRole>().unwrap_or(MessageRole::User);
        state
            .store
            .append_message(&conversation.id, role, &msg.content, None, None, Some(&msg.external_msg_id))
            .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "error": e.to_string() }))))?;
        appended += 1;
    }

    Ok(Json(SyncResponse {
        conversation_id: conversation.id,
        messages_appended: appended,
    }))
}

async fn conversations_list(
    State(state): State<Arc<BridgeState>>,
    headers: HeaderMap,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let identity = require_auth(&state, &headers)?;
    let page = state
        .store
        .list_conversations(
            &Scope::User(identity.user_id.clone()),
            &identity.user_id,
            ListConversationsFilter::default(),
        )
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "error": e.to_string() }))))?;
    Ok(Json(json!({ "conversations": page.items })))
}

async fn conversation_get(
    State(state): State<Arc<BridgeState>>,
    headers: HeaderMap,
    axum::extract::Path(id): axum::extract::Path<String>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let identity = require_auth(&state, &headers)?;
    let conversation = state
        .store
        .get_conversation(&Scope::User(identity.user_id.clone()), &id)
        .map_err(|e| (StatusCode::NOT_FOUND, Json(json!({ "error": e.to_string() }))))?;
    let messages = state
        .store
        .list_messages(&id, None, 0)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "error": e.to_string() }))))?;
    Ok(Json(json!({ "conversation": conversation, "messages": messages.items })))
}

#[derive(Deserialize)]
struct StreamQuery {
    message: String,
    #[serde(default)]
    conversation_id: Option<String>,
}

async fn conversations_stream(
    State(state): State<Arc<BridgeState>>,
    headers: HeaderMap,
    Query(query): Query<StreamQuery>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, (StatusCode, Json<Value>)> {
    let identity = require_auth(&state, &headers)?;

    let request_id = nexus_core::types::new_ephemeral_id();
    let mut rx = state
        .orchestrator
        .process_turn_stream(ChatTurnRequest {
            user_id: identity.user_id,
            agent_id: "tool-bridge".to_string(),
            conversation_id: query.conversation_id,
            message: query.message,
            sensitivity: Sensitivity::Public,
            task_role: TaskRole::Chat,
            model: None,
            request_id,
        })
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "error": e.to_string() }))))?;

    let stream = async_stream::stream! {
        while let Some(chunk) = rx.recv().await {
            match chunk {
                ChatChunk::Delta { delta } => yield Ok(Event::default().event("delta").data(delta)),
                ChatChunk::ToolCall { name, arguments } => {
                    let payload = json!({ "name": name, "arguments": arguments }).to_string();
                    yield Ok(Event::default().event("tool_call").data(payload));
                }
                ChatChunk::Done { finish_reason } => {
                    let payload = json!({ "finish_reason": finish_reason }).to_string();
                    yield Ok(Event::default().event("done").data(payload));
                }
                ChatChunk::Error { message } => {
                    yield Ok(Event::default().event("error").data(message));
                }
            }
        }
    };

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}
