//! `GET /conversations`, `GET /conversations/:id`.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use nexus_core::types::Scope;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::app::AppState;

#[derive(Deserialize)]
pub struct ListQuery {
    #[serde(rename = "userId")]
    pub user_id: String,
}

pub async fn list_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let conversations = state
        .orchestrator
        .list_conversations(&query.user_id, Some(false))
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "success": false, "error": e.to_string() }))))?;
    Ok(Json(json!({ "success": true, "conversations": conversations })))
}

#[derive(Deserialize)]
pub struct GetQuery {
    #[serde(rename = "userId")]
    pub user_id: String,
}

pub async fn get_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<GetQuery>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let scope = Scope::User(query.user_id);
    let conversation = state
        .store
        .get_conversation(&scope, &id)
        .map_err(|e| (StatusCode::NOT_FOUND, Json(json!({ "success": false, "error": e.to_string() }))))?;
    let messages = state
        .store
        .list_messages(&id, None, 0)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "success": false, "error": e.to_string() }))))?;
    Ok(Json(json!({ "success": true, "conversation": conversation, "messages": messages.items })))
}
