//! Admin and ops surface: health composing active +
//! passive provider probes plus db reachability, a usage-stats query, and
//! the single editable "agent soul" markdown blob gated to `owner`/`admin`.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use nexus_store::types::UsageStatsFilter;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::app::AppState;

const USER_ID_HEADER: &str = "x-nexus-user-id";

fn require_privileged(state: &AppState, headers: &HeaderMap) -> Result<String, (StatusCode, Json<Value>)> {
    let user_id = headers
        .get(USER_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| (StatusCode::UNAUTHORIZED, Json(json!({ "success": false, "error": "missing X-Nexus-User-Id" }))))?
        .to_string();

    let role = state
        .store
        .get_user_role(&user_id)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "success": false, "error": e.to_string() }))))?;

    if !role.is_privileged() {
        return Err((StatusCode::FORBIDDEN, Json(json!({ "success": false, "error": "owner or admin role required" }))));
    }
    Ok(user_id)
}

/// GET /admin/health — active probe results alongside the passive signal and
/// db reachability, composing `ProviderRouter::test_connections()` with
/// `PersistencePort::read_health()`.
pub async fn admin_health_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    let active = state.router.test_connections().await;
    let connections: Value = active
        .into_iter()
        .map(|(name, status)| (name, json!(status)))
        .collect::<serde_json::Map<_, _>>()
        .into();

    let db_ok = state.store.read_health().unwrap_or(false);
    Json(json!({
        "success": true,
        "connections": connections,
        "db_ok": db_ok,
    }))
}

#[derive(Deserialize)]
pub struct UsageQuery {
    #[serde(rename = "userId")]
    pub user_id: Option<String>,
    pub provider: Option<String>,
    #[serde(rename = "sinceSecs")]
    pub since_secs: Option<u64>,
}

/// GET /admin/usage — aggregate usage stats, optionally scoped by user or
/// provider and bounded by a lookback window.
pub async fn usage_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<UsageQuery>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    require_privileged(&state, &headers)?;

    let filter = UsageStatsFilter {
        user_id: query.user_id,
        provider: query.provider,
        since_secs: query.since_secs,
    };
    let stats = state
        .store
        .usage_stats(&filter)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "success": false, "error": e.to_string() }))))?;
    Ok(Json(json!({ "success": true, "usage": stats })))
}

pub async fn get_soul_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    require_privileged(&state, &headers)?;
    let soul = state
        .store
        .get_agent_soul()
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "success": false, "error": e.to_string() }))))?;
    Ok(Json(json!({ "success": true, "soul": soul })))
}

#[derive(Deserialize)]
pub struct SetSoulRequest {
    pub content: String,
}

pub async fn set_soul_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<SetSoulRequest>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let user_id = require_privileged(&state, &headers)?;
    let soul = state
        .store
        .set_agent_soul(&req.content, &user_id)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "success": false, "error": e.to_string() }))))?;
    Ok(Json(json!({ "success": true, "soul": soul })))
}
