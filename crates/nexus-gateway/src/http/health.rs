use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde_json::{json, Value};

use crate::app::AppState;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// GET /health — liveness probe. Uses the passive health signal only; the
/// active-probe view lives at `/admin/health`.
pub async fn health_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    let db_ok = state.store.read_health().unwrap_or(false);
    Json(json!({
        "status": "ok",
        "version": VERSION,
        "db_ok": db_ok,
    }))
}
