use axum::{extract::State, Json};
use serde_json::{json, Value};

use crate::routes::AppState;

pub async fn health_check(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "service": "shiftfill",
        "version": env!("CARGO_PKG_VERSION"),
        "active_gaps": state.service.active_count().await,
        "reply_listener_running": state.service.listener().is_running().await,
    }))
}
