use axum::{extract::State, Json};
use serde_json::{json, Value};
use tracing::warn;

use crate::error::ApiResult;
use crate::protocol::StatusResponse;
use crate::routes::AppState;

/// `GET /status`：最近一次指标快照与实时队列统计
pub async fn get_status(State(state): State<AppState>) -> ApiResult<Json<StatusResponse>> {
    let stats = state.queue.stats().await?;

    let metrics = match state.store.get(&state.keys.metrics_latest()).await? {
        Some(raw) => serde_json::from_str::<Value>(&raw).unwrap_or_else(|e| {
            warn!("指标快照无法解析: {}", e);
            json!({})
        }),
        None => json!({}),
    };

    Ok(Json(StatusResponse {
        ok: true,
        metrics,
        stats,
    }))
}
