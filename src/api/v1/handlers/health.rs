/*
 * Responsibility
 * - GET /health (liveness)
 * - 認証なし。request id / trace / metrics の stage は通る
 */
use axum::Json;
use serde_json::{Value, json};

pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
