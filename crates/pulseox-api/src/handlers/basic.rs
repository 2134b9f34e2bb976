//! Health check.

use axum::response::Json;
use serde_json::{json, Value};

pub async fn health_handler() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": pulseox_core::VERSION,
    }))
}
