// rest/routes/health.rs — unauthenticated liveness probe.

use axum::{extract::State, Json};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::AppContext;

pub async fn health(State(ctx): State<Arc<AppContext>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_seconds": ctx.started_at.elapsed().as_secs(),
    }))
}
