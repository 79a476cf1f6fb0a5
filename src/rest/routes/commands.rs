// rest/routes/commands.rs — the command queue's three verbs.
//
// Create is app-side (bearer token); poll and acknowledge are device-side
// (HMAC headers or a device token).

use axum::{body::Bytes, extract::State, http::HeaderMap, Json};
use chrono::Utc;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::auth::token::PrincipalKind;
use crate::commands::{self, model::AckRequest, model::CreateCommandRequest, AckOutcome};
use crate::error::ApiError;
use crate::rest::auth::{bearer_claims_of, device_auth};
use crate::AppContext;

use super::devices::parse_body;

/// `POST /api/commands` — enqueue a command for the caller's device.
pub async fn create(
    State(ctx): State<Arc<AppContext>>,
    headers: HeaderMap,
    Json(req): Json<CreateCommandRequest>,
) -> Result<Json<Value>, ApiError> {
    let claims = bearer_claims_of(&ctx, &headers, PrincipalKind::App)?;

    let created = commands::dispatch(
        &ctx.storage,
        ctx.publisher.as_ref(),
        &claims,
        &req,
        Utc::now().timestamp(),
    )
    .await?;

    Ok(Json(json!({
        "command_id": created.command_id,
        "expires_at": created.expires_at,
    })))
}

/// `GET /api/commands/poll` — outstanding commands for the authenticated
/// device. The HMAC signature covers the empty body.
pub async fn poll(
    State(ctx): State<Arc<AppContext>>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    let device = device_auth(&ctx, &headers, b"").await?;

    let pending = commands::poll(&ctx.storage, &device.serial, Utc::now().timestamp()).await?;

    Ok(Json(json!({ "commands": pending })))
}

/// `POST /api/commands/ack` — record a command's terminal outcome.
/// Re-acknowledging is success with an informational flag, not an error.
pub async fn acknowledge(
    State(ctx): State<Arc<AppContext>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let device = device_auth(&ctx, &headers, &body).await?;
    let req: AckRequest = parse_body(&body)?;

    let outcome =
        commands::acknowledge(&ctx.storage, &device.serial, &req, Utc::now().timestamp()).await?;

    Ok(Json(match outcome {
        AckOutcome::Recorded => json!({ "success": true }),
        AckOutcome::AlreadyProcessed => json!({
            "success": true,
            "already_processed": true,
            "message": "command already processed",
        }),
    }))
}
