// rest/routes/devices.rs — device-facing endpoints: registration, token
// refresh, and state reporting.

use axum::{body::Bytes, extract::State, http::HeaderMap, Json};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::auth::device;
use crate::auth::token::PrincipalKind;
use crate::error::ApiError;
use crate::pairing::{self, StateReport};
use crate::provisioning;
use crate::rest::auth::device_auth;
use crate::AppContext;

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    /// Hash of the device-held secret; becomes (or must match) the
    /// device's stored key material.
    pub key_hash: String,
    /// Optional pre-authorization from `POST /api/provisioning/tokens`.
    pub provisioning_token: Option<String>,
}

/// `POST /api/devices/register` — first provisioning contact (or key
/// confirmation for a known device). HMAC-signed with the device key.
pub async fn register(
    State(ctx): State<Arc<AppContext>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let req: RegisterRequest = parse_body(&body)?;

    let (device, created) =
        device::authenticate_or_provision(&ctx.storage, &headers, &body, &req.key_hash).await?;

    // A provisioning token binds the pre-authorized user, bypassing the
    // manual pairing-code approval step.
    let claimed_user = match &req.provisioning_token {
        Some(token) => Some(provisioning::claim(&ctx.storage, token, &device.serial).await?),
        None => None,
    };

    // Registration doubles as the device's first contact for the pairing
    // record.
    pairing::report_device_state(&ctx.storage, &device.serial, &StateReport { state: None })
        .await?;

    let now = Utc::now().timestamp();
    let token = ctx
        .token_keys
        .issue(PrincipalKind::Device, &device.id, &device, now)
        .map_err(|e| ApiError::Config(format!("token signing failed: {e}")))?;

    Ok(Json(json!({
        "device_id": device.id,
        "serial": device.serial,
        "pairing_code": device.pairing_code,
        "created": created,
        "claimed_by": claimed_user,
        "token": token,
        "expires_in": PrincipalKind::Device.ttl_secs(),
    })))
}

/// `POST /api/devices/token` — mint a fresh device token. Deliberately
/// HMAC-only: a device whose token expired can always fall back to its
/// key material.
pub async fn refresh_token(
    State(ctx): State<Arc<AppContext>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let device = device::authenticate(&ctx.storage, &headers, &body).await?;

    let now = Utc::now().timestamp();
    let token = ctx
        .token_keys
        .issue(PrincipalKind::Device, &device.id, &device, now)
        .map_err(|e| ApiError::Config(format!("token signing failed: {e}")))?;

    Ok(Json(json!({
        "token": token,
        "expires_in": PrincipalKind::Device.ttl_secs(),
    })))
}

/// `POST /api/devices/state` — telemetry/state report. HMAC or device
/// token.
pub async fn report_state(
    State(ctx): State<Arc<AppContext>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let device = device_auth(&ctx, &headers, &body).await?;
    let report: StateReport = parse_body(&body)?;

    pairing::report_device_state(&ctx.storage, &device.serial, &report).await?;

    Ok(Json(json!({ "success": true })))
}

pub(super) fn parse_body<T: serde::de::DeserializeOwned>(body: &Bytes) -> Result<T, ApiError> {
    serde_json::from_slice(body).map_err(|e| ApiError::Validation(format!("invalid body: {e}")))
}
