// rest/routes/app.rs — companion-app endpoints: token issuance and
// presence pushes.
//
// User authentication itself lives with the account collaborator; this
// layer enforces only the identity-match invariant — an app token is
// scoped to the device whose pairing the user actually holds.

use axum::{extract::State, http::HeaderMap, Json};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::auth::token::PrincipalKind;
use crate::error::ApiError;
use crate::identity;
use crate::pairing::{self, PresenceUpdate};
use crate::rest::auth::bearer_claims_of;
use crate::AppContext;

#[derive(Debug, Deserialize)]
pub struct AppTokenRequest {
    /// Collaborator-verified user identity.
    pub user_id: String,
    /// The pairing code shown on the device's display.
    pub pairing_code: String,
}

/// `POST /api/app/token` — issue an app-kind token scoped to the device
/// behind `pairing_code`. First claim binds the user; later requests must
/// match the bound user.
pub async fn issue_token(
    State(ctx): State<Arc<AppContext>>,
    Json(req): Json<AppTokenRequest>,
) -> Result<Json<Value>, ApiError> {
    let code = identity::normalize_pairing_code(&req.pairing_code);
    let device = ctx
        .storage
        .get_device_by_pairing_code(&code)
        .await?
        .ok_or(ApiError::NotFound("not found"))?;

    match &device.user_id {
        None => {
            ctx.storage
                .assign_user(&device.serial, Some(&req.user_id))
                .await?;
        }
        Some(bound) if bound != &req.user_id => {
            return Err(ApiError::Unauthorized(
                "pairing code bound to a different user".to_string(),
            ));
        }
        Some(_) => {}
    }

    // The app's token request is also its first contact for the pairing
    // record.
    ctx.storage
        .record_app_report(&device.serial, Utc::now().timestamp(), None)
        .await?;

    let now = Utc::now().timestamp();
    let token = ctx
        .token_keys
        .issue(PrincipalKind::App, &req.user_id, &device, now)
        .map_err(|e| ApiError::Config(format!("token signing failed: {e}")))?;

    Ok(Json(json!({
        "token": token,
        "expires_in": PrincipalKind::App.ttl_secs(),
        "device_uuid": device.id,
        "serial": device.serial,
    })))
}

/// `GET /api/app/pairing` — current pairing state for the caller's
/// device: connectivity flags, last-seen timestamps, latest snapshot.
pub async fn pairing_status(
    State(ctx): State<Arc<AppContext>>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    let claims = bearer_claims_of(&ctx, &headers, PrincipalKind::App)?;

    let row = ctx
        .storage
        .get_pairing(&claims.serial)
        .await?
        .ok_or(ApiError::NotFound("not found"))?;

    Ok(Json(serde_json::to_value(pairing::PairingView::from(row)).unwrap_or(Value::Null)))
}

/// `POST /api/app/presence` — push a presence snapshot to the paired
/// device. App token required.
pub async fn push_presence(
    State(ctx): State<Arc<AppContext>>,
    headers: HeaderMap,
    Json(update): Json<PresenceUpdate>,
) -> Result<Json<Value>, ApiError> {
    let claims = bearer_claims_of(&ctx, &headers, PrincipalKind::App)?;

    pairing::push_presence(
        &ctx.storage,
        ctx.publisher.as_ref(),
        &claims.serial,
        &update,
    )
    .await?;

    Ok(Json(json!({ "success": true })))
}
