//! Credential extraction for REST handlers.
//!
//! Two ways in: `Authorization: Bearer <token>` (either principal kind)
//! or the three HMAC signature headers (devices only). Endpoints that
//! accept both try the bearer token first and fall back to HMAC.

use axum::http::HeaderMap;

use crate::auth::{device, token::Claims, token::PrincipalKind};
use crate::error::ApiError;
use crate::storage::DeviceRow;
use crate::AppContext;

/// Extract and validate a bearer token. Returns the claim set; kind
/// enforcement is the handler's job.
pub fn bearer_claims(ctx: &AppContext, headers: &HeaderMap) -> Result<Claims, ApiError> {
    let token = bearer_token(headers)
        .ok_or_else(|| ApiError::Unauthorized("missing bearer token".to_string()))?;
    ctx.token_keys
        .validate(token)
        .map_err(|e| ApiError::Unauthorized(e.to_string()))
}

/// Extract a bearer token of a required principal kind.
pub fn bearer_claims_of(
    ctx: &AppContext,
    headers: &HeaderMap,
    kind: PrincipalKind,
) -> Result<Claims, ApiError> {
    let claims = bearer_claims(ctx, headers)?;
    claims
        .require_kind(kind)
        .map_err(|e| ApiError::Unauthorized(e.to_string()))?;
    Ok(claims)
}

/// Authenticate a device by bearer token (device kind) when present,
/// else by HMAC signature headers over `body`.
pub async fn device_auth(
    ctx: &AppContext,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<DeviceRow, ApiError> {
    if bearer_token(headers).is_some() {
        let claims = bearer_claims_of(ctx, headers, PrincipalKind::Device)?;
        return ctx
            .storage
            .get_device_by_serial(&claims.serial)
            .await?
            .ok_or_else(|| ApiError::Unauthorized("device not found".to_string()));
    }
    device::authenticate(&ctx.storage, headers, body).await
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(axum::http::header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}
