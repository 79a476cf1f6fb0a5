// rest/routes/provisioning.rs — pre-authorization tokens for claiming a
// device during provisioning.

use axum::{extract::State, http::HeaderMap, Json};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::auth::token::PrincipalKind;
use crate::error::ApiError;
use crate::identity;
use crate::provisioning::{self, PROVISIONING_TTL_SECS};
use crate::rest::auth::bearer_claims_of;
use crate::AppContext;

#[derive(Debug, Deserialize)]
pub struct IssueProvisioningRequest {
    /// Serial of the device the caller is about to provision.
    pub serial: String,
}

/// `POST /api/provisioning/tokens` — pre-authorize the calling user to
/// claim `serial` during registration. The user identity comes from the
/// app token's subject.
pub async fn issue_token(
    State(ctx): State<Arc<AppContext>>,
    headers: HeaderMap,
    Json(req): Json<IssueProvisioningRequest>,
) -> Result<Json<Value>, ApiError> {
    let claims = bearer_claims_of(&ctx, &headers, PrincipalKind::App)?;
    let serial = identity::normalize_serial(&req.serial)?;

    let token = provisioning::issue(&ctx.storage, &serial, &claims.sub).await?;

    Ok(Json(json!({
        "provisioning_token": token,
        "expires_in": PROVISIONING_TTL_SECS,
    })))
}
