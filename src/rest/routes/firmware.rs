// rest/routes/firmware.rs — firmware manifest with staged-rollout gating.
//
// Unauthenticated requests (the web flasher, dashboards) always see the
// latest release. Device-authenticated requests are subject to rollout
// and receive the empty manifest when excluded or already up to date.

use axum::{
    extract::{Query, State},
    http::HeaderMap,
    Json,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;

use crate::auth::HEADER_SERIAL;
use crate::error::ApiError;
use crate::firmware::{self, ManifestFormat};
use crate::rest::auth::device_auth;
use crate::AppContext;

#[derive(Debug, Deserialize)]
pub struct ManifestQuery {
    pub format: Option<String>,
    /// The requesting device's current firmware version.
    pub version: Option<String>,
}

pub async fn manifest(
    State(ctx): State<Arc<AppContext>>,
    Query(query): Query<ManifestQuery>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    let format = ManifestFormat::parse(query.format.as_deref())?;
    let now = Utc::now().timestamp();

    // Presenting credentials opts the request into rollout gating; the
    // signature covers the empty body of this GET.
    let has_credentials =
        headers.contains_key(axum::http::header::AUTHORIZATION) || headers.contains_key(HEADER_SERIAL);

    let gate = if has_credentials {
        let device = device_auth(&ctx, &headers, b"").await?;
        Some((device.serial, ctx.config.release.rollout_percent))
    } else {
        None
    };

    let body = firmware::manifest(
        &ctx.config.release,
        format,
        ctx.url_signer.as_ref(),
        gate.as_ref().map(|(s, p)| (s.as_str(), *p)),
        query.version.as_deref(),
        now,
    );

    Ok(Json(body))
}
