//! Header-signed device authentication.
//!
//! Orchestrates header extraction → serial lookup → HMAC verification →
//! replay guard → timestamp persistence. Every failure mode has its own
//! internal reason for the log line, but the remote caller always sees
//! the same generic unauthorized outcome — which check failed is not
//! something an unauthenticated caller gets to learn.

use axum::http::HeaderMap;
use chrono::Utc;
use tracing::{debug, info};

use super::{hmac, replay, HEADER_SERIAL, HEADER_SIGNATURE, HEADER_TIMESTAMP};
use crate::error::ApiError;
use crate::identity;
use crate::storage::{is_serial_collision, DeviceRow, Storage};

/// Internal rejection reasons, logged but never returned verbatim.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthFailure {
    MissingHeaders,
    UnknownDevice,
    TimestampExpired,
    InvalidSignature,
    ReplayDetected,
}

impl AuthFailure {
    pub fn reason(self) -> &'static str {
        match self {
            AuthFailure::MissingHeaders => "missing headers",
            AuthFailure::UnknownDevice => "device not found",
            AuthFailure::TimestampExpired => "timestamp expired",
            AuthFailure::InvalidSignature => "invalid signature",
            AuthFailure::ReplayDetected => "replay detected",
        }
    }
}

impl From<AuthFailure> for ApiError {
    fn from(f: AuthFailure) -> Self {
        ApiError::Unauthorized(f.reason().to_string())
    }
}

/// The three signature headers, extracted as a unit: any one missing (or
/// unparseable) is the single "missing headers" failure.
struct SignedHeaders<'a> {
    serial: &'a str,
    timestamp: i64,
    signature: &'a str,
}

fn extract(headers: &HeaderMap) -> Result<SignedHeaders<'_>, AuthFailure> {
    let get = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .ok_or(AuthFailure::MissingHeaders)
    };
    let serial = get(HEADER_SERIAL)?;
    let timestamp = get(HEADER_TIMESTAMP)?
        .parse::<i64>()
        .map_err(|_| AuthFailure::MissingHeaders)?;
    let signature = get(HEADER_SIGNATURE)?;
    Ok(SignedHeaders {
        serial,
        timestamp,
        signature,
    })
}

/// Authenticate an HMAC-signed request against the stored device record.
///
/// On success the device's `last_auth_ts` has already been advanced (the
/// conditional update is the replay-window close) and the device is
/// marked provisioned if this was its first successful validation.
pub async fn authenticate(
    storage: &Storage,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<DeviceRow, ApiError> {
    let now = Utc::now().timestamp();
    authenticate_at(storage, headers, body, now).await
}

/// [`authenticate`] with an injectable clock, for tests.
pub async fn authenticate_at(
    storage: &Storage,
    headers: &HeaderMap,
    body: &[u8],
    now: i64,
) -> Result<DeviceRow, ApiError> {
    let signed = extract(headers)?;
    let serial = identity::normalize_serial(signed.serial)
        .map_err(|_| AuthFailure::UnknownDevice)?;

    let device = storage
        .get_device_by_serial(&serial)
        .await?
        .ok_or(AuthFailure::UnknownDevice)?;

    // Window check runs before the signature so a device with a skewed
    // clock gets a stable failure, but the signature must still match
    // before the monotonicity state advances.
    if matches!(
        replay::check(now, signed.timestamp, device.last_auth_ts),
        replay::ReplayCheck::OutsideWindow
    ) {
        return Err(AuthFailure::TimestampExpired.into());
    }

    // The canonical message covers the serial exactly as the device
    // presented it — firmware signs with its configured (often
    // uppercase) serial; only the lookup is case-insensitive.
    if !hmac::verify(
        signed.serial,
        signed.timestamp,
        body,
        device.key_hash.as_bytes(),
        signed.signature,
    ) {
        return Err(AuthFailure::InvalidSignature.into());
    }

    if replay::check(now, signed.timestamp, device.last_auth_ts) != replay::ReplayCheck::Ok {
        return Err(AuthFailure::ReplayDetected.into());
    }

    // Persist the new timestamp before reporting success. A false return
    // means a concurrent request advanced it past ours first — same
    // signature window, so it is a replay from our point of view.
    if !storage
        .advance_auth_timestamp(&device.serial, signed.timestamp)
        .await?
    {
        return Err(AuthFailure::ReplayDetected.into());
    }

    if storage.mark_provisioned(&device.serial).await? {
        info!(serial = %device.serial, "device provisioned on first successful auth");
    }
    debug!(serial = %device.serial, "device authenticated via HMAC headers");

    storage
        .get_device_by_serial(&device.serial)
        .await?
        .ok_or(ApiError::NotFound("not found"))
}

/// Registration-time authentication: the device may not exist yet.
///
/// For a known serial this is ordinary header auth against the stored
/// key. For first contact the signature is verified against the
/// *presented* key hash — possession proof over the registration body —
/// and the device identity is created before the timestamp advances.
/// Returns the device plus whether this call created it.
pub async fn authenticate_or_provision(
    storage: &Storage,
    headers: &HeaderMap,
    body: &[u8],
    presented_key_hash: &str,
) -> Result<(DeviceRow, bool), ApiError> {
    let signed = extract(headers)?;
    let serial = identity::normalize_serial(signed.serial)?;
    let now = Utc::now().timestamp();

    if storage.get_device_by_serial(&serial).await?.is_some() {
        let mut device = authenticate_at(storage, headers, body, now).await?;
        // Re-registration may rotate the key material: the request is
        // still signed with the old key, the body carries the new hash.
        if device.key_hash != presented_key_hash {
            storage.update_key_hash(&serial, presented_key_hash).await?;
            info!(serial = %serial, "device key material rotated");
            device.key_hash = presented_key_hash.to_string();
        }
        return Ok((device, false));
    }

    if matches!(
        replay::check(now, signed.timestamp, 0),
        replay::ReplayCheck::OutsideWindow
    ) {
        return Err(AuthFailure::TimestampExpired.into());
    }
    if !hmac::verify(
        signed.serial,
        signed.timestamp,
        body,
        presented_key_hash.as_bytes(),
        signed.signature,
    ) {
        return Err(AuthFailure::InvalidSignature.into());
    }

    let device = match storage.create_device(&serial, presented_key_hash, now).await {
        Ok(device) => device,
        // Lost the creation race to a concurrent first contact: the
        // identity exists now, so authenticate against it like any
        // known device.
        Err(e) if is_serial_collision(&e) => {
            let device = authenticate_at(storage, headers, body, now).await?;
            return Ok((device, false));
        }
        Err(e) => return Err(e.into()),
    };
    if !storage
        .advance_auth_timestamp(&serial, signed.timestamp)
        .await?
    {
        return Err(AuthFailure::ReplayDetected.into());
    }
    storage.mark_provisioned(&serial).await?;
    info!(serial = %serial, "device identity created on first provisioning contact");

    let device = storage
        .get_device_by_serial(&device.serial)
        .await?
        .ok_or(ApiError::NotFound("not found"))?;
    Ok((device, true))
}
