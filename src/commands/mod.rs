//! Asynchronous command queue: dispatch (app side), poll and acknowledge
//! (device side).
//!
//! Delivery is best-effort: the device polls (plus a push notification
//! through the publisher), commands expire 5 minutes after creation, and
//! a caller awaiting acknowledgment applies its own timeout. There is no
//! cancellation other than natural expiry.

pub mod model;

use serde_json::json;
use tracing::debug;

use crate::auth::token::Claims;
use crate::error::ApiError;
use crate::identity::{self, DeviceLookup};
use crate::notify::Publisher;
use crate::storage::Storage;

use self::model::{
    AckRequest, CommandStatus, CreateCommandRequest, CreateCommandResponse, PendingCommand,
    COMMAND_TTL_SECS, POLL_LIMIT,
};

/// Outcome of an acknowledgment. `AlreadyProcessed` is deliberately not
/// an error: a device retrying an ack after a dropped response should
/// converge, not fail.
#[derive(Debug, PartialEq, Eq)]
pub enum AckOutcome {
    Recorded,
    AlreadyProcessed,
}

/// Dispatch a command to a device on behalf of an authenticated app.
///
/// Validation order: whitelist → payload shape → target resolution →
/// pairing existence. Nothing is written until all checks pass.
pub async fn dispatch(
    storage: &Storage,
    publisher: &dyn Publisher,
    claims: &Claims,
    req: &CreateCommandRequest,
    now: i64,
) -> Result<CreateCommandResponse, ApiError> {
    if !model::is_whitelisted(&req.command) {
        return Err(ApiError::Validation(format!(
            "unknown command: {}",
            req.command
        )));
    }
    if let Some(payload) = &req.payload {
        if !payload.is_object() {
            return Err(ApiError::Validation(
                "payload must be a JSON object".to_string(),
            ));
        }
    }

    let device = identity::resolve_device(
        storage,
        DeviceLookup {
            device_uuid: req.device_uuid.as_deref(),
            token_device_id: Some(&claims.device_id),
            pairing_code: req.pairing_code.as_deref(),
        },
    )
    .await?
    .ok_or(ApiError::NotFound("device not found"))?;

    // A command only makes sense toward a device that has made contact.
    if storage.get_pairing(&device.serial).await?.is_none() {
        return Err(ApiError::NotFound("device not found"));
    }

    let payload = req.payload.as_ref().map(|p| p.to_string());
    let row = storage
        .create_command(
            &device.serial,
            &req.command,
            payload.as_deref(),
            now,
            now + COMMAND_TTL_SECS,
        )
        .await?;

    debug!(serial = %device.serial, command = %row.name, id = %row.id, "command queued");
    publisher.publish(
        "command.created",
        json!({ "serial": device.serial, "command_id": row.id, "command": row.name }),
    );

    Ok(CreateCommandResponse {
        command_id: row.id,
        expires_at: model::iso8601(row.expires_at),
    })
}

/// Outstanding commands for an authenticated device: pending, unexpired,
/// oldest first, at most 10. Read-only; a housekeeping pass afterwards
/// flips observably expired rows so stale `pending` rows don't pile up.
pub async fn poll(
    storage: &Storage,
    serial: &str,
    now: i64,
) -> Result<Vec<PendingCommand>, ApiError> {
    let rows = storage.pending_commands(serial, now, POLL_LIMIT).await?;
    let expired = storage.expire_stale_commands(now).await?;
    if expired > 0 {
        debug!(count = expired, "reconciled expired pending commands");
    }
    Ok(rows.into_iter().map(PendingCommand::from).collect())
}

/// Record a command's terminal outcome on behalf of the owning device.
///
/// Already-terminal commands return `AlreadyProcessed` without touching
/// the recorded outcome. An ownership mismatch answers exactly like an
/// unknown command id — never confirm that another device's command
/// exists.
pub async fn acknowledge(
    storage: &Storage,
    serial: &str,
    req: &AckRequest,
    now: i64,
) -> Result<AckOutcome, ApiError> {
    let command = storage
        .get_command(&req.command_id)
        .await?
        .ok_or(ApiError::NotFound("not found"))?;

    if command.serial != serial {
        return Err(ApiError::NotFound("not found"));
    }

    let status = if req.success {
        CommandStatus::Acked
    } else {
        CommandStatus::Failed
    };
    let response = if req.success {
        req.response.as_ref().map(|r| r.to_string())
    } else {
        None
    };
    let error = if req.success {
        None
    } else {
        req.error.as_deref().map(str::to_string)
    };

    let transitioned = storage
        .complete_command(
            &req.command_id,
            serial,
            status.as_str(),
            response.as_deref(),
            error.as_deref(),
            now,
        )
        .await?;

    if transitioned {
        debug!(id = %req.command_id, status = status.as_str(), "command acknowledged");
        Ok(AckOutcome::Recorded)
    } else {
        // The conditional update found the row already terminal — either
        // acknowledged earlier or expired by reconciliation. Idempotent.
        Ok(AckOutcome::AlreadyProcessed)
    }
}
