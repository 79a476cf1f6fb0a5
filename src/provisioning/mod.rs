//! Provisioning tokens: single-use, short-TTL credentials that let a
//! specific user claim a device during provisioning without the manual
//! pairing-code approval step.

use chrono::Utc;
use uuid::Uuid;

use crate::error::ApiError;
use crate::storage::{ProvisioningClaim, Storage};

/// Provisioning tokens are valid for ten minutes.
pub const PROVISIONING_TTL_SECS: i64 = 600;

/// Pre-authorize `user_id` to claim `serial`. Returns the opaque token
/// handed to the provisioning flow.
pub async fn issue(storage: &Storage, serial: &str, user_id: &str) -> Result<String, ApiError> {
    let token = Uuid::new_v4().simple().to_string();
    let now = Utc::now().timestamp();
    storage
        .create_provisioning_token(&token, serial, user_id, now, now + PROVISIONING_TTL_SECS)
        .await?;
    Ok(token)
}

/// Consume a provisioning token for `serial`, binding the pre-authorized
/// user to the device. The token row is deleted on success; an expired
/// token is rejected but left in place for later cleanup.
pub async fn claim(storage: &Storage, token: &str, serial: &str) -> Result<String, ApiError> {
    let now = Utc::now().timestamp();
    match storage.consume_provisioning_token(token, now).await? {
        ProvisioningClaim::Consumed(row) => {
            if row.serial != serial {
                // Consumed but for another device: a mismatched claim is
                // rejected without revealing which serial it was for.
                return Err(ApiError::Validation(
                    "provisioning token does not match this device".to_string(),
                ));
            }
            storage.assign_user(serial, Some(&row.user_id)).await?;
            Ok(row.user_id)
        }
        ProvisioningClaim::Expired => Err(ApiError::Validation(
            "provisioning token expired".to_string(),
        )),
        ProvisioningClaim::NotFound => Err(ApiError::NotFound("not found")),
    }
}
