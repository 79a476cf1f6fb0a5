//! The pairing record: the live binding between a device identity and
//! the app side currently controlling it.
//!
//! Created lazily on first contact from either side, updated by whichever
//! side reports, re-bound when the device changes hands, never deleted.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::ApiError;
use crate::notify::Publisher;
use crate::storage::{PairingRow, Storage};

/// Device-side state report (`POST /api/devices/state`).
#[derive(Debug, Deserialize)]
pub struct StateReport {
    /// Telemetry snapshot, stored as the pairing's latest snapshot.
    pub state: Option<Value>,
}

/// App-side presence push (`POST /api/app/presence`).
#[derive(Debug, Deserialize)]
pub struct PresenceUpdate {
    pub presence: Value,
}

/// Public view of a pairing, safe to return to either side.
#[derive(Debug, Serialize)]
pub struct PairingView {
    pub serial: String,
    pub device_online: bool,
    pub app_online: bool,
    pub device_last_seen: Option<i64>,
    pub app_last_seen: Option<i64>,
    pub snapshot: Option<Value>,
}

impl From<PairingRow> for PairingView {
    fn from(row: PairingRow) -> Self {
        let snapshot = row
            .snapshot
            .as_deref()
            .and_then(|s| serde_json::from_str(s).ok());
        Self {
            serial: row.serial,
            device_online: row.device_online != 0,
            app_online: row.app_online != 0,
            device_last_seen: row.device_last_seen,
            app_last_seen: row.app_last_seen,
            snapshot,
        }
    }
}

/// Record a device-side telemetry/state report.
pub async fn report_device_state(
    storage: &Storage,
    serial: &str,
    report: &StateReport,
) -> Result<(), ApiError> {
    let snapshot = report.state.as_ref().map(|s| s.to_string());
    storage
        .record_device_report(serial, Utc::now().timestamp(), snapshot.as_deref())
        .await?;
    Ok(())
}

/// Record an app-side presence push and notify listeners (the device may
/// be subscribed for push delivery alongside its polling loop).
pub async fn push_presence(
    storage: &Storage,
    publisher: &dyn Publisher,
    serial: &str,
    update: &PresenceUpdate,
) -> Result<(), ApiError> {
    if !update.presence.is_object() {
        return Err(ApiError::Validation(
            "presence must be a JSON object".to_string(),
        ));
    }
    let snapshot = update.presence.to_string();
    storage
        .record_app_report(serial, Utc::now().timestamp(), Some(&snapshot))
        .await?;
    publisher.publish(
        "presence.updated",
        json!({ "serial": serial, "presence": update.presence }),
    );
    Ok(())
}
