//! Command types: the whitelist, the status state machine, and the wire
//! shapes.

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;

use crate::storage::CommandRow;

/// Commands a device accepts. Anything outside this set fails validation
/// before a row is ever written.
pub static COMMAND_WHITELIST: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    HashSet::from([
        "set_brightness",
        "set_config",
        "get_config",
        "get_status",
        "get_telemetry",
        "get_troubleshooting_status",
        "reboot",
        "factory_reset",
        "ota_update",
        "set_display_name",
        "set_time_zone",
        "clear_wifi",
        "test_display",
        "ping",
    ])
});

pub fn is_whitelisted(name: &str) -> bool {
    COMMAND_WHITELIST.contains(name)
}

/// Commands expire this many seconds after creation. Delivery is
/// best-effort and time-boxed, never guaranteed.
pub const COMMAND_TTL_SECS: i64 = 300;

/// Poll cap: at most this many pending commands per read.
pub const POLL_LIMIT: i64 = 10;

// ─── Status state machine ─────────────────────────────────────────────────────

/// `Pending → {Acked, Failed, Expired}`; the three right-hand states are
/// terminal. Transitions happen only through the storage layer's
/// conditional update keyed on `status = 'pending'`, so an illegal
/// transition (e.g. `Acked → Pending`) has no code path at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandStatus {
    Pending,
    Acked,
    Failed,
    Expired,
}

impl CommandStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            CommandStatus::Pending => "pending",
            CommandStatus::Acked => "acked",
            CommandStatus::Failed => "failed",
            CommandStatus::Expired => "expired",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(CommandStatus::Pending),
            "acked" => Some(CommandStatus::Acked),
            "failed" => Some(CommandStatus::Failed),
            "expired" => Some(CommandStatus::Expired),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        self != CommandStatus::Pending
    }
}

// ─── Wire shapes ──────────────────────────────────────────────────────────────

/// `POST /api/commands` request body.
#[derive(Debug, Deserialize)]
pub struct CreateCommandRequest {
    pub command: String,
    /// Must be a JSON object when present.
    pub payload: Option<Value>,
    /// Explicit target; falls back to the caller token's device binding,
    /// then to `pairing_code`.
    pub device_uuid: Option<String>,
    pub pairing_code: Option<String>,
}

/// `POST /api/commands` response: the handle plus its expiry.
#[derive(Debug, Serialize)]
pub struct CreateCommandResponse {
    pub command_id: String,
    /// ISO 8601.
    pub expires_at: String,
}

/// One entry of the poll response.
#[derive(Debug, Serialize)]
pub struct PendingCommand {
    pub id: String,
    pub command: String,
    pub payload: Option<Value>,
    /// ISO 8601.
    pub created_at: String,
}

impl From<CommandRow> for PendingCommand {
    fn from(row: CommandRow) -> Self {
        let payload = row
            .payload
            .as_deref()
            .and_then(|p| serde_json::from_str(p).ok());
        Self {
            id: row.id,
            command: row.name,
            payload,
            created_at: iso8601(row.created_at),
        }
    }
}

/// `POST /api/commands/ack` request body.
#[derive(Debug, Deserialize)]
pub struct AckRequest {
    pub command_id: String,
    pub success: bool,
    /// Recorded when `success` is true.
    pub response: Option<Value>,
    /// Recorded when `success` is false.
    pub error: Option<String>,
}

/// Render an epoch-seconds timestamp as ISO 8601 for the wire.
pub fn iso8601(epoch_secs: i64) -> String {
    chrono::DateTime::from_timestamp(epoch_secs, 0)
        .unwrap_or_default()
        .to_rfc3339()
}
