//! SQLite persistence for devices, pairings, commands, and provisioning
//! tokens.
//!
//! Two operations are deliberately conditional updates rather than
//! read-modify-write: advancing a device's `last_auth_ts` (the HMAC replay
//! bound) and completing a command (exactly one of two racing
//! acknowledgments may win). Both are compare-and-set on the current row
//! state, so per-device serialization needs no lock.

use sqlx::{sqlite::SqliteConnectOptions, SqlitePool};
use std::{path::Path, str::FromStr};
use uuid::Uuid;

use crate::identity;

// ─── Row types ────────────────────────────────────────────────────────────────

/// One physical unit, keyed by serial number. Created on first
/// provisioning contact; the anchor for all per-device state.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct DeviceRow {
    pub id: String,
    /// 8 hex chars, stored lowercase. Unique.
    pub serial: String,
    /// Opaque hash of the device-held secret; HMAC key material.
    pub key_hash: String,
    /// 6 chars from the restricted alphabet. Unique.
    pub pairing_code: String,
    /// Current app assignment; NULL = unassigned.
    pub user_id: Option<String>,
    /// `0` until the first successful HMAC validation (SQLite INTEGER).
    pub provisioned: i64,
    /// Last accepted HMAC timestamp — strictly increases per device.
    pub last_auth_ts: i64,
    pub created_at: i64,
}

impl DeviceRow {
    pub fn is_provisioned(&self) -> bool {
        self.provisioned != 0
    }
}

/// Live relationship between a device and the app side currently bound
/// to it. One row per device, created lazily, updated by whichever side
/// reports, never deleted.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PairingRow {
    pub serial: String,
    pub device_last_seen: Option<i64>,
    pub app_last_seen: Option<i64>,
    /// `0`/`1` connectivity flags (SQLite INTEGER).
    pub device_online: i64,
    pub app_online: i64,
    /// Latest presence/telemetry snapshot, JSON.
    pub snapshot: Option<String>,
    pub updated_at: i64,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CommandRow {
    pub id: String,
    pub serial: String,
    pub name: String,
    /// JSON object, NULL when the command carries no payload.
    pub payload: Option<String>,
    /// `pending` | `acked` | `failed` | `expired`.
    pub status: String,
    pub created_at: i64,
    pub expires_at: i64,
    pub response: Option<String>,
    pub error: Option<String>,
    pub completed_at: Option<i64>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ProvisioningTokenRow {
    pub token: String,
    pub serial: String,
    pub user_id: String,
    pub created_at: i64,
    pub expires_at: i64,
}

/// Outcome of a provisioning-token claim. Expired tokens stay in the
/// table for later cleanup; consumed tokens are deleted atomically.
#[derive(Debug)]
pub enum ProvisioningClaim {
    Consumed(ProvisioningTokenRow),
    Expired,
    NotFound,
}

// ─── Storage ──────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct Storage {
    pool: SqlitePool,
}

impl Storage {
    pub async fn new(data_dir: &Path) -> Result<Self, sqlx::Error> {
        tokio::fs::create_dir_all(data_dir).await.map_err(sqlx::Error::Io)?;
        let db_path = data_dir.join("glowd.db");
        let opts =
            SqliteConnectOptions::from_str(&format!("sqlite://{}?mode=rwc", db_path.display()))?
                .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
                .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
                .create_if_missing(true);

        let pool = SqlitePool::connect_with(opts).await?;
        Self::migrate(&pool).await?;
        Ok(Self { pool })
    }

    async fn migrate(pool: &SqlitePool) -> Result<(), sqlx::Error> {
        let schema = [
            "CREATE TABLE IF NOT EXISTS devices (
                 id           TEXT PRIMARY KEY,
                 serial       TEXT NOT NULL UNIQUE,
                 key_hash     TEXT NOT NULL,
                 pairing_code TEXT NOT NULL UNIQUE,
                 user_id      TEXT,
                 provisioned  INTEGER NOT NULL DEFAULT 0,
                 last_auth_ts INTEGER NOT NULL DEFAULT 0,
                 created_at   INTEGER NOT NULL
             )",
            "CREATE TABLE IF NOT EXISTS pairings (
                 serial           TEXT PRIMARY KEY,
                 device_last_seen INTEGER,
                 app_last_seen    INTEGER,
                 device_online    INTEGER NOT NULL DEFAULT 0,
                 app_online       INTEGER NOT NULL DEFAULT 0,
                 snapshot         TEXT,
                 updated_at       INTEGER NOT NULL
             )",
            "CREATE TABLE IF NOT EXISTS commands (
                 id           TEXT PRIMARY KEY,
                 serial       TEXT NOT NULL,
                 name         TEXT NOT NULL,
                 payload      TEXT,
                 status       TEXT NOT NULL,
                 created_at   INTEGER NOT NULL,
                 expires_at   INTEGER NOT NULL,
                 response     TEXT,
                 error        TEXT,
                 completed_at INTEGER
             )",
            "CREATE INDEX IF NOT EXISTS idx_commands_pending
                 ON commands (serial, status, expires_at)",
            "CREATE TABLE IF NOT EXISTS provisioning_tokens (
                 token      TEXT PRIMARY KEY,
                 serial     TEXT NOT NULL,
                 user_id    TEXT NOT NULL,
                 created_at INTEGER NOT NULL,
                 expires_at INTEGER NOT NULL
             )",
        ];
        for stmt in schema {
            sqlx::query(stmt).execute(pool).await?;
        }
        Ok(())
    }

    // ─── Devices ──────────────────────────────────────────────────────────────

    /// Create a device identity on first provisioning contact.
    ///
    /// The pairing code is generated here; on the (rare) unique-constraint
    /// collision a fresh code is drawn and the insert retried.
    pub async fn create_device(
        &self,
        serial: &str,
        key_hash: &str,
        now: i64,
    ) -> Result<DeviceRow, sqlx::Error> {
        let id = Uuid::new_v4().to_string();
        loop {
            let pairing_code = identity::generate_pairing_code();
            let result = sqlx::query(
                "INSERT INTO devices (id, serial, key_hash, pairing_code, created_at)
                 VALUES (?, ?, ?, ?, ?)",
            )
            .bind(&id)
            .bind(serial)
            .bind(key_hash)
            .bind(&pairing_code)
            .bind(now)
            .execute(&self.pool)
            .await;

            match result {
                Ok(_) => break,
                Err(e) if is_pairing_code_collision(&e) => continue,
                Err(e) => return Err(e),
            }
        }
        self.get_device_by_serial(serial)
            .await?
            .ok_or(sqlx::Error::RowNotFound)
    }

    pub async fn get_device_by_serial(
        &self,
        serial: &str,
    ) -> Result<Option<DeviceRow>, sqlx::Error> {
        sqlx::query_as("SELECT * FROM devices WHERE serial = ?")
            .bind(serial)
            .fetch_optional(&self.pool)
            .await
    }

    pub async fn get_device_by_id(&self, id: &str) -> Result<Option<DeviceRow>, sqlx::Error> {
        sqlx::query_as("SELECT * FROM devices WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
    }

    pub async fn get_device_by_pairing_code(
        &self,
        pairing_code: &str,
    ) -> Result<Option<DeviceRow>, sqlx::Error> {
        sqlx::query_as("SELECT * FROM devices WHERE pairing_code = ?")
            .bind(pairing_code)
            .fetch_optional(&self.pool)
            .await
    }

    /// Rotate the device's stored key material (hash of the device-held
    /// secret).
    pub async fn update_key_hash(&self, serial: &str, key_hash: &str) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE devices SET key_hash = ? WHERE serial = ?")
            .bind(key_hash)
            .bind(serial)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Bind (or unbind, with `None`) the device's current app assignment.
    pub async fn assign_user(
        &self,
        serial: &str,
        user_id: Option<&str>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE devices SET user_id = ? WHERE serial = ?")
            .bind(user_id)
            .bind(serial)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Atomically advance the device's monotonic auth timestamp. Succeeds
    /// only when `ts` is strictly greater than the stored value, which
    /// closes the replay window even between two concurrent requests
    /// carrying the same still-window-valid signature.
    pub async fn advance_auth_timestamp(
        &self,
        serial: &str,
        ts: i64,
    ) -> Result<bool, sqlx::Error> {
        let result =
            sqlx::query("UPDATE devices SET last_auth_ts = ? WHERE serial = ? AND last_auth_ts < ?")
                .bind(ts)
                .bind(serial)
                .bind(ts)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Mark the device provisioned. Returns `true` only on the first
    /// successful validation (the row flipped 0 → 1).
    pub async fn mark_provisioned(&self, serial: &str) -> Result<bool, sqlx::Error> {
        let result =
            sqlx::query("UPDATE devices SET provisioned = 1 WHERE serial = ? AND provisioned = 0")
                .bind(serial)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    // ─── Pairings ─────────────────────────────────────────────────────────────

    pub async fn get_pairing(&self, serial: &str) -> Result<Option<PairingRow>, sqlx::Error> {
        sqlx::query_as("SELECT * FROM pairings WHERE serial = ?")
            .bind(serial)
            .fetch_optional(&self.pool)
            .await
    }

    /// Device-side report: refresh last-seen/online and, when present,
    /// the telemetry snapshot. Creates the pairing row lazily.
    pub async fn record_device_report(
        &self,
        serial: &str,
        now: i64,
        snapshot: Option<&str>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO pairings (serial, device_last_seen, device_online, snapshot, updated_at)
             VALUES (?, ?, 1, ?, ?)
             ON CONFLICT(serial) DO UPDATE SET
               device_last_seen = excluded.device_last_seen,
               device_online = 1,
               snapshot = COALESCE(excluded.snapshot, pairings.snapshot),
               updated_at = excluded.updated_at",
        )
        .bind(serial)
        .bind(now)
        .bind(snapshot)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// App-side report: refresh the app's last-seen/online and, when
    /// present, the presence snapshot. Creates the pairing row lazily.
    pub async fn record_app_report(
        &self,
        serial: &str,
        now: i64,
        snapshot: Option<&str>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO pairings (serial, app_last_seen, app_online, snapshot, updated_at)
             VALUES (?, ?, 1, ?, ?)
             ON CONFLICT(serial) DO UPDATE SET
               app_last_seen = excluded.app_last_seen,
               app_online = 1,
               snapshot = COALESCE(excluded.snapshot, pairings.snapshot),
               updated_at = excluded.updated_at",
        )
        .bind(serial)
        .bind(now)
        .bind(snapshot)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // ─── Commands ─────────────────────────────────────────────────────────────

    pub async fn create_command(
        &self,
        serial: &str,
        name: &str,
        payload: Option<&str>,
        created_at: i64,
        expires_at: i64,
    ) -> Result<CommandRow, sqlx::Error> {
        let id = Uuid::new_v4().to_string();
        sqlx::query(
            "INSERT INTO commands (id, serial, name, payload, status, created_at, expires_at)
             VALUES (?, ?, ?, ?, 'pending', ?, ?)",
        )
        .bind(&id)
        .bind(serial)
        .bind(name)
        .bind(payload)
        .bind(created_at)
        .bind(expires_at)
        .execute(&self.pool)
        .await?;
        self.get_command(&id).await?.ok_or(sqlx::Error::RowNotFound)
    }

    pub async fn get_command(&self, id: &str) -> Result<Option<CommandRow>, sqlx::Error> {
        sqlx::query_as("SELECT * FROM commands WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
    }

    /// Outstanding commands for one device: pending, unexpired, oldest
    /// first, capped at `limit`. Read-only — lazy expiry hides stale rows
    /// without mutating them.
    pub async fn pending_commands(
        &self,
        serial: &str,
        now: i64,
        limit: i64,
    ) -> Result<Vec<CommandRow>, sqlx::Error> {
        sqlx::query_as(
            "SELECT * FROM commands
             WHERE serial = ? AND status = 'pending' AND expires_at > ?
             ORDER BY created_at ASC, id ASC LIMIT ?",
        )
        .bind(serial)
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
    }

    /// Compare-and-set completion: transitions the command out of
    /// `pending` exactly once. Returns `false` when the row is already
    /// terminal (or owned by a different serial), leaving the recorded
    /// outcome untouched.
    pub async fn complete_command(
        &self,
        id: &str,
        serial: &str,
        status: &str,
        response: Option<&str>,
        error: Option<&str>,
        completed_at: i64,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE commands SET status = ?, response = ?, error = ?, completed_at = ?
             WHERE id = ? AND serial = ? AND status = 'pending'",
        )
        .bind(status)
        .bind(response)
        .bind(error)
        .bind(completed_at)
        .bind(id)
        .bind(serial)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Housekeeping: flip observably expired pending rows to `expired` so
    /// stale `pending` rows do not grow without bound. Polling does not
    /// depend on this for correctness.
    pub async fn expire_stale_commands(&self, now: i64) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE commands SET status = 'expired', completed_at = ?
             WHERE status = 'pending' AND expires_at <= ?",
        )
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    // ─── Provisioning tokens ──────────────────────────────────────────────────

    pub async fn create_provisioning_token(
        &self,
        token: &str,
        serial: &str,
        user_id: &str,
        now: i64,
        expires_at: i64,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO provisioning_tokens (token, serial, user_id, created_at, expires_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(token)
        .bind(serial)
        .bind(user_id)
        .bind(now)
        .bind(expires_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Single-use claim: the token row is deleted atomically with the
    /// expiry check, so two racing claims cannot both succeed. Expired
    /// tokens are left in place for later cleanup.
    pub async fn consume_provisioning_token(
        &self,
        token: &str,
        now: i64,
    ) -> Result<ProvisioningClaim, sqlx::Error> {
        let row: Option<ProvisioningTokenRow> =
            sqlx::query_as("SELECT * FROM provisioning_tokens WHERE token = ?")
                .bind(token)
                .fetch_optional(&self.pool)
                .await?;
        let Some(row) = row else {
            return Ok(ProvisioningClaim::NotFound);
        };
        if row.expires_at <= now {
            return Ok(ProvisioningClaim::Expired);
        }
        let deleted =
            sqlx::query("DELETE FROM provisioning_tokens WHERE token = ? AND expires_at > ?")
                .bind(token)
                .bind(now)
                .execute(&self.pool)
                .await?;
        if deleted.rows_affected() > 0 {
            Ok(ProvisioningClaim::Consumed(row))
        } else {
            // Lost the race to a concurrent claim.
            Ok(ProvisioningClaim::NotFound)
        }
    }
}

fn is_pairing_code_collision(e: &sqlx::Error) -> bool {
    e.as_database_error()
        .map(|db| db.is_unique_violation() && db.message().contains("pairing_code"))
        .unwrap_or(false)
}

/// A unique violation on `devices.serial`: the identity was created by a
/// concurrent request between the caller's existence check and its
/// INSERT. Callers treat this as "device already exists", not a storage
/// failure.
pub fn is_serial_collision(e: &sqlx::Error) -> bool {
    e.as_database_error()
        .map(|db| db.is_unique_violation() && db.message().contains("serial"))
        .unwrap_or(false)
}
