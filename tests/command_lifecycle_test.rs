//! Integration tests for the command queue: dispatch, poll, acknowledge.
//! Runs against a real SQLite storage in a temp directory.

use chrono::Utc;
use serde_json::json;
use tempfile::TempDir;

use glowd::auth::token::{Claims, PrincipalKind};
use glowd::commands::{self, model::AckRequest, model::CreateCommandRequest, AckOutcome};
use glowd::error::ApiError;
use glowd::notify::BroadcastPublisher;
use glowd::storage::{DeviceRow, Storage};

async fn setup() -> (TempDir, Storage, DeviceRow) {
    let dir = tempfile::tempdir().unwrap();
    let storage = Storage::new(dir.path()).await.unwrap();
    let now = Utc::now().timestamp();
    let device = storage.create_device("a1b2c3d4", "key-hash", now).await.unwrap();
    // The pairing record exists once the device has made contact.
    storage.record_device_report(&device.serial, now, None).await.unwrap();
    (dir, storage, device)
}

fn app_claims(device: &DeviceRow) -> Claims {
    let now = Utc::now().timestamp();
    Claims {
        sub: "user-1".to_string(),
        role: "authenticated".to_string(),
        aud: "glow-devices".to_string(),
        serial: device.serial.clone(),
        device_id: device.id.clone(),
        pairing_code: device.pairing_code.clone(),
        kind: PrincipalKind::App,
        iat: now,
        exp: now + 3600,
    }
}

fn create_req(command: &str) -> CreateCommandRequest {
    CreateCommandRequest {
        command: command.to_string(),
        payload: None,
        device_uuid: None,
        pairing_code: None,
    }
}

#[tokio::test]
async fn ping_lifecycle_pending_then_acked_then_idempotent() {
    let (_dir, storage, device) = setup().await;
    let publisher = BroadcastPublisher::new();
    let claims = app_claims(&device);
    let now = Utc::now().timestamp();

    let created = commands::dispatch(&storage, &publisher, &claims, &create_req("ping"), now)
        .await
        .unwrap();

    let row = storage.get_command(&created.command_id).await.unwrap().unwrap();
    assert_eq!(row.status, "pending");
    assert_eq!(row.expires_at, row.created_at + 300);
    assert!(row.payload.is_none());

    // First acknowledgment records the outcome.
    let ack = AckRequest {
        command_id: created.command_id.clone(),
        success: true,
        response: Some(json!({ "pong": true })),
        error: None,
    };
    let outcome = commands::acknowledge(&storage, &device.serial, &ack, now + 1)
        .await
        .unwrap();
    assert_eq!(outcome, AckOutcome::Recorded);

    let row = storage.get_command(&created.command_id).await.unwrap().unwrap();
    assert_eq!(row.status, "acked");
    let first_response = row.response.clone().unwrap();
    assert_eq!(row.completed_at, Some(now + 1));

    // Second acknowledgment — any outcome — converges without rewriting.
    let second = AckRequest {
        command_id: created.command_id.clone(),
        success: false,
        response: None,
        error: Some("late failure".to_string()),
    };
    let outcome = commands::acknowledge(&storage, &device.serial, &second, now + 2)
        .await
        .unwrap();
    assert_eq!(outcome, AckOutcome::AlreadyProcessed);

    let row = storage.get_command(&created.command_id).await.unwrap().unwrap();
    assert_eq!(row.status, "acked");
    assert_eq!(row.response.unwrap(), first_response);
    assert!(row.error.is_none());
    assert_eq!(row.completed_at, Some(now + 1));
}

#[tokio::test]
async fn exactly_one_of_two_racing_acks_wins() {
    let (_dir, storage, device) = setup().await;
    let now = Utc::now().timestamp();
    let row = storage
        .create_command(&device.serial, "ping", None, now, now + 300)
        .await
        .unwrap();

    let success = AckRequest {
        command_id: row.id.clone(),
        success: true,
        response: Some(json!({ "pong": true })),
        error: None,
    };
    let failure = AckRequest {
        command_id: row.id.clone(),
        success: false,
        response: None,
        error: Some("device fault".to_string()),
    };

    let (a, b) = tokio::join!(
        commands::acknowledge(&storage, &device.serial, &success, now + 1),
        commands::acknowledge(&storage, &device.serial, &failure, now + 1),
    );

    let outcomes = [a.unwrap(), b.unwrap()];
    let recorded = outcomes.iter().filter(|o| **o == AckOutcome::Recorded).count();
    assert_eq!(recorded, 1, "the conditional update lets exactly one ack through");
    assert_eq!(
        outcomes.iter().filter(|o| **o == AckOutcome::AlreadyProcessed).count(),
        1
    );

    // Whichever won, the recorded outcome is terminal and internally
    // consistent — never a blend of the two requests.
    let row = storage.get_command(&row.id).await.unwrap().unwrap();
    assert_eq!(row.completed_at, Some(now + 1));
    match row.status.as_str() {
        "acked" => {
            assert!(row.response.is_some());
            assert!(row.error.is_none());
        }
        "failed" => {
            assert!(row.response.is_none());
            assert_eq!(row.error.as_deref(), Some("device fault"));
        }
        other => panic!("unexpected status {other}"),
    }
}

#[tokio::test]
async fn poll_caps_at_ten_hides_expired_and_orders_oldest_first() {
    let (_dir, storage, device) = setup().await;
    let now = Utc::now().timestamp();

    // 15 commands: the first 3 already expired, the rest live.
    for i in 0..15i64 {
        let (created_at, expires_at) = if i < 3 {
            (now - 1000 + i, now - 700 + i)
        } else {
            (now - 100 + i, now + 200 + i)
        };
        storage
            .create_command(&device.serial, "ping", None, created_at, expires_at)
            .await
            .unwrap();
    }

    let pending = commands::poll(&storage, &device.serial, now).await.unwrap();
    assert_eq!(pending.len(), 10, "exactly 10 of the remaining 12 returned");

    let created: Vec<String> = pending.iter().map(|c| c.created_at.clone()).collect();
    let mut sorted = created.clone();
    sorted.sort();
    assert_eq!(created, sorted, "oldest-first ordering");

    // The reconciliation pass flipped the stale rows to `expired`.
    let reconciled = storage.expire_stale_commands(now).await.unwrap();
    assert_eq!(reconciled, 0, "poll already reconciled expired rows");
}

#[tokio::test]
async fn poll_never_returns_a_command_expiring_now() {
    let (_dir, storage, device) = setup().await;
    let now = Utc::now().timestamp();
    storage
        .create_command(&device.serial, "ping", None, now - 300, now)
        .await
        .unwrap();

    let pending = commands::poll(&storage, &device.serial, now).await.unwrap();
    assert!(pending.is_empty());
}

#[tokio::test]
async fn non_whitelisted_command_creates_no_row() {
    let (_dir, storage, device) = setup().await;
    let publisher = BroadcastPublisher::new();
    let claims = app_claims(&device);
    let now = Utc::now().timestamp();

    let err = commands::dispatch(&storage, &publisher, &claims, &create_req("exec"), now)
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::Validation(_)));

    assert!(storage
        .pending_commands(&device.serial, now, 10)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn set_brightness_with_object_payload_is_accepted() {
    let (_dir, storage, device) = setup().await;
    let publisher = BroadcastPublisher::new();
    let claims = app_claims(&device);
    let now = Utc::now().timestamp();

    let req = CreateCommandRequest {
        command: "set_brightness".to_string(),
        payload: Some(json!({ "level": 80 })),
        device_uuid: None,
        pairing_code: None,
    };
    let created = commands::dispatch(&storage, &publisher, &claims, &req, now)
        .await
        .unwrap();
    let row = storage.get_command(&created.command_id).await.unwrap().unwrap();
    assert_eq!(row.name, "set_brightness");
    assert!(row.payload.unwrap().contains("80"));

    // A non-object payload is rejected before any write.
    let bad = CreateCommandRequest {
        command: "set_brightness".to_string(),
        payload: Some(json!([1, 2, 3])),
        device_uuid: None,
        pairing_code: None,
    };
    let err = commands::dispatch(&storage, &publisher, &claims, &bad, now)
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::Validation(_)));
}

#[tokio::test]
async fn ack_for_another_devices_command_answers_not_found() {
    let (_dir, storage, device) = setup().await;
    let now = Utc::now().timestamp();

    let other = storage.create_device("deadbeef", "other-key", now).await.unwrap();
    storage.record_device_report(&other.serial, now, None).await.unwrap();

    let row = storage
        .create_command(&device.serial, "ping", None, now, now + 300)
        .await
        .unwrap();

    let ack = AckRequest {
        command_id: row.id.clone(),
        success: true,
        response: None,
        error: None,
    };
    // The other device sees the exact same answer as for a bogus id.
    let err = commands::acknowledge(&storage, &other.serial, &ack, now).await.unwrap_err();
    assert!(matches!(err, ApiError::NotFound(_)));

    let bogus = AckRequest {
        command_id: "no-such-command".to_string(),
        success: true,
        response: None,
        error: None,
    };
    let err = commands::acknowledge(&storage, &other.serial, &bogus, now).await.unwrap_err();
    assert!(matches!(err, ApiError::NotFound(_)));

    // And the victim's command is untouched.
    let row = storage.get_command(&row.id).await.unwrap().unwrap();
    assert_eq!(row.status, "pending");
}

#[tokio::test]
async fn dispatch_resolves_explicit_uuid_before_token_binding() {
    let (_dir, storage, device) = setup().await;
    let publisher = BroadcastPublisher::new();
    let now = Utc::now().timestamp();

    let second = storage.create_device("cafef00d", "second-key", now).await.unwrap();
    storage.record_device_report(&second.serial, now, None).await.unwrap();

    // Token bound to `device`, explicit target `second`: explicit wins.
    let claims = app_claims(&device);
    let req = CreateCommandRequest {
        command: "reboot".to_string(),
        payload: None,
        device_uuid: Some(second.id.clone()),
        pairing_code: None,
    };
    let created = commands::dispatch(&storage, &publisher, &claims, &req, now)
        .await
        .unwrap();
    let row = storage.get_command(&created.command_id).await.unwrap().unwrap();
    assert_eq!(row.serial, second.serial);
}

#[tokio::test]
async fn dispatch_to_unknown_device_is_a_specific_not_found() {
    let (_dir, storage, device) = setup().await;
    let publisher = BroadcastPublisher::new();
    let now = Utc::now().timestamp();

    let mut claims = app_claims(&device);
    claims.device_id = "no-such-device".to_string();

    let err = commands::dispatch(&storage, &publisher, &claims, &create_req("ping"), now)
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::NotFound("device not found")));
}
