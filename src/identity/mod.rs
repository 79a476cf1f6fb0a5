//! Device identity primitives: serial numbers, pairing codes, and the
//! ordered resolution chain used by command dispatch.

use rand_core::{OsRng, RngCore};

use crate::error::ApiError;
use crate::storage::{DeviceRow, Storage};

/// Pairing-code alphabet. Visually confusing glyphs (`I O 0 1`) are
/// excluded so the code survives being read off a small display.
pub const PAIRING_CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

pub const PAIRING_CODE_LEN: usize = 6;

const SERIAL_LEN: usize = 8;

/// Generate a random 6-char pairing code from the restricted alphabet.
///
/// Uniqueness across devices is enforced by the storage layer — the
/// caller retries on a unique-constraint conflict.
pub fn generate_pairing_code() -> String {
    let mut bytes = [0u8; PAIRING_CODE_LEN];
    OsRng.fill_bytes(&mut bytes);
    bytes
        .iter()
        .map(|b| PAIRING_CODE_ALPHABET[*b as usize % PAIRING_CODE_ALPHABET.len()] as char)
        .collect()
}

/// Normalize a device serial: 8 hex chars, case-insensitive, stored and
/// compared lowercase.
pub fn normalize_serial(raw: &str) -> Result<String, ApiError> {
    let trimmed = raw.trim();
    if trimmed.len() != SERIAL_LEN || !trimmed.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(ApiError::Validation(format!(
            "invalid serial number: expected {SERIAL_LEN} hex characters"
        )));
    }
    Ok(trimmed.to_ascii_lowercase())
}

/// Normalize a pairing code for lookup: uppercase, trimmed.
pub fn normalize_pairing_code(raw: &str) -> String {
    raw.trim().to_ascii_uppercase()
}

/// Lookup keys for resolving a command's target device, in precedence
/// order. Each resolver is tried in turn; the first hit wins.
#[derive(Debug, Default)]
pub struct DeviceLookup<'a> {
    /// Explicit device UUID from the request body.
    pub device_uuid: Option<&'a str>,
    /// Device id bound to the caller's bearer token.
    pub token_device_id: Option<&'a str>,
    /// Pairing code, the last-resort resolver.
    pub pairing_code: Option<&'a str>,
}

/// Resolve a device through the ordered chain: explicit UUID → token
/// binding → pairing code. Keeping the chain here (rather than `a ?? b`
/// fallbacks at call sites) makes the precedence auditable in one place.
pub async fn resolve_device(
    storage: &Storage,
    lookup: DeviceLookup<'_>,
) -> Result<Option<DeviceRow>, ApiError> {
    if let Some(uuid) = lookup.device_uuid {
        if let Some(device) = storage.get_device_by_id(uuid).await? {
            return Ok(Some(device));
        }
    }
    if let Some(id) = lookup.token_device_id {
        if let Some(device) = storage.get_device_by_id(id).await? {
            return Ok(Some(device));
        }
    }
    if let Some(code) = lookup.pairing_code {
        let code = normalize_pairing_code(code);
        if let Some(device) = storage.get_device_by_pairing_code(&code).await? {
            return Ok(Some(device));
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pairing_code_uses_restricted_alphabet() {
        for _ in 0..64 {
            let code = generate_pairing_code();
            assert_eq!(code.len(), PAIRING_CODE_LEN);
            for c in code.bytes() {
                assert!(
                    PAIRING_CODE_ALPHABET.contains(&c),
                    "unexpected glyph {} in pairing code",
                    c as char
                );
                assert!(!b"IO01".contains(&c));
            }
        }
    }

    #[test]
    fn serial_is_case_insensitive() {
        assert_eq!(normalize_serial("A1B2C3D4").unwrap(), "a1b2c3d4");
        assert_eq!(normalize_serial(" a1b2c3d4 ").unwrap(), "a1b2c3d4");
    }

    #[test]
    fn serial_rejects_bad_shapes() {
        assert!(normalize_serial("a1b2c3").is_err()); // too short
        assert!(normalize_serial("a1b2c3d4e5").is_err()); // too long
        assert!(normalize_serial("a1b2c3zz").is_err()); // not hex
    }
}
