//! HMAC-SHA256 request signatures.
//!
//! The canonical message is `serial ":" timestamp ":" hex(sha256(body))`.
//! Verification is constant-time via the `hmac` crate's `verify_slice`,
//! never a byte-wise string compare.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

/// Hex SHA-256 of the raw request body.
pub fn body_digest_hex(body: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(body);
    hex::encode(hasher.finalize())
}

/// Canonical message covered by the signature.
pub fn canonical_message(serial: &str, timestamp: i64, body: &[u8]) -> String {
    format!("{serial}:{timestamp}:{}", body_digest_hex(body))
}

/// Sign a request the way a device does. Used by tests and the
/// provisioning tooling; the daemon itself only verifies.
pub fn sign(serial: &str, timestamp: i64, body: &[u8], key: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(canonical_message(serial, timestamp, body).as_bytes());
    BASE64.encode(mac.finalize().into_bytes())
}

/// Constant-time verification of a caller-supplied base64 signature.
/// Returns `false` for undecodable signatures rather than erroring — a
/// garbage signature is just a failed match.
pub fn verify(serial: &str, timestamp: i64, body: &[u8], key: &[u8], signature_b64: &str) -> bool {
    let Ok(signature) = BASE64.decode(signature_b64) else {
        return false;
    };
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(canonical_message(serial, timestamp, body).as_bytes());
    mac.verify_slice(&signature).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const KEY: &[u8] = b"0123456789abcdef0123456789abcdef";

    #[test]
    fn signature_round_trips() {
        let sig = sign("a1b2c3d4", 1_706_400_000, b"{\"v\":1}", KEY);
        assert!(verify("a1b2c3d4", 1_706_400_000, b"{\"v\":1}", KEY, &sig));
        // Base64 of a 256-bit MAC is 44 chars with padding.
        assert_eq!(sig.len(), 44);
    }

    #[test]
    fn garbage_signature_is_a_failed_match_not_an_error() {
        assert!(!verify("a1b2c3d4", 1, b"", KEY, "not base64 at all!"));
    }

    proptest! {
        #[test]
        fn signing_is_deterministic(body in proptest::collection::vec(any::<u8>(), 0..256), ts in 0i64..2_000_000_000) {
            let a = sign("a1b2c3d4", ts, &body, KEY);
            let b = sign("a1b2c3d4", ts, &body, KEY);
            prop_assert_eq!(a, b);
        }

        #[test]
        fn any_field_change_breaks_the_signature(ts in 0i64..2_000_000_000) {
            let sig = sign("a1b2c3d4", ts, b"body", KEY);
            prop_assert!(!verify("a1b2c3d5", ts, b"body", KEY, &sig));
            prop_assert!(!verify("a1b2c3d4", ts + 1, b"body", KEY, &sig));
            prop_assert!(!verify("a1b2c3d4", ts, b"body!", KEY, &sig));
            prop_assert!(!verify("a1b2c3d4", ts, b"body", b"other-key", &sig));
        }
    }
}
