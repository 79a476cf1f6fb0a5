//! Short-lived signed bearer tokens (HS256) for the two principal kinds.
//!
//! Tokens are stateless: validity is signature + expiry, no server-side
//! revocation list. The validator is kind-agnostic — endpoints that
//! require a specific principal kind call [`Claims::require_kind`] after
//! validation.

use jsonwebtoken::{
    decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use serde::{Deserialize, Serialize};

use crate::storage::DeviceRow;

/// Device tokens live a day; the device refreshes over HMAC auth.
pub const DEVICE_TOKEN_TTL_SECS: i64 = 86_400;
/// App tokens live an hour; the companion app re-authenticates often.
pub const APP_TOKEN_TTL_SECS: i64 = 3_600;

pub const TOKEN_ROLE: &str = "authenticated";
pub const TOKEN_AUDIENCE: &str = "glow-devices";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrincipalKind {
    Device,
    App,
}

impl PrincipalKind {
    pub fn as_str(self) -> &'static str {
        match self {
            PrincipalKind::Device => "device",
            PrincipalKind::App => "app",
        }
    }

    pub fn ttl_secs(self) -> i64 {
        match self {
            PrincipalKind::Device => DEVICE_TOKEN_TTL_SECS,
            PrincipalKind::App => APP_TOKEN_TTL_SECS,
        }
    }
}

/// Claim set carried by every token. All fields are required — a token
/// missing any of them fails validation with a `MissingClaim` reason.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub role: String,
    pub aud: String,
    pub serial: String,
    pub device_id: String,
    pub pairing_code: String,
    pub kind: PrincipalKind,
    pub iat: i64,
    pub exp: i64,
}

impl Claims {
    /// Kind check for endpoints restricted to one principal kind. The
    /// validator itself never enforces this.
    pub fn require_kind(&self, expected: PrincipalKind) -> Result<(), TokenError> {
        if self.kind == expected {
            Ok(())
        } else {
            Err(TokenError::WrongKind {
                expected,
                actual: self.kind,
            })
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("invalid signature")]
    InvalidSignature,
    #[error("expired")]
    Expired,
    #[error("missing claim: {0}")]
    MissingClaim(String),
    #[error("wrong principal kind: expected {}, got {}", expected.as_str(), actual.as_str())]
    WrongKind {
        expected: PrincipalKind,
        actual: PrincipalKind,
    },
}

/// Signing/validation keys. `previous` is accepted for validation only
/// during a rotation window; new tokens are always minted with `current`.
/// Rotation needs no cross-request coordination — both keys are tried on
/// every validation.
#[derive(Clone)]
pub struct TokenKeys {
    current: String,
    previous: Option<String>,
}

impl TokenKeys {
    pub fn new(current: String, previous: Option<String>) -> Self {
        Self { current, previous }
    }

    /// Mint a token for `device` scoped to one principal kind.
    /// `sub` is the opaque subject: the device id for device tokens, the
    /// assigned user id for app tokens.
    pub fn issue(
        &self,
        kind: PrincipalKind,
        sub: &str,
        device: &DeviceRow,
        now: i64,
    ) -> Result<String, jsonwebtoken::errors::Error> {
        let claims = Claims {
            sub: sub.to_string(),
            role: TOKEN_ROLE.to_string(),
            aud: TOKEN_AUDIENCE.to_string(),
            serial: device.serial.clone(),
            device_id: device.id.clone(),
            pairing_code: device.pairing_code.clone(),
            kind,
            iat: now,
            exp: now + kind.ttl_secs(),
        };
        encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(self.current.as_bytes()),
        )
    }

    /// Validate signature, expiry (`exp > now`, zero leeway), and claim
    /// presence. Tries the current secret, then the previous one.
    pub fn validate(&self, token: &str) -> Result<Claims, TokenError> {
        match self.validate_with(token, &self.current) {
            // A bad signature may simply mean the token was minted with
            // the previous secret during a rotation window.
            Err(TokenError::InvalidSignature) => {
                if let Some(prev) = &self.previous {
                    self.validate_with(token, prev)
                } else {
                    Err(TokenError::InvalidSignature)
                }
            }
            other => other,
        }
    }

    fn validate_with(&self, token: &str, secret: &str) -> Result<Claims, TokenError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_audience(&[TOKEN_AUDIENCE]);
        validation.set_required_spec_claims(&["exp", "aud"]);

        match decode::<Claims>(
            token,
            &DecodingKey::from_secret(secret.as_bytes()),
            &validation,
        ) {
            Ok(data) => Ok(data.claims),
            Err(e) => Err(match e.kind() {
                ErrorKind::ExpiredSignature => TokenError::Expired,
                ErrorKind::MissingRequiredClaim(claim) => TokenError::MissingClaim(claim.clone()),
                ErrorKind::Json(_) => TokenError::MissingClaim("malformed claim set".to_string()),
                _ => TokenError::InvalidSignature,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_device() -> DeviceRow {
        DeviceRow {
            id: "6f9619ff-8b86-d011-b42d-00c04fc964ff".to_string(),
            serial: "a1b2c3d4".to_string(),
            key_hash: "kh".to_string(),
            pairing_code: "ABCDEF".to_string(),
            user_id: Some("user-1".to_string()),
            provisioned: 1,
            last_auth_ts: 0,
            created_at: 0,
        }
    }

    fn keys() -> TokenKeys {
        TokenKeys::new("test-secret".to_string(), None)
    }

    #[test]
    fn device_token_lives_a_day_app_token_an_hour() {
        let device = test_device();
        let now = chrono::Utc::now().timestamp();
        for (kind, ttl) in [
            (PrincipalKind::Device, DEVICE_TOKEN_TTL_SECS),
            (PrincipalKind::App, APP_TOKEN_TTL_SECS),
        ] {
            let token = keys().issue(kind, "sub", &device, now).unwrap();
            let claims = keys().validate(&token).unwrap();
            assert_eq!(claims.exp - claims.iat, ttl);
            assert_eq!(claims.kind, kind);
            assert_eq!(claims.serial, "a1b2c3d4");
        }
    }

    #[test]
    fn expired_token_is_rejected_regardless_of_signature() {
        let device = test_device();
        let past = chrono::Utc::now().timestamp() - 2 * DEVICE_TOKEN_TTL_SECS;
        let token = keys()
            .issue(PrincipalKind::Device, "sub", &device, past)
            .unwrap();
        assert!(matches!(keys().validate(&token), Err(TokenError::Expired)));
    }

    #[test]
    fn wrong_secret_is_an_invalid_signature() {
        let device = test_device();
        let now = chrono::Utc::now().timestamp();
        let token = keys()
            .issue(PrincipalKind::Device, "sub", &device, now)
            .unwrap();
        let other = TokenKeys::new("other-secret".to_string(), None);
        assert!(matches!(
            other.validate(&token),
            Err(TokenError::InvalidSignature)
        ));
    }

    #[test]
    fn previous_secret_is_accepted_during_rotation() {
        let device = test_device();
        let now = chrono::Utc::now().timestamp();
        let old = keys();
        let token = old
            .issue(PrincipalKind::App, "user-1", &device, now)
            .unwrap();

        let rotated = TokenKeys::new("new-secret".to_string(), Some("test-secret".to_string()));
        let claims = rotated.validate(&token).unwrap();
        assert_eq!(claims.sub, "user-1");

        // And new tokens are minted with the new secret only.
        let fresh = rotated
            .issue(PrincipalKind::App, "user-1", &device, now)
            .unwrap();
        assert!(TokenKeys::new("test-secret".to_string(), None)
            .validate(&fresh)
            .is_err());
    }

    #[test]
    fn kind_check_is_the_callers_job() {
        let device = test_device();
        let now = chrono::Utc::now().timestamp();
        let token = keys()
            .issue(PrincipalKind::Device, "sub", &device, now)
            .unwrap();
        let claims = keys().validate(&token).unwrap();
        assert!(claims.require_kind(PrincipalKind::Device).is_ok());
        assert!(matches!(
            claims.require_kind(PrincipalKind::App),
            Err(TokenError::WrongKind { .. })
        ));
    }
}
