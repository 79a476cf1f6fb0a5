//! Firmware manifest rendering and artifact URL signing.
//!
//! The binary store is an external collaborator reached through
//! short-lived signed URLs. Unauthenticated manifest requests always see
//! the latest release; device-authenticated requests are gated by the
//! staged rollout and may receive the empty manifest (`version: "none"`).

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use hmac::{Hmac, Mac};
use semver::Version;
use serde_json::{json, Value};
use sha2::Sha256;

use crate::config::ReleaseConfig;
use crate::error::ApiError;
use crate::rollout;

/// Signed artifact URLs expire after ten minutes.
pub const SIGNED_URL_TTL_SECS: i64 = 600;

/// Manifest flavors a client can request with `?format=`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManifestFormat {
    /// Native OTA manifest consumed by the firmware updater.
    Ota,
    /// esp-web-tools JSON for browser-based first-time flashing.
    EspWebTools,
}

impl ManifestFormat {
    pub fn parse(raw: Option<&str>) -> Result<Self, ApiError> {
        match raw {
            None | Some("ota") => Ok(ManifestFormat::Ota),
            Some("esp-web-tools") => Ok(ManifestFormat::EspWebTools),
            Some(other) => Err(ApiError::Validation(format!(
                "unknown manifest format: {other}"
            ))),
        }
    }
}

/// Mints expiring signed URLs for release artifacts. The production
/// deployment delegates to the object store; [`HmacUrlSigner`] is the
/// self-hosted implementation.
pub trait UrlSigner: Send + Sync {
    fn signed_url(&self, artifact: &str, now: i64) -> String;
}

/// `<base>/<artifact>?expires=<now+600>&sig=<hmac>` — the downstream file
/// server re-computes the HMAC and rejects expired or tampered links.
pub struct HmacUrlSigner {
    base_url: String,
    secret: String,
}

impl HmacUrlSigner {
    pub fn new(base_url: String, secret: String) -> Self {
        Self { base_url, secret }
    }
}

impl UrlSigner for HmacUrlSigner {
    fn signed_url(&self, artifact: &str, now: i64) -> String {
        let expires = now + SIGNED_URL_TTL_SECS;
        let mut mac = Hmac::<Sha256>::new_from_slice(self.secret.as_bytes())
            .expect("HMAC accepts any key length");
        mac.update(format!("{artifact}:{expires}").as_bytes());
        let sig = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());
        format!(
            "{}/{artifact}?expires={expires}&sig={sig}",
            self.base_url.trim_end_matches('/')
        )
    }
}

/// The manifest returned to a device excluded from the rollout (and to
/// devices already on the latest version).
pub fn empty_manifest() -> Value {
    json!({ "version": "none" })
}

/// Render the manifest for a release.
///
/// `gate` carries the authenticated device's (serial, rollout percentage)
/// when rollout applies; `None` means an unauthenticated request, which
/// always receives the latest release.
pub fn manifest(
    release: &ReleaseConfig,
    format: ManifestFormat,
    signer: &dyn UrlSigner,
    gate: Option<(&str, i32)>,
    device_version: Option<&str>,
    now: i64,
) -> Value {
    if let Some((serial, percent)) = gate {
        if !rollout::in_rollout(serial, &release.version, percent) {
            return empty_manifest();
        }
        // A device already at (or past) the released version gets the
        // empty manifest too — nothing to update.
        if let Some(current) = device_version.and_then(|v| Version::parse(v).ok()) {
            if let Ok(released) = Version::parse(&release.version) {
                if current >= released {
                    return empty_manifest();
                }
            }
        }
    }

    let url = signer.signed_url(&release.artifact, now);
    match format {
        ManifestFormat::Ota => json!({
            "version": release.version,
            "url": url,
            "size": release.size,
            "sha256": release.sha256,
        }),
        ManifestFormat::EspWebTools => json!({
            "name": "Glow Display",
            "version": release.version,
            "builds": [{
                "chipFamily": "ESP32",
                "parts": [{ "path": url, "offset": 0 }]
            }]
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn release(percent: i32) -> ReleaseConfig {
        ReleaseConfig {
            version: "1.4.2".to_string(),
            rollout_percent: percent,
            artifact: "glow-1.4.2.bin".to_string(),
            size: 1_048_576,
            sha256: "abcd".to_string(),
        }
    }

    fn signer() -> HmacUrlSigner {
        HmacUrlSigner::new("https://firmware.test".to_string(), "secret".to_string())
    }

    #[test]
    fn unauthenticated_requests_ignore_rollout() {
        let m = manifest(&release(0), ManifestFormat::Ota, &signer(), None, None, 1000);
        assert_eq!(m["version"], "1.4.2");
    }

    #[test]
    fn excluded_device_gets_the_empty_manifest() {
        let m = manifest(
            &release(0),
            ManifestFormat::Ota,
            &signer(),
            Some(("a1b2c3d4", 0)),
            None,
            1000,
        );
        assert_eq!(m, empty_manifest());
    }

    #[test]
    fn up_to_date_device_gets_the_empty_manifest() {
        let m = manifest(
            &release(100),
            ManifestFormat::Ota,
            &signer(),
            Some(("a1b2c3d4", 100)),
            Some("1.4.2"),
            1000,
        );
        assert_eq!(m, empty_manifest());
    }

    #[test]
    fn signed_url_carries_expiry_and_signature() {
        let url = signer().signed_url("glow-1.4.2.bin", 1_706_400_000);
        assert!(url.starts_with("https://firmware.test/glow-1.4.2.bin?expires=1706400600&sig="));
        // Same inputs, same link; different expiry, different signature.
        assert_eq!(url, signer().signed_url("glow-1.4.2.bin", 1_706_400_000));
        assert_ne!(url, signer().signed_url("glow-1.4.2.bin", 1_706_400_001));
    }

    #[test]
    fn esp_web_tools_format_nests_the_artifact() {
        let m = manifest(
            &release(100),
            ManifestFormat::EspWebTools,
            &signer(),
            None,
            None,
            1000,
        );
        assert_eq!(m["builds"][0]["chipFamily"], "ESP32");
    }

    #[test]
    fn unknown_format_is_a_validation_error() {
        assert!(ManifestFormat::parse(Some("tarball")).is_err());
        assert_eq!(ManifestFormat::parse(None).unwrap(), ManifestFormat::Ota);
    }
}
