use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::error::ApiError;

const DEFAULT_PORT: u16 = 4320;
const DEFAULT_FIRMWARE_BASE_URL: &str = "https://firmware.glow.io";

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

// ─── ReleaseConfig ────────────────────────────────────────────────────────────

/// Current firmware release (`[release]` in config.toml).
///
/// `rollout_percent` gates authenticated manifest requests: a device is
/// eligible iff its deterministic bucket for (serial, version) falls below
/// the percentage. Unauthenticated manifest requests ignore it entirely.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ReleaseConfig {
    /// Semver-like version string of the latest release, e.g. "1.4.2".
    pub version: String,
    /// 0 = nobody, 100 = everybody. Clamped by the rollout selector.
    pub rollout_percent: i32,
    /// Artifact file name under `firmware_base_url`, e.g. "glow-1.4.2.bin".
    pub artifact: String,
    /// Artifact size in bytes, reported in the OTA manifest.
    pub size: u64,
    /// Hex SHA-256 of the artifact, verified by the device after download.
    pub sha256: String,
}

impl Default for ReleaseConfig {
    fn default() -> Self {
        Self {
            version: "0.0.0".to_string(),
            rollout_percent: 100,
            artifact: String::new(),
            size: 0,
            sha256: String::new(),
        }
    }
}

// ─── File-backed section ──────────────────────────────────────────────────────

/// Subset of the config that can be set in `<data_dir>/config.toml`.
/// CLI flags and env vars take precedence over the file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct ConfigFile {
    bind_address: Option<String>,
    port: Option<u16>,
    token_secret: Option<String>,
    token_secret_previous: Option<String>,
    url_signing_secret: Option<String>,
    firmware_base_url: Option<String>,
    release: Option<ReleaseConfig>,
}

// ─── DaemonConfig ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub bind_address: String,
    pub port: u16,
    pub data_dir: PathBuf,
    /// HS256 signing secret for bearer tokens. Required — the daemon
    /// refuses to start without one.
    pub token_secret: String,
    /// Previous signing secret, accepted for validation only during a
    /// rotation window. Never used to mint new tokens.
    pub token_secret_previous: Option<String>,
    /// Secret for short-lived signed firmware URLs. Defaults to the token
    /// secret when unset.
    pub url_signing_secret: String,
    pub firmware_base_url: String,
    pub release: ReleaseConfig,
}

impl DaemonConfig {
    /// Build the effective config: defaults ← config.toml ← CLI/env.
    ///
    /// Fails closed with [`ApiError::Config`] when no token signing secret
    /// is available from any source.
    pub fn load(
        bind_address: Option<String>,
        port: Option<u16>,
        data_dir: Option<PathBuf>,
        token_secret: Option<String>,
    ) -> Result<Self, ApiError> {
        let data_dir = data_dir.unwrap_or_else(default_data_dir);
        let file = read_config_file(&data_dir.join("config.toml"));

        let token_secret = token_secret
            .or(file.token_secret)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| {
                ApiError::Config(
                    "no token signing secret configured (set GLOWD_TOKEN_SECRET or \
                     token_secret in config.toml)"
                        .to_string(),
                )
            })?;

        let url_signing_secret = file
            .url_signing_secret
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| token_secret.clone());

        Ok(Self {
            bind_address: bind_address
                .or(file.bind_address)
                .unwrap_or_else(default_bind_address),
            port: port.or(file.port).unwrap_or(DEFAULT_PORT),
            data_dir,
            token_secret,
            token_secret_previous: file.token_secret_previous.filter(|s| !s.is_empty()),
            url_signing_secret,
            firmware_base_url: file
                .firmware_base_url
                .unwrap_or_else(|| DEFAULT_FIRMWARE_BASE_URL.to_string()),
            release: file.release.unwrap_or_default(),
        })
    }
}

fn default_data_dir() -> PathBuf {
    std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .map(PathBuf::from)
        .map(|h| h.join(".glowd"))
        .unwrap_or_else(|| PathBuf::from(".glowd"))
}

fn read_config_file(path: &Path) -> ConfigFile {
    match std::fs::read_to_string(path) {
        Ok(raw) => match toml::from_str(&raw) {
            Ok(file) => {
                info!("loaded config file: {}", path.display());
                file
            }
            Err(e) => {
                warn!("ignoring malformed config file {}: {e}", path.display());
                ConfigFile::default()
            }
        },
        Err(_) => ConfigFile::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_token_secret_fails_closed() {
        let dir = tempfile::tempdir().unwrap();
        let result = DaemonConfig::load(None, None, Some(dir.path().to_path_buf()), None);
        assert!(matches!(result, Err(ApiError::Config(_))));
    }

    #[test]
    fn cli_secret_wins_over_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("config.toml"),
            "token_secret = \"from-file\"\nport = 9999\n",
        )
        .unwrap();
        let cfg = DaemonConfig::load(
            None,
            Some(4321),
            Some(dir.path().to_path_buf()),
            Some("from-cli".to_string()),
        )
        .unwrap();
        assert_eq!(cfg.token_secret, "from-cli");
        assert_eq!(cfg.port, 4321);
    }

    #[test]
    fn file_release_section_is_loaded() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("config.toml"),
            r#"
token_secret = "s"

[release]
version = "1.4.2"
rollout_percent = 25
artifact = "glow-1.4.2.bin"
size = 1048576
sha256 = "ab"
"#,
        )
        .unwrap();
        let cfg = DaemonConfig::load(None, None, Some(dir.path().to_path_buf()), None).unwrap();
        assert_eq!(cfg.release.version, "1.4.2");
        assert_eq!(cfg.release.rollout_percent, 25);
        // URL signing secret falls back to the token secret.
        assert_eq!(cfg.url_signing_secret, "s");
    }
}
