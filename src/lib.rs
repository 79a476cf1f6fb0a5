pub mod auth;
pub mod commands;
pub mod config;
pub mod error;
pub mod firmware;
pub mod identity;
pub mod notify;
pub mod pairing;
pub mod provisioning;
pub mod rest;
pub mod rollout;
pub mod storage;

use std::sync::Arc;

use auth::token::TokenKeys;
use config::DaemonConfig;
use firmware::{HmacUrlSigner, UrlSigner};
use notify::{BroadcastPublisher, Publisher};
use storage::Storage;

/// Shared application state passed to every REST handler.
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<DaemonConfig>,
    pub storage: Arc<Storage>,
    /// Push-notification collaborator (best-effort; polling is the
    /// delivery guarantee such as it is).
    pub publisher: Arc<dyn Publisher>,
    /// Token signing/validation keys; previous secret accepted during a
    /// rotation window.
    pub token_keys: Arc<TokenKeys>,
    /// Signed-URL collaborator for firmware artifacts.
    pub url_signer: Arc<dyn UrlSigner>,
    pub started_at: std::time::Instant,
}

impl AppContext {
    /// Wire up the default collaborators from a loaded config and an
    /// opened storage.
    pub fn new(config: DaemonConfig, storage: Storage) -> Self {
        let token_keys = TokenKeys::new(
            config.token_secret.clone(),
            config.token_secret_previous.clone(),
        );
        let url_signer = HmacUrlSigner::new(
            config.firmware_base_url.clone(),
            config.url_signing_secret.clone(),
        );
        Self {
            config: Arc::new(config),
            storage: Arc::new(storage),
            publisher: Arc::new(BroadcastPublisher::new()),
            token_keys: Arc::new(token_keys),
            url_signer: Arc::new(url_signer),
            started_at: std::time::Instant::now(),
        }
    }
}
