// rest/mod.rs — Public REST API server.
//
// Axum HTTP server bridging devices and companion apps to the auth,
// command-queue, pairing, and firmware services.
//
// Endpoints:
//   GET  /api/health
//   POST /api/devices/register        (HMAC)
//   POST /api/devices/token           (HMAC)
//   POST /api/devices/state           (HMAC or device token)
//   POST /api/app/token               (collaborator-verified user)
//   GET  /api/app/pairing             (app token)
//   POST /api/app/presence            (app token)
//   POST /api/commands                (app token)
//   GET  /api/commands/poll           (HMAC or device token)
//   POST /api/commands/ack            (HMAC or device token)
//   POST /api/provisioning/tokens     (app token)
//   GET  /api/firmware/manifest       (optional device auth)

pub mod auth;
pub mod routes;

use anyhow::Result;
use axum::{
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::AppContext;

pub async fn serve(ctx: Arc<AppContext>) -> Result<()> {
    let bind = format!("{}:{}", ctx.config.bind_address, ctx.config.port);
    let addr: SocketAddr = bind.parse()?;

    let router = build_router(ctx);

    info!("REST API listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).await?;
    Ok(())
}

pub fn build_router(ctx: Arc<AppContext>) -> Router {
    Router::new()
        // Health (no auth)
        .route("/api/health", get(routes::health::health))
        // Device provisioning & auth
        .route("/api/devices/register", post(routes::devices::register))
        .route("/api/devices/token", post(routes::devices::refresh_token))
        .route("/api/devices/state", post(routes::devices::report_state))
        // App side
        .route("/api/app/token", post(routes::app::issue_token))
        .route("/api/app/pairing", get(routes::app::pairing_status))
        .route("/api/app/presence", post(routes::app::push_presence))
        // Command queue
        .route("/api/commands", post(routes::commands::create))
        .route("/api/commands/poll", get(routes::commands::poll))
        .route("/api/commands/ack", post(routes::commands::acknowledge))
        // Provisioning pre-authorization
        .route(
            "/api/provisioning/tokens",
            post(routes::provisioning::issue_token),
        )
        // Firmware
        .route("/api/firmware/manifest", get(routes::firmware::manifest))
        .layer(CorsLayer::permissive())
        .with_state(ctx)
}
