// main.rs
// Axum server wiring: reads configuration, connects MongoDB, mounts the 2FA routes.
//
// Endpoints (all JSON):
// - POST   /accounts/{id}/2fa/setup         -> secret, otpauth URI, backup codes, QR PNG
// - POST   /accounts/{id}/2fa/confirm       -> enables 2FA once the token verifies
// - POST   /accounts/{id}/2fa/verify        -> TOTP or backup code at login
// - POST   /accounts/{id}/2fa/disable       -> password-gated disable
// - POST   /accounts/{id}/2fa/backup-codes  -> fresh backup code set
// - GET    /accounts/{id}/2fa               -> status
// - GET    /accounts/{id}/2fa/required      -> policy verdict for ?role=
// - GET    /accounts/{id}/2fa/challenge     -> what the login flow must ask for
// - DELETE /accounts/{id}/2fa               -> drop the record once the account is deleted
// - POST   /settings/2fa/refresh            -> reload policy settings, bypassing the TTL

use anyhow::Context;
use dotenvy::dotenv;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use marketplace_2fa::{config::AppConfig, routes, state};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "marketplace_2fa=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::from_env()?;
    let state = Arc::new(
        state::init_state(&config)
            .await
            .context("failed to initialize MongoDB state")?,
    );

    let app = routes::router(state);

    let listener = TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;
    tracing::info!(addr = %config.bind_addr, "listening");
    axum::serve(listener, app).await?;
    Ok(())
}
