// routes/two_factor.rs
// JSON handlers over TwoFactorService, one per operation, all under /accounts/{id}/2fa.

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::models::{SetupResult, UserRole};
use crate::routes::qrcode::render_qr_png_base64;
use crate::service::VerificationMethod;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct PasswordRequest {
    pub password: String,
}

#[derive(Deserialize)]
pub struct ConfirmRequest {
    pub secret: String,
    pub token: String,
    pub backup_codes: Vec<String>,
}

#[derive(Deserialize)]
pub struct TokenRequest {
    pub token: String,
}

#[derive(Deserialize)]
pub struct RoleQuery {
    pub role: UserRole,
}

#[derive(Serialize)]
struct SetupResponse {
    #[serde(flatten)]
    setup: SetupResult,
    qr_code_png: Option<String>,
}

#[derive(Serialize)]
struct VerifyResponse {
    verified: bool,
    #[serde(flatten)]
    method: VerificationMethod,
}

/// POST /accounts/{id}/2fa/setup { "password": "..." }
pub async fn begin_setup(
    State(st): State<Arc<AppState>>,
    Path(account_id): Path<String>,
    Json(body): Json<PasswordRequest>,
) -> Response {
    match st.two_factor.begin_setup(&account_id, &body.password).await {
        Ok(setup) => {
            let qr_code_png = match render_qr_png_base64(&setup.provisioning_uri) {
                Ok(png) => Some(png),
                Err(e) => {
                    tracing::warn!(error = %e, "failed to render setup QR code");
                    None
                }
            };
            (StatusCode::OK, Json(SetupResponse { setup, qr_code_png })).into_response()
        }
        Err(e) => e.into_response(),
    }
}

/// POST /accounts/{id}/2fa/confirm { "secret", "token", "backup_codes" }
pub async fn confirm_setup(
    State(st): State<Arc<AppState>>,
    Path(account_id): Path<String>,
    Json(body): Json<ConfirmRequest>,
) -> Response {
    match st
        .two_factor
        .confirm_setup(&account_id, &body.secret, &body.token, &body.backup_codes)
        .await
    {
        Ok(status) => (StatusCode::OK, Json(status)).into_response(),
        Err(e) => e.into_response(),
    }
}

/// POST /accounts/{id}/2fa/verify { "token": "123456" | "<backup code>" }
pub async fn verify_at_login(
    State(st): State<Arc<AppState>>,
    Path(account_id): Path<String>,
    Json(body): Json<TokenRequest>,
) -> Response {
    match st.two_factor.verify_at_login(&account_id, &body.token).await {
        Ok(method) => (
            StatusCode::OK,
            Json(VerifyResponse {
                verified: true,
                method,
            }),
        )
            .into_response(),
        Err(e) => e.into_response(),
    }
}

/// POST /accounts/{id}/2fa/disable { "password": "..." }
pub async fn disable(
    State(st): State<Arc<AppState>>,
    Path(account_id): Path<String>,
    Json(body): Json<PasswordRequest>,
) -> Response {
    match st.two_factor.disable(&account_id, &body.password).await {
        Ok(status) => (StatusCode::OK, Json(status)).into_response(),
        Err(e) => e.into_response(),
    }
}

/// POST /accounts/{id}/2fa/backup-codes
pub async fn regenerate_backup_codes(
    State(st): State<Arc<AppState>>,
    Path(account_id): Path<String>,
) -> Response {
    match st.two_factor.regenerate_backup_codes(&account_id).await {
        Ok(codes) => (StatusCode::OK, Json(serde_json::json!({ "codes": codes }))).into_response(),
        Err(e) => e.into_response(),
    }
}

/// GET /accounts/{id}/2fa
pub async fn status(State(st): State<Arc<AppState>>, Path(account_id): Path<String>) -> Response {
    match st.two_factor.status(&account_id).await {
        Ok(status) => (StatusCode::OK, Json(status)).into_response(),
        Err(e) => e.into_response(),
    }
}

/// GET /accounts/{id}/2fa/required?role=admin
pub async fn is_required(
    State(st): State<Arc<AppState>>,
    Path(account_id): Path<String>,
    Query(q): Query<RoleQuery>,
) -> Response {
    match st.two_factor.requirement(&account_id, &q.role).await {
        Ok(requirement) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "required": requirement.is_required(),
                "requirement": requirement,
            })),
        )
            .into_response(),
        Err(e) => e.into_response(),
    }
}

/// GET /accounts/{id}/2fa/challenge?role=user
pub async fn login_challenge(
    State(st): State<Arc<AppState>>,
    Path(account_id): Path<String>,
    Query(q): Query<RoleQuery>,
) -> Response {
    match st.two_factor.login_challenge(&account_id, &q.role).await {
        Ok(challenge) => {
            (StatusCode::OK, Json(serde_json::json!({ "challenge": challenge }))).into_response()
        }
        Err(e) => e.into_response(),
    }
}

/// POST /settings/2fa/refresh: reload policy settings now instead of waiting for the TTL.
pub async fn refresh_settings(State(st): State<Arc<AppState>>) -> Response {
    match st.two_factor.settings().refresh().await {
        Ok(settings) => (StatusCode::OK, Json(settings)).into_response(),
        Err(e) => e.into_response(),
    }
}

/// DELETE /accounts/{id}/2fa (account deletion hook, only once the account is gone)
pub async fn remove_account(
    State(st): State<Arc<AppState>>,
    Path(account_id): Path<String>,
) -> Response {
    match st.two_factor.remove_account(&account_id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => e.into_response(),
    }
}
