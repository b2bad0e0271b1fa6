// routes/mod.rs
// Router for the two-factor endpoints and the error -> HTTP status mapping.

use axum::{
    Json, Router,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use std::sync::Arc;

use crate::error::TwoFactorError;
use crate::state::AppState;

pub mod qrcode;
pub mod two_factor;

pub use two_factor::{
    begin_setup, confirm_setup, disable, is_required, login_challenge, refresh_settings,
    regenerate_backup_codes, remove_account, status, verify_at_login,
};

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/accounts/{id}/2fa", get(status).delete(remove_account))
        .route("/accounts/{id}/2fa/setup", post(begin_setup))
        .route("/accounts/{id}/2fa/confirm", post(confirm_setup))
        .route("/accounts/{id}/2fa/verify", post(verify_at_login))
        .route("/accounts/{id}/2fa/disable", post(disable))
        .route("/accounts/{id}/2fa/backup-codes", post(regenerate_backup_codes))
        .route("/accounts/{id}/2fa/required", get(is_required))
        .route("/accounts/{id}/2fa/challenge", get(login_challenge))
        .route("/settings/2fa/refresh", post(refresh_settings))
        .with_state(state)
}

impl TwoFactorError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            TwoFactorError::InvalidCredentials | TwoFactorError::InvalidToken => {
                StatusCode::UNAUTHORIZED
            }
            TwoFactorError::NoSuchAccount => StatusCode::NOT_FOUND,
            TwoFactorError::NotEnabled
            | TwoFactorError::AlreadyEnabled
            | TwoFactorError::AccountStillExists
            | TwoFactorError::Conflict => StatusCode::CONFLICT,
            TwoFactorError::InvalidSetup(_) => StatusCode::UNPROCESSABLE_ENTITY,
            TwoFactorError::ConfigurationUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            TwoFactorError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for TwoFactorError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = match &self {
            TwoFactorError::Storage(e) => {
                tracing::error!(error = %e, "storage failure");
                "internal error".to_string()
            }
            TwoFactorError::ConfigurationUnavailable(_) => "configuration unavailable".to_string(),
            other => other.to_string(),
        };
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}
