// error.rs
// Typed failures returned by the two-factor operations.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, TwoFactorError>;

#[derive(Error, Debug)]
pub enum TwoFactorError {
    /// Password re-entry failed during setup or disable.
    #[error("invalid credentials")]
    InvalidCredentials,

    /// Submitted TOTP or backup code did not verify. Recoverable, the caller retries.
    #[error("invalid token")]
    InvalidToken,

    #[error("two-factor authentication is not enabled")]
    NotEnabled,

    #[error("two-factor authentication is already enabled")]
    AlreadyEnabled,

    #[error("no such account")]
    NoSuchAccount,

    /// Settings could not be read. Callers must fail closed on this.
    #[error("configuration unavailable: {0}")]
    ConfigurationUnavailable(String),

    /// Secret or backup codes handed back to confirm setup are unusable.
    #[error("invalid setup: {0}")]
    InvalidSetup(String),

    /// Records are only purged after their account is gone.
    #[error("account still exists")]
    AccountStillExists,

    /// The record kept changing underneath us; every retry lost the race.
    #[error("concurrent update conflict")]
    Conflict,

    #[error("storage error: {0}")]
    Storage(#[from] anyhow::Error),
}

impl TwoFactorError {
    /// Whether the caller may simply resubmit (wrong code, lost race).
    pub fn is_retryable(&self) -> bool {
        matches!(self, TwoFactorError::InvalidToken | TwoFactorError::Conflict)
    }
}
