// models.rs
// Domain models: account roles, the persisted two-factor record and the read models built from it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Account roles relevant to the two-factor policy.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    Admin,
    #[default]
    User,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::Admin => "admin",
            UserRole::User => "user",
        }
    }

    pub fn is_admin(&self) -> bool {
        matches!(self, UserRole::Admin)
    }
}

/// The slice of an account the 2FA subsystem needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    pub id: String,
    pub email: String,
    pub role: UserRole,
}

/// Lifecycle position of an account's second factor.
///
/// `PendingVerification` is the caller holding a [`SetupResult`] that has not
/// been confirmed yet; the store only holds `Disabled` or `Enabled` records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TwoFactorState {
    Disabled,
    PendingVerification,
    Enabled,
}

/// One record per account. `version` is bumped by every successful write and
/// is what the conditional write compares against; 0 means never written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TwoFactorRecord {
    pub account_id: String,
    pub enabled: bool,
    pub secret: Option<String>,
    pub backup_codes: Vec<String>,
    pub last_verified_at: Option<DateTime<Utc>>,
    pub version: u64,
}

impl TwoFactorRecord {
    /// The implicit record every account starts with.
    pub fn disabled(account_id: &str) -> Self {
        Self {
            account_id: account_id.to_string(),
            enabled: false,
            secret: None,
            backup_codes: Vec::new(),
            last_verified_at: None,
            version: 0,
        }
    }

    pub fn state(&self) -> TwoFactorState {
        if self.enabled && self.secret.is_some() {
            TwoFactorState::Enabled
        } else {
            TwoFactorState::Disabled
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.state() == TwoFactorState::Enabled
    }

    /// Same record with every 2FA field cleared, ready to be written in one go.
    pub fn cleared(&self) -> Self {
        Self {
            account_id: self.account_id.clone(),
            enabled: false,
            secret: None,
            backup_codes: Vec::new(),
            last_verified_at: self.last_verified_at,
            version: self.version,
        }
    }
}

/// Everything the caller needs to enroll an authenticator. Never persisted.
#[derive(Debug, Clone, Serialize)]
pub struct SetupResult {
    pub secret: String,
    pub provisioning_uri: String,
    pub backup_codes: Vec<String>,
    pub manual_entry_key: String,
}

/// What may be shown to clients about an account's second factor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TwoFactorStatus {
    pub enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_verified_at: Option<DateTime<Utc>>,
    pub backup_codes_remaining: usize,
}

impl From<&TwoFactorRecord> for TwoFactorStatus {
    fn from(record: &TwoFactorRecord) -> Self {
        let enabled = record.is_enabled();
        Self {
            enabled,
            last_verified_at: record.last_verified_at,
            backup_codes_remaining: if enabled { record.backup_codes.len() } else { 0 },
        }
    }
}
