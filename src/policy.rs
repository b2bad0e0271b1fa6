// policy.rs
// Decides from the settings snapshot and the role whether a second factor is required at login.

use serde::Serialize;

use crate::models::UserRole;
use crate::settings::TwoFactorSettings;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Requirement {
    /// Login must present a second factor.
    Required,
    /// Up to the account holder.
    Optional,
    /// System toggle is off: nobody is forced.
    Off,
}

impl Requirement {
    pub fn is_required(self) -> bool {
        self == Requirement::Required
    }
}

/// What the login flow has to do before trusting the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LoginChallenge {
    /// Ask for a TOTP or backup code and call verify-at-login.
    Verify,
    /// Required by policy but not set up yet: send the user through setup.
    Enroll,
    None,
}

pub fn requirement(settings: &TwoFactorSettings, role: &UserRole) -> Requirement {
    if !settings.admin_enabled {
        return Requirement::Off;
    }
    match role {
        UserRole::Admin if settings.admin_required => Requirement::Required,
        UserRole::User if settings.user_required => Requirement::Required,
        _ => Requirement::Optional,
    }
}

/// An account that turned 2FA on is always challenged, whatever the policy.
pub fn login_challenge(requirement: Requirement, enabled: bool) -> LoginChallenge {
    match (enabled, requirement) {
        (true, _) => LoginChallenge::Verify,
        (false, Requirement::Required) => LoginChallenge::Enroll,
        (false, _) => LoginChallenge::None,
    }
}
