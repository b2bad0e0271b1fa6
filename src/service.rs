// service.rs
// Two-factor state machine: setup, confirmation, login verification, disable and backup-code rotation.
//
// Every mutation is a read-modify-write through RecordStore::put_record. A lost
// race re-reads the record and re-applies the transition, so two logins spending
// the same backup code cannot both succeed: the loser no longer finds the code.

use chrono::Utc;
use serde::Serialize;
use std::{collections::HashSet, sync::Arc};
use tracing::{debug, info, warn};

use crate::backup::{
    MAX_BACKUP_CODE_COUNT, find_backup_code, generate_backup_codes, is_well_formed_backup_code,
};
use crate::error::{Result, TwoFactorError};
use crate::models::{Account, SetupResult, TwoFactorRecord, TwoFactorStatus, UserRole};
use crate::notify::{
    NotificationSink, TEMPLATE_BACKUP_CODE_USED, TEMPLATE_BACKUP_CODES, TEMPLATE_DISABLED,
    TEMPLATE_ENABLED,
};
use crate::policy::{self, LoginChallenge, Requirement};
use crate::settings::{SettingsCache, TwoFactorSettings};
use crate::state::{AccountDirectory, RecordStore};
use crate::totp;

const MAX_WRITE_ATTEMPTS: usize = 8;

/// How a login verification succeeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum VerificationMethod {
    Totp,
    BackupCode { remaining: usize },
}

#[derive(Clone)]
pub struct TwoFactorService {
    records: Arc<dyn RecordStore>,
    accounts: Arc<dyn AccountDirectory>,
    settings: Arc<SettingsCache>,
    notifications: NotificationSink,
}

impl TwoFactorService {
    pub fn new(
        records: Arc<dyn RecordStore>,
        accounts: Arc<dyn AccountDirectory>,
        settings: Arc<SettingsCache>,
        notifications: NotificationSink,
    ) -> Self {
        Self {
            records,
            accounts,
            settings,
            notifications,
        }
    }

    pub fn settings(&self) -> &SettingsCache {
        &self.settings
    }

    /// Starts enrollment after re-checking the password. Nothing is stored:
    /// the record stays disabled until [`TwoFactorService::confirm_setup`].
    pub async fn begin_setup(&self, account_id: &str, password: &str) -> Result<SetupResult> {
        let account = self.check_password(account_id, password).await?;
        if self.load(account_id).await?.is_enabled() {
            return Err(TwoFactorError::AlreadyEnabled);
        }

        let settings = self.settings.current().await?;
        let provisioned = totp::provision_secret(&account.email, &settings.issuer)?;
        let backup_codes = generate_backup_codes(settings.backup_code_count);

        info!(account_id, codes = backup_codes.len(), "two-factor setup started");
        Ok(SetupResult {
            secret: provisioned.secret,
            provisioning_uri: provisioned.provisioning_uri,
            backup_codes,
            manual_entry_key: provisioned.manual_entry_key,
        })
    }

    /// The only way `enabled` becomes true: the token must verify against the
    /// secret handed out by setup, then secret and codes are written at once.
    pub async fn confirm_setup(
        &self,
        account_id: &str,
        secret: &str,
        token: &str,
        backup_codes: &[String],
    ) -> Result<TwoFactorStatus> {
        let account = self.account(account_id).await?;
        validate_setup(secret, backup_codes)?;

        let settings = self.settings.current().await?;
        if !totp::verify(secret, token, settings.window_steps) {
            warn!(account_id, "two-factor setup token rejected");
            return Err(TwoFactorError::InvalidToken);
        }

        let now = Utc::now();
        let secret = secret.trim().to_string();
        let (record, ()) = self
            .update(account_id, |current| {
                if current.is_enabled() {
                    return Err(TwoFactorError::AlreadyEnabled);
                }
                let next = TwoFactorRecord {
                    account_id: current.account_id.clone(),
                    enabled: true,
                    secret: Some(secret.clone()),
                    backup_codes: backup_codes.to_vec(),
                    last_verified_at: Some(now),
                    version: current.version,
                };
                Ok((next, ()))
            })
            .await?;

        info!(account_id, "two-factor enabled");
        self.notifications.dispatch(
            &account.email,
            TEMPLATE_ENABLED,
            serde_json::json!({ "backup_codes": record.backup_codes.len() }),
        );
        Ok(TwoFactorStatus::from(&record))
    }

    /// Second step of login. Backup codes are tried first and spent on match;
    /// otherwise the token is checked as TOTP. A failure changes nothing.
    pub async fn verify_at_login(&self, account_id: &str, token: &str) -> Result<VerificationMethod> {
        let account = self.account(account_id).await?;
        if !self.load(account_id).await?.is_enabled() {
            return Err(TwoFactorError::NotEnabled);
        }
        let settings = self.settings.current().await?;
        let now = Utc::now();

        let outcome = self
            .update(account_id, |current| {
                if !current.is_enabled() {
                    return Err(TwoFactorError::NotEnabled);
                }
                let mut next = current.clone();
                let method = if let Some(index) = find_backup_code(token, &current.backup_codes) {
                    next.backup_codes.remove(index);
                    VerificationMethod::BackupCode {
                        remaining: next.backup_codes.len(),
                    }
                } else if current
                    .secret
                    .as_deref()
                    .is_some_and(|secret| totp::verify(secret, token, settings.window_steps))
                {
                    VerificationMethod::Totp
                } else {
                    return Err(TwoFactorError::InvalidToken);
                };
                next.last_verified_at = Some(now);
                Ok((next, method))
            })
            .await;

        let (_, method) = match outcome {
            Ok(done) => done,
            Err(e) => {
                if matches!(e, TwoFactorError::InvalidToken) {
                    warn!(account_id, "two-factor login verification failed");
                }
                return Err(e);
            }
        };

        if let VerificationMethod::BackupCode { remaining } = method {
            info!(account_id, remaining, "backup code consumed");
            self.notifications.dispatch(
                &account.email,
                TEMPLATE_BACKUP_CODE_USED,
                serde_json::json!({ "remaining": remaining }),
            );
        } else {
            debug!(account_id, "totp verified");
        }
        Ok(method)
    }

    /// Turns 2FA off after re-checking the password, clearing secret and
    /// codes in the same write.
    pub async fn disable(&self, account_id: &str, password: &str) -> Result<TwoFactorStatus> {
        let account = self.check_password(account_id, password).await?;
        let (record, ()) = self
            .update(account_id, |current| {
                if !current.is_enabled() {
                    return Err(TwoFactorError::NotEnabled);
                }
                Ok((current.cleared(), ()))
            })
            .await?;

        info!(account_id, "two-factor disabled");
        self.notifications
            .dispatch(&account.email, TEMPLATE_DISABLED, serde_json::json!({}));
        Ok(TwoFactorStatus::from(&record))
    }

    /// Replaces the whole backup code set; every earlier code stops working.
    pub async fn regenerate_backup_codes(&self, account_id: &str) -> Result<Vec<String>> {
        let account = self.account(account_id).await?;
        let settings = self.settings.current().await?;
        let codes = generate_backup_codes(settings.backup_code_count);

        self.update(account_id, |current| {
            if !current.is_enabled() {
                return Err(TwoFactorError::NotEnabled);
            }
            let mut next = current.clone();
            next.backup_codes = codes.clone();
            Ok((next, ()))
        })
        .await?;

        info!(account_id, codes = codes.len(), "backup codes regenerated");
        self.notifications.dispatch(
            &account.email,
            TEMPLATE_BACKUP_CODES,
            serde_json::json!({ "backup_codes": codes.len() }),
        );
        Ok(codes)
    }

    pub async fn status(&self, account_id: &str) -> Result<TwoFactorStatus> {
        self.account(account_id).await?;
        Ok(TwoFactorStatus::from(&self.load(account_id).await?))
    }

    /// Policy verdict for `role`. Fails with `ConfigurationUnavailable` rather
    /// than ever answering "not required" without settings.
    pub async fn requirement(&self, account_id: &str, role: &UserRole) -> Result<Requirement> {
        let settings: TwoFactorSettings = self.settings.current().await?;
        let requirement = policy::requirement(&settings, role);
        debug!(account_id, role = role.as_str(), ?requirement, "two-factor policy evaluated");
        Ok(requirement)
    }

    pub async fn is_required(&self, account_id: &str, role: &UserRole) -> Result<bool> {
        Ok(self.requirement(account_id, role).await?.is_required())
    }

    /// What the login flow must do for this account before trusting the session.
    pub async fn login_challenge(&self, account_id: &str, role: &UserRole) -> Result<LoginChallenge> {
        let requirement = self.requirement(account_id, role).await?;
        let enabled = self.load(account_id).await?.is_enabled();
        Ok(policy::login_challenge(requirement, enabled))
    }

    /// Drops the record of an account that has already been deleted from the
    /// directory. A live account keeps its record; turning 2FA off goes
    /// through [`TwoFactorService::disable`] and its password check.
    pub async fn remove_account(&self, account_id: &str) -> Result<()> {
        if self.accounts.find_account(account_id).await?.is_some() {
            warn!(account_id, "refusing to purge two-factor record of a live account");
            return Err(TwoFactorError::AccountStillExists);
        }
        self.records.delete_record(account_id).await?;
        info!(account_id, "two-factor record removed");
        Ok(())
    }

    async fn account(&self, account_id: &str) -> Result<Account> {
        self.accounts
            .find_account(account_id)
            .await?
            .ok_or(TwoFactorError::NoSuchAccount)
    }

    async fn check_password(&self, account_id: &str, password: &str) -> Result<Account> {
        let account = self.account(account_id).await?;
        if !self.accounts.verify_password(account_id, password).await? {
            warn!(account_id, "password re-verification failed");
            return Err(TwoFactorError::InvalidCredentials);
        }
        Ok(account)
    }

    async fn load(&self, account_id: &str) -> Result<TwoFactorRecord> {
        Ok(self
            .records
            .get_record(account_id)
            .await?
            .unwrap_or_else(|| TwoFactorRecord::disabled(account_id)))
    }

    /// Applies `apply` to the freshest record and writes the result
    /// conditionally, re-reading on conflict. An `Err` from `apply` aborts
    /// without writing.
    async fn update<T, F>(&self, account_id: &str, mut apply: F) -> Result<(TwoFactorRecord, T)>
    where
        F: FnMut(&TwoFactorRecord) -> Result<(TwoFactorRecord, T)>,
    {
        for attempt in 1..=MAX_WRITE_ATTEMPTS {
            let current = self.load(account_id).await?;
            let (mut next, out) = apply(&current)?;
            next.version = current.version + 1;
            if self.records.put_record(&next, current.version).await? {
                return Ok((next, out));
            }
            debug!(account_id, attempt, "record changed concurrently, retrying");
        }
        warn!(account_id, "gave up after repeated write conflicts");
        Err(TwoFactorError::Conflict)
    }
}

fn validate_setup(secret: &str, backup_codes: &[String]) -> Result<()> {
    totp::decode_secret(secret).map_err(|e| TwoFactorError::InvalidSetup(e.to_string()))?;

    if backup_codes.is_empty() || backup_codes.len() > MAX_BACKUP_CODE_COUNT {
        return Err(TwoFactorError::InvalidSetup(format!(
            "expected 1 to {MAX_BACKUP_CODE_COUNT} backup codes, got {}",
            backup_codes.len()
        )));
    }
    if !backup_codes.iter().all(|c| is_well_formed_backup_code(c)) {
        return Err(TwoFactorError::InvalidSetup("malformed backup code".into()));
    }
    let unique: HashSet<&String> = backup_codes.iter().collect();
    if unique.len() != backup_codes.len() {
        return Err(TwoFactorError::InvalidSetup("duplicate backup code".into()));
    }
    Ok(())
}
