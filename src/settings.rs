// settings.rs
// Policy settings: raw key/value sources, the typed TwoFactorSettings snapshot and its TTL cache.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    env,
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::sync::RwLock;

use crate::backup::{DEFAULT_BACKUP_CODE_COUNT, MAX_BACKUP_CODE_COUNT};
use crate::error::TwoFactorError;
use crate::totp::MAX_WINDOW_STEPS;

pub const KEY_ADMIN_ENABLED: &str = "two_factor_admin_enabled";
pub const KEY_ADMIN_REQUIRED: &str = "two_factor_admin_required";
pub const KEY_USER_REQUIRED: &str = "two_factor_user_required";
pub const KEY_WINDOW: &str = "two_factor_window";
pub const KEY_BACKUP_CODES: &str = "two_factor_backup_codes";
pub const KEY_ISSUER: &str = "two_factor_issuer";
pub const KEY_SITE_NAME: &str = "site_name";

pub const DEFAULT_ISSUER: &str = "Marketplace";
pub const DEFAULT_WINDOW_STEPS: u8 = 1;
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(300);

/// A raw flag as stored by the settings backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SettingValue {
    Bool(bool),
    Number(f64),
    Text(String),
}

impl SettingValue {
    /// Accepts real booleans, non-zero numbers and the usual textual spellings.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            SettingValue::Bool(b) => Some(*b),
            SettingValue::Number(n) => Some(*n != 0.0),
            SettingValue::Text(s) => match s.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "on" | "yes" => Some(true),
                "0" | "false" | "off" | "no" | "" => Some(false),
                _ => None,
            },
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            SettingValue::Number(n) if *n >= 0.0 && *n < u64::MAX as f64 && n.fract() == 0.0 => {
                Some(*n as u64)
            }
            SettingValue::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Non-blank text.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            SettingValue::Text(s) if !s.trim().is_empty() => Some(s.trim()),
            _ => None,
        }
    }
}

/// Read side of the key/value configuration store.
#[async_trait]
pub trait SettingsSource: Send + Sync {
    /// `Ok(None)` for an unset key; `Err` only when the backend is unreachable.
    async fn get_flag(&self, key: &str) -> Result<Option<SettingValue>>;
}

/// Reads each key from the environment variable of the same name, upper-cased.
#[derive(Debug, Clone, Default)]
pub struct EnvSettings;

#[async_trait]
impl SettingsSource for EnvSettings {
    async fn get_flag(&self, key: &str) -> Result<Option<SettingValue>> {
        Ok(env::var(key.to_ascii_uppercase()).ok().map(SettingValue::Text))
    }
}

/// Fixed in-process map, for tests and local runs.
#[derive(Debug, Default)]
pub struct MemorySettings {
    values: std::sync::RwLock<HashMap<String, SettingValue>>,
}

impl MemorySettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(self, key: &str, value: SettingValue) -> Self {
        self.set(key, value);
        self
    }

    pub fn set(&self, key: &str, value: SettingValue) {
        if let Ok(mut values) = self.values.write() {
            values.insert(key.to_string(), value);
        }
    }
}

#[async_trait]
impl SettingsSource for MemorySettings {
    async fn get_flag(&self, key: &str) -> Result<Option<SettingValue>> {
        let values = self
            .values
            .read()
            .map_err(|_| anyhow::anyhow!("settings map poisoned"))?;
        Ok(values.get(key).cloned())
    }
}

/// Typed snapshot of every flag the subsystem reads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TwoFactorSettings {
    /// System-wide toggle; off means 2FA is never required.
    pub admin_enabled: bool,
    pub admin_required: bool,
    pub user_required: bool,
    /// Steps accepted either side of now, at most [`MAX_WINDOW_STEPS`].
    pub window_steps: u8,
    /// Codes issued per batch, 1 to [`MAX_BACKUP_CODE_COUNT`].
    pub backup_code_count: usize,
    pub issuer: String,
}

impl Default for TwoFactorSettings {
    fn default() -> Self {
        Self {
            admin_enabled: false,
            admin_required: false,
            user_required: false,
            window_steps: DEFAULT_WINDOW_STEPS,
            backup_code_count: DEFAULT_BACKUP_CODE_COUNT,
            issuer: DEFAULT_ISSUER.to_string(),
        }
    }
}

impl TwoFactorSettings {
    /// Reads every key once. Unset or unparsable values fall back to their
    /// default; a backend failure is returned as-is.
    pub async fn load(source: &dyn SettingsSource) -> Result<Self> {
        let defaults = Self::default();

        let window_steps = match source.get_flag(KEY_WINDOW).await? {
            Some(v) => match v.as_u64() {
                Some(n) if n <= u64::from(MAX_WINDOW_STEPS) => n as u8,
                _ => invalid(KEY_WINDOW, defaults.window_steps),
            },
            None => defaults.window_steps,
        };

        let backup_code_count = match source.get_flag(KEY_BACKUP_CODES).await? {
            Some(v) => match v.as_u64() {
                Some(n) if (1..=MAX_BACKUP_CODE_COUNT as u64).contains(&n) => n as usize,
                _ => invalid(KEY_BACKUP_CODES, defaults.backup_code_count),
            },
            None => defaults.backup_code_count,
        };

        let issuer = match text_flag(source, KEY_ISSUER).await? {
            Some(issuer) => issuer,
            None => text_flag(source, KEY_SITE_NAME)
                .await?
                .unwrap_or(defaults.issuer),
        };

        Ok(Self {
            admin_enabled: load_bool(source, KEY_ADMIN_ENABLED, defaults.admin_enabled).await?,
            admin_required: load_bool(source, KEY_ADMIN_REQUIRED, defaults.admin_required).await?,
            user_required: load_bool(source, KEY_USER_REQUIRED, defaults.user_required).await?,
            window_steps,
            backup_code_count,
            issuer,
        })
    }
}

async fn load_bool(source: &dyn SettingsSource, key: &str, default: bool) -> Result<bool> {
    Ok(match source.get_flag(key).await? {
        Some(v) => v.as_bool().unwrap_or_else(|| invalid(key, default)),
        None => default,
    })
}

async fn text_flag(source: &dyn SettingsSource, key: &str) -> Result<Option<String>> {
    Ok(source
        .get_flag(key)
        .await?
        .as_ref()
        .and_then(SettingValue::as_text)
        .map(str::to_string))
}

fn invalid<T: std::fmt::Debug>(key: &str, default: T) -> T {
    tracing::warn!(key, ?default, "invalid setting value, using default");
    default
}

struct Cached {
    settings: TwoFactorSettings,
    loaded_at: Instant,
}

/// Process-wide settings snapshot.
///
/// The first read populates it; later reads reuse it until `ttl` has elapsed
/// or [`SettingsCache::invalidate`] / [`SettingsCache::refresh`] is called.
/// A failed reload never serves the stale snapshot: it surfaces as
/// [`TwoFactorError::ConfigurationUnavailable`].
pub struct SettingsCache {
    source: Arc<dyn SettingsSource>,
    ttl: Duration,
    slot: RwLock<Option<Cached>>,
}

impl SettingsCache {
    pub fn new(source: Arc<dyn SettingsSource>, ttl: Duration) -> Self {
        Self {
            source,
            ttl,
            slot: RwLock::new(None),
        }
    }

    pub async fn current(&self) -> Result<TwoFactorSettings, TwoFactorError> {
        {
            let slot = self.slot.read().await;
            if let Some(cached) = slot.as_ref() {
                if cached.loaded_at.elapsed() < self.ttl {
                    return Ok(cached.settings.clone());
                }
            }
        }
        self.refresh().await
    }

    /// Reloads from the source now, replacing the snapshot on success.
    pub async fn refresh(&self) -> Result<TwoFactorSettings, TwoFactorError> {
        let mut slot = self.slot.write().await;
        match TwoFactorSettings::load(self.source.as_ref()).await {
            Ok(settings) => {
                tracing::debug!(?settings, "two-factor settings loaded");
                *slot = Some(Cached {
                    settings: settings.clone(),
                    loaded_at: Instant::now(),
                });
                Ok(settings)
            }
            Err(e) => {
                tracing::error!(error = %e, "settings store unavailable");
                *slot = None;
                Err(TwoFactorError::ConfigurationUnavailable(e.to_string()))
            }
        }
    }

    pub async fn invalidate(&self) {
        *self.slot.write().await = None;
    }
}
