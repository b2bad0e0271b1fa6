// state module: AppState, store interfaces, initialization and re-exports of the adapters.

use anyhow::{Context, Result};
use async_trait::async_trait;
use mongodb::{Client, Database};
use std::sync::Arc;

use crate::config::{AppConfig, SettingsBackend};
use crate::models::{Account, TwoFactorRecord};
use crate::notify::{LogNotifier, NotificationSink, Notifier, WebhookNotifier};
use crate::service::TwoFactorService;
use crate::settings::{EnvSettings, SettingsCache, SettingsSource};

mod accounts;
mod records;
mod settings;

pub use accounts::*;
pub use records::*;
pub use settings::*;

pub const RECORDS_COLLECTION: &str = "two_factor";
pub const USERS_COLLECTION: &str = "users";
pub const SETTINGS_COLLECTION: &str = "settings";

/// Per-account two-factor records with an atomic conditional write.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn get_record(&self, account_id: &str) -> Result<Option<TwoFactorRecord>>;

    /// Writes `record` with version `expected_version + 1` only if the stored
    /// version is still `expected_version` (0 meaning "no record yet").
    /// Returns `false` when another writer got there first.
    async fn put_record(&self, record: &TwoFactorRecord, expected_version: u64) -> Result<bool>;

    /// Only used when the owning account is deleted.
    async fn delete_record(&self, account_id: &str) -> Result<()>;
}

/// Externally owned accounts and their credential check.
#[async_trait]
pub trait AccountDirectory: Send + Sync {
    async fn find_account(&self, account_id: &str) -> Result<Option<Account>>;

    async fn verify_password(&self, account_id: &str, password: &str) -> Result<bool>;
}

#[derive(Clone)]
pub struct AppState {
    pub two_factor: TwoFactorService,
}

pub async fn init_state(config: &AppConfig) -> Result<AppState> {
    let client = Client::with_uri_str(&config.mongodb_uri)
        .await
        .context("failed to connect to MongoDB")?;
    let db = client.database(&config.mongodb_db);

    ensure_collections(&db).await?;

    let settings_source: Arc<dyn SettingsSource> = match config.settings_backend {
        SettingsBackend::Mongo => Arc::new(MongoSettings::new(&db)),
        SettingsBackend::Env => Arc::new(EnvSettings),
    };
    let notifier: Arc<dyn Notifier> = match &config.notify_webhook_url {
        Some(url) => Arc::new(WebhookNotifier::new(url.clone())),
        None => Arc::new(LogNotifier),
    };

    let two_factor = TwoFactorService::new(
        Arc::new(MongoRecordStore::new(&db)),
        Arc::new(MongoAccounts::new(&db)),
        Arc::new(SettingsCache::new(settings_source, config.settings_ttl)),
        NotificationSink::new(notifier),
    );

    Ok(AppState { two_factor })
}

async fn ensure_collections(db: &Database) -> Result<()> {
    let existing = db.list_collection_names().await?;
    for name in [RECORDS_COLLECTION, USERS_COLLECTION, SETTINGS_COLLECTION] {
        if !existing.iter().any(|n| n == name) {
            db.create_collection(name).await?;
        }
    }
    Ok(())
}
