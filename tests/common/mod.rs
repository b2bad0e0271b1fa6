#![allow(dead_code)]

use std::{
    env,
    sync::{Arc, Mutex, MutexGuard, OnceLock},
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use anyhow::Result;
use async_trait::async_trait;
use mongodb::{Client, Database, options::ClientOptions};
use serde_json::Value;
use tokio::sync::mpsc;

use marketplace_2fa::{
    TwoFactorService,
    models::{Account, SetupResult, UserRole},
    notify::{NotificationSink, Notifier},
    settings::{MemorySettings, SettingValue, SettingsCache, SettingsSource},
    state::{MemoryAccounts, MemoryRecordStore, RecordStore},
    totp,
};

pub const ACCOUNT_ID: &str = "acct-1";
pub const ADMIN_ID: &str = "acct-admin";
pub const EMAIL: &str = "buyer@example.com";
pub const PASSWORD: &str = "correctpw";

#[derive(Debug, Clone)]
pub struct Notice {
    pub address: String,
    pub template: String,
    pub data: Value,
}

/// Forwards every notice to a channel the test can read.
pub struct RecordingNotifier {
    tx: mpsc::UnboundedSender<Notice>,
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, address: &str, template: &str, data: Value) -> Result<()> {
        let _ = self.tx.send(Notice {
            address: address.to_string(),
            template: template.to_string(),
            data,
        });
        Ok(())
    }
}

pub struct FailingNotifier;

#[async_trait]
impl Notifier for FailingNotifier {
    async fn send(&self, _address: &str, _template: &str, _data: Value) -> Result<()> {
        anyhow::bail!("smtp relay down")
    }
}

/// Settings backend that can be switched off.
pub struct FlakySettings {
    pub inner: MemorySettings,
    pub down: std::sync::atomic::AtomicBool,
}

#[async_trait]
impl SettingsSource for FlakySettings {
    async fn get_flag(&self, key: &str) -> Result<Option<SettingValue>> {
        if self.down.load(std::sync::atomic::Ordering::SeqCst) {
            anyhow::bail!("settings table unreachable");
        }
        self.inner.get_flag(key).await
    }
}

pub struct Fixture {
    pub service: TwoFactorService,
    pub records: Arc<dyn RecordStore>,
    pub accounts: Arc<MemoryAccounts>,
    pub settings: Arc<FlakySettings>,
    pub notices: mpsc::UnboundedReceiver<Notice>,
}

impl Fixture {
    pub fn set(&self, key: &str, value: SettingValue) {
        self.settings.inner.set(key, value);
    }

    pub fn settings_down(&self) {
        self.settings
            .down
            .store(true, std::sync::atomic::Ordering::SeqCst);
    }

    pub async fn next_notice(&mut self) -> Notice {
        tokio::time::timeout(Duration::from_secs(2), self.notices.recv())
            .await
            .expect("notice not delivered in time")
            .expect("notifier channel closed")
    }
}

pub async fn fixture() -> Fixture {
    fixture_with(Arc::new(MemoryRecordStore::new()), None).await
}

/// Builds the service over in-memory collaborators. Settings are never
/// cached so tests can flip flags between calls.
pub async fn fixture_with(records: Arc<dyn RecordStore>, notifier: Option<Arc<dyn Notifier>>) -> Fixture {
    let accounts = Arc::new(MemoryAccounts::new());
    accounts
        .insert(
            Account {
                id: ACCOUNT_ID.into(),
                email: EMAIL.into(),
                role: UserRole::User,
            },
            PASSWORD,
        )
        .await;
    accounts
        .insert(
            Account {
                id: ADMIN_ID.into(),
                email: "admin@example.com".into(),
                role: UserRole::Admin,
            },
            PASSWORD,
        )
        .await;

    let settings = Arc::new(FlakySettings {
        inner: MemorySettings::new(),
        down: std::sync::atomic::AtomicBool::new(false),
    });
    let (tx, notices) = mpsc::unbounded_channel();
    let notifier: Arc<dyn Notifier> = match notifier {
        Some(notifier) => notifier,
        None => Arc::new(RecordingNotifier { tx }),
    };

    let service = TwoFactorService::new(
        records.clone(),
        accounts.clone(),
        Arc::new(SettingsCache::new(settings.clone(), Duration::ZERO)),
        NotificationSink::new(notifier),
    );

    Fixture {
        service,
        records,
        accounts,
        settings,
        notices,
    }
}

pub fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs()
}

pub fn current_code(secret: &str) -> String {
    totp::code_at(secret, now_secs()).unwrap()
}

/// Runs setup + confirmation and returns what setup handed out.
pub async fn enable(service: &TwoFactorService, account_id: &str) -> SetupResult {
    let setup = service.begin_setup(account_id, PASSWORD).await.unwrap();
    service
        .confirm_setup(
            account_id,
            &setup.secret,
            &current_code(&setup.secret),
            &setup.backup_codes,
        )
        .await
        .unwrap();
    setup
}

/// Global lock so tests that touch MongoDB run one-at-a-time.
static TEST_DB_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

pub struct TestDb {
    pub db: Database,
    _guard: MutexGuard<'static, ()>,
}

/// Fresh database on `MONGODB_URI`, or `None` (test skipped) when no server answers.
pub async fn setup_db() -> Option<TestDb> {
    let guard = TEST_DB_LOCK
        .get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());

    let uri = env::var("MONGODB_URI").unwrap_or_else(|_| "mongodb://localhost:27017".to_string());
    let db_name = format!(
        "marketplace2fatest_{}",
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_millis()
    );

    let mut options = match ClientOptions::parse(&uri).await {
        Ok(o) => o,
        Err(err) => {
            eprintln!("Skipping test; bad MONGODB_URI: {err:?}");
            return None;
        }
    };
    options.server_selection_timeout = Some(Duration::from_secs(2));
    let client = match Client::with_options(options) {
        Ok(c) => c,
        Err(err) => {
            eprintln!("Skipping test; cannot build MongoDB client: {err:?}");
            return None;
        }
    };
    let db = client.database(&db_name);
    if let Err(err) = db.drop().await {
        eprintln!("Skipping test; cannot reach MongoDB: {err:?}");
        return None;
    }

    Some(TestDb { db, _guard: guard })
}

pub async fn teardown(test_db: Option<TestDb>) {
    if let Some(test_db) = test_db {
        let _ = test_db.db.drop().await;
    }
}
