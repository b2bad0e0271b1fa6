use anyhow::Result;
use async_trait::async_trait;
use mongodb::{
    Collection, Database,
    bson::{DateTime, doc},
    error::{ErrorKind, WriteFailure},
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::Mutex;

use crate::models::TwoFactorRecord;

use super::{RECORDS_COLLECTION, RecordStore};

const DUPLICATE_KEY: i32 = 11000;

/// Records kept in process memory. The version check and the write happen
/// under one lock, which is what makes the compare-and-swap atomic.
#[derive(Default)]
pub struct MemoryRecordStore {
    records: Mutex<HashMap<String, TwoFactorRecord>>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn get_record(&self, account_id: &str) -> Result<Option<TwoFactorRecord>> {
        Ok(self.records.lock().await.get(account_id).cloned())
    }

    async fn put_record(&self, record: &TwoFactorRecord, expected_version: u64) -> Result<bool> {
        let mut records = self.records.lock().await;
        let current = records.get(&record.account_id).map_or(0, |r| r.version);
        if current != expected_version {
            return Ok(false);
        }
        let mut stored = record.clone();
        stored.version = expected_version + 1;
        records.insert(stored.account_id.clone(), stored);
        Ok(true)
    }

    async fn delete_record(&self, account_id: &str) -> Result<()> {
        self.records.lock().await.remove(account_id);
        Ok(())
    }
}

/// Record document stored in MongoDB, keyed by account id.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RecordDocument {
    #[serde(rename = "_id")]
    account_id: String,
    enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    secret: Option<String>,
    #[serde(default)]
    backup_codes: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    last_verified_at: Option<DateTime>,
    version: i64,
}

impl RecordDocument {
    fn from_record(record: &TwoFactorRecord, version: u64) -> Self {
        Self {
            account_id: record.account_id.clone(),
            enabled: record.enabled,
            secret: record.secret.clone(),
            backup_codes: record.backup_codes.clone(),
            last_verified_at: record.last_verified_at.map(DateTime::from_chrono),
            version: version as i64,
        }
    }
}

impl From<RecordDocument> for TwoFactorRecord {
    fn from(doc: RecordDocument) -> Self {
        Self {
            account_id: doc.account_id,
            enabled: doc.enabled,
            secret: doc.secret,
            backup_codes: doc.backup_codes,
            last_verified_at: doc.last_verified_at.map(DateTime::to_chrono),
            version: doc.version.max(0) as u64,
        }
    }
}

/// Records in the `two_factor` collection.
///
/// First writes rely on the unique `_id` (a concurrent insert fails with a
/// duplicate key); later writes replace the document only while its
/// `version` still matches.
#[derive(Clone)]
pub struct MongoRecordStore {
    records: Collection<RecordDocument>,
}

impl MongoRecordStore {
    pub fn new(db: &Database) -> Self {
        Self {
            records: db.collection::<RecordDocument>(RECORDS_COLLECTION),
        }
    }
}

#[async_trait]
impl RecordStore for MongoRecordStore {
    async fn get_record(&self, account_id: &str) -> Result<Option<TwoFactorRecord>> {
        Ok(self
            .records
            .find_one(doc! { "_id": account_id })
            .await?
            .map(TwoFactorRecord::from))
    }

    async fn put_record(&self, record: &TwoFactorRecord, expected_version: u64) -> Result<bool> {
        let document = RecordDocument::from_record(record, expected_version + 1);
        if expected_version == 0 {
            return match self.records.insert_one(document).await {
                Ok(_) => Ok(true),
                Err(e) if is_duplicate_key(&e) => Ok(false),
                Err(e) => Err(e.into()),
            };
        }

        let res = self
            .records
            .replace_one(
                doc! { "_id": &record.account_id, "version": expected_version as i64 },
                document,
            )
            .await?;
        Ok(res.matched_count == 1)
    }

    async fn delete_record(&self, account_id: &str) -> Result<()> {
        self.records.delete_one(doc! { "_id": account_id }).await?;
        Ok(())
    }
}

fn is_duplicate_key(err: &mongodb::error::Error) -> bool {
    matches!(
        err.kind.as_ref(),
        ErrorKind::Write(WriteFailure::WriteError(we)) if we.code == DUPLICATE_KEY
    )
}
