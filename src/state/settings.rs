use anyhow::Result;
use async_trait::async_trait;
use mongodb::{
    Collection, Database,
    bson::{Bson, doc},
};
use serde::{Deserialize, Serialize};

use crate::settings::{SettingValue, SettingsSource};

use super::SETTINGS_COLLECTION;

/// One `settings` document: `{ _id: <key>, value: <bool | number | string> }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettingDocument {
    #[serde(rename = "_id")]
    pub key: String,
    pub value: Bson,
}

/// Settings read from the marketplace `settings` collection.
#[derive(Clone)]
pub struct MongoSettings {
    settings: Collection<SettingDocument>,
}

impl MongoSettings {
    pub fn new(db: &Database) -> Self {
        Self {
            settings: db.collection::<SettingDocument>(SETTINGS_COLLECTION),
        }
    }

    pub async fn set(&self, key: &str, value: Bson) -> Result<()> {
        self.settings
            .replace_one(
                doc! { "_id": key },
                SettingDocument {
                    key: key.to_string(),
                    value,
                },
            )
            .upsert(true)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl SettingsSource for MongoSettings {
    async fn get_flag(&self, key: &str) -> Result<Option<SettingValue>> {
        let found = self.settings.find_one(doc! { "_id": key }).await?;
        Ok(found.and_then(|d| setting_value(d.value)))
    }
}

fn setting_value(value: Bson) -> Option<SettingValue> {
    match value {
        Bson::Boolean(b) => Some(SettingValue::Bool(b)),
        Bson::Int32(n) => Some(SettingValue::Number(f64::from(n))),
        Bson::Int64(n) => Some(SettingValue::Number(n as f64)),
        Bson::Double(n) => Some(SettingValue::Number(n)),
        Bson::String(s) => Some(SettingValue::Text(s)),
        _ => None,
    }
}
