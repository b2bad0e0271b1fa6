use anyhow::{Context, Result};
use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::{SaltString, rand_core::OsRng},
};
use async_trait::async_trait;
use mongodb::{
    Collection, Database,
    bson::{doc, oid::ObjectId},
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use subtle::ConstantTimeEq;
use tokio::sync::RwLock;

use crate::models::{Account, UserRole};

use super::{AccountDirectory, USERS_COLLECTION};

/// Accounts held in memory with plain-text passwords. Local runs and tests only.
#[derive(Default)]
pub struct MemoryAccounts {
    accounts: RwLock<HashMap<String, (Account, String)>>,
}

impl MemoryAccounts {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, account: Account, password: &str) {
        self.accounts
            .write()
            .await
            .insert(account.id.clone(), (account, password.to_string()));
    }

    pub async fn remove(&self, account_id: &str) {
        self.accounts.write().await.remove(account_id);
    }
}

#[async_trait]
impl AccountDirectory for MemoryAccounts {
    async fn find_account(&self, account_id: &str) -> Result<Option<Account>> {
        Ok(self
            .accounts
            .read()
            .await
            .get(account_id)
            .map(|(account, _)| account.clone()))
    }

    async fn verify_password(&self, account_id: &str, password: &str) -> Result<bool> {
        Ok(match self.accounts.read().await.get(account_id) {
            Some((_, stored)) => stored.as_bytes().ct_eq(password.as_bytes()).into(),
            None => false,
        })
    }
}

/// User document as the marketplace stores it; only these fields are read.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserDocument {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub email: String,
    #[serde(default)]
    pub role: UserRole,
    pub password_hash: String,
}

/// Accounts from the marketplace `users` collection, passwords as Argon2 PHC strings.
#[derive(Clone)]
pub struct MongoAccounts {
    users: Collection<UserDocument>,
}

impl MongoAccounts {
    pub fn new(db: &Database) -> Self {
        Self {
            users: db.collection::<UserDocument>(USERS_COLLECTION),
        }
    }

    async fn find_user(&self, account_id: &str) -> Result<Option<UserDocument>> {
        // ids that are not ObjectIds cannot exist in this collection
        let Ok(oid) = ObjectId::parse_str(account_id) else {
            return Ok(None);
        };
        Ok(self.users.find_one(doc! { "_id": oid }).await?)
    }

    /// Inserts a user and returns its id as the account id.
    pub async fn create_user(&self, email: &str, role: UserRole, password: &str) -> Result<String> {
        let password_hash = hash_password(password)?;
        let res = self
            .users
            .insert_one(UserDocument {
                id: None,
                email: email.to_string(),
                role,
                password_hash,
            })
            .await?;
        let oid = res
            .inserted_id
            .as_object_id()
            .context("user insert missing _id")?;
        Ok(oid.to_hex())
    }
}

#[async_trait]
impl AccountDirectory for MongoAccounts {
    async fn find_account(&self, account_id: &str) -> Result<Option<Account>> {
        Ok(self.find_user(account_id).await?.map(|user| Account {
            id: account_id.to_string(),
            email: user.email,
            role: user.role,
        }))
    }

    async fn verify_password(&self, account_id: &str, password: &str) -> Result<bool> {
        let Some(user) = self.find_user(account_id).await? else {
            return Ok(false);
        };
        let password = password.to_string();
        // Argon2 is CPU-bound, run it off the async workers.
        tokio::task::spawn_blocking(move || verify_password_hash(&password, &user.password_hash))
            .await
            .context("password check task failed")
    }
}

pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| anyhow::anyhow!("failed to hash password: {e}"))
}

pub fn verify_password_hash(password: &str, hash: &str) -> bool {
    match PasswordHash::new(hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(e) => {
            tracing::warn!(error = %e, "stored password hash is not a PHC string");
            false
        }
    }
}
