// config.rs
// Process configuration read from the environment (a .env file is loaded first by main).

use anyhow::{Context, Result, bail};
use std::{env, net::SocketAddr, time::Duration};

use crate::settings::DEFAULT_CACHE_TTL;

/// Where the policy flags are read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingsBackend {
    Mongo,
    Env,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    pub mongodb_uri: String,
    pub mongodb_db: String,
    pub settings_backend: SettingsBackend,
    pub settings_ttl: Duration,
    /// Mail relay endpoint; notices are only logged when unset.
    pub notify_webhook_url: Option<String>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let bind_addr = var_or("BIND_ADDR", "0.0.0.0:8080")
            .parse()
            .context("BIND_ADDR must be host:port")?;

        let settings_backend = match var_or("SETTINGS_BACKEND", "mongo").to_ascii_lowercase().as_str() {
            "mongo" => SettingsBackend::Mongo,
            "env" => SettingsBackend::Env,
            other => bail!("SETTINGS_BACKEND must be `mongo` or `env`, got `{other}`"),
        };

        let settings_ttl = match env::var("SETTINGS_TTL_SECONDS") {
            Ok(v) => Duration::from_secs(
                v.trim()
                    .parse()
                    .context("SETTINGS_TTL_SECONDS must be a number of seconds")?,
            ),
            Err(_) => DEFAULT_CACHE_TTL,
        };

        Ok(Self {
            bind_addr,
            mongodb_uri: var_or("MONGODB_URI", "mongodb://localhost:27017"),
            mongodb_db: var_or("MONGODB_DB", "marketplace"),
            settings_backend,
            settings_ttl,
            notify_webhook_url: env::var("NOTIFY_WEBHOOK_URL")
                .ok()
                .filter(|v| !v.trim().is_empty()),
        })
    }
}

fn var_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}
