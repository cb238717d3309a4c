use crate::db::seed::DEFAULT_SOS_CANONICAL_NAME;
use crate::services::catalog::DEFAULT_TTL_SECS;
use crate::services::chain_tracker::DEFAULT_RECENT_WINDOW;
use anyhow::{Context, Result};
use std::str::FromStr;

const DEFAULT_PORT: &str = "3000";
const DEFAULT_NETWORK_TIMEOUT_MS: u64 = 4_000;

#[derive(Debug, Clone)]
pub struct AppConfig {
    /// In-memory stores are used when unset.
    pub database_url: Option<String>,
    pub bind_addr: String,
    pub catalog_ttl: chrono::Duration,
    pub network_timeout: std::time::Duration,
    pub recent_window: usize,
    pub sos_canonical_name: String,
    pub selection_seed: Option<u64>,
    pub seed_catalog: bool,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let bind_addr = var("BIND_ADDR").unwrap_or_else(|| {
            let port = var("PORT").unwrap_or_else(|| DEFAULT_PORT.to_string());
            format!("0.0.0.0:{}", port)
        });

        let catalog_ttl_secs: i64 = parse_or(var("CATALOG_TTL_SECS"), "CATALOG_TTL_SECS", DEFAULT_TTL_SECS)?;
        let network_timeout_ms: u64 = parse_or(
            var("NETWORK_TIMEOUT_MS"),
            "NETWORK_TIMEOUT_MS",
            DEFAULT_NETWORK_TIMEOUT_MS,
        )?;
        let recent_window: usize = parse_or(var("RECENT_WINDOW"), "RECENT_WINDOW", DEFAULT_RECENT_WINDOW)?;
        let selection_seed = var("SELECTION_SEED")
            .map(|raw| raw.parse::<u64>().context("SELECTION_SEED must be an unsigned integer"))
            .transpose()?;
        let seed_catalog = var("SEED_CATALOG")
            .map(|raw| matches!(raw.to_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);

        Ok(Self {
            database_url: var("DATABASE_URL"),
            bind_addr,
            catalog_ttl: chrono::Duration::seconds(catalog_ttl_secs),
            network_timeout: std::time::Duration::from_millis(network_timeout_ms),
            recent_window,
            sos_canonical_name: var("SOS_CANONICAL_NAME")
                .unwrap_or_else(|| DEFAULT_SOS_CANONICAL_NAME.to_string()),
            selection_seed,
            seed_catalog,
        })
    }
}

fn parse_or<T>(raw: Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match raw {
        Some(raw) => raw
            .parse::<T>()
            .with_context(|| format!("{key} has invalid value '{raw}'")),
        None => Ok(default),
    }
}
