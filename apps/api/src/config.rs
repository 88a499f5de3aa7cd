use std::str::FromStr;

use anyhow::{Context, Result};

use crate::audit::conflict::ConflictScope;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Postgres,
    Memory,
}

impl FromStr for StoreBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "postgres" => Ok(StoreBackend::Postgres),
            "memory" => Ok(StoreBackend::Memory),
            other => anyhow::bail!("STORE_BACKEND must be 'postgres' or 'memory', got '{other}'"),
        }
    }
}

/// Application configuration loaded from environment variables.
/// Startup fails if a required variable is missing or malformed.
#[derive(Debug, Clone)]
pub struct Config {
    pub store_backend: StoreBackend,
    /// Required when `store_backend` is Postgres.
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub cursor_secret: String,
    pub default_page_size: usize,
    pub max_page_size: usize,
    pub conflict_scope: ConflictScope,
    pub port: u16,
    pub rust_log: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        let store_backend: StoreBackend = parse_env("STORE_BACKEND", "postgres")?;
        let database_url = match store_backend {
            StoreBackend::Postgres => Some(require_env("DATABASE_URL")?),
            StoreBackend::Memory => std::env::var("DATABASE_URL").ok(),
        };

        let default_page_size: usize = parse_env("DEFAULT_PAGE_SIZE", "20")?;
        let max_page_size: usize = parse_env("MAX_PAGE_SIZE", "100")?;
        check_page_sizes(default_page_size, max_page_size)?;

        Ok(Config {
            store_backend,
            database_url,
            database_max_connections: parse_env("DATABASE_MAX_CONNECTIONS", "10")?,
            cursor_secret: require_env("CURSOR_SECRET")?,
            default_page_size,
            max_page_size,
            conflict_scope: parse_env("CONFLICT_SCOPE", "full")?,
            port: parse_env("PORT", "8080")?,
            rust_log: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
        })
    }
}

/// Upper bound for `MAX_PAGE_SIZE`; one page is read into memory at once.
const PAGE_SIZE_CEILING: usize = 1000;

fn check_page_sizes(default_page_size: usize, max_page_size: usize) -> Result<()> {
    if max_page_size == 0 || max_page_size > PAGE_SIZE_CEILING {
        anyhow::bail!("MAX_PAGE_SIZE must be between 1 and {PAGE_SIZE_CEILING}, got {max_page_size}");
    }
    if default_page_size == 0 || default_page_size > max_page_size {
        anyhow::bail!("DEFAULT_PAGE_SIZE must be between 1 and MAX_PAGE_SIZE ({max_page_size})");
    }
    Ok(())
}

fn require_env(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("Required environment variable '{key}' is not set"))
}

fn parse_env<T>(key: &str, default: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let raw = std::env::var(key).unwrap_or_else(|_| default.to_string());
    raw.parse::<T>()
        .map_err(|e| anyhow::anyhow!("{key} has an invalid value '{raw}': {e}"))
}

#[cfg(test)]
impl Config {
    pub fn for_tests(conflict_scope: ConflictScope) -> Self {
        Config {
            store_backend: StoreBackend::Memory,
            database_url: None,
            database_max_connections: 1,
            cursor_secret: "test-secret".to_string(),
            default_page_size: 20,
            max_page_size: 100,
            conflict_scope,
            port: 0,
            rust_log: "debug".to_string(),
        }
    }
}
