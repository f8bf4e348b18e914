//! Startup configuration from the environment.
//!
//! `.env` files are honored via dotenvy. Only process-level knobs live
//! here; gateway credentials belong to the settings row so they can be
//! changed at runtime.

use std::env;

#[derive(Clone, Debug)]
pub struct Config {
    /// SQLite URL, e.g. `sqlite://tradeweave.db`.
    pub database_url: String,
    /// HTTP bind address.
    pub bind_addr: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: "sqlite://tradeweave.db".to_string(),
            bind_addr: "0.0.0.0:8000".to_string(),
        }
    }
}

impl Config {
    /// Read configuration from the environment, loading `.env` first.
    #[must_use]
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();
        let defaults = Self::default();
        Self {
            database_url: env::var("TRADEWEAVE_DATABASE_URL").unwrap_or(defaults.database_url),
            bind_addr: env::var("TRADEWEAVE_BIND").unwrap_or(defaults.bind_addr),
        }
    }
}
