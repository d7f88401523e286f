use std::env;

use anyhow::Context;

/// Runtime settings, read from the environment after `.env` has been loaded.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub max_connections: u32,
    pub rust_log: String,
    /// How many students the absence rankings show.
    pub report_top_n: usize,
}

impl AppConfig {
    /// Environment variables:
    /// - `DATABASE_URL` (required)
    /// - `DATABASE_MAX_CONNECTIONS` (default: 5)
    /// - `RUST_LOG` (default: info)
    /// - `REPORT_TOP_N` (default: 10)
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = env::var("DATABASE_URL")
            .context("DATABASE_URL must be set to the seminar Postgres instance")?;
        Ok(Self::with_database_url(database_url))
    }

    fn with_database_url(database_url: String) -> Self {
        Self {
            database_url,
            max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(5),
            rust_log: env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            report_top_n: env::var("REPORT_TOP_N")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|n| *n > 0)
                .unwrap_or(10),
        }
    }
}
