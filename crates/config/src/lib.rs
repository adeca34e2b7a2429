//! Application configuration loaded from environment variables.
//!
//! The configuration is a plain value constructed once per invocation
//! and passed down explicitly; nothing in this crate holds process-wide
//! state.

use std::path::PathBuf;

use anyhow::Context;

/// Connection and storage locations for one batch invocation.
#[derive(Debug, Clone)]
pub struct Config {
    /// Relational store connection URL (SQLite).
    pub database_url: String,

    /// Base directory backing the artifact store.
    pub artifact_base_path: PathBuf,
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// Required environment variables:
    /// - `DATABASE_URL`: SQLite connection string (e.g. `sqlite://finsentry.db`)
    /// - `ARTIFACT_BASE_PATH`: base directory for stored artifacts
    ///
    /// # Errors
    ///
    /// Returns an error if a required environment variable is missing.
    pub fn from_env() -> anyhow::Result<Self> {
        // Load .env file if present
        dotenvy::dotenv().ok();

        let database_url =
            std::env::var("DATABASE_URL").context("DATABASE_URL environment variable not set")?;

        let artifact_base_path = std::env::var("ARTIFACT_BASE_PATH")
            .map(PathBuf::from)
            .context("ARTIFACT_BASE_PATH environment variable not set")?;

        Ok(Self {
            database_url,
            artifact_base_path,
        })
    }
}
