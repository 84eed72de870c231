// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration loading from environment variables.

use std::time::Duration;

/// Vitaflow Core configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// PostgreSQL or SQLite connection URL
    pub database_url: String,
    /// Base URL of the patient portal (used in notification links)
    pub portal_base_url: String,
    /// Base URL of the content retrieval endpoint
    pub content_base_url: String,
    /// Timeout applied to every messaging provider request
    pub provider_timeout: Duration,
    /// How often the delay scheduler polls for due executions
    pub scheduler_poll_interval: Duration,
    /// Maximum waiting executions woken per poll
    pub scheduler_batch_size: i64,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Required:
    /// - `VITAFLOW_DATABASE_URL`: PostgreSQL or SQLite connection string
    ///
    /// Optional (with defaults):
    /// - `VITAFLOW_PORTAL_BASE_URL`: patient portal base URL
    ///   (default: `https://app.vitaflow.health`)
    /// - `VITAFLOW_CONTENT_BASE_URL`: content endpoint base URL
    ///   (default: `<portal>/functions/v1`)
    /// - `VITAFLOW_PROVIDER_TIMEOUT_SECS`: provider request timeout (default: 30)
    /// - `VITAFLOW_SCHEDULER_POLL_SECS`: delay scheduler poll interval (default: 10)
    /// - `VITAFLOW_SCHEDULER_BATCH_SIZE`: wakes per poll (default: 25)
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = std::env::var("VITAFLOW_DATABASE_URL")
            .map_err(|_| ConfigError::Missing("VITAFLOW_DATABASE_URL"))?;

        let portal_base_url = std::env::var("VITAFLOW_PORTAL_BASE_URL")
            .unwrap_or_else(|_| "https://app.vitaflow.health".to_string())
            .trim_end_matches('/')
            .to_string();

        let content_base_url = std::env::var("VITAFLOW_CONTENT_BASE_URL")
            .map(|url| url.trim_end_matches('/').to_string())
            .unwrap_or_else(|_| format!("{}/functions/v1", portal_base_url));

        let provider_timeout_secs: u64 = std::env::var("VITAFLOW_PROVIDER_TIMEOUT_SECS")
            .unwrap_or_else(|_| "30".to_string())
            .parse()
            .map_err(|_| {
                ConfigError::Invalid("VITAFLOW_PROVIDER_TIMEOUT_SECS", "must be seconds")
            })?;

        let scheduler_poll_secs: u64 = std::env::var("VITAFLOW_SCHEDULER_POLL_SECS")
            .unwrap_or_else(|_| "10".to_string())
            .parse()
            .map_err(|_| ConfigError::Invalid("VITAFLOW_SCHEDULER_POLL_SECS", "must be seconds"))?;

        let scheduler_batch_size: i64 = std::env::var("VITAFLOW_SCHEDULER_BATCH_SIZE")
            .unwrap_or_else(|_| "25".to_string())
            .parse()
            .map_err(|_| {
                ConfigError::Invalid("VITAFLOW_SCHEDULER_BATCH_SIZE", "must be a positive integer")
            })?;

        if scheduler_batch_size <= 0 {
            return Err(ConfigError::Invalid(
                "VITAFLOW_SCHEDULER_BATCH_SIZE",
                "must be a positive integer",
            ));
        }

        Ok(Self {
            database_url,
            portal_base_url,
            content_base_url,
            provider_timeout: Duration::from_secs(provider_timeout_secs),
            scheduler_poll_interval: Duration::from_secs(scheduler_poll_secs),
            scheduler_batch_size,
        })
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    Missing(&'static str),

    /// An environment variable has an invalid value.
    #[error("invalid value for {0}: {1}")]
    Invalid(&'static str, &'static str),
}
