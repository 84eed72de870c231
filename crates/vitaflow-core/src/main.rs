// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Vitaflow Core - Clinical Flow Execution Service
//!
//! The service binary is responsible for:
//! - Running database migrations on startup
//! - Waking executions whose delay has elapsed (delay scheduler)
//!
//! Flow assignment and step advancement are driven by the API layer
//! embedding [`vitaflow_core::ExecutionEngine`].

use std::sync::Arc;

use anyhow::Result;
use sqlx::postgres::PgPoolOptions;
use tracing::{error, info};

use vitaflow_core::config::Config;
use vitaflow_core::persistence::PostgresStore;
use vitaflow_core::{DelayScheduler, DelaySchedulerConfig};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file (from crate directory or parent directories)
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("vitaflow_core=info".parse().unwrap()),
        )
        .init();

    info!("Starting Vitaflow Core");

    // Load configuration
    let config = Config::from_env().map_err(|e| {
        error!("Configuration error: {}", e);
        e
    })?;

    info!(
        portal_base_url = %config.portal_base_url,
        poll_interval_secs = config.scheduler_poll_interval.as_secs(),
        "Configuration loaded"
    );

    // Connect to database
    info!("Connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await?;

    info!("Database connection established");

    // Verify connection
    let row: (i32,) = sqlx::query_as("SELECT 1").fetch_one(&pool).await?;
    info!(result = row.0, "Database health check passed");

    info!("Running database migrations...");
    let store = Arc::new(PostgresStore::migrated(pool.clone()).await?);
    info!("Migrations completed");

    // Start the delay scheduler
    let scheduler = DelayScheduler::new(
        store,
        DelaySchedulerConfig {
            poll_interval: config.scheduler_poll_interval,
            batch_size: config.scheduler_batch_size,
        },
    );
    let scheduler_shutdown = scheduler.shutdown_handle();
    let scheduler_handle = tokio::spawn(scheduler.run());

    info!("Vitaflow Core initialized successfully");

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutting down...");

    scheduler_shutdown.notify_one();
    let _ = scheduler_handle.await;

    pool.close().await;
    info!("Shutdown complete");

    Ok(())
}
