// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Delay wake scheduler.
//!
//! Periodically polls for waiting executions whose `next_step_available_at`
//! has passed and flips them back to active so the patient's next step
//! becomes available.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tracing::{debug, error, info};

use crate::error::Result;
use crate::persistence::FlowStore;

/// Delay scheduler configuration.
#[derive(Debug, Clone)]
pub struct DelaySchedulerConfig {
    /// How often to poll for due executions
    pub poll_interval: Duration,
    /// Maximum executions to wake per poll
    pub batch_size: i64,
}

impl Default for DelaySchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(10),
            batch_size: 25,
        }
    }
}

/// Delay scheduler that runs as a background task.
pub struct DelayScheduler {
    store: Arc<dyn FlowStore>,
    config: DelaySchedulerConfig,
    shutdown: Arc<Notify>,
}

impl DelayScheduler {
    /// Create a new delay scheduler.
    pub fn new(store: Arc<dyn FlowStore>, config: DelaySchedulerConfig) -> Self {
        Self {
            store,
            config,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Get a handle to signal shutdown.
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    /// Run the scheduler loop.
    pub async fn run(self) {
        info!(
            poll_interval_secs = self.config.poll_interval.as_secs(),
            batch_size = self.config.batch_size,
            "Delay scheduler started"
        );

        loop {
            tokio::select! {
                _ = self.shutdown.notified() => {
                    info!("Delay scheduler shutting down");
                    break;
                }
                _ = tokio::time::sleep(self.config.poll_interval) => {
                    if let Err(e) = self.process_due_executions().await {
                        error!(error = %e, "Failed to process due executions");
                    }
                }
            }
        }
    }

    /// Wake every waiting execution whose delay has elapsed.
    ///
    /// Exposed so tests and operator tooling can trigger one poll directly.
    pub async fn process_due_executions(&self) -> Result<()> {
        let due = self
            .store
            .due_waiting_executions(self.config.batch_size)
            .await?;

        if due.is_empty() {
            debug!("No executions due for wake");
            return Ok(());
        }

        info!(count = due.len(), "Waking executions past their delay");

        for execution in due {
            if let Err(e) = self.store.wake_execution(&execution.id).await {
                error!(
                    execution_id = %execution.id,
                    error = %e,
                    "Failed to wake execution"
                );
                // Continue processing other wakes
            } else {
                info!(execution_id = %execution.id, "Execution woken");
            }
        }

        Ok(())
    }
}
