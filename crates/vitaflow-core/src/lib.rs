// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Vitaflow Core - Clinical Flow Execution Engine
//!
//! This crate drives patient-facing clinical form flows: multi-step forms
//! defined as a node graph, with execution progress persisted in a relational
//! store and patients notified over WhatsApp at key transitions.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                      Patient Portal (UI)                      │
//! │                   polls execution state                       │
//! └──────────────────────────────────────────────────────────────┘
//!                                │
//!                                ▼
//! ┌──────────────────────────────────────────────────────────────┐
//! │                     vitaflow-core                             │
//! │   ExecutionEngine ── NodeProcessors ── ContentAccessIssuer    │
//! │                │             │                                │
//! │        DelayScheduler   vitaflow-notify                       │
//! │                │        (Meta / Evolution providers)          │
//! └────────────────┼──────────────────────────────────────────────┘
//!                  ▼
//! ┌──────────────────────────────────────────────────────────────┐
//! │              PostgreSQL / SQLite (FlowStore)                  │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Execution lifecycle
//!
//! | Status | Description |
//! |--------|-------------|
//! | `pending` | Flow assigned, patient has not started |
//! | `active` | Patient is working through the steps |
//! | `waiting` | Paused on a delay node until `next_step_available_at` |
//! | `completed` | All steps completed, progress at 100 |
//! | `failed` | A node processor failed; detail embedded in the cursor |
//!
//! Progress is always `round(100 * completed_steps / total_steps)`. Advancing
//! a completed execution is a no-op; revisiting is only allowed to steps that
//! were completed.
//!
//! # Configuration
//!
//! | Variable | Required | Default | Description |
//! |----------|----------|---------|-------------|
//! | `VITAFLOW_DATABASE_URL` | Yes | - | PostgreSQL or SQLite connection string |
//! | `VITAFLOW_PORTAL_BASE_URL` | No | `https://app.vitaflow.health` | Portal base URL for links |
//! | `VITAFLOW_CONTENT_BASE_URL` | No | `<portal>/functions/v1` | Content endpoint base URL |
//! | `VITAFLOW_PROVIDER_TIMEOUT_SECS` | No | `30` | Messaging provider request timeout |
//! | `VITAFLOW_SCHEDULER_POLL_SECS` | No | `10` | Delay scheduler poll interval |
//! | `VITAFLOW_SCHEDULER_BATCH_SIZE` | No | `25` | Executions woken per poll |
//!
//! # Modules
//!
//! - [`access`]: Content access tokens for patient downloads
//! - [`config`]: Configuration from environment variables
//! - [`engine`]: The execution engine (advance, revisit, dispatch)
//! - [`error`]: Error types with stable error code mapping
//! - [`model`]: Flow definitions, node payloads, execution state
//! - [`persistence`]: FlowStore trait with Postgres and SQLite backends,
//!   each with its migrations embedded
//! - [`processors`]: Per-node-kind processing routines
//! - [`scheduler`]: Background wake loop for delay nodes

#![deny(missing_docs)]

/// Content access tokens for patient downloads.
pub mod access;

/// Configuration loaded from environment variables.
pub mod config;

/// Flow execution engine.
pub mod engine;

/// Error types for engine operations with error code mapping.
pub mod error;

/// Flow definitions, node payloads, and execution state.
pub mod model;

/// Storage abstraction and backends.
pub mod persistence;

/// Per-node-kind processing routines.
pub mod processors;

/// Background wake loop for delay nodes.
pub mod scheduler;

pub use access::{ContentAccess, ContentAccessIssuer};
pub use engine::ExecutionEngine;
pub use error::{EngineError, Result};
pub use processors::{NotificationHandle, ProcessorContext};
pub use scheduler::{DelayScheduler, DelaySchedulerConfig};
