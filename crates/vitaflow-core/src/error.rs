// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for vitaflow-core.
//!
//! Provides a unified error type that maps to stable, machine-readable
//! error codes for API responses and the execution event log.

#![allow(dead_code)] // Variants and methods used in tests and for future expansion

use std::fmt;

/// Result type using EngineError
pub type Result<T> = std::result::Result<T, EngineError>;

/// Engine errors that can occur while driving a flow execution.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum EngineError {
    /// Execution was not found in the database.
    ExecutionNotFound {
        /// The execution ID that was not found.
        execution_id: String,
    },

    /// The cursor points outside the execution's step list.
    StepNotFound {
        /// The execution ID.
        execution_id: String,
        /// The step index that was out of range.
        index: usize,
    },

    /// A step was targeted for revisit but was never completed.
    StepNotCompleted {
        /// The execution ID.
        execution_id: String,
        /// The step index that is not completed.
        index: usize,
    },

    /// Execution is already completed (informational; advance is a no-op).
    AlreadyCompleted {
        /// The execution ID.
        execution_id: String,
    },

    /// A node kind has no runtime processor (editor-only kinds).
    UnsupportedNodeType {
        /// The node kind string.
        kind: String,
    },

    /// Content access token was not found.
    AccessNotFound,

    /// Content access token exists but is past its expiry.
    AccessExpired {
        /// When the token expired.
        expired_at: chrono::DateTime<chrono::Utc>,
    },

    /// Notification dispatch failed after exhausting retries.
    DispatchFailed {
        /// The reason for failure.
        reason: String,
    },

    /// Input validation failed.
    ValidationError {
        /// The field that failed validation.
        field: String,
        /// The validation error message.
        message: String,
    },

    /// Database operation failed.
    DatabaseError {
        /// The operation that failed.
        operation: String,
        /// Error details.
        details: String,
    },
}

impl EngineError {
    /// Get the error code string for this error type.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::ExecutionNotFound { .. } => "EXECUTION_NOT_FOUND",
            Self::StepNotFound { .. } => "STEP_NOT_FOUND",
            Self::StepNotCompleted { .. } => "STEP_NOT_COMPLETED",
            Self::AlreadyCompleted { .. } => "ALREADY_COMPLETED",
            Self::UnsupportedNodeType { .. } => "UNSUPPORTED_NODE_TYPE",
            Self::AccessNotFound => "ACCESS_NOT_FOUND",
            Self::AccessExpired { .. } => "ACCESS_EXPIRED",
            Self::DispatchFailed { .. } => "DISPATCH_FAILED",
            Self::ValidationError { .. } => "VALIDATION_ERROR",
            Self::DatabaseError { .. } => "DATABASE_ERROR",
        }
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ExecutionNotFound { execution_id } => {
                write!(f, "Execution '{}' not found", execution_id)
            }
            Self::StepNotFound {
                execution_id,
                index,
            } => {
                write!(
                    f,
                    "Step {} not found in execution '{}'",
                    index, execution_id
                )
            }
            Self::StepNotCompleted {
                execution_id,
                index,
            } => {
                write!(
                    f,
                    "Step {} of execution '{}' is not completed",
                    index, execution_id
                )
            }
            Self::AlreadyCompleted { execution_id } => {
                write!(f, "Execution '{}' is already completed", execution_id)
            }
            Self::UnsupportedNodeType { kind } => {
                write!(f, "Node type '{}' has no runtime processor", kind)
            }
            Self::AccessNotFound => write!(f, "Content access token not found"),
            Self::AccessExpired { expired_at } => {
                write!(f, "Content access token expired at {}", expired_at)
            }
            Self::DispatchFailed { reason } => {
                write!(f, "Notification dispatch failed: {}", reason)
            }
            Self::ValidationError { field, message } => {
                write!(f, "Validation error for '{}': {}", field, message)
            }
            Self::DatabaseError { operation, details } => {
                write!(f, "Database error during '{}': {}", operation, details)
            }
        }
    }
}

impl std::error::Error for EngineError {}

impl From<sqlx::Error> for EngineError {
    fn from(err: sqlx::Error) -> Self {
        EngineError::DatabaseError {
            operation: "query".to_string(),
            details: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::DatabaseError {
            operation: "json".to_string(),
            details: err.to_string(),
        }
    }
}
