// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for handoff-core.
//!
//! Provides a unified error type with stable machine-readable codes that the
//! HTTP layer maps onto responses.

use serde::Serialize;

/// Result type using HandoffError
pub type Result<T> = std::result::Result<T, HandoffError>;

/// Errors that can occur while initiating work, binding connections or delivering results.
#[derive(Debug, Clone, thiserror::Error)]
#[non_exhaustive]
pub enum HandoffError {
    /// The trigger request has a shape the initiator does not accept.
    #[error("Operation '{method}' is not supported, only GET is accepted")]
    UnsupportedOperation {
        /// The rejected request method.
        method: String,
    },

    /// The workflow orchestrator could not be reached or refused the start.
    #[error("Failed to start workflow: {reason}")]
    WorkflowStartFailed {
        /// The reason for failure.
        reason: String,
    },

    /// The correlation store could not be reached or the operation failed.
    #[error("Correlation store unavailable during '{operation}': {details}")]
    StoreUnavailable {
        /// The operation that failed.
        operation: String,
        /// Error details.
        details: String,
    },

    /// Pushing a payload failed for a reason other than the connection being gone.
    #[error("Transport push to connection '{connection_id}' failed: {reason}")]
    TransportFailed {
        /// The connection the push was addressed to.
        connection_id: String,
        /// The reason for failure.
        reason: String,
    },

    /// Input validation failed.
    #[error("Validation error for '{field}': {message}")]
    ValidationError {
        /// The field that failed validation.
        field: String,
        /// The validation error message.
        message: String,
    },

    /// A connection event arrived that its lifecycle does not allow.
    #[error("Connection '{connection_id}' cannot move from {from} to {to}")]
    InvalidTransition {
        /// The connection the event belongs to.
        connection_id: String,
        /// The state the connection was in.
        from: String,
        /// The state the event tried to move to.
        to: String,
    },
}

/// Serializable error body returned to HTTP callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorBody {
    /// Stable error code.
    pub code: String,
    /// Human readable message.
    pub message: String,
    /// Whether the caller may retry the same request.
    pub retryable: bool,
}

impl HandoffError {
    /// Get the error code string for this error type.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::UnsupportedOperation { .. } => "UNSUPPORTED_OPERATION",
            Self::WorkflowStartFailed { .. } => "WORKFLOW_START_FAILED",
            Self::StoreUnavailable { .. } => "STORE_UNAVAILABLE",
            Self::TransportFailed { .. } => "TRANSPORT_ERROR",
            Self::ValidationError { .. } => "VALIDATION_ERROR",
            Self::InvalidTransition { .. } => "INVALID_TRANSITION",
        }
    }

    /// Whether repeating the same call can succeed.
    ///
    /// Store outages are fatal for the current invocation; the caller decides
    /// whether to try a fresh one.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::WorkflowStartFailed { .. } | Self::TransportFailed { .. }
        )
    }

    /// Convert this error to a response body.
    pub fn to_error_body(&self) -> ErrorBody {
        ErrorBody {
            code: self.error_code().to_string(),
            message: self.to_string(),
            retryable: self.is_retryable(),
        }
    }

    pub(crate) fn store(operation: &str, details: impl std::fmt::Display) -> Self {
        Self::StoreUnavailable {
            operation: operation.to_string(),
            details: details.to_string(),
        }
    }
}

impl From<sqlx::Error> for HandoffError {
    fn from(err: sqlx::Error) -> Self {
        HandoffError::store("query", err)
    }
}

impl From<sqlx::migrate::MigrateError> for HandoffError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        HandoffError::store("migrate", err)
    }
}
