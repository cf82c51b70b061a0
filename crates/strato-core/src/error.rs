// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for strato-core.
//!
//! Every variant maps to a stable error code so callers (API layers, the
//! ingest consumer) can react without matching on messages.

use strato_protocol::FrameError;

/// Result type using SyncError
pub type Result<T> = std::result::Result<T, SyncError>;

/// Errors raised by the control plane.
#[derive(Debug, Clone, thiserror::Error)]
#[non_exhaustive]
pub enum SyncError {
    /// Resource does not exist in the given scope.
    #[error("{resource_type} '{name}' not found")]
    NotFound {
        /// Resource type that was looked up.
        resource_type: String,
        /// Name (or identity) that was not found.
        name: String,
    },

    /// Resource identity already taken (unique-index violation).
    #[error("{resource_type} '{name}' already exists")]
    AlreadyExists {
        /// Resource type being created.
        resource_type: String,
        /// Name that collided.
        name: String,
    },

    /// IAM check refused the operation.
    #[error("user '{user_id}' is not allowed to {action} {resource}")]
    PermissionDenied {
        /// Acting user.
        user_id: String,
        /// Refused action.
        action: String,
        /// Target resource reference.
        resource: String,
    },

    /// IAM check itself could not be performed.
    #[error("permission check failed: {details}")]
    PermissionCheckFailed {
        /// Error details.
        details: String,
    },

    /// Input validation failed.
    #[error("Validation error for '{field}': {message}")]
    ValidationError {
        /// The field that failed validation.
        field: String,
        /// The validation error message.
        message: String,
    },

    /// The resource is tombstoned and cannot be mutated.
    #[error("{resource_type} '{name}' is marked for deletion")]
    MarkedForDeletion {
        /// Resource type.
        resource_type: String,
        /// Resource name.
        name: String,
    },

    /// Compare-and-set retries were exhausted.
    #[error("concurrent modification of {resource_type} '{name}', retries exhausted")]
    Conflict {
        /// Resource type.
        resource_type: String,
        /// Resource name.
        name: String,
    },

    /// Database operation failed.
    #[error("Database error during '{operation}': {details}")]
    DatabaseError {
        /// The operation that failed.
        operation: String,
        /// Error details.
        details: String,
    },

    /// Message bus operation failed.
    #[error("Bus error during '{operation}' on topic '{topic}': {details}")]
    BusError {
        /// The operation that failed (publish, subscribe, ack, ...).
        operation: String,
        /// Topic involved.
        topic: String,
        /// Error details.
        details: String,
    },

    /// JSON (de)serialization of a document or payload failed.
    #[error("Serialization error: {details}")]
    SerializationError {
        /// Error details.
        details: String,
    },

    /// A bus frame could not be decoded.
    #[error("Frame error: {details}")]
    FrameError {
        /// Error details.
        details: String,
    },
}

impl SyncError {
    /// Get the error code string for this error type.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "NOT_FOUND",
            Self::AlreadyExists { .. } => "ALREADY_EXISTS",
            Self::PermissionDenied { .. } => "PERMISSION_DENIED",
            Self::PermissionCheckFailed { .. } => "PERMISSION_CHECK_FAILED",
            Self::ValidationError { .. } => "VALIDATION_ERROR",
            Self::MarkedForDeletion { .. } => "MARKED_FOR_DELETION",
            Self::Conflict { .. } => "CONFLICT",
            Self::DatabaseError { .. } => "DATABASE_ERROR",
            Self::BusError { .. } => "BUS_ERROR",
            Self::SerializationError { .. } => "SERIALIZATION_ERROR",
            Self::FrameError { .. } => "FRAME_ERROR",
        }
    }

    /// Whether retrying the same operation later may succeed.
    ///
    /// The ingest consumer nacks messages failing with a transient error so the
    /// bus redelivers them; everything else is logged and acked.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::DatabaseError { .. } | Self::BusError { .. })
    }

    pub(crate) fn validation(field: &str, message: impl Into<String>) -> Self {
        Self::ValidationError {
            field: field.to_string(),
            message: message.into(),
        }
    }

    pub(crate) fn database(operation: &str, details: impl ToString) -> Self {
        Self::DatabaseError {
            operation: operation.to_string(),
            details: details.to_string(),
        }
    }

    pub(crate) fn bus(operation: &str, topic: &str, details: impl ToString) -> Self {
        Self::BusError {
            operation: operation.to_string(),
            topic: topic.to_string(),
            details: details.to_string(),
        }
    }
}

impl From<sqlx::Error> for SyncError {
    fn from(err: sqlx::Error) -> Self {
        SyncError::DatabaseError {
            operation: "query".to_string(),
            details: err.to_string(),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for SyncError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        SyncError::DatabaseError {
            operation: "migrate".to_string(),
            details: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::SerializationError {
            details: err.to_string(),
        }
    }
}

impl From<FrameError> for SyncError {
    fn from(err: FrameError) -> Self {
        SyncError::FrameError {
            details: err.to_string(),
        }
    }
}
