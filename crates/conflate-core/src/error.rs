// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for conflate-core.
//!
//! Provides a unified error type that maps to stanza error replies.

use conflate_protocol::{ClientError, ErrorCondition};
use std::fmt;

/// Result type using CoreError
pub type Result<T> = std::result::Result<T, CoreError>;

/// Core errors that can occur while handling commands, storage and transport.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum CoreError {
    /// Malformed input, e.g. a missing required command argument.
    InvalidArgument {
        /// The argument or field at fault.
        field: String,
        /// What was wrong with it.
        message: String,
    },

    /// Unknown command or missing entry.
    NotFound {
        /// What was looked up.
        what: String,
    },

    /// Connection, authentication or socket failure. Always retried.
    TransportFailure {
        /// Error details.
        details: String,
    },

    /// Relational engine failure.
    StorageFailure {
        /// The operation that failed.
        operation: String,
        /// Error details.
        details: String,
    },

    /// Alarm rejected because the queue is full.
    QueueFull {
        /// Queue capacity.
        capacity: usize,
    },
}

impl CoreError {
    pub fn invalid_argument(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound { what: what.into() }
    }

    pub fn storage(operation: impl Into<String>, details: impl fmt::Display) -> Self {
        Self::StorageFailure {
            operation: operation.into(),
            details: details.to_string(),
        }
    }

    /// Get the error code string for this error type.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidArgument { .. } => "INVALID_ARGUMENT",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::TransportFailure { .. } => "TRANSPORT_FAILURE",
            Self::StorageFailure { .. } => "STORAGE_FAILURE",
            Self::QueueFull { .. } => "QUEUE_FULL",
        }
    }

    /// The stanza error condition reported to a remote caller.
    pub fn condition(&self) -> ErrorCondition {
        match self {
            Self::InvalidArgument { .. } => ErrorCondition::BAD_REQUEST,
            Self::NotFound { .. } => ErrorCondition::ITEM_NOT_FOUND,
            Self::QueueFull { .. } => ErrorCondition::RESOURCE_CONSTRAINT,
            Self::TransportFailure { .. } | Self::StorageFailure { .. } => {
                ErrorCondition::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidArgument { field, message } => {
                write!(f, "Invalid argument '{}': {}", field, message)
            }
            Self::NotFound { what } => write!(f, "'{}' not found", what),
            Self::TransportFailure { details } => write!(f, "Transport failure: {}", details),
            Self::StorageFailure { operation, details } => {
                write!(f, "Storage error during '{}': {}", operation, details)
            }
            Self::QueueFull { capacity } => {
                write!(f, "Alarm queue full ({} entries)", capacity)
            }
        }
    }
}

impl std::error::Error for CoreError {}

impl From<sqlx::Error> for CoreError {
    fn from(err: sqlx::Error) -> Self {
        CoreError::StorageFailure {
            operation: "query".to_string(),
            details: err.to_string(),
        }
    }
}

impl From<ClientError> for CoreError {
    fn from(err: ClientError) -> Self {
        CoreError::TransportFailure {
            details: err.to_string(),
        }
    }
}

impl From<reqwest::Error> for CoreError {
    fn from(err: reqwest::Error) -> Self {
        CoreError::TransportFailure {
            details: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        let cases = vec![
            (CoreError::invalid_argument("servers", "missing"), "INVALID_ARGUMENT"),
            (CoreError::not_found("bogus"), "NOT_FOUND"),
            (
                CoreError::TransportFailure {
                    details: "reset".to_string(),
                },
                "TRANSPORT_FAILURE",
            ),
            (CoreError::storage("save", "disk I/O error"), "STORAGE_FAILURE"),
            (CoreError::QueueFull { capacity: 100 }, "QUEUE_FULL"),
        ];

        for (err, code) in cases {
            assert_eq!(err.error_code(), code);
        }
    }

    #[test]
    fn test_conditions() {
        assert_eq!(
            CoreError::not_found("bogus").condition(),
            ErrorCondition::ITEM_NOT_FOUND
        );
        assert_eq!(
            CoreError::invalid_argument("servers", "missing").condition(),
            ErrorCondition::BAD_REQUEST
        );
        assert_eq!(
            CoreError::QueueFull { capacity: 100 }.condition().code,
            500
        );
        assert_eq!(
            CoreError::storage("load", "locked").condition(),
            ErrorCondition::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_display() {
        let err = CoreError::invalid_argument("servers", "required");
        assert_eq!(err.to_string(), "Invalid argument 'servers': required");

        let err = CoreError::storage("save", "database is locked");
        assert!(err.to_string().contains("save"));
        assert!(err.to_string().contains("database is locked"));
    }

    #[test]
    fn test_from_sqlx_error() {
        let err: CoreError = sqlx::Error::RowNotFound.into();
        assert_eq!(err.error_code(), "STORAGE_FAILURE");
    }

    #[test]
    fn test_from_client_error() {
        let err: CoreError = ClientError::Timeout(100).into();
        assert_eq!(err.error_code(), "TRANSPORT_FAILURE");
        assert!(err.to_string().contains("100ms"));
    }
}
