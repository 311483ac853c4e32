//! Error types for review operations.
//!
//! Errors are serializable so that a transport layer above the commands can
//! return them as structured JSON without re-mapping.

use serde::Serialize;
use thiserror::Error;

/// Errors returned by review commands.
///
/// Configuration problems inside submit requirements are not errors: they are
/// reported as data on the requirement result. Only request validation, access
/// and storage failures end up here.
#[derive(Debug, Error, Serialize)]
#[serde(tag = "type", content = "details")]
pub enum ReviewError {
    /// The request itself is malformed.
    #[error("Bad request: {message}")]
    BadRequest {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        field: Option<String>,
    },

    /// The acting user lacks a permission.
    #[error("Permission denied: {message}")]
    PermissionDenied { message: String },

    /// The request conflicts with the current state of a change.
    #[error("Conflict: {message}")]
    Conflict {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        change_id: Option<i64>,
    },

    /// A change involved in the request is not visible to the relevant user.
    #[error("Cannot read: {message}")]
    CannotRead { message: String },

    /// Requested resource not found.
    #[error("Not found: {resource}")]
    NotFound {
        resource: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },

    /// The request is well formed but refers to something unusable.
    #[error("Unprocessable entity: {message}")]
    UnprocessableEntity { message: String },

    /// The change store rejected a read or write.
    #[error("Database error: {message}")]
    Database { message: String },

    /// Git object or ref storage failed.
    #[error("Storage error: {message}")]
    Storage { message: String },

    /// Configuration could not be loaded.
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Internal error.
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl ReviewError {
    /// Create a bad request error.
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest {
            message: message.into(),
            field: None,
        }
    }

    /// Create a bad request error naming the offending input field.
    pub fn bad_request_field(message: impl Into<String>, field: impl Into<String>) -> Self {
        Self::BadRequest {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Create a permission denied error.
    pub fn permission_denied(message: impl Into<String>) -> Self {
        Self::PermissionDenied {
            message: message.into(),
        }
    }

    /// Create a conflict error.
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
            change_id: None,
        }
    }

    /// Create a conflict error attributed to a change.
    pub fn conflict_on_change(message: impl Into<String>, change_id: i64) -> Self {
        Self::Conflict {
            message: message.into(),
            change_id: Some(change_id),
        }
    }

    /// Create a cannot-read error.
    pub fn cannot_read(message: impl Into<String>) -> Self {
        Self::CannotRead {
            message: message.into(),
        }
    }

    /// Create a not found error for `resource` with the given id.
    pub fn not_found_with_id(resource: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
            id: Some(id.into()),
        }
    }

    /// Create an unprocessable entity error.
    pub fn unprocessable(message: impl Into<String>) -> Self {
        Self::UnprocessableEntity {
            message: message.into(),
        }
    }

    pub fn database(message: impl Into<String>) -> Self {
        Self::Database {
            message: message.into(),
        }
    }

    /// Create a storage error.
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// The user-facing message without the category prefix.
    pub fn message(&self) -> &str {
        match self {
            Self::BadRequest { message, .. }
            | Self::PermissionDenied { message }
            | Self::Conflict { message, .. }
            | Self::CannotRead { message }
            | Self::UnprocessableEntity { message }
            | Self::Database { message }
            | Self::Storage { message }
            | Self::Config { message }
            | Self::Internal { message } => message,
            Self::NotFound { resource, .. } => resource,
        }
    }

    /// Check if this is a conflict error.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

impl From<sqlx::Error> for ReviewError {
    fn from(err: sqlx::Error) -> Self {
        Self::database(err.to_string())
    }
}

impl From<serde_json::Error> for ReviewError {
    fn from(err: serde_json::Error) -> Self {
        Self::internal(format!("JSON error: {}", err))
    }
}

impl From<crate::db::DbError> for ReviewError {
    fn from(err: crate::db::DbError) -> Self {
        Self::database(err.to_string())
    }
}

impl From<prometheus::Error> for ReviewError {
    fn from(err: prometheus::Error) -> Self {
        Self::internal(format!("Metrics error: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_serialization() {
        let err = ReviewError::conflict("Change is already up to date.");
        let json = serde_json::to_string(&err).unwrap();
        assert!(json.contains("\"type\":\"Conflict\""));
        assert!(json.contains("Change is already up to date."));
    }

    #[test]
    fn test_not_found_with_id() {
        let err = ReviewError::not_found_with_id("Change", "123");
        let json = serde_json::to_string(&err).unwrap();
        assert!(json.contains("\"resource\":\"Change\""));
        assert!(json.contains("\"id\":\"123\""));
    }

    #[test]
    fn test_optional_fields_not_serialized() {
        let err = ReviewError::conflict("stale");
        let json = serde_json::to_string(&err).unwrap();
        assert!(!json.contains("change_id"));
    }

    #[test]
    fn test_display_and_message() {
        let err = ReviewError::permission_denied("rebase not permitted");
        assert_eq!(format!("{}", err), "Permission denied: rebase not permitted");
        assert_eq!(err.message(), "rebase not permitted");
    }
}
