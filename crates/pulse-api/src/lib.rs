use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub mod entity;
pub mod streaming;

// Re-export entity types
pub use entity::{
    ContentDraft, ContentEntity, ContentPatch, Credentials, FieldWrite, Identity,
    MediaAttachment, RawRecord, WriteRecord,
};

// Re-export streaming types
pub use streaming::{
    BlobStore, CredentialProvider, DocumentStore, FeedQuery, IdentityStream, OrderBy,
    OwnerFilter, ProgressSender, QueryCapabilities, SnapshotResult, SnapshotStream,
    SortDirection, UploadProgress,
};

/// Field value of a remote document.
///
/// Mirrors the scalar types a document store hands back. Timestamps are kept
/// as RFC3339 strings; use `as_datetime()` to get the parsed value.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum Value {
    String(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    DateTime(String),
    Null,
}

impl Value {
    /// Get string value, returning None if not a string
    pub fn as_string(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Get datetime value as parsed chrono::DateTime
    ///
    /// Plain strings are accepted when they hold RFC3339 text (untagged
    /// deserialization cannot tell them apart). Integers are read as
    /// milliseconds since the Unix epoch.
    pub fn as_datetime(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        match self {
            Value::DateTime(s) | Value::String(s) => chrono::DateTime::parse_from_rfc3339(s)
                .ok()
                .map(|dt| dt.with_timezone(&chrono::Utc)),
            Value::Integer(millis) => chrono::DateTime::from_timestamp_millis(*millis),
            _ => None,
        }
    }

    /// Create a Value from a chrono::DateTime
    pub fn from_datetime(dt: chrono::DateTime<chrono::Utc>) -> Self {
        Value::DateTime(dt.to_rfc3339())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<chrono::DateTime<chrono::Utc>> for Value {
    fn from(dt: chrono::DateTime<chrono::Utc>) -> Self {
        Value::from_datetime(dt)
    }
}

/// Field map of a remote document, keyed by remote field name.
pub type Fields = HashMap<String, Value>;

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_value_conversions() {
        let v: Value = "test".into();
        assert_eq!(v, Value::String("test".to_string()));
        assert_eq!(v.as_string(), Some("test"));

        assert_eq!(Value::Integer(42).as_string(), None);
    }

    #[test]
    fn test_datetime_from_rfc3339_and_millis() {
        let dt = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();

        assert_eq!(Value::from_datetime(dt).as_datetime(), Some(dt));
        assert_eq!(
            Value::Integer(dt.timestamp_millis()).as_datetime(),
            Some(dt)
        );
        assert_eq!(Value::String("yesterday".into()).as_datetime(), None);
    }
}

/// Structured error types for feed and session operations.
///
/// Every variant is recoverable: it is returned to the caller that issued the
/// operation (or stored in the feed snapshot for subscription failures) and
/// never crashes the process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum ApiError {
    #[error("Authentication failed: {message}")]
    AuthFailure { message: String },

    #[error("Subscription failed: {message}")]
    SubscriptionFailure { message: String },

    #[error("Write failed: {message}")]
    WriteFailure { message: String },

    #[error("Asset operation failed: {message}")]
    AssetFailure { message: String },

    #[error("Invalid operation: {message}")]
    InvalidOperation { message: String },

    #[error("Not found: {what}")]
    NotFound { what: String },
}

impl ApiError {
    pub fn auth(message: impl Into<String>) -> Self {
        Self::AuthFailure {
            message: message.into(),
        }
    }

    pub fn subscription(message: impl Into<String>) -> Self {
        Self::SubscriptionFailure {
            message: message.into(),
        }
    }

    pub fn write(message: impl Into<String>) -> Self {
        Self::WriteFailure {
            message: message.into(),
        }
    }

    pub fn asset(message: impl Into<String>) -> Self {
        Self::AssetFailure {
            message: message.into(),
        }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }
}
