//! Entity types shared between the core and collaborator implementations.
//!
//! - `RawRecord`: a document exactly as the remote store returns it
//! - `ContentEntity`: the typed feed entry produced by projection
//! - `ContentDraft` / `ContentPatch`: write-side payloads
//! - `FieldWrite` / `WriteRecord`: what is sent to the store, including
//!   requests for server-assigned timestamps

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::{Fields, Value};

// =============================================================================
// RawRecord - Remote document representation
// =============================================================================

/// A remote document: its store-assigned identifier plus untyped fields.
///
/// Any field may be missing; projection must tolerate every shape.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RawRecord {
    pub id: String,
    pub fields: Fields,
}

impl RawRecord {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            fields: HashMap::new(),
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    pub fn get_string(&self, name: &str) -> Option<String> {
        self.get(name).and_then(|v| v.as_string().map(String::from))
    }

    pub fn get_datetime(&self, name: &str) -> Option<DateTime<Utc>> {
        self.get(name).and_then(Value::as_datetime)
    }
}

// =============================================================================
// Session types
// =============================================================================

/// The authenticated identity reported by the credential provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: String,
    pub display_name: String,
}

impl Identity {
    pub fn new(user_id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            display_name: display_name.into(),
        }
    }
}

/// Email/password pair handed to the credential provider.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

impl Credentials {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .finish()
    }
}

// =============================================================================
// ContentEntity - Feed entry
// =============================================================================

/// One entry of a feed (tweet, photo post, shop listing).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentEntity {
    /// Store-assigned, unique within the collection
    pub id: String,
    pub owner_id: String,
    /// Snapshot of the creator's display name at creation time
    pub owner_display_name: String,
    pub body: String,
    /// Absent until the media upload for this entry completes
    pub media_url: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Set when the store has not assigned `created_at` yet. `created_at` then
    /// holds local wall-clock time, which is for display only.
    pub created_at_pending: bool,
    pub modified_at: Option<DateTime<Utc>>,
}

// =============================================================================
// Write payloads
// =============================================================================

/// Binary asset attached to a draft.
#[derive(Clone, PartialEq, Eq)]
pub struct MediaAttachment {
    pub bytes: Vec<u8>,
    pub content_type: String,
}

impl MediaAttachment {
    pub fn new(bytes: impl Into<Vec<u8>>, content_type: impl Into<String>) -> Self {
        Self {
            bytes: bytes.into(),
            content_type: content_type.into(),
        }
    }
}

impl fmt::Debug for MediaAttachment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaAttachment")
            .field("len", &self.bytes.len())
            .field("content_type", &self.content_type)
            .finish()
    }
}

/// User-authored content for a new feed entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentDraft {
    pub body: String,
    pub media: Option<MediaAttachment>,
}

impl ContentDraft {
    pub fn new(body: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            media: None,
        }
    }

    pub fn with_media(mut self, media: MediaAttachment) -> Self {
        self.media = Some(media);
        self
    }
}

/// Partial update of an entry. Only `body` and `media_url` are editable.
///
/// `media_url: Some(None)` clears the URL.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContentPatch {
    pub body: Option<String>,
    pub media_url: Option<Option<String>>,
}

impl ContentPatch {
    pub fn body(body: impl Into<String>) -> Self {
        Self {
            body: Some(body.into()),
            media_url: None,
        }
    }

    pub fn media_url(url: Option<String>) -> Self {
        Self {
            body: None,
            media_url: Some(url),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.body.is_none() && self.media_url.is_none()
    }
}

/// A single field write sent to the document store.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldWrite {
    Set(Value),
    /// Ask the store to fill in its own clock
    ServerTimestamp,
    Delete,
}

/// Field writes keyed by remote field name.
pub type WriteRecord = HashMap<String, FieldWrite>;
