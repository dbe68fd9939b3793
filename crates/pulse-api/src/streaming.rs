use serde::{Deserialize, Serialize};
use std::pin::Pin;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_stream::Stream;

use crate::{ApiError, Credentials, Identity, RawRecord, WriteRecord};

/// Sort direction of a feed query.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SortDirection {
    Ascending,
    Descending,
}

/// Ordering clause of a feed query.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OrderBy {
    pub field: String,
    pub direction: SortDirection,
}

/// Equality constraint restricting a feed to one owner.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OwnerFilter {
    /// Remote field holding the owner id (e.g. `userId`)
    pub field: String,
    pub owner_id: String,
}

/// Standing query a feed subscribes to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FeedQuery {
    pub collection: String,
    pub owner: Option<OwnerFilter>,
    pub order_by: Option<OrderBy>,
}

impl FeedQuery {
    pub fn collection(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            owner: None,
            order_by: None,
        }
    }

    pub fn with_owner(mut self, field: impl Into<String>, owner_id: impl Into<String>) -> Self {
        self.owner = Some(OwnerFilter {
            field: field.into(),
            owner_id: owner_id.into(),
        });
        self
    }

    pub fn newest_first(mut self, field: impl Into<String>) -> Self {
        self.order_by = Some(OrderBy {
            field: field.into(),
            direction: SortDirection::Descending,
        });
        self
    }
}

/// What a document store can express in a single remote query.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct QueryCapabilities {
    /// Whether an owner equality filter can be combined with an ordering
    /// clause. Stores that need a composite index for this report `false`.
    pub owner_filter_with_order: bool,
}

impl Default for QueryCapabilities {
    fn default() -> Self {
        Self {
            owner_filter_with_order: true,
        }
    }
}

/// One delivery of a subscription: the complete result set, or the error
/// that ended the subscription.
pub type SnapshotResult = Result<Vec<RawRecord>, ApiError>;

/// Stream of complete snapshots. Dropping it unsubscribes.
pub type SnapshotStream = Pin<Box<dyn Stream<Item = SnapshotResult> + Send>>;

/// Stream of identity reports (`None` when signed out). Dropping it unsubscribes.
pub type IdentityStream = Pin<Box<dyn Stream<Item = Option<Identity>> + Send>>;

/// Upload progress reported on the side channel of `BlobStore::put`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct UploadProgress {
    pub bytes_transferred: u64,
    pub total_bytes: u64,
}

impl UploadProgress {
    pub fn fraction(&self) -> f64 {
        if self.total_bytes == 0 {
            1.0
        } else {
            self.bytes_transferred as f64 / self.total_bytes as f64
        }
    }
}

/// Side channel for upload progress. Reporting never affects the outcome.
pub type ProgressSender = mpsc::UnboundedSender<UploadProgress>;

/// Authentication backend.
///
/// Pushes the current identity (or `None`) on every change, including once
/// immediately upon subscription.
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
pub trait CredentialProvider: Send + Sync {
    /// Subscribe to identity changes.
    ///
    /// The first item is the current state. The stream stays open until it is
    /// dropped or the provider shuts down.
    async fn subscribe(&self) -> IdentityStream;

    async fn sign_in(&self, credentials: Credentials) -> Result<(), ApiError>;

    async fn sign_up(&self, credentials: Credentials, display_name: &str)
        -> Result<(), ApiError>;

    /// Ends the session. On success the next pushed report is `None`.
    async fn sign_out(&self) -> Result<(), ApiError>;
}

/// Remote document collection with live queries.
///
/// # Delivery contract
///
/// A subscription delivers a complete, re-derived result set on every change
/// (never deltas), in the order the store produces them. Errors are delivered
/// as `Err` items, after which the stream ends.
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
pub trait DocumentStore: Send + Sync {
    fn capabilities(&self) -> QueryCapabilities {
        QueryCapabilities::default()
    }

    /// Start a live query. The initial snapshot is the first item.
    async fn subscribe(&self, query: FeedQuery) -> SnapshotStream;

    /// Insert a new document and return its store-assigned id.
    async fn insert(&self, collection: &str, record: WriteRecord) -> Result<String, ApiError>;

    async fn update(&self, collection: &str, id: &str, patch: WriteRecord)
        -> Result<(), ApiError>;

    async fn delete(&self, collection: &str, id: &str) -> Result<(), ApiError>;
}

/// Binary object storage with URL issuance.
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
pub trait BlobStore: Send + Sync {
    async fn put(
        &self,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
        progress: Option<ProgressSender>,
    ) -> Result<(), ApiError>;

    async fn resolve_url(&self, path: &str) -> Result<String, ApiError>;

    async fn delete_by_url(&self, url: &str) -> Result<(), ApiError>;
}
