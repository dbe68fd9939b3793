//! Feed Synchronization Engine
//!
//! A `FeedEngine` mirrors one live query (collection + optional owner) into a
//! locally materialized list:
//! - Reads come from the mirror, which is replaced wholesale on every
//!   snapshot the store delivers (no delta patching, so no dedup logic)
//! - Writes go straight to the store; their effect shows up only through the
//!   next delivery, so the mirror always reflects confirmed server state
//!
//! Architecture:
//! - UI calls create/update/remove → store → subscription delivers snapshot → mirror replaced

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use pulse_api::{
    ApiError, BlobStore, ContentDraft, ContentEntity, ContentPatch, DocumentStore, FeedQuery,
    FieldWrite, Identity, MediaAttachment, ProgressSender, QueryCapabilities, RawRecord,
    SnapshotStream, Value, WriteRecord,
};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_stream::StreamExt;
use tracing::{debug, info, warn};

use crate::Result;
use crate::config::{FeedConfig, FieldMap};
use crate::core::preview::preview;
use crate::core::projection::{FieldProjection, Projection};

/// Parameters of one feed: which collection, whose entries, which fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedSpec {
    pub collection: String,
    /// Owner filter (`ownerId` equality); `None` for "all users" feeds
    pub owner_id: Option<String>,
    pub fields: FieldMap,
    pub max_body_len: usize,
    pub preview_len: usize,
}

impl FeedSpec {
    /// Feed of every user's entries
    pub fn all(config: &FeedConfig) -> Self {
        Self {
            collection: config.collection.clone(),
            owner_id: None,
            fields: config.fields.clone(),
            max_body_len: config.max_body_len,
            preview_len: config.preview_len,
        }
    }

    /// Feed restricted to one owner's entries
    pub fn owned_by(config: &FeedConfig, owner_id: impl Into<String>) -> Self {
        Self {
            owner_id: Some(owner_id.into()),
            ..Self::all(config)
        }
    }

    pub fn is_owner_filtered(&self) -> bool {
        self.owner_id.is_some()
    }

    /// Build the remote query for this feed.
    ///
    /// Returns the owner id to filter on locally when the store cannot
    /// combine the owner filter with ordering in one query.
    fn query(&self, capabilities: QueryCapabilities) -> (FeedQuery, Option<String>) {
        let query =
            FeedQuery::collection(self.collection.clone()).newest_first(&self.fields.created_at);

        match &self.owner_id {
            Some(owner) if capabilities.owner_filter_with_order => {
                (query.with_owner(&self.fields.owner_id, owner), None)
            }
            Some(owner) => {
                debug!(
                    collection = %self.collection,
                    "store cannot filter by owner with ordering, filtering locally"
                );
                (query, Some(owner.clone()))
            }
            None => (query, None),
        }
    }

    /// Binary store path of an entry's asset
    pub fn asset_path(&self, owner_id: &str, id: &str) -> String {
        format!("{}/{}/{}", self.collection, owner_id, id)
    }
}

/// Lifecycle of a feed's subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedStatus {
    /// Never opened
    Idle,
    Open,
    /// The subscription reported an error; the list was emptied
    Failed,
    /// The store closed the subscription
    Ended,
    Closed,
}

/// Published state of a feed
#[derive(Debug, Clone)]
pub struct FeedSnapshot {
    /// Sorted by `created_at` descending, unique by id
    pub entities: Arc<Vec<ContentEntity>>,
    /// Incremented whenever `entities` is replaced
    pub revision: u64,
    pub status: FeedStatus,
    pub error: Option<ApiError>,
    /// Number of the subscription that produced this state
    pub subscription: u64,
}

impl Default for FeedSnapshot {
    fn default() -> Self {
        Self {
            entities: Arc::new(Vec::new()),
            revision: 0,
            status: FeedStatus::Idle,
            error: None,
            subscription: 0,
        }
    }
}

/// Result of `FeedEngine::create`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Created {
    pub id: String,
    /// Set when the record was written but its media upload failed
    pub asset_error: Option<ApiError>,
}

/// Project, filter, de-duplicate and sort one delivery.
///
/// Sorting is stable, so entries with equal `created_at` keep the order in
/// which the store delivered them.
pub(crate) fn materialize(
    records: &[RawRecord],
    projection: &dyn Projection,
    owner: Option<&str>,
    now: DateTime<Utc>,
) -> Vec<ContentEntity> {
    // snapshots are keyed by id; keep the first occurrence if a store repeats one
    let mut seen = HashSet::new();
    let mut entities: Vec<ContentEntity> = records
        .iter()
        .map(|record| projection.project(record, now))
        .filter(|entity| owner.is_none_or(|owner| entity.owner_id == owner))
        .filter(|entity| seen.insert(entity.id.clone()))
        .collect();

    entities.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    entities
}

/// Local mirror of the remote result set.
///
/// Every mutation runs inside the watch channel's lock and is tagged with the
/// subscription it belongs to, so once `detach()` returns no delivery from an
/// earlier subscription can touch the list.
pub(crate) struct FeedMirror {
    tx: watch::Sender<FeedSnapshot>,
}

impl FeedMirror {
    pub(crate) fn new() -> Self {
        Self {
            tx: watch::channel(FeedSnapshot::default()).0,
        }
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<FeedSnapshot> {
        self.tx.subscribe()
    }

    pub(crate) fn snapshot(&self) -> FeedSnapshot {
        self.tx.borrow().clone()
    }

    /// Start a new subscription. Returns `None` if one is already open.
    pub(crate) fn attach(&self) -> Option<u64> {
        let mut attached = None;
        self.tx.send_if_modified(|snap| {
            if snap.status == FeedStatus::Open {
                return false;
            }
            snap.subscription += 1;
            snap.status = FeedStatus::Open;
            snap.error = None;
            attached = Some(snap.subscription);
            true
        });
        attached
    }

    pub(crate) fn is_current(&self, subscription: u64) -> bool {
        let snap = self.tx.borrow();
        snap.status == FeedStatus::Open && snap.subscription == subscription
    }

    /// Replace the list. Returns `false` if the subscription is no longer live.
    pub(crate) fn replace(&self, subscription: u64, entities: Vec<ContentEntity>) -> bool {
        self.tx.send_if_modified(|snap| {
            if snap.status != FeedStatus::Open || snap.subscription != subscription {
                return false;
            }
            snap.entities = Arc::new(entities);
            snap.revision += 1;
            true
        })
    }

    pub(crate) fn fail(&self, subscription: u64, error: ApiError) -> bool {
        self.tx.send_if_modified(|snap| {
            if snap.status != FeedStatus::Open || snap.subscription != subscription {
                return false;
            }
            snap.entities = Arc::new(Vec::new());
            snap.revision += 1;
            snap.status = FeedStatus::Failed;
            snap.error = Some(error);
            true
        })
    }

    pub(crate) fn end(&self, subscription: u64) -> bool {
        self.tx.send_if_modified(|snap| {
            if snap.status != FeedStatus::Open || snap.subscription != subscription {
                return false;
            }
            snap.status = FeedStatus::Ended;
            true
        })
    }

    /// Stop accepting deliveries. Idempotent.
    pub(crate) fn detach(&self) -> bool {
        self.tx.send_if_modified(|snap| match snap.status {
            FeedStatus::Idle | FeedStatus::Closed => false,
            FeedStatus::Open | FeedStatus::Failed | FeedStatus::Ended => {
                snap.status = FeedStatus::Closed;
                true
            }
        })
    }
}

/// Consume a subscription until it ends, fails, or is detached.
async fn ingest(
    mirror: Arc<FeedMirror>,
    projection: Arc<dyn Projection>,
    mut stream: SnapshotStream,
    subscription: u64,
    local_owner: Option<String>,
    collection: String,
) {
    while let Some(delivery) = stream.next().await {
        match delivery {
            Ok(records) => {
                let entities =
                    materialize(&records, projection.as_ref(), local_owner.as_deref(), Utc::now());
                let count = entities.len();
                if !mirror.replace(subscription, entities) {
                    debug!(%collection, subscription, "dropping delivery for detached subscription");
                    return;
                }
                debug!(%collection, subscription, count, "feed snapshot applied");
            }
            Err(error) => {
                warn!(%collection, subscription, %error, "feed subscription failed");
                mirror.fail(subscription, error);
                return;
            }
        }
    }

    if mirror.end(subscription) {
        info!(%collection, subscription, "feed subscription ended by store");
    }
}

fn as_write_failure(error: ApiError) -> ApiError {
    match error {
        ApiError::WriteFailure { .. } => error,
        other => ApiError::write(other.to_string()),
    }
}

fn as_asset_failure(error: ApiError) -> ApiError {
    match error {
        ApiError::AssetFailure { .. } => error,
        other => ApiError::asset(other.to_string()),
    }
}

/// Live, sorted mirror of one remote feed plus write-through operations.
pub struct FeedEngine {
    spec: FeedSpec,
    store: Arc<dyn DocumentStore>,
    blobs: Arc<dyn BlobStore>,
    projection: Arc<dyn Projection>,
    mirror: Arc<FeedMirror>,
    ingest_task: Mutex<Option<JoinHandle<()>>>,
}

impl FeedEngine {
    pub fn new(spec: FeedSpec, store: Arc<dyn DocumentStore>, blobs: Arc<dyn BlobStore>) -> Self {
        let projection = Arc::new(FieldProjection::new(spec.fields.clone()));
        Self {
            spec,
            store,
            blobs,
            projection,
            mirror: Arc::new(FeedMirror::new()),
            ingest_task: Mutex::new(None),
        }
    }

    /// Replace the field-map projection with a custom one
    pub fn with_projection(mut self, projection: Arc<dyn Projection>) -> Self {
        self.projection = projection;
        self
    }

    pub fn spec(&self) -> &FeedSpec {
        &self.spec
    }

    pub fn snapshot(&self) -> FeedSnapshot {
        self.mirror.snapshot()
    }

    pub fn entities(&self) -> Arc<Vec<ContentEntity>> {
        self.mirror.snapshot().entities
    }

    pub fn status(&self) -> FeedStatus {
        self.mirror.snapshot().status
    }

    pub fn revision(&self) -> u64 {
        self.mirror.snapshot().revision
    }

    /// Receiver notified on every list or status change
    pub fn watch(&self) -> watch::Receiver<FeedSnapshot> {
        self.mirror.subscribe()
    }

    /// Condensed rendering: entries with bodies truncated to `preview_len`.
    ///
    /// The mirrored entities are not modified.
    pub fn previews(&self) -> Vec<ContentEntity> {
        self.entities()
            .iter()
            .map(|entity| ContentEntity {
                body: preview(&entity.body, self.spec.preview_len).into_owned(),
                ..entity.clone()
            })
            .collect()
    }

    /// Subscribe to the remote query.
    ///
    /// Rejected while already open; allowed again after the feed failed,
    /// ended or was closed.
    #[tracing::instrument(name = "feed.open", skip(self), fields(collection = %self.spec.collection))]
    pub async fn open(&self) -> Result<()> {
        let subscription = self.mirror.attach().ok_or_else(|| {
            ApiError::invalid(format!("feed '{}' is already open", self.spec.collection))
        })?;

        let (query, local_owner) = self.spec.query(self.store.capabilities());
        let stream = self.store.subscribe(query).await;

        if !self.mirror.is_current(subscription) {
            debug!(subscription, "feed closed while subscribing");
            return Ok(());
        }

        let task = tokio::spawn(ingest(
            Arc::clone(&self.mirror),
            Arc::clone(&self.projection),
            stream,
            subscription,
            local_owner,
            self.spec.collection.clone(),
        ));

        let previous = self
            .ingest_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(task);
        if let Some(previous) = previous {
            previous.abort();
        }

        info!(subscription, owner = ?self.spec.owner_id, "feed opened");
        Ok(())
    }

    /// Cancel the subscription. No delivery changes the list after this
    /// returns. Safe to call repeatedly or before `open`.
    pub fn close(&self) {
        let detached = self.mirror.detach();

        let task = self
            .ingest_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            task.abort();
        }

        if detached {
            info!(collection = %self.spec.collection, "feed closed");
        }
    }

    pub async fn create(&self, author: &Identity, draft: ContentDraft) -> Result<Created> {
        self.create_with_progress(author, draft, None).await
    }

    /// Write a new entry, then upload its media (if any).
    ///
    /// The returned id is assigned by the store; the entry becomes visible
    /// with the next delivery. A failed upload leaves the record in place
    /// without a media URL and is reported in `Created::asset_error`.
    #[tracing::instrument(
        name = "feed.create",
        skip(self, author, draft, progress),
        fields(collection = %self.spec.collection, owner = %author.user_id)
    )]
    pub async fn create_with_progress(
        &self,
        author: &Identity,
        draft: ContentDraft,
        progress: Option<ProgressSender>,
    ) -> Result<Created> {
        self.validate_body(&draft.body)?;

        let fields = &self.spec.fields;
        let record: WriteRecord = [
            (
                fields.owner_id.clone(),
                FieldWrite::Set(Value::from(author.user_id.as_str())),
            ),
            (
                fields.owner_display_name.clone(),
                FieldWrite::Set(Value::from(author.display_name.as_str())),
            ),
            (fields.body.clone(), FieldWrite::Set(Value::from(draft.body))),
            (fields.created_at.clone(), FieldWrite::ServerTimestamp),
            (fields.modified_at.clone(), FieldWrite::ServerTimestamp),
        ]
        .into_iter()
        .collect();

        let id = self
            .store
            .insert(&self.spec.collection, record)
            .await
            .map_err(as_write_failure)?;
        info!(%id, "feed entry created");

        let asset_error = match draft.media {
            Some(media) => match self
                .attach_media(&id, &author.user_id, media, progress)
                .await
            {
                Ok(_) => None,
                Err(error) => {
                    warn!(%id, %error, "media upload failed, entry kept without media");
                    Some(error)
                }
            },
            None => None,
        };

        Ok(Created { id, asset_error })
    }

    /// Upload an asset for an existing entry and store its URL on the entry.
    ///
    /// The asset is keyed by `{collection}/{owner_id}/{id}`. Returns the
    /// resolved URL.
    #[tracing::instrument(
        name = "feed.attach_media",
        skip(self, media, progress),
        fields(collection = %self.spec.collection)
    )]
    pub async fn attach_media(
        &self,
        id: &str,
        owner_id: &str,
        media: MediaAttachment,
        progress: Option<ProgressSender>,
    ) -> Result<String> {
        let path = self.spec.asset_path(owner_id, id);

        self.blobs
            .put(&path, media.bytes, &media.content_type, progress)
            .await
            .map_err(as_asset_failure)?;
        let url = self
            .blobs
            .resolve_url(&path)
            .await
            .map_err(as_asset_failure)?;

        let fields = &self.spec.fields;
        let patch: WriteRecord = [
            (
                fields.media_url.clone(),
                FieldWrite::Set(Value::from(url.as_str())),
            ),
            (fields.modified_at.clone(), FieldWrite::ServerTimestamp),
        ]
        .into_iter()
        .collect();
        if let Err(error) = self.store.update(&self.spec.collection, id, patch).await {
            // nothing references the upload, don't leave it behind
            if let Err(cleanup) = self.blobs.delete_by_url(&url).await {
                warn!(%url, error = %cleanup, "failed to delete unlinked media");
            }
            return Err(as_asset_failure(error));
        }

        debug!(%path, %url, "media attached");
        Ok(url)
    }

    /// Partial update of `body` and/or `media_url`.
    ///
    /// Ownership must be checked by the caller.
    #[tracing::instrument(name = "feed.update", skip(self, patch), fields(collection = %self.spec.collection))]
    pub async fn update(&self, id: &str, patch: ContentPatch) -> Result<()> {
        if patch.is_empty() {
            debug!("empty patch, nothing to write");
            return Ok(());
        }

        let fields = &self.spec.fields;
        let mut record = WriteRecord::new();
        if let Some(body) = patch.body {
            self.validate_body(&body)?;
            record.insert(fields.body.clone(), FieldWrite::Set(Value::from(body)));
        }
        if let Some(media_url) = patch.media_url {
            let write = match media_url {
                Some(url) => FieldWrite::Set(Value::from(url)),
                None => FieldWrite::Delete,
            };
            record.insert(fields.media_url.clone(), write);
        }
        record.insert(fields.modified_at.clone(), FieldWrite::ServerTimestamp);

        self.store
            .update(&self.spec.collection, id, record)
            .await
            .map_err(as_write_failure)
    }

    /// Delete an entry and, best effort, its asset.
    ///
    /// The asset URL is taken from the mirrored entry. When the entry is not
    /// mirrored (feed closed, or not delivered yet) an owner-filtered feed
    /// falls back to the asset path of its owner; other feeds only clean up
    /// media they have seen.
    pub async fn remove(&self, id: &str) -> Result<()> {
        let mirrored = self
            .entities()
            .iter()
            .find(|entity| entity.id == id)
            .map(|entity| entity.media_url.clone());

        let media_url = match (mirrored, &self.spec.owner_id) {
            (Some(url), _) => url,
            (None, Some(owner)) => self
                .blobs
                .resolve_url(&self.spec.asset_path(owner, id))
                .await
                .ok(),
            (None, None) => None,
        };

        self.remove_with_media(id, media_url.as_deref()).await
    }

    /// Delete an entry, then its asset at `media_url`.
    ///
    /// An asset deletion failure is logged and does not fail the call: the
    /// record is already gone from the collection.
    #[tracing::instrument(name = "feed.remove", skip(self), fields(collection = %self.spec.collection))]
    pub async fn remove_with_media(&self, id: &str, media_url: Option<&str>) -> Result<()> {
        self.store
            .delete(&self.spec.collection, id)
            .await
            .map_err(as_write_failure)?;
        info!("feed entry removed");

        if let Some(url) = media_url {
            if let Err(error) = self.blobs.delete_by_url(url).await {
                warn!(%url, %error, "failed to delete media of removed entry");
            }
        }

        Ok(())
    }

    fn validate_body(&self, body: &str) -> Result<()> {
        let len = body.chars().count();
        if len > self.spec.max_body_len {
            return Err(ApiError::invalid(format!(
                "body has {} characters, limit is {}",
                len, self.spec.max_body_len
            )));
        }
        Ok(())
    }
}

impl Drop for FeedEngine {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn record(id: &str, created: Option<i64>) -> RawRecord {
        let record = RawRecord::new(id)
            .with_field("userId", "u1")
            .with_field("body", format!("body of {}", id));
        match created {
            Some(secs) => record.with_field("createdAt", at(secs)),
            None => record,
        }
    }

    fn projection() -> FieldProjection {
        FieldProjection::new(FieldMap::default())
    }

    fn ids(entities: &[ContentEntity]) -> Vec<&str> {
        entities.iter().map(|e| e.id.as_str()).collect()
    }

    #[test]
    fn test_unsorted_delivery_is_sorted_newest_first() {
        let records = vec![record("a", Some(1)), record("b", Some(2))];

        let entities = materialize(&records, &projection(), None, at(100));

        assert_eq!(ids(&entities), vec!["b", "a"]);
    }

    #[test]
    fn test_equal_timestamps_keep_arrival_order() {
        let records = vec![
            record("x", Some(5)),
            record("y", Some(5)),
            record("z", Some(9)),
        ];

        let entities = materialize(&records, &projection(), None, at(100));

        assert_eq!(ids(&entities), vec!["z", "x", "y"]);
    }

    #[test]
    fn test_pending_timestamps_sort_as_now() {
        let records = vec![record("old", Some(1)), record("fresh", None)];

        let entities = materialize(&records, &projection(), None, at(100));

        assert_eq!(ids(&entities), vec!["fresh", "old"]);
        assert!(entities[0].created_at_pending);
    }

    #[test]
    fn test_local_owner_filter() {
        let records = vec![
            record("mine", Some(1)),
            RawRecord::new("theirs")
                .with_field("userId", "u2")
                .with_field("createdAt", at(2)),
        ];

        let entities = materialize(&records, &projection(), Some("u1"), at(100));

        assert_eq!(ids(&entities), vec!["mine"]);
    }

    #[test]
    fn test_repeated_ids_are_collapsed() {
        let records = vec![record("a", Some(1)), record("a", Some(3))];

        let entities = materialize(&records, &projection(), None, at(100));

        assert_eq!(entities.len(), 1);
        assert_eq!(entities[0].created_at, at(1));
    }

    #[test]
    fn test_detached_mirror_ignores_late_delivery() {
        let mirror = FeedMirror::new();
        let sub = mirror.attach().unwrap();
        assert!(mirror.replace(sub, vec![]));
        let revision = mirror.snapshot().revision;

        assert!(mirror.detach());
        let late = materialize(&[record("late", Some(1))], &projection(), None, at(1));

        assert!(!mirror.replace(sub, late));
        assert!(!mirror.fail(sub, ApiError::subscription("late")));
        assert_eq!(mirror.snapshot().revision, revision);
        assert_eq!(mirror.snapshot().status, FeedStatus::Closed);
        assert!(mirror.snapshot().entities.is_empty());
    }

    #[test]
    fn test_attach_rejects_second_open_and_allows_reopen() {
        let mirror = FeedMirror::new();
        let first = mirror.attach().unwrap();
        assert_eq!(mirror.attach(), None);

        mirror.detach();
        let second = mirror.attach().unwrap();
        assert!(second > first);

        // deliveries of the old subscription stay dead after reopening
        assert!(!mirror.replace(first, vec![]));
        assert!(mirror.replace(second, vec![]));
    }

    #[test]
    fn test_failure_empties_list_and_records_error() {
        let mirror = FeedMirror::new();
        let sub = mirror.attach().unwrap();
        let entities = materialize(&[record("a", Some(1))], &projection(), None, at(1));
        mirror.replace(sub, entities);

        assert!(mirror.fail(sub, ApiError::subscription("permission denied")));

        let snap = mirror.snapshot();
        assert!(snap.entities.is_empty());
        assert_eq!(snap.status, FeedStatus::Failed);
        assert_eq!(snap.error, Some(ApiError::subscription("permission denied")));
        assert_eq!(snap.revision, 2);
    }

    #[test]
    fn test_detach_is_idempotent() {
        let mirror = FeedMirror::new();
        assert!(!mirror.detach());
        mirror.attach();
        assert!(mirror.detach());
        assert!(!mirror.detach());
    }

    #[test]
    fn test_query_uses_remote_owner_filter_when_supported() {
        let spec = FeedSpec::owned_by(&FeedConfig::new("tweets", "tweet"), "u1");

        let (query, local) = spec.query(QueryCapabilities {
            owner_filter_with_order: true,
        });
        assert_eq!(query.owner.map(|o| o.owner_id), Some("u1".to_string()));
        assert_eq!(local, None);

        let (query, local) = spec.query(QueryCapabilities {
            owner_filter_with_order: false,
        });
        assert_eq!(query.owner, None);
        assert_eq!(query.order_by.map(|o| o.field), Some("createdAt".to_string()));
        assert_eq!(local.as_deref(), Some("u1"));
    }

    #[test]
    fn test_asset_path() {
        let spec = FeedSpec::all(&FeedConfig::new("posts", "caption"));
        assert_eq!(spec.asset_path("u1", "p9"), "posts/u1/p9");
    }

    fn delivery_strategy() -> impl Strategy<Value = Vec<(u8, Option<i64>)>> {
        prop::collection::vec((0u8..8, prop::option::of(0i64..6)), 0..12)
    }

    proptest! {
        #[test]
        fn mirror_always_equals_sorted_projection_of_latest_delivery(
            deliveries in prop::collection::vec(delivery_strategy(), 1..8)
        ) {
            let mirror = FeedMirror::new();
            let sub = mirror.attach().unwrap();
            let now = at(3);

            for delivery in &deliveries {
                let records: Vec<RawRecord> = delivery
                    .iter()
                    .map(|(id, created)| record(&format!("e{}", id), *created))
                    .collect();
                prop_assert!(mirror.replace(sub, materialize(&records, &projection(), None, now)));

                let snap = mirror.snapshot();
                let entities = snap.entities.as_ref();

                // exactly the ids of the latest delivery, once each
                let mut first_seen: Vec<&str> = Vec::new();
                for r in &records {
                    if !first_seen.contains(&r.id.as_str()) {
                        first_seen.push(&r.id);
                    }
                }
                let mut got: Vec<&str> = ids(entities);
                got.sort();
                let mut want = first_seen.clone();
                want.sort();
                prop_assert_eq!(got, want);

                for pair in entities.windows(2) {
                    prop_assert!(pair[0].created_at >= pair[1].created_at);
                    if pair[0].created_at == pair[1].created_at {
                        let pos = |id: &str| first_seen.iter().position(|seen| *seen == id);
                        prop_assert!(pos(pair[0].id.as_str()) < pos(pair[1].id.as_str()));
                    }
                }
            }
        }
    }
}
