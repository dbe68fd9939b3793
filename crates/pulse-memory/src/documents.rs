//! In-memory document store with live queries
//!
//! Every write broadcasts a change event for its collection; each live
//! subscription answers an event by re-running its query and delivering the
//! complete result set.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use pulse_api::{
    ApiError, DocumentStore, FeedQuery, FieldWrite, Fields, OwnerFilter, QueryCapabilities,
    RawRecord, SnapshotResult, SnapshotStream, SortDirection, Value, WriteRecord,
};
use tokio::sync::broadcast;
use tokio_stream::StreamExt;
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
enum StoreEvent {
    Changed(String),
    Broken { collection: String, message: String },
}

#[derive(Default)]
struct Collections {
    /// Documents per collection, in insertion order
    documents: HashMap<String, Vec<RawRecord>>,
    last_timestamp: Option<DateTime<Utc>>,
}

impl Collections {
    /// Server clock, strictly increasing across writes
    fn next_timestamp(&mut self) -> DateTime<Utc> {
        let now = Utc::now();
        let next = match self.last_timestamp {
            Some(last) if now <= last => last + Duration::milliseconds(1),
            _ => now,
        };
        self.last_timestamp = Some(next);
        next
    }

    fn query(&self, query: &FeedQuery, ordered: bool) -> Vec<RawRecord> {
        let mut records: Vec<RawRecord> = self
            .documents
            .get(&query.collection)
            .map(|docs| {
                docs.iter()
                    .filter(|record| matches_owner(record, query.owner.as_ref()))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        if let (true, Some(order)) = (ordered, &query.order_by) {
            records.sort_by(|a, b| {
                let (ka, kb) = (a.get_datetime(&order.field), b.get_datetime(&order.field));
                match order.direction {
                    SortDirection::Ascending => ka.cmp(&kb),
                    SortDirection::Descending => kb.cmp(&ka),
                }
            });
        }
        records
    }
}

fn matches_owner(record: &RawRecord, owner: Option<&OwnerFilter>) -> bool {
    owner.is_none_or(|filter| {
        record.get(&filter.field).and_then(Value::as_string) == Some(filter.owner_id.as_str())
    })
}

fn apply_writes(fields: &mut Fields, writes: WriteRecord, now: DateTime<Utc>) {
    for (name, write) in writes {
        match write {
            FieldWrite::Set(value) => {
                fields.insert(name, value);
            }
            FieldWrite::ServerTimestamp => {
                fields.insert(name, Value::from(now));
            }
            FieldWrite::Delete => {
                fields.remove(&name);
            }
        }
    }
}

struct Inner {
    state: Mutex<Collections>,
    subscribers: Mutex<HashMap<String, usize>>,
    events: broadcast::Sender<StoreEvent>,
    fail_writes: AtomicBool,
}

impl Inner {
    fn lock_state(&self) -> MutexGuard<'_, Collections> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_subscribers(&self) -> MutexGuard<'_, HashMap<String, usize>> {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn notify(&self, collection: &str) {
        // no receivers just means nobody is subscribed
        let _ = self.events.send(StoreEvent::Changed(collection.to_string()));
    }
}

/// Counts a live subscription until its stream is dropped
struct SubscriberGuard {
    inner: Arc<Inner>,
    collection: String,
}

impl SubscriberGuard {
    fn new(inner: Arc<Inner>, collection: &str) -> Self {
        *inner
            .lock_subscribers()
            .entry(collection.to_string())
            .or_insert(0) += 1;
        Self {
            inner,
            collection: collection.to_string(),
        }
    }
}

impl Drop for SubscriberGuard {
    fn drop(&mut self) {
        let mut subscribers = self.inner.lock_subscribers();
        if let Some(count) = subscribers.get_mut(&self.collection) {
            *count = count.saturating_sub(1);
        }
        debug!(collection = %self.collection, "memory subscription dropped");
    }
}

struct LiveQuery {
    guard: SubscriberGuard,
    rx: broadcast::Receiver<StoreEvent>,
    query: FeedQuery,
    ordered: bool,
    finished: bool,
}

impl LiveQuery {
    fn snapshot(&self) -> Vec<RawRecord> {
        self.guard.inner.lock_state().query(&self.query, self.ordered)
    }

    async fn next_delivery(&mut self) -> Option<SnapshotResult> {
        if self.finished {
            return None;
        }
        loop {
            match self.rx.recv().await {
                Ok(StoreEvent::Changed(collection)) if collection == self.query.collection => {
                    return Some(Ok(self.snapshot()));
                }
                Ok(StoreEvent::Broken {
                    collection,
                    message,
                }) if collection == self.query.collection => {
                    self.finished = true;
                    return Some(Err(ApiError::subscription(message)));
                }
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    // events only say "something changed", a fresh snapshot covers them all
                    debug!(skipped, "memory subscription lagged, re-querying");
                    return Some(Ok(self.snapshot()));
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

/// Document store kept in process memory.
#[derive(Clone)]
pub struct MemoryDocumentStore {
    inner: Arc<Inner>,
    capabilities: QueryCapabilities,
    ordered: bool,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(Collections::default()),
                subscribers: Mutex::new(HashMap::new()),
                events,
                fail_writes: AtomicBool::new(false),
            }),
            capabilities: QueryCapabilities::default(),
            ordered: true,
        }
    }

    /// Report different query capabilities. Queries the store claims it
    /// cannot run are answered with a subscription error.
    pub fn with_capabilities(mut self, capabilities: QueryCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Ignore ordering clauses and deliver documents in insertion order
    pub fn with_unordered_delivery(mut self) -> Self {
        self.ordered = false;
        self
    }

    /// Store a document as-is, bypassing server timestamps
    pub fn seed(&self, collection: &str, record: RawRecord) {
        {
            let mut state = self.inner.lock_state();
            let docs = state.documents.entry(collection.to_string()).or_default();
            docs.retain(|doc| doc.id != record.id);
            docs.push(record);
        }
        self.inner.notify(collection);
    }

    pub fn get(&self, collection: &str, id: &str) -> Option<RawRecord> {
        self.inner
            .lock_state()
            .documents
            .get(collection)?
            .iter()
            .find(|doc| doc.id == id)
            .cloned()
    }

    pub fn len(&self, collection: &str) -> usize {
        self.inner
            .lock_state()
            .documents
            .get(collection)
            .map_or(0, Vec::len)
    }

    /// Number of live subscriptions on `collection`
    pub fn subscriber_count(&self, collection: &str) -> usize {
        self.inner
            .lock_subscribers()
            .get(collection)
            .copied()
            .unwrap_or(0)
    }

    /// Make every write fail until switched off again
    pub fn fail_writes(&self, fail: bool) {
        self.inner.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Deliver an error to every live subscription on `collection`, ending it
    pub fn break_subscriptions(&self, collection: &str, message: impl Into<String>) {
        let _ = self.inner.events.send(StoreEvent::Broken {
            collection: collection.to_string(),
            message: message.into(),
        });
    }

    fn check_writable(&self) -> Result<(), ApiError> {
        if self.inner.fail_writes.load(Ordering::SeqCst) {
            return Err(ApiError::write("writes are disabled"));
        }
        Ok(())
    }
}

impl Default for MemoryDocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    fn capabilities(&self) -> QueryCapabilities {
        self.capabilities
    }

    async fn subscribe(&self, query: FeedQuery) -> SnapshotStream {
        if query.owner.is_some()
            && query.order_by.is_some()
            && !self.capabilities.owner_filter_with_order
        {
            warn!(collection = %query.collection, "owner filter with ordering is not supported");
            return Box::pin(tokio_stream::once(Err(ApiError::subscription(
                "owner filter combined with ordering needs an index",
            ))));
        }

        // subscribe before reading so no change falls between snapshot and events
        let rx = self.inner.events.subscribe();
        let guard = SubscriberGuard::new(Arc::clone(&self.inner), &query.collection);
        let initial = self.inner.lock_state().query(&query, self.ordered);

        let live = LiveQuery {
            guard,
            rx,
            query,
            ordered: self.ordered,
            finished: false,
        };
        let changes = futures::stream::unfold(live, |mut live| async move {
            live.next_delivery().await.map(|delivery| (delivery, live))
        });

        Box::pin(tokio_stream::once(Ok(initial)).chain(changes))
    }

    async fn insert(&self, collection: &str, record: WriteRecord) -> Result<String, ApiError> {
        self.check_writable()?;

        let id = Uuid::new_v4().simple().to_string();
        {
            let mut state = self.inner.lock_state();
            let now = state.next_timestamp();
            let mut doc = RawRecord::new(id.as_str());
            apply_writes(&mut doc.fields, record, now);
            state
                .documents
                .entry(collection.to_string())
                .or_default()
                .push(doc);
        }
        self.inner.notify(collection);
        Ok(id)
    }

    async fn update(&self, collection: &str, id: &str, patch: WriteRecord) -> Result<(), ApiError> {
        self.check_writable()?;

        {
            let mut state = self.inner.lock_state();
            let now = state.next_timestamp();
            let doc = state
                .documents
                .get_mut(collection)
                .and_then(|docs| docs.iter_mut().find(|doc| doc.id == id))
                .ok_or_else(|| ApiError::NotFound {
                    what: format!("{}/{}", collection, id),
                })?;
            apply_writes(&mut doc.fields, patch, now);
        }
        self.inner.notify(collection);
        Ok(())
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<(), ApiError> {
        self.check_writable()?;

        let removed = {
            let mut state = self.inner.lock_state();
            match state.documents.get_mut(collection) {
                Some(docs) => {
                    let before = docs.len();
                    docs.retain(|doc| doc.id != id);
                    docs.len() != before
                }
                None => false,
            }
        };
        // deleting a missing document is not an error
        if removed {
            self.inner.notify(collection);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(owner: &str, body: &str) -> WriteRecord {
        [
            ("userId".to_string(), FieldWrite::Set(Value::from(owner))),
            ("body".to_string(), FieldWrite::Set(Value::from(body))),
            ("createdAt".to_string(), FieldWrite::ServerTimestamp),
        ]
        .into_iter()
        .collect()
    }

    fn newest_first() -> FeedQuery {
        FeedQuery::collection("tweets").newest_first("createdAt")
    }

    #[test]
    fn test_server_timestamps_strictly_increase() {
        let mut state = Collections::default();
        let first = state.next_timestamp();
        let second = state.next_timestamp();
        let third = state.next_timestamp();
        assert!(first < second && second < third);
    }

    #[tokio::test]
    async fn test_initial_snapshot_then_changes() {
        let store = MemoryDocumentStore::new();
        store.insert("tweets", write("u1", "first")).await.unwrap();

        let mut stream = store.subscribe(newest_first()).await;
        let initial = stream.next().await.unwrap().unwrap();
        assert_eq!(initial.len(), 1);

        store.insert("tweets", write("u1", "second")).await.unwrap();
        let next = stream.next().await.unwrap().unwrap();
        assert_eq!(next.len(), 2);
        assert_eq!(next[0].get_string("body").as_deref(), Some("second"));
    }

    #[tokio::test]
    async fn test_owner_filter() {
        let store = MemoryDocumentStore::new();
        store.insert("tweets", write("u1", "mine")).await.unwrap();
        store.insert("tweets", write("u2", "theirs")).await.unwrap();

        let mut stream = store
            .subscribe(newest_first().with_owner("userId", "u1"))
            .await;
        let initial = stream.next().await.unwrap().unwrap();

        assert_eq!(initial.len(), 1);
        assert_eq!(initial[0].get_string("body").as_deref(), Some("mine"));
    }

    #[tokio::test]
    async fn test_unsupported_query_fails_subscription() {
        let store = MemoryDocumentStore::new().with_capabilities(QueryCapabilities {
            owner_filter_with_order: false,
        });

        let mut stream = store
            .subscribe(newest_first().with_owner("userId", "u1"))
            .await;

        assert!(matches!(
            stream.next().await,
            Some(Err(ApiError::SubscriptionFailure { .. }))
        ));
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_dropping_stream_unsubscribes() {
        let store = MemoryDocumentStore::new();
        let stream = store.subscribe(newest_first()).await;
        assert_eq!(store.subscriber_count("tweets"), 1);

        drop(stream);
        assert_eq!(store.subscriber_count("tweets"), 0);
    }

    #[tokio::test]
    async fn test_update_missing_document() {
        let store = MemoryDocumentStore::new();
        let err = store
            .update("tweets", "nope", WriteRecord::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_delete_field() {
        let store = MemoryDocumentStore::new();
        let id = store.insert("tweets", write("u1", "x")).await.unwrap();

        let patch: WriteRecord = [("body".to_string(), FieldWrite::Delete)]
            .into_iter()
            .collect();
        store.update("tweets", &id, patch).await.unwrap();

        assert_eq!(store.get("tweets", &id).unwrap().get("body"), None);
    }
}
