use std::sync::Arc;

use pulse_api::{ApiError, BlobStore, DocumentStore, Identity};

use crate::Result;
use crate::config::PulseConfig;
use crate::core::feed::{FeedEngine, FeedSpec};

/// Builds feed engines from configuration and injected collaborators.
#[derive(Clone)]
pub struct FeedFactory {
    config: Arc<PulseConfig>,
    store: Arc<dyn DocumentStore>,
    blobs: Arc<dyn BlobStore>,
}

impl FeedFactory {
    pub fn new(
        config: Arc<PulseConfig>,
        store: Arc<dyn DocumentStore>,
        blobs: Arc<dyn BlobStore>,
    ) -> Self {
        Self {
            config,
            store,
            blobs,
        }
    }

    pub fn config(&self) -> &PulseConfig {
        &self.config
    }

    /// Build an unopened engine for feed `kind`, restricted to `owner` if given.
    pub fn build(&self, kind: &str, owner: Option<&Identity>) -> Result<FeedEngine> {
        let feed = self.config.feed(kind).ok_or_else(|| ApiError::NotFound {
            what: format!("feed kind '{}'", kind),
        })?;

        let spec = match owner {
            Some(identity) => FeedSpec::owned_by(feed, identity.user_id.as_str()),
            None => FeedSpec::all(feed),
        };

        Ok(FeedEngine::new(
            spec,
            Arc::clone(&self.store),
            Arc::clone(&self.blobs),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pulse_memory::{MemoryBlobStore, MemoryDocumentStore};

    fn factory() -> FeedFactory {
        FeedFactory::new(
            Arc::new(PulseConfig::default()),
            Arc::new(MemoryDocumentStore::new()),
            Arc::new(MemoryBlobStore::new()),
        )
    }

    #[test]
    fn test_build_all_and_owned_feeds() {
        let factory = factory();

        let all = factory.build("posts", None).unwrap();
        assert_eq!(all.spec().collection, "posts");
        assert_eq!(all.spec().fields.body, "caption");
        assert!(!all.spec().is_owner_filtered());

        let ada = Identity::new("u1", "Ada");
        let mine = factory.build("posts", Some(&ada)).unwrap();
        assert_eq!(mine.spec().owner_id.as_deref(), Some("u1"));
    }

    #[test]
    fn test_unknown_kind_is_not_found() {
        let err = factory().build("reels", None).err().unwrap();
        assert!(matches!(err, ApiError::NotFound { .. }));
    }
}
