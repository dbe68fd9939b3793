//! In-memory binary store

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use pulse_api::{ApiError, BlobStore, ProgressSender, UploadProgress};
use tracing::debug;

/// Prefix of every URL this store issues
pub const URL_SCHEME: &str = "memory://";

/// Size of the chunks upload progress is reported in
const CHUNK_SIZE: usize = 16 * 1024;

struct Blob {
    bytes: Vec<u8>,
    content_type: String,
}

pub struct MemoryBlobStore {
    blobs: Mutex<HashMap<String, Blob>>,
    fail_uploads: AtomicBool,
    fail_deletes: AtomicBool,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self {
            blobs: Mutex::new(HashMap::new()),
            fail_uploads: AtomicBool::new(false),
            fail_deletes: AtomicBool::new(false),
        }
    }

    pub fn contains(&self, path: &str) -> bool {
        self.lock_blobs().contains_key(path)
    }

    pub fn content_type(&self, path: &str) -> Option<String> {
        self.lock_blobs()
            .get(path)
            .map(|blob| blob.content_type.clone())
    }

    pub fn size(&self, path: &str) -> Option<usize> {
        self.lock_blobs().get(path).map(|blob| blob.bytes.len())
    }

    pub fn fail_uploads(&self, fail: bool) {
        self.fail_uploads.store(fail, Ordering::SeqCst);
    }

    pub fn fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }

    fn lock_blobs(&self) -> MutexGuard<'_, HashMap<String, Blob>> {
        self.blobs.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for MemoryBlobStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(
        &self,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
        progress: Option<ProgressSender>,
    ) -> Result<(), ApiError> {
        if self.fail_uploads.load(Ordering::SeqCst) {
            return Err(ApiError::asset(format!("upload of '{}' rejected", path)));
        }

        let total_bytes = bytes.len() as u64;
        if let Some(progress) = &progress {
            let mut transferred = 0u64;
            for chunk in bytes.chunks(CHUNK_SIZE) {
                transferred += chunk.len() as u64;
                // a dropped receiver only means nobody is watching
                let _ = progress.send(UploadProgress {
                    bytes_transferred: transferred,
                    total_bytes,
                });
            }
            if bytes.is_empty() {
                let _ = progress.send(UploadProgress {
                    bytes_transferred: 0,
                    total_bytes: 0,
                });
            }
        }

        self.lock_blobs().insert(
            path.to_string(),
            Blob {
                bytes,
                content_type: content_type.to_string(),
            },
        );
        debug!(%path, total_bytes, "blob stored");
        Ok(())
    }

    async fn resolve_url(&self, path: &str) -> Result<String, ApiError> {
        if !self.contains(path) {
            return Err(ApiError::NotFound {
                what: format!("blob '{}'", path),
            });
        }
        Ok(format!("{}{}", URL_SCHEME, path))
    }

    async fn delete_by_url(&self, url: &str) -> Result<(), ApiError> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(ApiError::asset(format!("delete of '{}' rejected", url)));
        }

        let path = url
            .strip_prefix(URL_SCHEME)
            .ok_or_else(|| ApiError::asset(format!("'{}' is not a blob url", url)))?;
        match self.lock_blobs().remove(path) {
            Some(_) => Ok(()),
            None => Err(ApiError::NotFound {
                what: format!("blob '{}'", path),
            }),
        }
    }
}
