//! In-memory collaborators
//!
//! Stand-ins for the managed backend with the same delivery contracts:
//! complete snapshots on every change, identity pushed on subscription,
//! server-assigned timestamps. Each one can be told to fail, for exercising
//! the error paths of the core.

mod blobs;
mod credentials;
mod documents;

pub use blobs::{MemoryBlobStore, URL_SCHEME};
pub use credentials::MemoryCredentialProvider;
pub use documents::MemoryDocumentStore;
