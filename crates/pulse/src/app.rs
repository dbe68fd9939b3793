//! Application wiring
//!
//! Collaborators are constructed by the host and injected here; nothing in
//! the core reaches for a global client. `PulseApp::start` is the "app
//! start", `PulseApp::shutdown` the "app shutdown".

use std::sync::Arc;

use pulse_api::{BlobStore, CredentialProvider, DocumentStore};
use tracing::info;

use crate::Result;
use crate::config::PulseConfig;
use crate::core::FeedFactory;
use crate::navigation::Router;
use crate::session::SessionMachine;

/// Handles to the managed backend
#[derive(Clone)]
pub struct Backend {
    pub credentials: Arc<dyn CredentialProvider>,
    pub store: Arc<dyn DocumentStore>,
    pub blobs: Arc<dyn BlobStore>,
}

pub struct PulseApp {
    session: Arc<SessionMachine>,
    router: Arc<Router>,
}

impl PulseApp {
    /// Start the session machine and the router following it
    pub async fn start(config: PulseConfig, backend: Backend) -> Result<Self> {
        let session = Arc::new(SessionMachine::new(backend.credentials));
        let factory = FeedFactory::new(Arc::new(config), backend.store, backend.blobs);
        let router = Router::new(Arc::clone(&session), factory);

        router.start();
        session.start().await?;

        info!("pulse app started");
        Ok(Self { session, router })
    }

    pub fn session(&self) -> &Arc<SessionMachine> {
        &self.session
    }

    pub fn router(&self) -> &Arc<Router> {
        &self.router
    }

    /// Stop following the session and close every mounted feed
    pub fn shutdown(&self) {
        self.session.stop();
        self.router.stop();
        self.router.unmount_all();
        info!("pulse app stopped");
    }
}
