//! Session State Machine
//!
//! Tracks the authenticated identity reported by the credential provider.
//!
//! ```text
//! Initializing ──first report──▶ Authenticated(identity) ◀──▶ Anonymous
//! ```
//!
//! `Initializing` is left exactly once and never re-entered. After that the
//! machine follows every push from the provider; there is no polling.
//!
//! `watch()` only holds the latest status. Consumers that must react to every
//! transition (a sign-out immediately followed by a sign-in) read
//! `transitions()` instead.

use std::sync::{Arc, Mutex, PoisonError};

use pulse_api::{ApiError, CredentialProvider, Credentials, Identity, IdentityStream};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_stream::StreamExt;
use tracing::{debug, info};

use crate::Result;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionStatus {
    Initializing,
    Authenticated(Identity),
    Anonymous,
}

impl SessionStatus {
    pub fn identity(&self) -> Option<&Identity> {
        match self {
            SessionStatus::Authenticated(identity) => Some(identity),
            _ => None,
        }
    }

    /// Whether the first provider report has arrived
    pub fn is_settled(&self) -> bool {
        !matches!(self, SessionStatus::Initializing)
    }
}

impl From<Option<Identity>> for SessionStatus {
    fn from(report: Option<Identity>) -> Self {
        match report {
            Some(identity) => SessionStatus::Authenticated(identity),
            None => SessionStatus::Anonymous,
        }
    }
}

#[derive(Default)]
struct Listener {
    generation: u64,
    /// Generation of the running listener, if any
    active: Option<u64>,
    task: Option<JoinHandle<()>>,
}

/// Capacity of the transition channel; slower receivers see `Lagged`
const TRANSITION_BUFFER: usize = 64;

struct SessionShared {
    tx: watch::Sender<SessionStatus>,
    transitions: broadcast::Sender<SessionStatus>,
    listener: Mutex<Listener>,
}

impl SessionShared {
    fn new(listener: Listener) -> Self {
        Self {
            tx: watch::channel(SessionStatus::Initializing).0,
            transitions: broadcast::channel(TRANSITION_BUFFER).0,
            listener: Mutex::new(listener),
        }
    }
}

impl SessionShared {
    /// Apply one provider report. Returns `false` once the listener is stopped.
    ///
    /// Runs under the listener lock so `stop()` cannot interleave with it.
    fn apply(&self, generation: u64, report: Option<Identity>) -> bool {
        let listener = self.listener.lock().unwrap_or_else(PoisonError::into_inner);
        if listener.active != Some(generation) {
            return false;
        }

        let next = SessionStatus::from(report);
        self.tx.send_if_modified(|status| {
            if *status == next {
                return false;
            }
            info!(from = ?status, to = ?next, "session transition");
            // before watchers wake: whoever sees the new status has it queued
            // or subscribed after it
            let _ = self.transitions.send(next.clone());
            *status = next;
            true
        });
        true
    }
}

async fn listen(shared: Arc<SessionShared>, mut stream: IdentityStream, generation: u64) {
    while let Some(report) = stream.next().await {
        if !shared.apply(generation, report) {
            return;
        }
    }
    debug!(generation, "credential provider closed identity stream");
}

fn as_auth_failure(error: ApiError) -> ApiError {
    match error {
        ApiError::AuthFailure { .. } => error,
        other => ApiError::auth(other.to_string()),
    }
}

/// Single source of truth for the current session.
pub struct SessionMachine {
    provider: Arc<dyn CredentialProvider>,
    shared: Arc<SessionShared>,
}

impl SessionMachine {
    pub fn new(provider: Arc<dyn CredentialProvider>) -> Self {
        Self {
            provider,
            shared: Arc::new(SessionShared::new(Listener::default())),
        }
    }

    pub fn status(&self) -> SessionStatus {
        self.shared.tx.borrow().clone()
    }

    pub fn identity(&self) -> Option<Identity> {
        self.status().identity().cloned()
    }

    /// Receiver notified on every status change
    pub fn watch(&self) -> watch::Receiver<SessionStatus> {
        self.shared.tx.subscribe()
    }

    /// Every status change from now on, in order
    pub fn transitions(&self) -> broadcast::Receiver<SessionStatus> {
        self.shared.transitions.subscribe()
    }

    /// Subscribe to the provider's identity stream.
    ///
    /// Rejected if already started. May be called again after `stop()`.
    #[tracing::instrument(name = "session.start", skip(self))]
    pub async fn start(&self) -> Result<()> {
        let generation = {
            let mut listener = self.lock_listener();
            if listener.active.is_some() {
                return Err(ApiError::invalid("session machine is already started"));
            }
            listener.generation += 1;
            listener.active = Some(listener.generation);
            listener.generation
        };

        let stream = self.provider.subscribe().await;
        let task = tokio::spawn(listen(Arc::clone(&self.shared), stream, generation));

        let mut listener = self.lock_listener();
        if listener.active == Some(generation) {
            listener.task = Some(task);
            debug!(generation, "session listener started");
        } else {
            // stopped while subscribing
            task.abort();
        }
        Ok(())
    }

    /// Unsubscribe from the provider. Idempotent, safe before `start()`.
    ///
    /// No provider report is applied after this returns.
    pub fn stop(&self) {
        let task = {
            let mut listener = self.lock_listener();
            listener.active = None;
            listener.task.take()
        };
        if let Some(task) = task {
            task.abort();
            debug!("session listener stopped");
        }
    }

    #[tracing::instrument(name = "session.sign_in", skip(self, credentials), fields(email = %credentials.email))]
    pub async fn sign_in(&self, credentials: Credentials) -> Result<()> {
        self.provider
            .sign_in(credentials)
            .await
            .map_err(as_auth_failure)
    }

    #[tracing::instrument(name = "session.sign_up", skip(self, credentials), fields(email = %credentials.email))]
    pub async fn sign_up(&self, credentials: Credentials, display_name: &str) -> Result<()> {
        self.provider
            .sign_up(credentials, display_name)
            .await
            .map_err(as_auth_failure)
    }

    /// Ask the provider to end the session.
    ///
    /// The status changes only when the provider pushes the signed-out
    /// report; a rejection leaves it untouched.
    #[tracing::instrument(name = "session.sign_out", skip(self))]
    pub async fn sign_out(&self) -> Result<()> {
        self.provider.sign_out().await.map_err(as_auth_failure)
    }

    fn lock_listener(&self) -> std::sync::MutexGuard<'_, Listener> {
        self.shared
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for SessionMachine {
    fn drop(&mut self) {
        self.stop();
    }
}
