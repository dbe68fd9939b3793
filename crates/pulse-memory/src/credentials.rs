//! In-memory credential provider

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use pulse_api::{ApiError, CredentialProvider, Credentials, Identity, IdentityStream};
use tokio::sync::broadcast;
use tokio_stream::StreamExt;
use tracing::{debug, info};
use uuid::Uuid;

const MIN_PASSWORD_LEN: usize = 6;
const CHANGE_BUFFER: usize = 64;

/// Signed-in identity plus the channel every change goes out on.
/// Both are only touched under `current`'s lock.
struct IdentityFeed {
    current: Mutex<Option<Identity>>,
    changes: broadcast::Sender<Option<Identity>>,
}

impl IdentityFeed {
    fn lock(&self) -> MutexGuard<'_, Option<Identity>> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, identity: Option<Identity>) {
        let mut current = self.lock();
        *current = identity.clone();
        // no receivers is fine
        let _ = self.changes.send(identity);
    }
}

struct Account {
    password: String,
    identity: Identity,
}

/// Email/password accounts kept in memory.
///
/// The signed-in identity is pushed to every subscriber, current value first,
/// then every change in order. A subscriber that falls behind skips ahead to
/// the latest identity.
pub struct MemoryCredentialProvider {
    accounts: Mutex<HashMap<String, Account>>,
    identity: Arc<IdentityFeed>,
    fail_sign_out: AtomicBool,
}

impl MemoryCredentialProvider {
    pub fn new() -> Self {
        Self {
            accounts: Mutex::new(HashMap::new()),
            identity: Arc::new(IdentityFeed {
                current: Mutex::new(None),
                changes: broadcast::channel(CHANGE_BUFFER).0,
            }),
            fail_sign_out: AtomicBool::new(false),
        }
    }

    /// Register an account without signing in
    pub fn with_account(self, email: &str, password: &str, display_name: &str) -> Self {
        self.register(email, password, display_name);
        self
    }

    /// Replace the signed-in identity as if the backend changed it
    /// (token expiry, sign-in on another code path)
    pub fn set_identity(&self, identity: Option<Identity>) {
        self.identity.publish(identity);
    }

    pub fn current(&self) -> Option<Identity> {
        self.identity.lock().clone()
    }

    /// Number of live identity subscriptions
    pub fn subscriber_count(&self) -> usize {
        self.identity.changes.receiver_count()
    }

    /// Make `sign_out` fail until switched off again
    pub fn fail_sign_out(&self, fail: bool) {
        self.fail_sign_out.store(fail, Ordering::SeqCst);
    }

    fn register(&self, email: &str, password: &str, display_name: &str) -> Identity {
        let identity = Identity::new(Uuid::new_v4().simple().to_string(), display_name);
        self.lock_accounts().insert(
            email.to_string(),
            Account {
                password: password.to_string(),
                identity: identity.clone(),
            },
        );
        identity
    }

    fn lock_accounts(&self) -> MutexGuard<'_, HashMap<String, Account>> {
        self.accounts.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for MemoryCredentialProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CredentialProvider for MemoryCredentialProvider {
    async fn subscribe(&self) -> IdentityStream {
        let (rx, initial) = {
            let current = self.identity.lock();
            (self.identity.changes.subscribe(), current.clone())
        };

        let changes = futures::stream::unfold(
            (rx, Arc::clone(&self.identity)),
            |(mut rx, feed)| async move {
                match rx.recv().await {
                    Ok(identity) => Some((identity, (rx, feed))),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(skipped, "identity subscriber lagged, skipping to latest");
                        let latest = {
                            let current = feed.lock();
                            rx = rx.resubscribe();
                            current.clone()
                        };
                        Some((latest, (rx, feed)))
                    }
                    Err(broadcast::error::RecvError::Closed) => None,
                }
            },
        );

        Box::pin(tokio_stream::once(initial).chain(changes))
    }

    async fn sign_in(&self, credentials: Credentials) -> Result<(), ApiError> {
        let identity = match self.lock_accounts().get(&credentials.email) {
            Some(account) if account.password == credentials.password => account.identity.clone(),
            _ => return Err(ApiError::auth("invalid email or password")),
        };

        info!(user_id = %identity.user_id, "signed in");
        self.identity.publish(Some(identity));
        Ok(())
    }

    async fn sign_up(&self, credentials: Credentials, display_name: &str) -> Result<(), ApiError> {
        if credentials.password.chars().count() < MIN_PASSWORD_LEN {
            return Err(ApiError::auth(format!(
                "password needs at least {} characters",
                MIN_PASSWORD_LEN
            )));
        }
        if self.lock_accounts().contains_key(&credentials.email) {
            return Err(ApiError::auth("email already in use"));
        }

        let identity = self.register(&credentials.email, &credentials.password, display_name);
        info!(user_id = %identity.user_id, "account created");
        self.identity.publish(Some(identity));
        Ok(())
    }

    async fn sign_out(&self) -> Result<(), ApiError> {
        if self.fail_sign_out.load(Ordering::SeqCst) {
            return Err(ApiError::auth("sign-out rejected"));
        }
        self.identity.publish(None);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscribe_pushes_current_state_first() {
        let provider = MemoryCredentialProvider::new();
        let mut stream = provider.subscribe().await;
        assert_eq!(stream.next().await, Some(None));

        provider
            .sign_up(Credentials::new("ada@example.com", "secret1"), "Ada")
            .await
            .unwrap();
        let pushed = stream.next().await.unwrap().unwrap();
        assert_eq!(pushed.display_name, "Ada");
    }

    #[tokio::test]
    async fn test_sign_in_checks_password() {
        let provider =
            MemoryCredentialProvider::new().with_account("ada@example.com", "secret1", "Ada");

        let err = provider
            .sign_in(Credentials::new("ada@example.com", "wrong"))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::AuthFailure { .. }));
        assert_eq!(provider.current(), None);

        provider
            .sign_in(Credentials::new("ada@example.com", "secret1"))
            .await
            .unwrap();
        assert_eq!(provider.current().map(|i| i.display_name), Some("Ada".into()));
    }

    #[tokio::test]
    async fn test_sign_up_rejects_duplicates_and_weak_passwords() {
        let provider =
            MemoryCredentialProvider::new().with_account("ada@example.com", "secret1", "Ada");

        assert!(provider
            .sign_up(Credentials::new("ada@example.com", "secret2"), "Ada")
            .await
            .is_err());
        assert!(provider
            .sign_up(Credentials::new("bob@example.com", "abc"), "Bob")
            .await
            .is_err());
        assert_eq!(provider.current(), None);
    }

    #[tokio::test]
    async fn test_failing_sign_out_keeps_identity() {
        let provider = MemoryCredentialProvider::new();
        provider.set_identity(Some(Identity::new("u1", "Ada")));
        provider.fail_sign_out(true);

        assert!(provider.sign_out().await.is_err());
        assert!(provider.current().is_some());

        provider.fail_sign_out(false);
        provider.sign_out().await.unwrap();
        assert_eq!(provider.current(), None);
    }

    #[tokio::test]
    async fn test_subscribe_delivers_every_change() {
        let provider =
            MemoryCredentialProvider::new().with_account("ada@example.com", "secret1", "Ada");
        provider
            .sign_in(Credentials::new("ada@example.com", "secret1"))
            .await
            .unwrap();
        let mut stream = provider.subscribe().await;
        assert!(stream.next().await.unwrap().is_some());

        provider.sign_out().await.unwrap();
        provider
            .sign_in(Credentials::new("ada@example.com", "secret1"))
            .await
            .unwrap();

        assert_eq!(stream.next().await, Some(None));
        let back = stream.next().await.unwrap().unwrap();
        assert_eq!(back.display_name, "Ada");
    }

    #[tokio::test]
    async fn test_dropping_stream_unsubscribes() {
        let provider = MemoryCredentialProvider::new();
        let stream = provider.subscribe().await;
        assert_eq!(provider.subscriber_count(), 1);

        drop(stream);
        assert_eq!(provider.subscriber_count(), 0);
    }
}
