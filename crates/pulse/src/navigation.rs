//! Auth-gated navigation
//!
//! The `Router` derives which screen stack is mounted from the session and
//! owns the feeds mounted by screens. When the identity goes away (or is
//! replaced), every owner-filtered feed is closed before the new route is
//! published, so no feed keeps delivering for an identity that is gone.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use pulse_api::{ApiError, Identity};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::Result;
use crate::core::{FeedEngine, FeedFactory};
use crate::session::{SessionMachine, SessionStatus};

/// Screens of the unauthenticated flow
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthScreen {
    Intro,
    Login,
    Signup,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// Session not settled yet: neutral loading state, nothing identity-bound
    Loading,
    /// Main application shell
    Main(Identity),
    Unauthenticated(AuthScreen),
}

/// Which entries a mounted feed shows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedScope {
    All,
    /// Only the signed-in user's entries
    Mine,
}

struct MountedFeed {
    kind: String,
    scope: FeedScope,
    engine: Arc<FeedEngine>,
}

pub struct Router {
    session: Arc<SessionMachine>,
    factory: FeedFactory,
    route_tx: watch::Sender<Route>,
    feeds: Mutex<Vec<MountedFeed>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Router {
    pub fn new(session: Arc<SessionMachine>, factory: FeedFactory) -> Arc<Self> {
        let router = Arc::new(Self {
            session,
            factory,
            route_tx: watch::channel(Route::Loading).0,
            feeds: Mutex::new(Vec::new()),
            task: Mutex::new(None),
        });
        let status = router.session.status();
        router.on_session(&status);
        router
    }

    /// Follow session transitions until `stop()`.
    ///
    /// Every transition is applied in order, so a sign-out immediately
    /// followed by a sign-in still tears down the owner-filtered feeds.
    pub fn start(self: &Arc<Self>) {
        let mut transitions = self.session.transitions();
        self.on_session(&self.session.status());
        let router: Weak<Self> = Arc::downgrade(self);

        let task = tokio::spawn(async move {
            loop {
                let received = transitions.recv().await;
                let Some(router) = router.upgrade() else {
                    return;
                };
                match received {
                    Ok(status) => router.on_session(&status),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(skipped, "router lagged behind session transitions");
                        router.resync();
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        debug!("session machine dropped, router stops following");
                        return;
                    }
                }
            }
        });

        if let Some(previous) = self.lock_task().replace(task) {
            previous.abort();
        }
    }

    pub fn stop(&self) {
        if let Some(task) = self.lock_task().take() {
            task.abort();
        }
    }

    pub fn route(&self) -> Route {
        self.route_tx.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<Route> {
        self.route_tx.subscribe()
    }

    pub fn session(&self) -> &Arc<SessionMachine> {
        &self.session
    }

    /// Move between intro, login and signup screens
    pub fn show_auth_screen(&self, screen: AuthScreen) -> Result<()> {
        let mut moved = false;
        self.route_tx.send_if_modified(|route| match route {
            Route::Unauthenticated(current) => {
                moved = true;
                if *current == screen {
                    return false;
                }
                *current = screen;
                true
            }
            _ => false,
        });

        if moved {
            Ok(())
        } else {
            Err(ApiError::invalid(
                "auth screens are only reachable while signed out",
            ))
        }
    }

    /// Build, open and register a feed for a screen.
    ///
    /// `FeedScope::Mine` needs an authenticated session; the engine is bound
    /// to the identity current at mount time.
    #[tracing::instrument(name = "router.mount_feed", skip(self))]
    pub async fn mount_feed(&self, kind: &str, scope: FeedScope) -> Result<Arc<FeedEngine>> {
        let owner = match scope {
            FeedScope::All => None,
            FeedScope::Mine => match self.route() {
                Route::Main(identity) => Some(identity),
                _ => {
                    return Err(ApiError::invalid(format!(
                        "feed '{}' is owner-filtered and needs a signed-in user",
                        kind
                    )));
                }
            },
        };

        let engine = Arc::new(self.factory.build(kind, owner.as_ref())?);
        engine.open().await?;

        let mut feeds = self.lock_feeds();
        if let Some(owner) = &owner {
            // the session may have changed while the feed was opening
            if self.route() != Route::Main(owner.clone()) {
                engine.close();
                return Err(ApiError::invalid(format!(
                    "session changed while mounting feed '{}'",
                    kind
                )));
            }
        }
        feeds.push(MountedFeed {
            kind: kind.to_string(),
            scope,
            engine: Arc::clone(&engine),
        });

        info!(mounted = feeds.len(), "feed mounted");
        Ok(engine)
    }

    /// Close a feed and forget it (its screen unmounted)
    pub fn unmount_feed(&self, engine: &Arc<FeedEngine>) {
        engine.close();
        self.lock_feeds()
            .retain(|mounted| !Arc::ptr_eq(&mounted.engine, engine));
    }

    /// Close and forget every mounted feed
    pub fn unmount_all(&self) {
        let mut feeds = self.lock_feeds();
        for mounted in feeds.drain(..) {
            mounted.engine.close();
        }
        debug!("all feeds unmounted");
    }

    /// Kinds and scopes of the currently mounted feeds
    pub fn mounted_feeds(&self) -> Vec<(String, FeedScope)> {
        self.lock_feeds()
            .iter()
            .map(|mounted| (mounted.kind.clone(), mounted.scope))
            .collect()
    }

    /// React to a session status.
    ///
    /// Owner-filtered feeds not bound to the current identity are closed
    /// first; the route is published afterwards, under the same lock that
    /// `mount_feed` registers with.
    pub(crate) fn on_session(&self, status: &SessionStatus) {
        self.transition(status, false);
    }

    /// Catch up after missed transitions.
    ///
    /// A skipped report may have been a sign-out, so every owner-filtered
    /// feed is torn down before the current status is applied.
    fn resync(&self) {
        let status = self.session.status();
        self.transition(&status, true);
    }

    fn transition(&self, status: &SessionStatus, drop_owned: bool) {
        let mut feeds = self.lock_feeds();

        let current_user = status.identity().map(|identity| identity.user_id.as_str());
        feeds.retain(|mounted| {
            let owner = mounted.engine.spec().owner_id.as_deref();
            let keep = owner.is_none() || (!drop_owned && owner == current_user);
            if !keep {
                mounted.engine.close();
                info!(kind = %mounted.kind, owner = ?owner, "owner-filtered feed torn down");
            }
            keep
        });

        let next = match status {
            SessionStatus::Initializing => Route::Loading,
            SessionStatus::Authenticated(identity) => Route::Main(identity.clone()),
            SessionStatus::Anonymous => match &*self.route_tx.borrow() {
                Route::Unauthenticated(screen) => Route::Unauthenticated(*screen),
                _ => Route::Unauthenticated(AuthScreen::Intro),
            },
        };

        self.route_tx.send_if_modified(|route| {
            if *route == next {
                return false;
            }
            info!(from = ?route, to = ?next, "route change");
            *route = next;
            true
        });
    }

    fn lock_feeds(&self) -> MutexGuard<'_, Vec<MountedFeed>> {
        self.feeds.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_task(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.task.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for Router {
    fn drop(&mut self) {
        self.stop();
        self.unmount_all();
    }
}
