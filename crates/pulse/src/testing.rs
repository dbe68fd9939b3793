//! Async test helpers
//!
//! Deliveries are applied on spawned tasks, so tests wait for published
//! state instead of asserting right after an operation.

use std::time::Duration;

use anyhow::{Context, Result};
use tokio::time::timeout;

use crate::core::{FeedEngine, FeedSnapshot};
use crate::navigation::{Route, Router};
use crate::session::{SessionMachine, SessionStatus};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Wait until the feed publishes a snapshot matching `predicate`
pub async fn wait_for_feed<F>(engine: &FeedEngine, predicate: F) -> Result<FeedSnapshot>
where
    F: FnMut(&FeedSnapshot) -> bool,
{
    let mut rx = engine.watch();
    let snapshot = timeout(DEFAULT_TIMEOUT, rx.wait_for(predicate))
        .await
        .with_context(|| format!("timed out waiting for feed '{}'", engine.spec().collection))?
        .context("feed channel closed")?
        .clone();
    Ok(snapshot)
}

pub async fn wait_for_route<F>(router: &Router, predicate: F) -> Result<Route>
where
    F: FnMut(&Route) -> bool,
{
    let mut rx = router.watch();
    let route = timeout(DEFAULT_TIMEOUT, rx.wait_for(predicate))
        .await
        .context("timed out waiting for route")?
        .context("route channel closed")?
        .clone();
    Ok(route)
}

pub async fn wait_for_session<F>(session: &SessionMachine, predicate: F) -> Result<SessionStatus>
where
    F: FnMut(&SessionStatus) -> bool,
{
    let mut rx = session.watch();
    let status = timeout(DEFAULT_TIMEOUT, rx.wait_for(predicate))
        .await
        .context("timed out waiting for session status")?
        .context("session channel closed")?
        .clone();
    Ok(status)
}

/// Poll `condition` until it holds
pub async fn wait_until<F>(mut condition: F) -> Result<()>
where
    F: FnMut() -> bool,
{
    timeout(DEFAULT_TIMEOUT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .context("timed out waiting for condition")
}

/// Let spawned tasks run without waiting for any particular state
pub async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
    tokio::time::sleep(Duration::from_millis(20)).await;
}
