//! Session machine against the in-memory credential provider

use std::sync::Arc;

use anyhow::Result;
use pulse::testing::{settle, wait_for_session, wait_until};
use pulse::{ApiError, SessionMachine, SessionStatus};
use pulse_api::{Credentials, Identity};
use pulse_memory::MemoryCredentialProvider;

fn ada_credentials() -> Credentials {
    Credentials::new("ada@example.com", "secret1")
}

fn machine() -> (Arc<MemoryCredentialProvider>, SessionMachine) {
    let provider = Arc::new(
        MemoryCredentialProvider::new().with_account("ada@example.com", "secret1", "Ada"),
    );
    let session = SessionMachine::new(provider.clone());
    (provider, session)
}

#[tokio::test]
async fn first_report_settles_the_session() -> Result<()> {
    let (_provider, session) = machine();
    assert_eq!(session.status(), SessionStatus::Initializing);

    session.start().await?;

    wait_for_session(&session, |status| *status == SessionStatus::Anonymous).await?;
    Ok(())
}

#[tokio::test]
async fn follows_sign_in_and_sign_out() -> Result<()> {
    let (_provider, session) = machine();
    session.start().await?;
    let mut rx = session.watch();

    session.sign_in(ada_credentials()).await?;
    let status = wait_for_session(&session, |status| status.identity().is_some()).await?;
    assert_eq!(status.identity().map(|i| i.display_name.as_str()), Some("Ada"));

    session.sign_out().await?;
    wait_for_session(&session, |status| *status == SessionStatus::Anonymous).await?;

    // every observed state after start is settled
    while rx.has_changed()? {
        assert!(rx.borrow_and_update().is_settled());
    }
    Ok(())
}

#[tokio::test]
async fn sign_up_signs_in() -> Result<()> {
    let (_provider, session) = machine();
    session.start().await?;

    session
        .sign_up(Credentials::new("bob@example.com", "hunter22"), "Bob")
        .await?;

    let status = wait_for_session(&session, |status| status.identity().is_some()).await?;
    assert_eq!(status.identity().map(|i| i.display_name.as_str()), Some("Bob"));
    Ok(())
}

#[tokio::test]
async fn rejected_requests_leave_status_unchanged() -> Result<()> {
    let (provider, session) = machine();
    session.start().await?;
    session.sign_in(ada_credentials()).await?;
    let signed_in = wait_for_session(&session, |status| status.identity().is_some()).await?;

    let err = session
        .sign_in(Credentials::new("ada@example.com", "wrong"))
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::AuthFailure { .. }));

    provider.fail_sign_out(true);
    let err = session.sign_out().await.unwrap_err();
    assert!(matches!(err, ApiError::AuthFailure { .. }));

    settle().await;
    assert_eq!(session.status(), signed_in);
    Ok(())
}

#[tokio::test]
async fn start_twice_is_rejected() -> Result<()> {
    let (_provider, session) = machine();
    session.start().await?;

    assert!(matches!(
        session.start().await,
        Err(ApiError::InvalidOperation { .. })
    ));
    Ok(())
}

#[tokio::test]
async fn stop_is_idempotent_and_detaches() -> Result<()> {
    let (provider, session) = machine();
    session.stop();

    session.start().await?;
    wait_for_session(&session, |status| status.is_settled()).await?;
    assert_eq!(provider.subscriber_count(), 1);

    session.stop();
    session.stop();
    provider.set_identity(Some(Identity::new("u9", "Eve")));
    settle().await;

    assert_eq!(session.status(), SessionStatus::Anonymous);
    wait_until(|| provider.subscriber_count() == 0).await?;
    Ok(())
}

#[tokio::test]
async fn restart_picks_up_current_identity() -> Result<()> {
    let (provider, session) = machine();
    session.start().await?;
    wait_for_session(&session, |status| status.is_settled()).await?;
    session.stop();

    let eve = Identity::new("u9", "Eve");
    provider.set_identity(Some(eve.clone()));
    session.start().await?;

    wait_for_session(&session, |status| {
        *status == SessionStatus::Authenticated(eve.clone())
    })
    .await?;
    Ok(())
}

#[tokio::test]
async fn transitions_keep_a_sign_out_between_sign_ins() -> Result<()> {
    let (_provider, session) = machine();
    session.start().await?;
    session.sign_in(ada_credentials()).await?;
    wait_for_session(&session, |status| matches!(status, SessionStatus::Authenticated(_)))
        .await?;
    let mut transitions = session.transitions();

    session.sign_out().await?;
    session.sign_in(ada_credentials()).await?;

    let limit = std::time::Duration::from_secs(2);
    let first = tokio::time::timeout(limit, transitions.recv()).await??;
    let second = tokio::time::timeout(limit, transitions.recv()).await??;
    assert_eq!(first, SessionStatus::Anonymous);
    assert!(matches!(
        second,
        SessionStatus::Authenticated(identity) if identity.display_name == "Ada"
    ));
    Ok(())
}
