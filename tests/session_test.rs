//! Session issuance, resumption, and cross-instance coherence.
//!
//! Two command contexts over the same data directory model two service
//! processes sharing one backing store.

mod common;

use std::collections::HashMap;

use common::{context_at, make_project};
use foreman::services::session_service::CreateSessionOptions;
use serde_json::json;
use tempfile::TempDir;

#[tokio::test]
async fn test_token_valid_across_instances_and_logout_everywhere() {
    let dir = TempDir::new().unwrap();
    let instance_a = context_at(&dir);
    let instance_b = context_at(&dir);

    let project = make_project(&instance_a, "p").await;

    // Instance A: login.
    let handle = instance_a
        .sessions
        .create(
            "worker-1",
            &project,
            CreateSessionOptions::default(),
        )
        .await
        .unwrap();
    assert!(!handle.resumed);
    let token = handle.session_token.clone();

    // Instance A: store some state.
    let mut delta = HashMap::new();
    delta.insert("counter".to_string(), json!(1));
    instance_a
        .sessions
        .update_data(handle.session.id, delta)
        .await
        .unwrap();

    // Instance B (same backend, same secret): the token resolves and sees
    // the state written by A.
    let resolved = instance_b
        .sessions
        .validate(&token)
        .await
        .unwrap()
        .expect("token should be valid on the second instance");
    assert_eq!(resolved.session.data["counter"], json!(1));
    assert_eq!(resolved.agent.name, "worker-1");
    assert_eq!(resolved.project.id, project.id);

    // Instance B: logout.
    instance_b
        .sessions
        .destroy(resolved.session.id)
        .await
        .unwrap();

    // Instance A: the token is now invalid everywhere.
    assert!(instance_a.sessions.validate(&token).await.unwrap().is_none());
}

#[tokio::test]
async fn test_resume_returns_most_recent_session() {
    let dir = TempDir::new().unwrap();
    let ctx = context_at(&dir);
    let project = make_project(&ctx, "p").await;

    let first = ctx
        .sessions
        .create(
            "worker-1",
            &project,
            CreateSessionOptions {
                allow_multiple_sessions: true,
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let resumed = ctx
        .sessions
        .create(
            "worker-1",
            &project,
            CreateSessionOptions {
                resume_existing: true,
                ttl_seconds: Some(7200),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert!(resumed.resumed);
    assert_eq!(resumed.session.id, first.session.id);
    assert!(resumed.session.expires_at > first.session.expires_at);

    // The fresh token works too.
    assert!(ctx
        .sessions
        .validate(&resumed.session_token)
        .await
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn test_single_session_policy_evicts_older_sessions() {
    let dir = TempDir::new().unwrap();
    let ctx = context_at(&dir);
    let project = make_project(&ctx, "p").await;

    let first = ctx
        .sessions
        .create("worker-1", &project, CreateSessionOptions::default())
        .await
        .unwrap();

    // Default policy: a second login replaces the first session.
    let second = ctx
        .sessions
        .create("worker-1", &project, CreateSessionOptions::default())
        .await
        .unwrap();
    assert_ne!(second.session.id, first.session.id);

    assert!(ctx
        .sessions
        .validate(&first.session_token)
        .await
        .unwrap()
        .is_none());
    assert!(ctx
        .sessions
        .validate(&second.session_token)
        .await
        .unwrap()
        .is_some());

    let active = ctx
        .sessions
        .find_active_for_agent("worker-1", project.id)
        .await
        .unwrap();
    assert_eq!(active.len(), 1);
}

#[tokio::test]
async fn test_multiple_sessions_allowed_when_requested() {
    let dir = TempDir::new().unwrap();
    let ctx = context_at(&dir);
    let project = make_project(&ctx, "p").await;

    for _ in 0..3 {
        ctx.sessions
            .create(
                "worker-1",
                &project,
                CreateSessionOptions {
                    allow_multiple_sessions: true,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
    }
    let active = ctx
        .sessions
        .find_active_for_agent("worker-1", project.id)
        .await
        .unwrap();
    assert_eq!(active.len(), 3);
}

#[tokio::test]
async fn test_expired_sessions_rejected_and_cleaned() {
    let dir = TempDir::new().unwrap();
    let ctx = context_at(&dir);
    let project = make_project(&ctx, "p").await;

    let handle = ctx
        .sessions
        .create("worker-1", &project, CreateSessionOptions::default())
        .await
        .unwrap();

    // Force-expire the stored record.
    let mut session = handle.session.clone();
    session.expires_at = chrono::Utc::now() - chrono::Duration::seconds(1);
    ctx.storage.update_session(&session).await.unwrap();

    assert!(ctx
        .sessions
        .validate(&handle.session_token)
        .await
        .unwrap()
        .is_none());

    let removed = ctx.sessions.cleanup_expired().await.unwrap();
    assert_eq!(removed, 1);
    assert!(ctx.storage.get_session(session.id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_session_bound_to_deleted_project_self_heals() {
    let dir = TempDir::new().unwrap();
    let ctx = context_at(&dir);
    let project = make_project(&ctx, "p").await;

    let handle = ctx
        .sessions
        .create("worker-1", &project, CreateSessionOptions::default())
        .await
        .unwrap();

    ctx.projects.delete(project.id).await.unwrap();

    // Validation destroys the orphaned session and reports invalid.
    assert!(ctx
        .sessions
        .validate(&handle.session_token)
        .await
        .unwrap()
        .is_none());
    assert!(ctx
        .storage
        .get_session(handle.session.id)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_token_from_other_secret_rejected() {
    let dir = TempDir::new().unwrap();
    let ctx = context_at(&dir);
    let project = make_project(&ctx, "p").await;
    let handle = ctx
        .sessions
        .create("worker-1", &project, CreateSessionOptions::default())
        .await
        .unwrap();

    // A signer with a different secret produces tokens this service rejects,
    // even for a real session id.
    let foreign = foreman::services::TokenSigner::new(b"some-other-secret".to_vec());
    let forged = foreign.sign(handle.session.id);
    assert!(ctx.sessions.validate(&forged).await.unwrap().is_none());
}
