//! Retry boundary and expired-lease reclamation.

mod common;

use chrono::{Duration as ChronoDuration, Utc};
use common::{context_at, make_project, make_type_with, task_input, vars};
use foreman::domain::models::{AttemptStatus, DuplicateHandling, TaskResult, TaskStatus};
use tempfile::TempDir;
use uuid::Uuid;

/// Rewrite a stored task's lease expiry, simulating wall-clock passage.
fn backdate_lease(dir: &TempDir, project_id: Uuid, task_id: Uuid, minutes: i64) {
    let path = dir
        .path()
        .join("projects")
        .join(project_id.to_string())
        .join("tasks")
        .join(format!("{task_id}.json"));
    let raw = std::fs::read_to_string(&path).unwrap();
    let mut value: serde_json::Value = serde_json::from_str(&raw).unwrap();
    let past = (Utc::now() - ChronoDuration::minutes(minutes)).to_rfc3339();
    value["leaseExpiresAt"] = serde_json::json!(past);
    std::fs::write(&path, serde_json::to_string_pretty(&value).unwrap()).unwrap();
}

#[tokio::test]
async fn test_retry_boundary_two_retries_then_terminal() {
    let dir = TempDir::new().unwrap();
    let ctx = context_at(&dir);
    let project = make_project(&ctx, "p").await;
    let task_type = make_type_with(
        &ctx,
        &project,
        "t",
        None,
        DuplicateHandling::Allow,
        Some(2),
        None,
    )
    .await;

    let created = ctx
        .tasks
        .create(&project, &task_type, task_input(Some("flaky"), vars(&[])))
        .await
        .unwrap();
    let task_id = created.task.id;

    // First failure: queued, retryCount = 1.
    let claim = ctx
        .tasks
        .get_next(&project, Some("A".to_string()))
        .await
        .unwrap();
    assert_eq!(claim.task.unwrap().id, task_id);
    let after = ctx
        .tasks
        .fail(project.id, task_id, "A", TaskResult::err("boom"), true)
        .await
        .unwrap();
    assert_eq!(after.status, TaskStatus::Queued);
    assert_eq!(after.retry_count, 1);

    // Second failure: queued, retryCount = 2.
    let claim = ctx
        .tasks
        .get_next(&project, Some("B".to_string()))
        .await
        .unwrap();
    assert_eq!(claim.task.unwrap().id, task_id);
    let after = ctx
        .tasks
        .fail(project.id, task_id, "B", TaskResult::err("boom"), true)
        .await
        .unwrap();
    assert_eq!(after.status, TaskStatus::Queued);
    assert_eq!(after.retry_count, 2);

    // Third failure: terminal, count stays at the max.
    let claim = ctx
        .tasks
        .get_next(&project, Some("C".to_string()))
        .await
        .unwrap();
    assert_eq!(claim.task.unwrap().id, task_id);
    let after = ctx
        .tasks
        .fail(project.id, task_id, "C", TaskResult::err("boom"), true)
        .await
        .unwrap();
    assert_eq!(after.status, TaskStatus::Failed);
    assert_eq!(after.retry_count, 2);
    assert!(after.failed_at.is_some());
    assert!(!after.result.as_ref().unwrap().success);
    assert_eq!(after.attempts.len(), 3);
}

#[tokio::test]
async fn test_non_retriable_failure_is_immediately_terminal() {
    let dir = TempDir::new().unwrap();
    let ctx = context_at(&dir);
    let project = make_project(&ctx, "p").await;
    let task_type = make_type_with(
        &ctx,
        &project,
        "t",
        None,
        DuplicateHandling::Allow,
        Some(5),
        None,
    )
    .await;
    let created = ctx
        .tasks
        .create(&project, &task_type, task_input(Some("fatal"), vars(&[])))
        .await
        .unwrap();

    ctx.tasks
        .get_next(&project, Some("A".to_string()))
        .await
        .unwrap();
    let after = ctx
        .tasks
        .fail(
            project.id,
            created.task.id,
            "A",
            TaskResult::err("unrecoverable"),
            false,
        )
        .await
        .unwrap();
    assert_eq!(after.status, TaskStatus::Failed);
    assert_eq!(after.retry_count, 0);
}

#[tokio::test]
async fn test_expired_lease_reclaimed_on_next_claim() {
    let dir = TempDir::new().unwrap();
    let ctx = context_at(&dir);
    let project = make_project(&ctx, "p").await;
    let task_type = make_type_with(
        &ctx,
        &project,
        "t",
        None,
        DuplicateHandling::Allow,
        Some(3),
        Some(1),
    )
    .await;
    let created = ctx
        .tasks
        .create(&project, &task_type, task_input(Some("slow"), vars(&[])))
        .await
        .unwrap();
    let task_id = created.task.id;

    let claim = ctx
        .tasks
        .get_next(&project, Some("A".to_string()))
        .await
        .unwrap();
    assert_eq!(claim.task.unwrap().assigned_to.as_deref(), Some("A"));

    backdate_lease(&dir, project.id, task_id, 1);

    // The next claim reclaims the expired lease and redispatches.
    let claim = ctx
        .tasks
        .get_next(&project, Some("B".to_string()))
        .await
        .unwrap();
    let task = claim.task.unwrap();
    assert_eq!(task.id, task_id);
    assert_eq!(task.assigned_to.as_deref(), Some("B"));
    assert_eq!(task.retry_count, 1);
    assert_eq!(task.attempts.len(), 2);
    assert_eq!(task.attempts[0].status, AttemptStatus::Timeout);
    assert_eq!(
        task.attempts[0]
            .result
            .as_ref()
            .unwrap()
            .error
            .as_deref(),
        Some("lease expired")
    );
}

#[tokio::test]
async fn test_cleanup_expired_leases_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let ctx = context_at(&dir);
    let project = make_project(&ctx, "p").await;
    let task_type = make_type_with(
        &ctx,
        &project,
        "t",
        None,
        DuplicateHandling::Allow,
        Some(3),
        Some(1),
    )
    .await;
    let created = ctx
        .tasks
        .create(&project, &task_type, task_input(Some("slow"), vars(&[])))
        .await
        .unwrap();

    ctx.tasks
        .get_next(&project, Some("A".to_string()))
        .await
        .unwrap();
    backdate_lease(&dir, project.id, created.task.id, 2);

    let report = ctx.tasks.cleanup_expired_leases(project.id).await.unwrap();
    assert_eq!(report.reclaimed_tasks, vec![created.task.id]);
    assert_eq!(report.cleaned_agents, vec!["A".to_string()]);

    // Second sweep finds nothing; no double-reclaim.
    let report = ctx.tasks.cleanup_expired_leases(project.id).await.unwrap();
    assert!(report.reclaimed_tasks.is_empty());

    // No running task has an expired lease after cleanup.
    let stats = ctx.tasks.lease_stats(project.id).await.unwrap();
    assert_eq!(stats.expired_tasks, 0);
    assert_eq!(stats.total_running_tasks, 0);
    assert_eq!(stats.tasks_by_status.get("queued"), Some(&1));
}

#[tokio::test]
async fn test_extend_lease_pushes_expiry() {
    let dir = TempDir::new().unwrap();
    let ctx = context_at(&dir);
    let project = make_project(&ctx, "p").await;
    let task_type = make_type_with(
        &ctx,
        &project,
        "t",
        None,
        DuplicateHandling::Allow,
        None,
        Some(10),
    )
    .await;
    let created = ctx
        .tasks
        .create(&project, &task_type, task_input(Some("long"), vars(&[])))
        .await
        .unwrap();

    let claim = ctx
        .tasks
        .get_next(&project, Some("A".to_string()))
        .await
        .unwrap();
    let before = claim.task.unwrap().lease_expires_at.unwrap();

    let extended = ctx
        .tasks
        .extend_lease(project.id, created.task.id, "A", 30)
        .await
        .unwrap();
    let after = extended.lease_expires_at.unwrap();
    assert_eq!(after, before + ChronoDuration::minutes(30));

    // Only the lease holder may extend.
    let err = ctx
        .tasks
        .extend_lease(project.id, created.task.id, "B", 30)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        foreman::domain::errors::DomainError::NotAssigned { .. }
    ));

    // Extension is rejected once the task is no longer running.
    ctx.tasks
        .complete(project.id, created.task.id, "A", TaskResult::ok("done"))
        .await
        .unwrap();
    assert!(ctx
        .tasks
        .extend_lease(project.id, created.task.id, "A", 5)
        .await
        .is_err());
}
