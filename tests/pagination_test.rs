//! Paginated task listing.

mod common;

use common::{context_at, make_project, make_type, task_input, vars};
use foreman::domain::models::TaskStatus;
use foreman::domain::ports::TaskFilter;
use tempfile::TempDir;

#[tokio::test]
async fn test_pagination_envelope_over_250_tasks() {
    let dir = TempDir::new().unwrap();
    let ctx = context_at(&dir);
    let project = make_project(&ctx, "p").await;
    let task_type = make_type(&ctx, &project, "t", None).await;

    for i in 0..250 {
        ctx.tasks
            .create(
                &project,
                &task_type,
                task_input(Some(&format!("job {i}")), vars(&[])),
            )
            .await
            .unwrap();
    }

    let page = ctx
        .tasks
        .list(
            project.id,
            &TaskFilter {
                limit: 50,
                offset: 100,
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(page.tasks.len(), 50);
    assert_eq!(page.pagination.total, 250);
    assert_eq!(page.pagination.offset, 100);
    assert_eq!(page.pagination.limit, 50);
    assert_eq!(page.pagination.range_start, 101);
    assert_eq!(page.pagination.range_end, 150);
    assert!(page.pagination.has_more);
}

#[tokio::test]
async fn test_pages_are_disjoint_and_ordered() {
    let dir = TempDir::new().unwrap();
    let ctx = context_at(&dir);
    let project = make_project(&ctx, "p").await;
    let task_type = make_type(&ctx, &project, "t", None).await;

    for i in 0..30 {
        ctx.tasks
            .create(
                &project,
                &task_type,
                task_input(Some(&format!("job {i}")), vars(&[])),
            )
            .await
            .unwrap();
    }

    let mut seen = std::collections::HashSet::new();
    let mut offset = 0;
    loop {
        let page = ctx
            .tasks
            .list(
                project.id,
                &TaskFilter {
                    limit: 7,
                    offset,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        for task in &page.tasks {
            assert!(seen.insert(task.id), "task {} appeared twice", task.id);
        }
        if !page.pagination.has_more {
            break;
        }
        offset += 7;
    }
    assert_eq!(seen.len(), 30);
}

#[tokio::test]
async fn test_last_page_and_out_of_range() {
    let dir = TempDir::new().unwrap();
    let ctx = context_at(&dir);
    let project = make_project(&ctx, "p").await;
    let task_type = make_type(&ctx, &project, "t", None).await;

    for i in 0..10 {
        ctx.tasks
            .create(
                &project,
                &task_type,
                task_input(Some(&format!("job {i}")), vars(&[])),
            )
            .await
            .unwrap();
    }

    let page = ctx
        .tasks
        .list(
            project.id,
            &TaskFilter {
                limit: 50,
                offset: 8,
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(page.tasks.len(), 2);
    assert_eq!(page.pagination.range_start, 9);
    assert_eq!(page.pagination.range_end, 10);
    assert!(!page.pagination.has_more);

    let beyond = ctx
        .tasks
        .list(
            project.id,
            &TaskFilter {
                limit: 50,
                offset: 100,
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert!(beyond.tasks.is_empty());
    assert_eq!(beyond.pagination.range_start, 0);
    assert_eq!(beyond.pagination.range_end, 0);
    assert!(!beyond.pagination.has_more);
}

#[tokio::test]
async fn test_status_filter() {
    let dir = TempDir::new().unwrap();
    let ctx = context_at(&dir);
    let project = make_project(&ctx, "p").await;
    let task_type = make_type(&ctx, &project, "t", None).await;

    for i in 0..4 {
        ctx.tasks
            .create(
                &project,
                &task_type,
                task_input(Some(&format!("job {i}")), vars(&[])),
            )
            .await
            .unwrap();
    }
    ctx.tasks
        .get_next(&project, Some("A".to_string()))
        .await
        .unwrap();

    let running = ctx
        .tasks
        .list(
            project.id,
            &TaskFilter {
                status: Some(TaskStatus::Running),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(running.pagination.total, 1);
    assert_eq!(running.tasks[0].assigned_to.as_deref(), Some("A"));

    let queued = ctx
        .tasks
        .list(
            project.id,
            &TaskFilter {
                status: Some(TaskStatus::Queued),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(queued.pagination.total, 3);
}
