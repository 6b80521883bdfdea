//! Project renames: uniqueness is enforced across active AND closed
//! projects, exactly as at creation.

mod common;

use std::sync::Arc;

use common::{context_at, make_project};
use foreman::commands::{find, CommandArgs, CommandContext};
use foreman::domain::errors::DomainError;
use foreman::services::project_service::UpdateProjectInput;
use serde_json::json;
use tempfile::TempDir;

fn rename_input(name: &str) -> UpdateProjectInput {
    UpdateProjectInput {
        name: Some(name.to_string()),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_rename_updates_name_resolution() {
    let dir = TempDir::new().unwrap();
    let ctx = context_at(&dir);
    let project = make_project(&ctx, "old-name").await;

    let renamed = ctx
        .projects
        .update(project.id, rename_input("new-name"))
        .await
        .unwrap();
    assert_eq!(renamed.name, "new-name");
    assert_eq!(renamed.id, project.id);

    // The new name resolves; the old one is gone.
    assert_eq!(ctx.projects.resolve("new-name").await.unwrap().id, project.id);
    let err = ctx.projects.resolve("old-name").await.unwrap_err();
    assert!(matches!(err, DomainError::NotFound { .. }));
}

#[tokio::test]
async fn test_rename_collision_with_active_project() {
    let dir = TempDir::new().unwrap();
    let ctx = context_at(&dir);
    make_project(&ctx, "taken").await;
    let project = make_project(&ctx, "mine").await;

    let err = ctx
        .projects
        .update(project.id, rename_input("taken"))
        .await
        .unwrap_err();
    assert!(matches!(err, DomainError::Conflict { .. }));

    // The failed rename left the project untouched.
    assert_eq!(ctx.projects.get(project.id).await.unwrap().name, "mine");
}

#[tokio::test]
async fn test_rename_collision_with_closed_project() {
    // Uniqueness spans closed projects, mirroring creation.
    let dir = TempDir::new().unwrap();
    let ctx = context_at(&dir);
    let retired = make_project(&ctx, "retired").await;
    ctx.projects.close(retired.id).await.unwrap();
    let project = make_project(&ctx, "mine").await;

    let err = ctx
        .projects
        .update(project.id, rename_input("retired"))
        .await
        .unwrap_err();
    assert!(matches!(err, DomainError::Conflict { .. }));
}

#[tokio::test]
async fn test_rename_to_own_name_is_a_no_op() {
    let dir = TempDir::new().unwrap();
    let ctx = context_at(&dir);
    let project = make_project(&ctx, "steady").await;

    let updated = ctx
        .projects
        .update(project.id, rename_input("steady"))
        .await
        .unwrap();
    assert_eq!(updated.name, "steady");
}

#[tokio::test]
async fn test_rename_rejects_invalid_names() {
    let dir = TempDir::new().unwrap();
    let ctx = context_at(&dir);
    let project = make_project(&ctx, "fine").await;

    for bad in ["", "has space", "-leading"] {
        let err = ctx
            .projects
            .update(project.id, rename_input(bad))
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)), "{bad:?} accepted");
    }
}

#[tokio::test]
async fn test_rename_through_update_project_command() {
    let dir = TempDir::new().unwrap();
    let ctx = context_at(&dir);
    make_project(&ctx, "taken").await;
    make_project(&ctx, "workbench").await;

    async fn call(
        ctx: &Arc<CommandContext>,
        args: serde_json::Value,
    ) -> Result<serde_json::Value, DomainError> {
        let spec = find("update_project").unwrap();
        let args: CommandArgs = args.as_object().cloned().unwrap_or_default();
        (spec.handler)(ctx.clone(), args).await
    }

    let updated = call(&ctx, json!({ "project": "workbench", "name": "bench" }))
        .await
        .unwrap();
    assert_eq!(updated["name"], "bench");
    assert!(ctx.projects.resolve("bench").await.is_ok());

    let err = call(&ctx, json!({ "project": "bench", "name": "taken" }))
        .await
        .unwrap_err();
    assert!(matches!(err, DomainError::Conflict { .. }));
}
