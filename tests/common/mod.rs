//! Shared fixtures for integration tests: a command context wired over a
//! file backend in a temp directory.
#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use foreman::commands::CommandContext;
use foreman::domain::models::{DuplicateHandling, Project, TaskType};
use foreman::infrastructure::config::Config;
use foreman::infrastructure::storage::file::FileBackend;
use foreman::services::task_service::CreateTaskInput;
use foreman::services::task_type_service::CreateTaskTypeInput;

/// Build a context over a fresh file backend rooted in `dir`.
///
/// Building two contexts over the same directory models two service
/// instances sharing one backing store.
pub fn context_at(dir: &TempDir) -> Arc<CommandContext> {
    let backend = FileBackend::new(dir.path(), Duration::from_secs(5))
        .expect("file backend should initialize");
    Arc::new(CommandContext::new(Config::default(), Arc::new(backend)))
}

pub async fn make_project(ctx: &CommandContext, name: &str) -> Project {
    ctx.projects
        .create(foreman::services::project_service::CreateProjectInput {
            name: name.to_string(),
            description: format!("{name} test project"),
            instructions: None,
            config: None,
        })
        .await
        .expect("project creation should succeed")
}

pub async fn make_type(
    ctx: &CommandContext,
    project: &Project,
    name: &str,
    template: Option<&str>,
) -> TaskType {
    ctx.task_types
        .create(
            project,
            CreateTaskTypeInput {
                name: name.to_string(),
                template: template.map(String::from),
                duplicate_handling: None,
                max_retries: None,
                lease_duration_minutes: None,
            },
        )
        .await
        .expect("task type creation should succeed")
}

pub async fn make_type_with(
    ctx: &CommandContext,
    project: &Project,
    name: &str,
    template: Option<&str>,
    policy: DuplicateHandling,
    max_retries: Option<u32>,
    lease_minutes: Option<u32>,
) -> TaskType {
    ctx.task_types
        .create(
            project,
            CreateTaskTypeInput {
                name: name.to_string(),
                template: template.map(String::from),
                duplicate_handling: Some(policy),
                max_retries,
                lease_duration_minutes: lease_minutes,
            },
        )
        .await
        .expect("task type creation should succeed")
}

pub fn vars(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

pub fn task_input(
    instructions: Option<&str>,
    variables: BTreeMap<String, String>,
) -> CreateTaskInput {
    CreateTaskInput {
        id: None,
        description: None,
        instructions: instructions.map(String::from),
        variables,
    }
}
