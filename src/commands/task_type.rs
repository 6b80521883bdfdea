//! Task type commands.

use std::sync::Arc;

use serde::Deserialize;

use crate::commands::format::{short_id, str_field, table};
use crate::commands::{
    parse_args, to_value, CommandArgs, CommandContext, CommandSpec, HandlerFuture, ParamKind,
    ParamSpec,
};
use crate::domain::errors::DomainError;
use crate::domain::models::DuplicateHandling;
use crate::services::task_type_service::{CreateTaskTypeInput, UpdateTaskTypeInput};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateTaskTypeArgs {
    project: String,
    name: String,
    #[serde(default)]
    template: Option<String>,
    #[serde(default)]
    duplicate_handling: Option<String>,
    #[serde(default)]
    max_retries: Option<u32>,
    #[serde(default)]
    lease_duration_minutes: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TaskTypeRefArgs {
    project: String,
    #[serde(rename = "type")]
    type_ref: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProjectRefArgs {
    project: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateTaskTypeArgs {
    project: String,
    #[serde(rename = "type")]
    type_ref: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    template: Option<String>,
    #[serde(default)]
    duplicate_handling: Option<String>,
    #[serde(default)]
    max_retries: Option<u32>,
    #[serde(default)]
    lease_duration_minutes: Option<u32>,
}

fn parse_policy(raw: Option<String>) -> Result<Option<DuplicateHandling>, DomainError> {
    match raw {
        None => Ok(None),
        Some(raw) => DuplicateHandling::from_str(&raw).map(Some).ok_or_else(|| {
            DomainError::Validation(format!(
                "duplicateHandling must be one of allow, ignore, fail (got {raw})"
            ))
        }),
    }
}

fn create_task_type(ctx: Arc<CommandContext>, args: CommandArgs) -> HandlerFuture {
    Box::pin(async move {
        let args: CreateTaskTypeArgs = parse_args(args)?;
        let project = ctx.projects.validate_access_by_ref(&args.project).await?;
        let task_type = ctx
            .task_types
            .create(
                &project,
                CreateTaskTypeInput {
                    name: args.name,
                    template: args.template,
                    duplicate_handling: parse_policy(args.duplicate_handling)?,
                    max_retries: args.max_retries,
                    lease_duration_minutes: args.lease_duration_minutes,
                },
            )
            .await?;
        to_value(&task_type)
    })
}

fn get_task_type(ctx: Arc<CommandContext>, args: CommandArgs) -> HandlerFuture {
    Box::pin(async move {
        let args: TaskTypeRefArgs = parse_args(args)?;
        let project = ctx.projects.resolve(&args.project).await?;
        let task_type = ctx.task_types.resolve(project.id, &args.type_ref).await?;
        to_value(&task_type)
    })
}

fn list_task_types(ctx: Arc<CommandContext>, args: CommandArgs) -> HandlerFuture {
    Box::pin(async move {
        let args: ProjectRefArgs = parse_args(args)?;
        let project = ctx.projects.resolve(&args.project).await?;
        let types = ctx.task_types.list(project.id).await?;
        to_value(&types)
    })
}

fn update_task_type(ctx: Arc<CommandContext>, args: CommandArgs) -> HandlerFuture {
    Box::pin(async move {
        let args: UpdateTaskTypeArgs = parse_args(args)?;
        let project = ctx.projects.resolve(&args.project).await?;
        let task_type = ctx.task_types.resolve(project.id, &args.type_ref).await?;
        let updated = ctx
            .task_types
            .update(
                project.id,
                task_type.id,
                UpdateTaskTypeInput {
                    name: args.name,
                    template: args.template,
                    duplicate_handling: parse_policy(args.duplicate_handling)?,
                    max_retries: args.max_retries,
                    lease_duration_minutes: args.lease_duration_minutes,
                },
            )
            .await?;
        to_value(&updated)
    })
}

fn delete_task_type(ctx: Arc<CommandContext>, args: CommandArgs) -> HandlerFuture {
    Box::pin(async move {
        let args: TaskTypeRefArgs = parse_args(args)?;
        let project = ctx.projects.resolve(&args.project).await?;
        let task_type = ctx.task_types.resolve(project.id, &args.type_ref).await?;
        ctx.task_types.delete(project.id, task_type.id).await?;
        to_value(&serde_json::json!({ "deleted": task_type.id }))
    })
}

fn format_task_type(value: &serde_json::Value) -> String {
    let variables = value
        .get("variables")
        .and_then(|v| v.as_array())
        .map(|vars| {
            vars.iter()
                .filter_map(|v| v.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        })
        .unwrap_or_default();
    format!(
        "{}\n  id: {}\n  duplicates: {}\n  maxRetries: {}  lease: {}m\n  variables: [{}]",
        str_field(value, "name"),
        str_field(value, "id"),
        str_field(value, "duplicateHandling"),
        value.get("maxRetries").and_then(|v| v.as_u64()).unwrap_or(0),
        value
            .get("leaseDurationMinutes")
            .and_then(|v| v.as_u64())
            .unwrap_or(0),
        variables,
    )
}

fn format_task_type_list(value: &serde_json::Value) -> String {
    let mut out = table(&["NAME", "ID", "DUPLICATES", "RETRIES", "LEASE"]);
    if let Some(types) = value.as_array() {
        for task_type in types {
            out.add_row(vec![
                str_field(task_type, "name").to_string(),
                short_id(task_type, "id"),
                str_field(task_type, "duplicateHandling").to_string(),
                task_type
                    .get("maxRetries")
                    .and_then(|v| v.as_u64())
                    .unwrap_or(0)
                    .to_string(),
                format!(
                    "{}m",
                    task_type
                        .get("leaseDurationMinutes")
                        .and_then(|v| v.as_u64())
                        .unwrap_or(0)
                ),
            ]);
        }
    }
    out.to_string()
}

fn format_deleted(value: &serde_json::Value) -> String {
    format!("deleted task type {}", str_field(value, "deleted"))
}

const PROJECT_PARAM: ParamSpec =
    ParamSpec::required("project", ParamKind::String, "Project name or id").positional();
const TYPE_PARAM: ParamSpec =
    ParamSpec::required("type", ParamKind::String, "Task type name or id").positional();
const POLICY_CHOICES: &[&str] = &["allow", "ignore", "fail"];

pub fn specs() -> Vec<CommandSpec> {
    vec![
        CommandSpec {
            name: "createTaskType",
            rpc_name: "create_task_type",
            cli_name: "create-task-type",
            description: "Create a task type (template for tasks) in a project",
            params: vec![
                PROJECT_PARAM,
                ParamSpec::required("name", ParamKind::String, "Type name, unique in the project")
                    .positional(),
                ParamSpec::optional(
                    "template",
                    ParamKind::String,
                    "Instruction template with {{var}} placeholders",
                ),
                ParamSpec::optional(
                    "duplicateHandling",
                    ParamKind::String,
                    "Duplicate policy for tasks of this type",
                )
                .with_default("allow")
                .with_choices(POLICY_CHOICES),
                ParamSpec::optional(
                    "maxRetries",
                    ParamKind::Number,
                    "Retry budget; inherits the project default when absent",
                ),
                ParamSpec::optional(
                    "leaseDurationMinutes",
                    ParamKind::Number,
                    "Lease duration; inherits the project default when absent",
                ),
            ],
            handler: create_task_type,
            format_human: format_task_type,
        },
        CommandSpec {
            name: "getTaskType",
            rpc_name: "get_task_type",
            cli_name: "get-task-type",
            description: "Fetch a task type",
            params: vec![PROJECT_PARAM, TYPE_PARAM],
            handler: get_task_type,
            format_human: format_task_type,
        },
        CommandSpec {
            name: "listTaskTypes",
            rpc_name: "list_task_types",
            cli_name: "list-task-types",
            description: "List a project's task types",
            params: vec![PROJECT_PARAM],
            handler: list_task_types,
            format_human: format_task_type_list,
        },
        CommandSpec {
            name: "updateTaskType",
            rpc_name: "update_task_type",
            cli_name: "update-task-type",
            description: "Update a task type; template changes re-extract variables",
            params: vec![
                PROJECT_PARAM,
                TYPE_PARAM,
                ParamSpec::optional("name", ParamKind::String, "New type name"),
                ParamSpec::optional("template", ParamKind::String, "New instruction template"),
                ParamSpec::optional(
                    "duplicateHandling",
                    ParamKind::String,
                    "New duplicate policy",
                )
                .with_choices(POLICY_CHOICES),
                ParamSpec::optional("maxRetries", ParamKind::Number, "New retry budget"),
                ParamSpec::optional(
                    "leaseDurationMinutes",
                    ParamKind::Number,
                    "New lease duration",
                ),
            ],
            handler: update_task_type,
            format_human: format_task_type,
        },
        CommandSpec {
            name: "deleteTaskType",
            rpc_name: "delete_task_type",
            cli_name: "delete-task-type",
            description: "Delete a task type",
            params: vec![PROJECT_PARAM, TYPE_PARAM],
            handler: delete_task_type,
            format_human: format_deleted,
        },
    ]
}
