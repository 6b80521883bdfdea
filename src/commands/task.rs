//! Task commands: creation, bulk creation, fetch, and paginated listing.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde::Deserialize;
use uuid::Uuid;

use crate::commands::format::{num_field, short_id, str_field, table};
use crate::commands::{
    parse_args, to_value, CommandArgs, CommandContext, CommandSpec, HandlerFuture, ParamKind,
    ParamSpec,
};
use crate::domain::errors::DomainError;
use crate::domain::models::TaskStatus;
use crate::domain::ports::TaskFilter;
use crate::services::task_service::{BulkTaskInput, CreateTaskInput};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateTaskArgs {
    project: String,
    #[serde(rename = "type")]
    type_ref: String,
    #[serde(default)]
    id: Option<Uuid>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    instructions: Option<String>,
    #[serde(default)]
    variables: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BulkCreateArgs {
    project: String,
    /// Default type for records that do not name one.
    #[serde(default, rename = "type")]
    type_ref: Option<String>,
    tasks: Vec<BulkTaskInput>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TaskRefArgs {
    project: String,
    task: Uuid,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListTasksArgs {
    project: String,
    #[serde(default)]
    status: Option<String>,
    #[serde(default, rename = "type")]
    type_ref: Option<String>,
    #[serde(default)]
    assigned_to: Option<String>,
    #[serde(default)]
    batch: Option<Uuid>,
    #[serde(default = "default_limit")]
    limit: u64,
    #[serde(default)]
    offset: u64,
}

fn default_limit() -> u64 {
    50
}

fn create_task(ctx: Arc<CommandContext>, args: CommandArgs) -> HandlerFuture {
    Box::pin(async move {
        let args: CreateTaskArgs = parse_args(args)?;
        let project = ctx.projects.validate_access_by_ref(&args.project).await?;
        let task_type = ctx.task_types.resolve(project.id, &args.type_ref).await?;
        let outcome = ctx
            .tasks
            .create(
                &project,
                &task_type,
                CreateTaskInput {
                    id: args.id,
                    description: args.description,
                    instructions: args.instructions,
                    variables: args.variables,
                },
            )
            .await?;
        to_value(&outcome)
    })
}

fn create_tasks_bulk(ctx: Arc<CommandContext>, args: CommandArgs) -> HandlerFuture {
    Box::pin(async move {
        let args: BulkCreateArgs = parse_args(args)?;
        let project = ctx.projects.validate_access_by_ref(&args.project).await?;

        let default_type = match args.type_ref.as_deref() {
            Some(reference) => Some(ctx.task_types.resolve(project.id, reference).await?),
            None => None,
        };

        // Resolve each distinct per-record type reference once up front.
        let mut resolved = HashMap::new();
        for item in &args.tasks {
            if let Some(reference) = item.type_ref.as_deref() {
                if !resolved.contains_key(reference) {
                    if let Ok(task_type) = ctx.task_types.resolve(project.id, reference).await {
                        resolved.insert(reference.to_string(), task_type);
                    }
                }
            }
        }

        let summary = ctx
            .tasks
            .create_bulk(&project, default_type.as_ref(), args.tasks, &resolved)
            .await?;
        to_value(&summary)
    })
}

fn get_task(ctx: Arc<CommandContext>, args: CommandArgs) -> HandlerFuture {
    Box::pin(async move {
        let args: TaskRefArgs = parse_args(args)?;
        let project = ctx.projects.resolve(&args.project).await?;
        let task = ctx.tasks.get(project.id, args.task).await?;
        to_value(&task)
    })
}

fn list_tasks(ctx: Arc<CommandContext>, args: CommandArgs) -> HandlerFuture {
    Box::pin(async move {
        let args: ListTasksArgs = parse_args(args)?;
        let project = ctx.projects.resolve(&args.project).await?;

        let status = match args.status.as_deref() {
            Some(raw) => Some(TaskStatus::from_str(raw).ok_or_else(|| {
                DomainError::Validation(format!(
                    "status must be one of queued, running, completed, failed (got {raw})"
                ))
            })?),
            None => None,
        };
        let type_id = match args.type_ref.as_deref() {
            Some(reference) => Some(ctx.task_types.resolve(project.id, reference).await?.id),
            None => None,
        };

        let filter = TaskFilter {
            status,
            type_id,
            assigned_to: args.assigned_to,
            batch_id: args.batch,
            limit: args.limit,
            offset: args.offset,
        };
        let page = ctx.tasks.list(project.id, &filter).await?;
        to_value(&page)
    })
}

pub(crate) fn format_task(value: &serde_json::Value) -> String {
    let mut out = format!(
        "task {} [{}]\n  type: {}\n  description: {}\n  retries: {}/{}",
        str_field(value, "id"),
        str_field(value, "status"),
        str_field(value, "typeId"),
        str_field(value, "description"),
        num_field(value, "retryCount"),
        num_field(value, "maxRetries"),
    );
    if let Some(agent) = value.get("assignedTo").and_then(|v| v.as_str()) {
        out.push_str(&format!(
            "\n  assigned to: {agent} (lease expires {})",
            str_field(value, "leaseExpiresAt")
        ));
    }
    if let Some(instructions) = value.get("instructions").and_then(|v| v.as_str()) {
        out.push_str(&format!("\n  instructions: {instructions}"));
    }
    out
}

fn format_create_outcome(value: &serde_json::Value) -> String {
    let task = value.get("task").cloned().unwrap_or_default();
    let dedup = value
        .get("deduplicated")
        .and_then(serde_json::Value::as_bool)
        .unwrap_or(false);
    if dedup {
        format!("existing task returned (duplicate)\n{}", format_task(&task))
    } else {
        format_task(&task)
    }
}

fn format_task_page(value: &serde_json::Value) -> String {
    let mut out = table(&["ID", "STATUS", "DESCRIPTION", "AGENT", "RETRIES"]);
    if let Some(tasks) = value.get("tasks").and_then(|v| v.as_array()) {
        for task in tasks {
            out.add_row(vec![
                short_id(task, "id"),
                str_field(task, "status").to_string(),
                str_field(task, "description").to_string(),
                task.get("assignedTo")
                    .and_then(|v| v.as_str())
                    .unwrap_or("-")
                    .to_string(),
                format!(
                    "{}/{}",
                    num_field(task, "retryCount"),
                    num_field(task, "maxRetries")
                ),
            ]);
        }
    }
    let pagination = value.get("pagination").cloned().unwrap_or_default();
    format!(
        "{out}\nshowing {}-{} of {} (offset {}, limit {})",
        num_field(&pagination, "rangeStart"),
        num_field(&pagination, "rangeEnd"),
        num_field(&pagination, "total"),
        num_field(&pagination, "offset"),
        num_field(&pagination, "limit"),
    )
}

fn format_batch(value: &serde_json::Value) -> String {
    let mut out = format!(
        "batch {}: {} created, {} duplicates skipped",
        str_field(value, "batchId"),
        num_field(value, "tasksCreated"),
        num_field(value, "duplicatesSkipped"),
    );
    if let Some(errors) = value.get("errors").and_then(|v| v.as_array()) {
        for error in errors {
            out.push_str(&format!(
                "\n  record {}: {}",
                num_field(error, "index"),
                str_field(error, "error")
            ));
        }
    }
    out
}

const PROJECT_PARAM: ParamSpec =
    ParamSpec::required("project", ParamKind::String, "Project name or id").positional();
const TYPE_PARAM: ParamSpec =
    ParamSpec::required("type", ParamKind::String, "Task type name or id").positional();
const TASK_PARAM: ParamSpec =
    ParamSpec::required("task", ParamKind::String, "Task id").positional();

pub fn specs() -> Vec<CommandSpec> {
    vec![
        CommandSpec {
            name: "createTask",
            rpc_name: "create_task",
            cli_name: "create-task",
            description: "Create a task from a task type",
            params: vec![
                PROJECT_PARAM,
                TYPE_PARAM,
                ParamSpec::optional(
                    "description",
                    ParamKind::String,
                    "Short human description; defaults to the type name",
                ),
                ParamSpec::optional(
                    "instructions",
                    ParamKind::String,
                    "Instructions; required for types without a template",
                ),
                ParamSpec::optional(
                    "variables",
                    ParamKind::Object,
                    "Template variables as a string map",
                ),
                ParamSpec::optional("id", ParamKind::String, "Caller-supplied task id"),
            ],
            handler: create_task,
            format_human: format_create_outcome,
        },
        CommandSpec {
            name: "createTasksBulk",
            rpc_name: "create_tasks_bulk",
            cli_name: "create-tasks-bulk",
            description: "Create many tasks; per-record errors do not abort the batch",
            params: vec![
                PROJECT_PARAM,
                ParamSpec::required(
                    "tasks",
                    ParamKind::Array,
                    "Task records (objects with type/description/instructions/variables)",
                )
                .positional(),
                ParamSpec::optional(
                    "type",
                    ParamKind::String,
                    "Default task type for records that do not name one",
                ),
            ],
            handler: create_tasks_bulk,
            format_human: format_batch,
        },
        CommandSpec {
            name: "getTask",
            rpc_name: "get_task",
            cli_name: "get-task",
            description: "Fetch a task with its attempt history",
            params: vec![PROJECT_PARAM, TASK_PARAM],
            handler: get_task,
            format_human: format_task,
        },
        CommandSpec {
            name: "listTasks",
            rpc_name: "list_tasks",
            cli_name: "list-tasks",
            description: "List a project's tasks with pagination",
            params: vec![
                PROJECT_PARAM,
                ParamSpec::optional("status", ParamKind::String, "Filter by status")
                    .with_choices(&["queued", "running", "completed", "failed"]),
                ParamSpec::optional("type", ParamKind::String, "Filter by task type"),
                ParamSpec::optional("assignedTo", ParamKind::String, "Filter by agent name"),
                ParamSpec::optional("batch", ParamKind::String, "Filter by batch id"),
                ParamSpec::optional("limit", ParamKind::Number, "Page size").with_default("50"),
                ParamSpec::optional("offset", ParamKind::Number, "Items to skip")
                    .with_default("0"),
            ],
            handler: list_tasks,
            format_human: format_task_page,
        },
    ]
}
