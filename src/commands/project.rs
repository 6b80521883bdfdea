//! Project commands.

use std::sync::Arc;

use serde::Deserialize;

use crate::commands::format::{num_field, str_field, table};
use crate::commands::{
    parse_args, to_value, CommandArgs, CommandContext, CommandSpec, HandlerFuture, ParamKind,
    ParamSpec,
};
use crate::services::project_service::{
    CreateProjectInput, ProjectConfigPatch, UpdateProjectInput,
};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateProjectArgs {
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    instructions: Option<String>,
    #[serde(default)]
    default_max_retries: Option<u32>,
    #[serde(default)]
    default_lease_duration_minutes: Option<u32>,
    #[serde(default)]
    reaper_interval_minutes: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProjectRefArgs {
    project: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateProjectArgs {
    project: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    instructions: Option<String>,
    #[serde(default)]
    default_max_retries: Option<u32>,
    #[serde(default)]
    default_lease_duration_minutes: Option<u32>,
    #[serde(default)]
    reaper_interval_minutes: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListProjectsArgs {
    #[serde(default)]
    include_closed: bool,
}

fn create_project(ctx: Arc<CommandContext>, args: CommandArgs) -> HandlerFuture {
    Box::pin(async move {
        let args: CreateProjectArgs = parse_args(args)?;
        let config = ProjectConfigPatch {
            default_max_retries: args.default_max_retries,
            default_lease_duration_minutes: args.default_lease_duration_minutes,
            reaper_interval_minutes: args.reaper_interval_minutes,
        };
        let project = ctx
            .projects
            .create(CreateProjectInput {
                name: args.name,
                description: args.description.unwrap_or_default(),
                instructions: args.instructions,
                config: Some(config),
            })
            .await?;
        to_value(&project)
    })
}

fn get_project(ctx: Arc<CommandContext>, args: CommandArgs) -> HandlerFuture {
    Box::pin(async move {
        let args: ProjectRefArgs = parse_args(args)?;
        let project = ctx.projects.resolve(&args.project).await?;
        to_value(&project)
    })
}

fn update_project(ctx: Arc<CommandContext>, args: CommandArgs) -> HandlerFuture {
    Box::pin(async move {
        let args: UpdateProjectArgs = parse_args(args)?;
        let project = ctx.projects.resolve(&args.project).await?;
        let config = ProjectConfigPatch {
            default_max_retries: args.default_max_retries,
            default_lease_duration_minutes: args.default_lease_duration_minutes,
            reaper_interval_minutes: args.reaper_interval_minutes,
        };
        let updated = ctx
            .projects
            .update(
                project.id,
                UpdateProjectInput {
                    name: args.name,
                    description: args.description,
                    instructions: args.instructions,
                    config: Some(config),
                },
            )
            .await?;
        to_value(&updated)
    })
}

fn list_projects(ctx: Arc<CommandContext>, args: CommandArgs) -> HandlerFuture {
    Box::pin(async move {
        let args: ListProjectsArgs = parse_args(args)?;
        let projects = ctx.projects.list(args.include_closed).await?;
        to_value(&projects)
    })
}

fn close_project(ctx: Arc<CommandContext>, args: CommandArgs) -> HandlerFuture {
    Box::pin(async move {
        let args: ProjectRefArgs = parse_args(args)?;
        let project = ctx.projects.resolve(&args.project).await?;
        let closed = ctx.projects.close(project.id).await?;
        to_value(&closed)
    })
}

fn delete_project(ctx: Arc<CommandContext>, args: CommandArgs) -> HandlerFuture {
    Box::pin(async move {
        let args: ProjectRefArgs = parse_args(args)?;
        let project = ctx.projects.resolve(&args.project).await?;
        ctx.projects.delete(project.id).await?;
        to_value(&serde_json::json!({ "deleted": project.id }))
    })
}

fn get_project_stats(ctx: Arc<CommandContext>, args: CommandArgs) -> HandlerFuture {
    Box::pin(async move {
        let args: ProjectRefArgs = parse_args(args)?;
        let project = ctx.projects.resolve(&args.project).await?;
        let status = ctx.projects.status(project.id).await?;
        to_value(&status)
    })
}

fn format_project(value: &serde_json::Value) -> String {
    let stats = value.get("stats").cloned().unwrap_or_default();
    format!(
        "{} [{}]\n  id: {}\n  tasks: {} total, {} queued, {} running, {} completed, {} failed",
        str_field(value, "name"),
        str_field(value, "status"),
        str_field(value, "id"),
        num_field(&stats, "total"),
        num_field(&stats, "queued"),
        num_field(&stats, "running"),
        num_field(&stats, "completed"),
        num_field(&stats, "failed"),
    )
}

fn format_project_list(value: &serde_json::Value) -> String {
    let mut out = table(&["NAME", "STATUS", "TOTAL", "QUEUED", "RUNNING", "DONE", "FAILED"]);
    if let Some(projects) = value.as_array() {
        for project in projects {
            let stats = project.get("stats").cloned().unwrap_or_default();
            out.add_row(vec![
                str_field(project, "name").to_string(),
                str_field(project, "status").to_string(),
                num_field(&stats, "total").to_string(),
                num_field(&stats, "queued").to_string(),
                num_field(&stats, "running").to_string(),
                num_field(&stats, "completed").to_string(),
                num_field(&stats, "failed").to_string(),
            ]);
        }
    }
    out.to_string()
}

fn format_project_status(value: &serde_json::Value) -> String {
    let project = value.get("project").cloned().unwrap_or_default();
    format!(
        "{}\n  queue depth: {}\n  active agents: {}",
        format_project(&project),
        num_field(value, "queueDepth"),
        num_field(value, "activeAgents"),
    )
}

fn format_deleted(value: &serde_json::Value) -> String {
    format!("deleted project {}", str_field(value, "deleted"))
}

const PROJECT_PARAM: ParamSpec = ParamSpec::required(
    "project",
    ParamKind::String,
    "Project name or id",
)
.positional();

pub fn specs() -> Vec<CommandSpec> {
    vec![
        CommandSpec {
            name: "createProject",
            rpc_name: "create_project",
            cli_name: "create-project",
            description: "Create a new project",
            params: vec![
                ParamSpec::required("name", ParamKind::String, "Unique project name").positional(),
                ParamSpec::optional("description", ParamKind::String, "Project description")
                    .positional(),
                ParamSpec::optional(
                    "instructions",
                    ParamKind::String,
                    "Instructions shown to agents working this project",
                ),
                ParamSpec::optional(
                    "defaultMaxRetries",
                    ParamKind::Number,
                    "Default retry budget for new task types (0-10)",
                ),
                ParamSpec::optional(
                    "defaultLeaseDurationMinutes",
                    ParamKind::Number,
                    "Default lease duration for new task types (1-1440)",
                ),
                ParamSpec::optional(
                    "reaperIntervalMinutes",
                    ParamKind::Number,
                    "Interval between expired-lease sweeps (1-60)",
                ),
            ],
            handler: create_project,
            format_human: format_project,
        },
        CommandSpec {
            name: "getProject",
            rpc_name: "get_project",
            cli_name: "get-project",
            description: "Fetch a project with live task statistics",
            params: vec![PROJECT_PARAM],
            handler: get_project,
            format_human: format_project,
        },
        CommandSpec {
            name: "updateProject",
            rpc_name: "update_project",
            cli_name: "update-project",
            description: "Update a project's name, description, instructions, or defaults",
            params: vec![
                PROJECT_PARAM,
                ParamSpec::optional(
                    "name",
                    ParamKind::String,
                    "New project name; must not collide with any other project",
                ),
                ParamSpec::optional("description", ParamKind::String, "New description"),
                ParamSpec::optional("instructions", ParamKind::String, "New instructions"),
                ParamSpec::optional(
                    "defaultMaxRetries",
                    ParamKind::Number,
                    "New default retry budget (0-10)",
                ),
                ParamSpec::optional(
                    "defaultLeaseDurationMinutes",
                    ParamKind::Number,
                    "New default lease duration (1-1440)",
                ),
                ParamSpec::optional(
                    "reaperIntervalMinutes",
                    ParamKind::Number,
                    "New reaper sweep interval (1-60)",
                ),
            ],
            handler: update_project,
            format_human: format_project,
        },
        CommandSpec {
            name: "listProjects",
            rpc_name: "list_projects",
            cli_name: "list-projects",
            description: "List projects",
            params: vec![ParamSpec::optional(
                "includeClosed",
                ParamKind::Boolean,
                "Include closed projects",
            )
            .with_default("false")],
            handler: list_projects,
            format_human: format_project_list,
        },
        CommandSpec {
            name: "closeProject",
            rpc_name: "close_project",
            cli_name: "close-project",
            description: "Close a project; no new tasks or claims are accepted",
            params: vec![PROJECT_PARAM],
            handler: close_project,
            format_human: format_project,
        },
        CommandSpec {
            name: "deleteProject",
            rpc_name: "delete_project",
            cli_name: "delete-project",
            description: "Delete a project and everything under it",
            params: vec![PROJECT_PARAM],
            handler: delete_project,
            format_human: format_deleted,
        },
        CommandSpec {
            name: "getProjectStats",
            rpc_name: "get_project_stats",
            cli_name: "get-project-stats",
            description: "Project status with live queue depth and active agents",
            params: vec![PROJECT_PARAM],
            handler: get_project_stats,
            format_human: format_project_status,
        },
    ]
}
