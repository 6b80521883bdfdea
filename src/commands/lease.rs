//! Queue commands: claim, peek, complete, fail, extend, and agent views.

use std::sync::Arc;

use serde::Deserialize;
use uuid::Uuid;

use crate::commands::format::{short_id, str_field, table};
use crate::commands::task::format_task;
use crate::commands::{
    parse_args, to_value, CommandArgs, CommandContext, CommandSpec, HandlerFuture, ParamKind,
    ParamSpec,
};
use crate::domain::models::TaskResult;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClaimArgs {
    project: String,
    #[serde(default)]
    agent_name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProjectRefArgs {
    project: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CompleteArgs {
    project: String,
    task: Uuid,
    agent_name: String,
    #[serde(default)]
    output: Option<String>,
    #[serde(default)]
    result: Option<TaskResult>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FailArgs {
    project: String,
    task: Uuid,
    agent_name: String,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    result: Option<TaskResult>,
    #[serde(default = "default_true")]
    can_retry: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExtendArgs {
    project: String,
    task: Uuid,
    agent_name: String,
    minutes: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AgentStatusArgs {
    project: String,
    agent_name: String,
}

fn default_true() -> bool {
    true
}

fn get_next_task(ctx: Arc<CommandContext>, args: CommandArgs) -> HandlerFuture {
    Box::pin(async move {
        let args: ClaimArgs = parse_args(args)?;
        let project = ctx.projects.validate_access_by_ref(&args.project).await?;
        let outcome = ctx.tasks.get_next(&project, args.agent_name).await?;
        to_value(&outcome)
    })
}

fn peek_next_task(ctx: Arc<CommandContext>, args: CommandArgs) -> HandlerFuture {
    Box::pin(async move {
        let args: ProjectRefArgs = parse_args(args)?;
        let project = ctx.projects.resolve(&args.project).await?;
        let task = ctx.tasks.peek_next(project.id).await?;
        to_value(&serde_json::json!({ "task": task }))
    })
}

fn complete_task(ctx: Arc<CommandContext>, args: CommandArgs) -> HandlerFuture {
    Box::pin(async move {
        let args: CompleteArgs = parse_args(args)?;
        let project = ctx.projects.resolve(&args.project).await?;
        let result = args
            .result
            .unwrap_or_else(|| TaskResult::ok(args.output.unwrap_or_default()));
        let task = ctx
            .tasks
            .complete(project.id, args.task, &args.agent_name, result)
            .await?;
        to_value(&task)
    })
}

fn fail_task(ctx: Arc<CommandContext>, args: CommandArgs) -> HandlerFuture {
    Box::pin(async move {
        let args: FailArgs = parse_args(args)?;
        let project = ctx.projects.resolve(&args.project).await?;
        let result = args
            .result
            .unwrap_or_else(|| TaskResult::err(args.error.unwrap_or_else(|| "task failed".to_string())));
        let task = ctx
            .tasks
            .fail(project.id, args.task, &args.agent_name, result, args.can_retry)
            .await?;
        to_value(&task)
    })
}

fn extend_lease(ctx: Arc<CommandContext>, args: CommandArgs) -> HandlerFuture {
    Box::pin(async move {
        let args: ExtendArgs = parse_args(args)?;
        let project = ctx.projects.resolve(&args.project).await?;
        let task = ctx
            .tasks
            .extend_lease(project.id, args.task, &args.agent_name, args.minutes)
            .await?;
        to_value(&task)
    })
}

fn list_active_agents(ctx: Arc<CommandContext>, args: CommandArgs) -> HandlerFuture {
    Box::pin(async move {
        let args: ProjectRefArgs = parse_args(args)?;
        let project = ctx.projects.resolve(&args.project).await?;
        let agents = ctx.agents.list_active(project.id).await?;
        to_value(&agents)
    })
}

fn get_agent_status(ctx: Arc<CommandContext>, args: CommandArgs) -> HandlerFuture {
    Box::pin(async move {
        let args: AgentStatusArgs = parse_args(args)?;
        let project = ctx.projects.resolve(&args.project).await?;
        let status = ctx.agents.status(&args.agent_name, project.id).await?;
        to_value(&serde_json::json!({
            "agentName": args.agent_name,
            "active": status.is_some(),
            "agent": status,
        }))
    })
}

fn format_claim(value: &serde_json::Value) -> String {
    match value.get("task") {
        Some(task) if !task.is_null() => format!(
            "claimed as {}\n{}",
            str_field(value, "agentName"),
            format_task(task)
        ),
        _ => format!(
            "no queued tasks (agent name {})",
            str_field(value, "agentName")
        ),
    }
}

fn format_peek(value: &serde_json::Value) -> String {
    match value.get("task") {
        Some(task) if !task.is_null() => format!("next up:\n{}", format_task(task)),
        _ => "queue is empty".to_string(),
    }
}

fn format_agent_list(value: &serde_json::Value) -> String {
    let mut out = table(&["AGENT", "TASK", "LEASE EXPIRES"]);
    if let Some(agents) = value.as_array() {
        for agent in agents {
            out.add_row(vec![
                str_field(agent, "name").to_string(),
                short_id(agent, "currentTaskId"),
                str_field(agent, "leaseExpiresAt").to_string(),
            ]);
        }
    }
    out.to_string()
}

fn format_agent_status(value: &serde_json::Value) -> String {
    if value
        .get("active")
        .and_then(serde_json::Value::as_bool)
        .unwrap_or(false)
    {
        let agent = value.get("agent").cloned().unwrap_or_default();
        format!(
            "{} is working task {} (lease expires {})",
            str_field(value, "agentName"),
            str_field(&agent, "currentTaskId"),
            str_field(&agent, "leaseExpiresAt"),
        )
    } else {
        format!("{} holds no lease", str_field(value, "agentName"))
    }
}

const PROJECT_PARAM: ParamSpec =
    ParamSpec::required("project", ParamKind::String, "Project name or id").positional();
const TASK_PARAM: ParamSpec =
    ParamSpec::required("task", ParamKind::String, "Task id").positional();
const AGENT_PARAM: ParamSpec = ParamSpec::required(
    "agentName",
    ParamKind::String,
    "Agent holding the lease",
)
.positional();

pub fn specs() -> Vec<CommandSpec> {
    vec![
        CommandSpec {
            name: "getNextTask",
            rpc_name: "get_next_task",
            cli_name: "get-next-task",
            description: "Atomically claim the next queued task under a lease",
            params: vec![
                PROJECT_PARAM,
                ParamSpec::optional(
                    "agentName",
                    ParamKind::String,
                    "Agent name; minted when absent",
                )
                .positional(),
            ],
            handler: get_next_task,
            format_human: format_claim,
        },
        CommandSpec {
            name: "peekNextTask",
            rpc_name: "peek_next_task",
            cli_name: "peek-next-task",
            description: "Show what dispatch would return next, without claiming",
            params: vec![PROJECT_PARAM],
            handler: peek_next_task,
            format_human: format_peek,
        },
        CommandSpec {
            name: "completeTask",
            rpc_name: "complete_task",
            cli_name: "complete-task",
            description: "Mark a running task completed (lease holder only)",
            params: vec![
                PROJECT_PARAM,
                TASK_PARAM,
                AGENT_PARAM,
                ParamSpec::optional("output", ParamKind::String, "Result output text"),
                ParamSpec::optional("result", ParamKind::Object, "Structured result record"),
            ],
            handler: complete_task,
            format_human: format_task,
        },
        CommandSpec {
            name: "failTask",
            rpc_name: "fail_task",
            cli_name: "fail-task",
            description: "Report a task failure; requeues while retry budget remains",
            params: vec![
                PROJECT_PARAM,
                TASK_PARAM,
                AGENT_PARAM,
                ParamSpec::optional("error", ParamKind::String, "Failure reason"),
                ParamSpec::optional("result", ParamKind::Object, "Structured result record"),
                ParamSpec::optional(
                    "canRetry",
                    ParamKind::Boolean,
                    "Whether the failure is retriable",
                )
                .with_default("true"),
            ],
            handler: fail_task,
            format_human: format_task,
        },
        CommandSpec {
            name: "extendLease",
            rpc_name: "extend_lease",
            cli_name: "extend-lease",
            description: "Extend a running task's lease",
            params: vec![
                PROJECT_PARAM,
                TASK_PARAM,
                AGENT_PARAM,
                ParamSpec::required("minutes", ParamKind::Number, "Minutes to add").positional(),
            ],
            handler: extend_lease,
            format_human: format_task,
        },
        CommandSpec {
            name: "listActiveAgents",
            rpc_name: "list_active_agents",
            cli_name: "list-active-agents",
            description: "Agents currently holding leases in a project",
            params: vec![PROJECT_PARAM],
            handler: list_active_agents,
            format_human: format_agent_list,
        },
        CommandSpec {
            name: "getAgentStatus",
            rpc_name: "get_agent_status",
            cli_name: "get-agent-status",
            description: "Whether an agent currently holds a lease, and on what",
            params: vec![PROJECT_PARAM, AGENT_PARAM],
            handler: get_agent_status,
            format_human: format_agent_status,
        },
    ]
}
