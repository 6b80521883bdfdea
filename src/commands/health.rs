//! Operational commands: health, lease stats, lease cleanup.

use std::sync::Arc;

use serde::Deserialize;

use crate::commands::format::{num_field, str_field};
use crate::commands::{
    parse_args, to_value, CommandArgs, CommandContext, CommandSpec, HandlerFuture, ParamKind,
    ParamSpec,
};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProjectRefArgs {
    project: String,
}

fn health_check(ctx: Arc<CommandContext>, _args: CommandArgs) -> HandlerFuture {
    Box::pin(async move {
        let report = ctx.storage.health_check().await?;
        to_value(&serde_json::json!({
            "healthy": report.healthy,
            "message": report.message,
            "storage": ctx.storage.name(),
            "version": env!("CARGO_PKG_VERSION"),
        }))
    })
}

fn get_lease_stats(ctx: Arc<CommandContext>, args: CommandArgs) -> HandlerFuture {
    Box::pin(async move {
        let args: ProjectRefArgs = parse_args(args)?;
        let project = ctx.projects.resolve(&args.project).await?;
        let stats = ctx.tasks.lease_stats(project.id).await?;
        to_value(&stats)
    })
}

fn cleanup_leases(ctx: Arc<CommandContext>, args: CommandArgs) -> HandlerFuture {
    Box::pin(async move {
        let args: ProjectRefArgs = parse_args(args)?;
        let project = ctx.projects.resolve(&args.project).await?;
        let report = ctx.tasks.cleanup_expired_leases(project.id).await?;
        to_value(&report)
    })
}

fn format_health(value: &serde_json::Value) -> String {
    let healthy = value
        .get("healthy")
        .and_then(serde_json::Value::as_bool)
        .unwrap_or(false);
    format!(
        "{} (storage: {}, version: {})\n  {}",
        if healthy { "healthy" } else { "UNHEALTHY" },
        str_field(value, "storage"),
        str_field(value, "version"),
        str_field(value, "message"),
    )
}

fn format_lease_stats(value: &serde_json::Value) -> String {
    let mut out = format!(
        "running: {} (expired: {})",
        num_field(value, "totalRunningTasks"),
        num_field(value, "expiredTasks"),
    );
    if let Some(by_status) = value.get("tasksByStatus").and_then(|v| v.as_object()) {
        for (status, count) in by_status {
            out.push_str(&format!("\n  {status}: {count}"));
        }
    }
    out
}

fn format_reclaim(value: &serde_json::Value) -> String {
    let reclaimed = value
        .get("reclaimedTasks")
        .and_then(|v| v.as_array())
        .map(Vec::len)
        .unwrap_or(0);
    let agents = value
        .get("cleanedAgents")
        .and_then(|v| v.as_array())
        .map(|a| {
            a.iter()
                .filter_map(|v| v.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        })
        .unwrap_or_default();
    if reclaimed == 0 {
        "no expired leases".to_string()
    } else {
        format!("reclaimed {reclaimed} task(s) from: {agents}")
    }
}

const PROJECT_PARAM: ParamSpec =
    ParamSpec::required("project", ParamKind::String, "Project name or id").positional();

pub fn specs() -> Vec<CommandSpec> {
    vec![
        CommandSpec {
            name: "healthCheck",
            rpc_name: "health_check",
            cli_name: "health-check",
            description: "Check storage backend health",
            params: vec![],
            handler: health_check,
            format_human: format_health,
        },
        CommandSpec {
            name: "getLeaseStats",
            rpc_name: "get_lease_stats",
            cli_name: "get-lease-stats",
            description: "Lease statistics for a project",
            params: vec![PROJECT_PARAM],
            handler: get_lease_stats,
            format_human: format_lease_stats,
        },
        CommandSpec {
            name: "cleanupLeases",
            rpc_name: "cleanup_leases",
            cli_name: "cleanup-leases",
            description: "Reclaim every expired lease in a project",
            params: vec![PROJECT_PARAM],
            handler: cleanup_leases,
            format_human: format_reclaim,
        },
    ]
}
