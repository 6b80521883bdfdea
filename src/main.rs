//! Foreman entry point.
//!
//! One binary, three run modes: `rpc` (JSON-RPC tool server on stdio, the
//! default), `http` (REST API), and `cli` (one-shot command). The mode
//! comes from `--mode` or `FOREMAN_MODE`; invoking any subcommand implies
//! cli mode. Exit codes: 0 success, 1 unhandled error, 130 interrupt.

use std::time::Duration;

use foreman::adapters::cli::{self, OutputFormat};
use foreman::adapters::http::HttpServer;
use foreman::adapters::rpc::RpcServer;
use foreman::commands::CommandContext;
use foreman::infrastructure::config::{ConfigLoader, RunMode};
use foreman::infrastructure::logging;

#[tokio::main]
async fn main() {
    let matches = cli::build_cli().get_matches();

    let mut config = match ConfigLoader::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {e:#}");
            std::process::exit(1);
        }
    };
    if let Some(mode) = matches.get_one::<String>("mode") {
        if let Some(mode) = RunMode::from_str(mode) {
            config.mode = mode;
        }
    }
    let mode = if matches.subcommand().is_some() {
        RunMode::Cli
    } else {
        config.mode
    };

    // CLI runs want human-readable diagnostics on stderr.
    let pretty = config.log_pretty || mode == RunMode::Cli;
    if let Err(e) = logging::init(&config.log_level, pretty) {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }

    let ctx = match CommandContext::bootstrap(config).await {
        Ok(ctx) => ctx,
        Err(e) => {
            eprintln!("error: {e:#}");
            std::process::exit(1);
        }
    };

    let code = match mode {
        RunMode::Cli => {
            let Some((name, sub_matches)) = matches.subcommand() else {
                eprintln!("error: no command given (see --help)");
                std::process::exit(1);
            };
            let format = sub_matches
                .get_one::<String>("format")
                .map(|f| OutputFormat::from_flag(f))
                .unwrap_or(OutputFormat::Human);
            cli::run(ctx, name, sub_matches, format).await
        }
        RunMode::Http => {
            spawn_reaper(ctx.clone());
            let server = HttpServer::new(ctx);
            run_until_interrupt(server.serve()).await
        }
        RunMode::Rpc => {
            spawn_reaper(ctx.clone());
            let server = RpcServer::new(ctx);
            run_until_interrupt(async move { server.run().await }).await
        }
    };
    std::process::exit(code);
}

/// Drive a server future, translating ctrl-c into exit code 130.
async fn run_until_interrupt<F>(server: F) -> i32
where
    F: std::future::Future<Output = anyhow::Result<()>>,
{
    tokio::select! {
        result = server => match result {
            Ok(()) => 0,
            Err(e) => {
                eprintln!("error: {e:#}");
                1
            }
        },
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("interrupted, shutting down");
            130
        }
    }
}

/// Periodic expired-lease sweep across active projects.
///
/// Dispatch already reclaims lazily; this keeps projects with sparse
/// traffic from holding dead leases indefinitely.
fn spawn_reaper(ctx: std::sync::Arc<CommandContext>) {
    let interval = Duration::from_secs(u64::from(ctx.config.reaper_interval) * 60);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick fires immediately; skip it.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let projects = match ctx.projects.list(false).await {
                Ok(projects) => projects,
                Err(e) => {
                    tracing::warn!(error = %e, "reaper could not list projects");
                    continue;
                }
            };
            for project in projects {
                if let Err(e) = ctx.tasks.cleanup_expired_leases(project.id).await {
                    tracing::warn!(project = %project.name, error = %e, "reaper sweep failed");
                }
            }
            let _ = ctx.sessions.cleanup_expired().await;
        }
    });
}
