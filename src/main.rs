//! Playbook 执行引擎 - 交互式命令行
//!
//! 入口：初始化日志、装配引擎，然后在 stdin 上跑一个简单的 REPL。
//! 普通输入作为用户消息续跑当前执行；以 `/` 开头的是命令（/help 查看）。

use std::sync::Arc;

use anyhow::Context;
use playbook_engine::config::load_config;
use playbook_engine::core::{run_until_shutdown, EngineBuilder, ShutdownManager};
use playbook_engine::execution::{
    BackendHint, ExecutionRouter, ResumeAction, ResumeRequest, StartRequest,
};
use playbook_engine::observability;
use tokio::io::{AsyncBufReadExt, BufReader};

const HELP: &str = "\
Commands:
  /start <playbook> [runner]   start a new execution
  /status                      show the current execution
  /list                        list all executions
  /approve <step> [comment]    approve a paused gate
  /reject <step> [comment]     reject a paused gate
  /cancel [reason]             cancel the current execution
  /rerun                       rerun the current execution with the same inputs
  /quit                        exit
Anything else is sent to the current execution as a user message.";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let config = load_config(None).context("Failed to load config")?;
    let engine = Arc::new(
        EngineBuilder::new(config)
            .build()
            .await
            .context("Failed to build engine")?,
    );

    let shutdown = Arc::new(ShutdownManager::new());
    let registry = Arc::clone(engine.registry());
    run_until_shutdown(shutdown, registry, async move {
        if let Err(e) = repl(engine).await {
            tracing::error!(error = %e, "repl failed");
        }
    })
    .await;

    Ok(())
}

async fn repl(engine: Arc<ExecutionRouter>) -> anyhow::Result<()> {
    println!("{HELP}");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut current: Option<String> = None;

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "/quit" {
            break;
        }
        if let Err(e) = handle_line(&engine, &mut current, line).await {
            println!("error: {e}");
        }
    }
    Ok(())
}

async fn handle_line(
    engine: &ExecutionRouter,
    current: &mut Option<String>,
    line: &str,
) -> anyhow::Result<()> {
    let Some(command) = line.strip_prefix('/') else {
        let id = current.as_deref().context("no execution; use /start first")?;
        let reply = engine.continue_execution(id, line).await?;
        println!("{}", reply.assistant_message);
        if reply.completed {
            println!("[completed]");
            if let Some(output) = reply.structured_output {
                println!("{}", serde_json::to_string_pretty(&output)?);
            }
        }
        return Ok(());
    };

    let mut parts = command.splitn(3, ' ');
    let name = parts.next().unwrap_or_default();
    let arg = parts.next();
    let rest = parts.next().map(str::to_string);

    match name {
        "help" => println!("{HELP}"),
        "start" => {
            let code = arg.context("usage: /start <playbook> [runner]")?;
            let mut request = StartRequest::new(code, "cli", "local");
            if rest.as_deref() == Some("runner") {
                request.backend_hint = BackendHint::Runner;
            }
            let started = engine.start(request).await?;
            println!("execution {} ({:?}, {})", started.execution_id, started.backend, started.status);
            if let Some(output) = started.initial_output {
                println!("{output}");
            }
            if let Some(error) = started.error {
                println!("first turn failed: {error}");
            }
            *current = Some(started.execution_id);
        }
        "status" => {
            let id = current.as_deref().context("no execution")?;
            let status = engine.get_status(id).await?;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        "list" => {
            for item in engine.list_executions(None).await? {
                println!("{}  {}  {}", item.execution_id, item.playbook_code, item.status);
            }
        }
        "approve" | "reject" => {
            let id = current.as_deref().context("no execution")?;
            let action = if name == "approve" {
                ResumeAction::Approve
            } else {
                ResumeAction::Reject
            };
            let changed = engine
                .resume(
                    id,
                    ResumeRequest {
                        action,
                        step_id: arg.map(str::to_string),
                        comment: rest,
                    },
                )
                .await?;
            println!("{} -> {}", changed.execution_id, changed.status);
        }
        "cancel" => {
            let id = current.as_deref().context("no execution")?;
            let reason = match (arg, rest) {
                (Some(a), Some(r)) => Some(format!("{a} {r}")),
                (Some(a), None) => Some(a.to_string()),
                _ => None,
            };
            let changed = engine.cancel(id, reason).await?;
            println!("{} -> {}", changed.execution_id, changed.status);
        }
        "rerun" => {
            let id = current.as_deref().context("no execution")?;
            let started = engine.rerun(id, Default::default()).await?;
            println!("execution {} ({:?}, {})", started.execution_id, started.backend, started.status);
            if let Some(output) = started.initial_output {
                println!("{output}");
            }
            if let Some(error) = started.error {
                println!("first turn failed: {error}");
            }
            *current = Some(started.execution_id);
        }
        other => println!("unknown command: /{other}"),
    }
    Ok(())
}
