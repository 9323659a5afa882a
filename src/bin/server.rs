//! Playbook 执行引擎 HTTP 服务
//!
//! 启动: cargo run --bin playbook-server --features web
//! 监听地址取自 [server].bind，默认 127.0.0.1:8080

use std::sync::Arc;

use anyhow::Context;
use playbook_engine::config::load_config;
use playbook_engine::core::{run_until_shutdown, EngineBuilder, ShutdownManager};
use playbook_engine::observability;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let config_path = std::env::args().nth(1).map(std::path::PathBuf::from);
    let config = load_config(config_path).context("Failed to load config")?;
    let bind = config.server.bind.clone();

    let engine = Arc::new(
        EngineBuilder::new(config)
            .build()
            .await
            .context("Failed to build engine")?,
    );
    let registry = Arc::clone(engine.registry());
    let app = playbook_engine::web::router(engine);

    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("Failed to bind {bind}"))?;
    tracing::info!("Playbook server listening on http://{}", bind);

    let shutdown = Arc::new(ShutdownManager::new());
    run_until_shutdown(shutdown, registry, async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "server error");
        }
    })
    .await;

    Ok(())
}
