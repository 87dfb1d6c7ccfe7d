//! Switchboard - 多模型编排核心
//!
//! 入口：初始化日志与编排器，从 stdin 逐行读取任务，stdout 输出结果与状态行。
//! 用法：`switchboard [config.toml]`，输入 `/quit` 退出。

use std::path::PathBuf;

use anyhow::Context;
use switchboard::{core::create_orchestrator_builder, observability, OrchestratorHandle};
use tokio::io::{AsyncBufReadExt, BufReader};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let builder = create_orchestrator_builder(config_path);
    let queue_capacity = builder.config().orchestrator.queue_capacity;
    tracing::info!("Workspace: {}", builder.workspace().display());

    let orchestrator = builder.build().await;
    let (handle, worker) = OrchestratorHandle::spawn(orchestrator, queue_capacity);

    // 状态变化只进日志，stdout 只写结果
    let mut status_rx = handle.subscribe();
    tokio::spawn(async move {
        while status_rx.changed().await.is_ok() {
            let status = status_rx.borrow_and_update().clone();
            tracing::debug!("Status: {}", status);
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("Failed to read stdin")? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "/quit" || line == "/exit" {
            break;
        }
        let reply = handle
            .handle_task(line)
            .await
            .context("Orchestrator stopped")?;
        println!("{}", reply);
        println!("[{}]", handle.status());
    }

    handle.shutdown();
    worker.await.context("Orchestrator worker panicked")?;
    Ok(())
}
