//! 编排器 actor 句柄
//!
//! 编排器本身在独立任务中串行处理命令；外部只持有可克隆的 OrchestratorHandle：
//! 命令经有界 mpsc 通道进入，结果经 oneshot 返回，状态快照经 watch 通道发布。

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::core::{Orchestrator, OrchestratorError, OrchestratorStatus};

/// 展示层 → 编排器 的命令
#[derive(Debug)]
pub enum Command {
    HandleTask {
        text: String,
        reply: oneshot::Sender<String>,
    },
    CurrentModel {
        reply: oneshot::Sender<Option<String>>,
    },
}

#[derive(Clone)]
pub struct OrchestratorHandle {
    tx: mpsc::Sender<Command>,
    status: watch::Receiver<OrchestratorStatus>,
    shutdown: CancellationToken,
}

impl OrchestratorHandle {
    /// 在后台任务中运行编排器
    pub fn spawn(mut orchestrator: Orchestrator, queue_capacity: usize) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<Command>(queue_capacity.max(1));
        let status = orchestrator.subscribe();
        let shutdown = CancellationToken::new();
        let token = shutdown.clone();

        let worker = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        tracing::info!("Orchestrator shutting down");
                        break;
                    }
                    cmd = rx.recv() => {
                        let Some(cmd) = cmd else { break };
                        match cmd {
                            Command::HandleTask { text, reply } => {
                                let result = orchestrator.handle_task(&text).await;
                                let _ = reply.send(result);
                            }
                            Command::CurrentModel { reply } => {
                                let _ = reply.send(orchestrator.current_model().await);
                            }
                        }
                    }
                }
            }
        });

        (
            Self {
                tx,
                status,
                shutdown,
            },
            worker,
        )
    }

    /// 提交一条输入并等待结果文本
    pub async fn handle_task(&self, text: impl Into<String>) -> Result<String, OrchestratorError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::HandleTask {
                text: text.into(),
                reply,
            })
            .await
            .map_err(|_| OrchestratorError::WorkerStopped)?;
        rx.await.map_err(|_| OrchestratorError::WorkerStopped)
    }

    pub async fn current_model(&self) -> Result<Option<String>, OrchestratorError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::CurrentModel { reply })
            .await
            .map_err(|_| OrchestratorError::WorkerStopped)?;
        rx.await.map_err(|_| OrchestratorError::WorkerStopped)
    }

    /// 最新状态快照
    pub fn status(&self) -> OrchestratorStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<OrchestratorStatus> {
        self.status.clone()
    }

    /// 停止后台任务；正在处理的命令会先完成
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}
