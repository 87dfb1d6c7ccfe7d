//! 模型后端抽象
//!
//! 所有后端（Ollama HTTP / Mock）实现 ModelBackend：generate（非流式）、generate_stream（NDJSON 流式块）、
//! load / unload（两阶段切换）、list_available。

use std::fmt;
use std::pin::Pin;

use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 专用模型角色：对话 / 代码 / 视觉
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendRole {
    Chat,
    Code,
    Vision,
}

impl BackendRole {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "chat" | "general" | "conversation" => Some(Self::Chat),
            "code" | "coding" => Some(Self::Code),
            "vision" | "image" => Some(Self::Vision),
            _ => None,
        }
    }
}

impl fmt::Display for BackendRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendRole::Chat => write!(f, "chat"),
            BackendRole::Code => write!(f, "code"),
            BackendRole::Vision => write!(f, "vision"),
        }
    }
}

/// 流式响应的单个块：`{"response": "...", "done": false}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamChunk {
    #[serde(default)]
    pub response: String,
    #[serde(default)]
    pub done: bool,
}

/// 后端调用错误；任何非 2xx / 网络错误都视为当前步骤失败
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LlmError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("Invalid response: {0}")]
    Decode(String),

    #[error("Model not available: {0}")]
    ModelUnavailable(String),

    #[error("Request timed out")]
    Timeout,
}

pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<StreamChunk, LlmError>> + Send>>;

/// 模型后端 trait
#[async_trait]
pub trait ModelBackend: Send + Sync {
    /// 非流式生成
    async fn generate(&self, model: &str, prompt: &str) -> Result<String, LlmError>;

    /// 流式生成，返回 NDJSON 解析后的块流
    async fn generate_stream(&self, model: &str, prompt: &str) -> Result<ChunkStream, LlmError>;

    /// 将模型加载到内存（切换第二阶段）
    async fn load(&self, model: &str) -> Result<(), LlmError>;

    /// 从内存卸载模型（切换第一阶段）
    async fn unload(&self, model: &str) -> Result<(), LlmError>;

    /// 后端当前可用的模型 ID
    async fn list_available(&self) -> Result<Vec<String>, LlmError>;
}

/// 消费流直到 done，拼接全部 response 文本
pub async fn collect_stream(mut stream: ChunkStream) -> Result<String, LlmError> {
    let mut out = String::new();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        out.push_str(&chunk.response);
        if chunk.done {
            break;
        }
    }
    Ok(out)
}
