//! Mock 后端（用于测试与离线运行，无需模型服务）
//!
//! 按模型排队预设回复；队列为空时回显 prompt 首行。所有 generate / load / unload 调用记入 journal，便于断言切换顺序。

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use futures_util::stream;

use crate::llm::{ChunkStream, LlmError, ModelBackend, StreamChunk};

/// Mock 后端记录的一次调用
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendEvent {
    Generate { model: String, prompt: String },
    Load(String),
    Unload(String),
}

#[derive(Default)]
struct MockState {
    scripted: HashMap<String, VecDeque<Result<String, LlmError>>>,
    failing_loads: HashSet<String>,
    journal: Vec<BackendEvent>,
}

/// Mock 后端：预设回复 + 调用日志
#[derive(Default)]
pub struct MockBackend {
    models: Vec<String>,
    state: Mutex<MockState>,
}

fn lock(m: &Mutex<MockState>) -> MutexGuard<'_, MockState> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl MockBackend {
    pub fn new<I, S>(models: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            models: models.into_iter().map(Into::into).collect(),
            state: Mutex::new(MockState::default()),
        }
    }

    /// 为某个模型追加一条预设回复
    pub fn push_response(&self, model: &str, response: impl Into<String>) {
        lock(&self.state)
            .scripted
            .entry(model.to_string())
            .or_default()
            .push_back(Ok(response.into()));
    }

    /// 为某个模型追加一次失败
    pub fn push_error(&self, model: &str, error: LlmError) {
        lock(&self.state)
            .scripted
            .entry(model.to_string())
            .or_default()
            .push_back(Err(error));
    }

    /// 该模型的 load 调用一律失败
    pub fn fail_loads_for(&self, model: &str) {
        lock(&self.state).failing_loads.insert(model.to_string());
    }

    pub fn journal(&self) -> Vec<BackendEvent> {
        lock(&self.state).journal.clone()
    }

    /// 某模型被调用 generate 的次数
    pub fn generate_count(&self, model: &str) -> usize {
        lock(&self.state)
            .journal
            .iter()
            .filter(|e| matches!(e, BackendEvent::Generate { model: m, .. } if m == model))
            .count()
    }

    fn check_model(&self, model: &str) -> Result<(), LlmError> {
        if self.models.is_empty() || self.models.iter().any(|m| m == model) {
            Ok(())
        } else {
            Err(LlmError::ModelUnavailable(model.to_string()))
        }
    }
}

#[async_trait]
impl ModelBackend for MockBackend {
    async fn generate(&self, model: &str, prompt: &str) -> Result<String, LlmError> {
        self.check_model(model)?;
        let mut state = lock(&self.state);
        state.journal.push(BackendEvent::Generate {
            model: model.to_string(),
            prompt: prompt.to_string(),
        });
        if let Some(next) = state.scripted.get_mut(model).and_then(|q| q.pop_front()) {
            return next;
        }
        let first_line = prompt.lines().next().unwrap_or("(empty prompt)");
        Ok(format!("[{}] {}", model, first_line))
    }

    async fn generate_stream(&self, model: &str, prompt: &str) -> Result<ChunkStream, LlmError> {
        let content = self.generate(model, prompt).await?;
        let chunks = vec![
            Ok(StreamChunk {
                response: content,
                done: false,
            }),
            Ok(StreamChunk {
                response: String::new(),
                done: true,
            }),
        ];
        Ok(Box::pin(stream::iter(chunks)))
    }

    async fn load(&self, model: &str) -> Result<(), LlmError> {
        self.check_model(model)?;
        let mut state = lock(&self.state);
        state.journal.push(BackendEvent::Load(model.to_string()));
        if state.failing_loads.contains(model) {
            return Err(LlmError::Network(format!("failed to load {}", model)));
        }
        Ok(())
    }

    async fn unload(&self, model: &str) -> Result<(), LlmError> {
        lock(&self.state)
            .journal
            .push(BackendEvent::Unload(model.to_string()));
        Ok(())
    }

    async fn list_available(&self) -> Result<Vec<String>, LlmError> {
        Ok(self.models.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::collect_stream;

    #[tokio::test]
    async fn test_scripted_then_echo() {
        let backend = MockBackend::new(["llama3"]);
        backend.push_response("llama3", "scripted");
        assert_eq!(backend.generate("llama3", "hi").await.unwrap(), "scripted");
        assert_eq!(backend.generate("llama3", "hi\nthere").await.unwrap(), "[llama3] hi");
        assert_eq!(backend.generate_count("llama3"), 2);
    }

    #[tokio::test]
    async fn test_unknown_model_rejected() {
        let backend = MockBackend::new(["llama3"]);
        let err = backend.generate("gpt", "hi").await.unwrap_err();
        assert_eq!(err, LlmError::ModelUnavailable("gpt".into()));
    }

    #[tokio::test]
    async fn test_stream_wraps_generate() {
        let backend = MockBackend::new(["llava"]);
        backend.push_response("llava", "a cat");
        let stream = backend.generate_stream("llava", "describe").await.unwrap();
        assert_eq!(collect_stream(stream).await.unwrap(), "a cat");
    }
}
