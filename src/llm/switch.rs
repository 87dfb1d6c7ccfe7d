//! 模型切换协调器
//!
//! 同一时刻只有一个后端处于激活状态。切换是两阶段协议：先卸载当前模型，再加载目标模型；
//! 调用方 await 完成后才继续执行步骤。

use std::sync::Arc;

use crate::config::BackendsSection;
use crate::llm::{BackendRole, LlmError, ModelBackend};

pub struct ModelSwitchCoordinator {
    backend: Arc<dyn ModelBackend>,
    models: BackendsSection,
    active: Option<BackendRole>,
    switch_count: u64,
}

impl ModelSwitchCoordinator {
    pub fn new(backend: Arc<dyn ModelBackend>, models: BackendsSection) -> Self {
        Self {
            backend,
            models,
            active: None,
            switch_count: 0,
        }
    }

    pub fn backend(&self) -> &Arc<dyn ModelBackend> {
        &self.backend
    }

    pub fn active_role(&self) -> Option<BackendRole> {
        self.active
    }

    /// 当前激活模型 ID（未激活任何模型时为 None）
    pub fn current_model(&self) -> Option<&str> {
        self.active.map(|role| self.models.model_for(role))
    }

    pub fn model_for(&self, role: BackendRole) -> &str {
        self.models.model_for(role)
    }

    pub fn switch_count(&self) -> u64 {
        self.switch_count
    }

    /// 确保目标角色处于激活状态；已激活时不做任何事
    pub async fn ensure_active(&mut self, target: BackendRole) -> Result<(), LlmError> {
        if self.active == Some(target) {
            return Ok(());
        }

        if let Some(previous) = self.active {
            let previous_model = self.models.model_for(previous).to_string();
            // 卸载失败时保持原模型激活，不加载新模型
            self.backend.unload(&previous_model).await?;
            self.active = None;
        }

        let target_model = self.models.model_for(target).to_string();
        self.backend.load(&target_model).await?;
        self.active = Some(target);
        self.switch_count += 1;
        tracing::info!("Switched active backend to {} ({})", target, target_model);
        Ok(())
    }

    /// 对外的 `switch(backendId) -> bool` 语义：失败只记日志
    pub async fn switch(&mut self, target: BackendRole) -> bool {
        match self.ensure_active(target).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("Backend switch to {} failed: {}", target, e);
                false
            }
        }
    }

    /// 列出后端可用模型
    pub async fn list_available(&self) -> Result<Vec<String>, LlmError> {
        self.backend.list_available().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{BackendEvent, MockBackend};

    fn coordinator(mock: Arc<MockBackend>) -> ModelSwitchCoordinator {
        ModelSwitchCoordinator::new(mock, BackendsSection::default())
    }

    #[tokio::test]
    async fn test_switch_unloads_before_loading() {
        let mock = Arc::new(MockBackend::new(["llama3", "codellama", "llava"]));
        let mut switcher = coordinator(mock.clone());

        switcher.ensure_active(BackendRole::Chat).await.unwrap();
        switcher.ensure_active(BackendRole::Code).await.unwrap();
        switcher.ensure_active(BackendRole::Code).await.unwrap();

        assert_eq!(
            mock.journal(),
            vec![
                BackendEvent::Load("llama3".into()),
                BackendEvent::Unload("llama3".into()),
                BackendEvent::Load("codellama".into()),
            ]
        );
        assert_eq!(switcher.current_model(), Some("codellama"));
        assert_eq!(switcher.switch_count(), 2);
    }

    #[tokio::test]
    async fn test_failed_load_leaves_nothing_active() {
        let mock = Arc::new(MockBackend::new(["llama3", "codellama", "llava"]));
        mock.fail_loads_for("llava");
        let mut switcher = coordinator(mock.clone());

        assert!(switcher.switch(BackendRole::Chat).await);
        assert!(!switcher.switch(BackendRole::Vision).await);
        assert_eq!(switcher.active_role(), None);
        assert_eq!(switcher.current_model(), None);
    }
}
