//! 进程内记忆存储（测试与无持久化运行）

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::correction::{ErrorCorrection, ErrorKind};
use crate::memory::{AnalysisRecord, CorrectionRecord, MemoryError, MemoryStore};
use crate::plan::ExecutionPlan;

#[derive(Default)]
struct Inner {
    active_plan: Option<ExecutionPlan>,
    corrections: Vec<CorrectionRecord>,
    analyses: Vec<AnalysisRecord>,
    plan_saves: usize,
}

#[derive(Default)]
pub struct InMemoryStore {
    inner: RwLock<Inner>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// save_plan_state 被调用的次数
    pub async fn plan_save_count(&self) -> usize {
        self.inner.read().await.plan_saves
    }
}

#[async_trait]
impl MemoryStore for InMemoryStore {
    async fn save_plan_state(&self, plan: &ExecutionPlan) -> Result<(), MemoryError> {
        let mut inner = self.inner.write().await;
        inner.active_plan = Some(plan.clone());
        inner.plan_saves += 1;
        Ok(())
    }

    async fn get_active_plan(&self) -> Result<Option<ExecutionPlan>, MemoryError> {
        Ok(self.inner.read().await.active_plan.clone())
    }

    async fn add_correction(&self, correction: &ErrorCorrection, success: bool) -> Result<(), MemoryError> {
        self.inner.write().await.corrections.push(CorrectionRecord {
            correction: correction.clone(),
            success,
            recorded_at: chrono::Utc::now().timestamp_millis(),
        });
        Ok(())
    }

    async fn get_corrections(&self, kind: Option<ErrorKind>) -> Result<Vec<CorrectionRecord>, MemoryError> {
        Ok(self
            .inner
            .read()
            .await
            .corrections
            .iter()
            .filter(|r| kind.map_or(true, |k| r.correction.error_kind == k))
            .cloned()
            .collect())
    }

    async fn record_analysis(&self, record: AnalysisRecord) -> Result<(), MemoryError> {
        self.inner.write().await.analyses.push(record);
        Ok(())
    }

    async fn recent_analyses(&self, limit: usize) -> Result<Vec<AnalysisRecord>, MemoryError> {
        Ok(self
            .inner
            .read()
            .await
            .analyses
            .iter()
            .rev()
            .take(limit)
            .cloned()
            .collect())
    }
}
