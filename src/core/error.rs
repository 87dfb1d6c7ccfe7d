//! 编排器错误类型与恢复动作
//!
//! 与 RecoveryEngine 配合：根据 OrchestratorError 决定重试步骤 / 修订计划 / 继续 / 终止。

use thiserror::Error;

use crate::llm::LlmError;
use crate::memory::MemoryError;
use crate::tools::EditError;

/// 编排器边界上的错误
#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("No execution plan available")]
    NoActivePlan,

    #[error("Execution plan has no steps")]
    EmptyPlan,

    #[error("Dependency not satisfied: {step} requires {dependency}")]
    DependencyNotSatisfied { step: String, dependency: String },

    #[error("Backend switch failed: {0}")]
    BackendSwitchFailed(String),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Memory store error: {0}")]
    Memory(#[from] MemoryError),

    #[error("File operation failed: {0}")]
    FileOperation(EditError),

    /// 步骤校验失败且自动修正未能解决
    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    /// 回滚写入失败：工作区可能处于不一致状态
    #[error("Rollback failed: {0}")]
    RollbackFailed(EditError),

    #[error("Orchestrator worker stopped")]
    WorkerStopped,
}

impl From<EditError> for OrchestratorError {
    fn from(e: EditError) -> Self {
        if e.is_rollback_failure() {
            OrchestratorError::RollbackFailed(e)
        } else {
            OrchestratorError::FileOperation(e)
        }
    }
}

/// 恢复引擎根据错误类型给出的建议动作
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryAction {
    /// 在重试预算内重新执行当前步骤
    RetryStep,
    /// 需要修订计划（如依赖未满足）
    RevisePlan(String),
    /// 记录后继续
    Continue,
    /// 终止当前计划
    Abort,
}
