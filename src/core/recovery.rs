//! 错误恢复引擎
//!
//! 根据 OrchestratorError 类型返回 RecoveryAction，供编排器决定是重试步骤、修订计划、继续还是终止。

use crate::core::{OrchestratorError, RecoveryAction};

/// 将错误映射为可执行动作
#[derive(Debug, Default)]
pub struct RecoveryEngine;

impl RecoveryEngine {
    pub fn new() -> Self {
        Self
    }

    pub fn handle(&self, err: &OrchestratorError) -> RecoveryAction {
        match err {
            OrchestratorError::Llm(_)
            | OrchestratorError::BackendSwitchFailed(_)
            | OrchestratorError::FileOperation(_)
            | OrchestratorError::ValidationFailed(_) => RecoveryAction::RetryStep,
            OrchestratorError::DependencyNotSatisfied { step, dependency } => RecoveryAction::RevisePlan(
                format!("{} must complete before {}", dependency, step),
            ),
            OrchestratorError::Memory(_) => RecoveryAction::Continue,
            OrchestratorError::NoActivePlan
            | OrchestratorError::EmptyPlan
            | OrchestratorError::RollbackFailed(_)
            | OrchestratorError::WorkerStopped => RecoveryAction::Abort,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::LlmError;
    use crate::memory::MemoryError;
    use crate::tools::EditError;

    #[test]
    fn test_backend_failures_retry_the_step() {
        let engine = RecoveryEngine::new();
        let err = OrchestratorError::from(LlmError::Timeout);
        assert_eq!(engine.handle(&err), RecoveryAction::RetryStep);
        let err = OrchestratorError::BackendSwitchFailed("llava".into());
        assert_eq!(engine.handle(&err), RecoveryAction::RetryStep);
        let err = OrchestratorError::from(EditError::SearchNotFound("a.rs".into()));
        assert_eq!(engine.handle(&err), RecoveryAction::RetryStep);
    }

    #[test]
    fn test_dependency_requests_revision() {
        let engine = RecoveryEngine::new();
        let err = OrchestratorError::DependencyNotSatisfied {
            step: "step_1".into(),
            dependency: "step_3".into(),
        };
        match engine.handle(&err) {
            RecoveryAction::RevisePlan(reason) => assert!(reason.contains("step_3")),
            other => panic!("Expected RevisePlan, got {:?}", other),
        }
    }

    #[test]
    fn test_memory_errors_continue() {
        let engine = RecoveryEngine::new();
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only");
        let err = OrchestratorError::from(MemoryError::from(io));
        assert_eq!(engine.handle(&err), RecoveryAction::Continue);
    }

    #[test]
    fn test_rollback_failure_aborts() {
        let engine = RecoveryEngine::new();
        let err = OrchestratorError::RollbackFailed(EditError::PathEscape("../x".into()));
        assert_eq!(engine.handle(&err), RecoveryAction::Abort);
        assert_eq!(engine.handle(&OrchestratorError::NoActivePlan), RecoveryAction::Abort);
    }

    #[test]
    fn test_edit_rollback_failure_converts_to_rollback_error() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only");
        let err = OrchestratorError::from(EditError::RollbackFailed {
            path: "src/lib.rs".into(),
            source: io,
        });
        assert!(matches!(err, OrchestratorError::RollbackFailed(_)));
        assert_eq!(RecoveryEngine::new().handle(&err), RecoveryAction::Abort);
    }
}
