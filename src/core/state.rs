//! 状态投影：OrchestratorStatus
//!
//! 展示层只持有轻量的状态快照（阶段、活动计划、步骤进度、当前模型、最近错误），通过 watch 通道轮询；
//! 完整状态由 Orchestrator 维护。

use std::fmt;

use serde::Serialize;

/// 编排器阶段
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum OrchestratorPhase {
    Idle,
    Planning,
    Switching,
    Executing,
    Validating,
    Error,
}

/// 展示层看到的状态快照
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct OrchestratorStatus {
    pub phase: OrchestratorPhase,
    pub task_id: Option<String>,
    pub plan_id: Option<String>,
    /// 当前步骤序号（从 0 开始）
    pub step_index: Option<usize>,
    pub total_steps: usize,
    pub current_model: Option<String>,
    pub last_error: Option<String>,
}

impl Default for OrchestratorStatus {
    fn default() -> Self {
        Self {
            phase: OrchestratorPhase::Idle,
            task_id: None,
            plan_id: None,
            step_index: None,
            total_steps: 0,
            current_model: None,
            last_error: None,
        }
    }
}

impl fmt::Display for OrchestratorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.phase)?;
        if let (Some(plan), Some(index)) = (&self.plan_id, self.step_index) {
            write!(f, " | {} step {}/{}", plan, index + 1, self.total_steps)?;
        }
        if let Some(model) = &self.current_model {
            write!(f, " | model {}", model)?;
        }
        if let Some(err) = &self.last_error {
            write!(f, " | last error: {}", err)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_line() {
        let status = OrchestratorStatus {
            phase: OrchestratorPhase::Executing,
            plan_id: Some("plan_1".into()),
            step_index: Some(1),
            total_steps: 3,
            current_model: Some("codellama".into()),
            ..Default::default()
        };
        assert_eq!(status.to_string(), "Executing | plan_1 step 2/3 | model codellama");
        assert_eq!(OrchestratorStatus::default().to_string(), "Idle");
    }
}
