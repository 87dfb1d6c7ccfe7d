//! 校验输入与结果

use crate::correction::ErrorCorrection;
use crate::memory::AnalysisRecord;
use crate::plan::{ExecutionPlan, PlanRevision, PlanStep};
use crate::tools::{EditSnapshot, FileOperation};

/// 执行前或执行后
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationPhase {
    Pre,
    Post,
}

/// 一次步骤校验所需的全部输入；借用编排器持有的计划
#[derive(Debug, Clone, Copy)]
pub struct PlanValidationContext<'a> {
    pub plan: &'a ExecutionPlan,
    pub step: &'a PlanStep,
    pub phase: ValidationPhase,
    /// 本步骤已写入工作区的修改（执行前通常为空）
    pub changes: &'a [FileOperation],
    /// 修改前的文件内容，影响分析用它找出被删除的符号
    pub baseline: Option<&'a EditSnapshot>,
    /// 最近的分析结果，新的在前
    pub recent_analyses: &'a [AnalysisRecord],
}

impl<'a> PlanValidationContext<'a> {
    pub fn pre(plan: &'a ExecutionPlan, step: &'a PlanStep) -> Self {
        Self {
            plan,
            step,
            phase: ValidationPhase::Pre,
            changes: &[],
            baseline: None,
            recent_analyses: &[],
        }
    }

    pub fn post(
        plan: &'a ExecutionPlan,
        step: &'a PlanStep,
        changes: &'a [FileOperation],
        baseline: Option<&'a EditSnapshot>,
    ) -> Self {
        Self {
            plan,
            step,
            phase: ValidationPhase::Post,
            changes,
            baseline,
            recent_analyses: &[],
        }
    }

    pub fn with_analyses(mut self, analyses: &'a [AnalysisRecord]) -> Self {
        self.recent_analyses = analyses;
        self
    }

    pub fn objective(&self) -> &str {
        &self.plan.objective
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlanValidationResult {
    pub is_valid: bool,
    pub errors: Vec<ErrorCorrection>,
    pub suggestions: Vec<String>,
    pub requires_plan_revision: bool,
    pub suggested_revisions: Vec<PlanRevision>,
    /// 本次校验中成功应用的自动修正数
    pub corrections_applied: usize,
}

impl PlanValidationResult {
    pub fn valid(corrections_applied: usize) -> Self {
        Self {
            is_valid: true,
            corrections_applied,
            ..Default::default()
        }
    }

    /// 首个错误的简短描述，用作步骤的 last_error
    pub fn summary(&self) -> String {
        match self.errors.first() {
            Some(e) if self.errors.len() > 1 => format!("{} (+{} more)", e, self.errors.len() - 1),
            Some(e) => e.to_string(),
            None if self.is_valid => "valid".to_string(),
            None => "validation failed".to_string(),
        }
    }
}
