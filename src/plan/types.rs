//! 计划与任务类型定义
//!
//! Task（单次工作单元）、TaskAnalysis（分类结果）、ExecutionPlan / PlanStep（执行计划状态机）以及计划修订建议。

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::llm::BackendRole;
use crate::tools::FileOperation;

/// 任务类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TaskKind {
    Code,
    Image,
    General,
    CodeAnalysis,
    Command,
}

/// 以 `/` 开头的命令输入
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommandOperation {
    /// `/models`
    ListModels,
    /// `/switch <chat|code|vision>`
    Switch(BackendRole),
    /// `/plan`
    ShowPlan,
    /// `/resume`
    Resume,
    /// 无法识别的命令原文
    Unknown(String),
}

/// 分类结果：由关键词启发式与长度确定性推导，不持久化
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskAnalysis {
    pub kind: TaskKind,
    pub target_backend: BackendRole,
    pub requires_switch: bool,
    pub validation_required: bool,
    /// 1..=10
    pub complexity: u8,
}

impl TaskAnalysis {
    /// 分类失败时的兜底：general / 不切换
    pub fn fallback() -> Self {
        Self {
            kind: TaskKind::General,
            target_backend: BackendRole::Chat,
            requires_switch: false,
            validation_required: false,
            complexity: 1,
        }
    }
}

/// 代码上下文（可选）
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeContext {
    pub file: Option<PathBuf>,
    pub language: Option<String>,
    pub snippet: Option<String>,
}

/// 单个工作单元；派发后不可变，只被编排器消费一次
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub kind: TaskKind,
    pub prompt: String,
    pub objective: String,
    pub target_backend: BackendRole,
    pub requires_backend_switch: bool,
    pub code_context: Option<CodeContext>,
    pub command_operation: Option<CommandOperation>,
}

impl Task {
    pub fn from_analysis(text: &str, analysis: &TaskAnalysis) -> Self {
        Self {
            id: format!("task_{}", uuid::Uuid::new_v4()),
            kind: analysis.kind,
            prompt: text.to_string(),
            objective: text.to_string(),
            target_backend: analysis.target_backend,
            requires_backend_switch: analysis.requires_switch,
            code_context: None,
            command_operation: None,
        }
    }

    pub fn with_command(mut self, op: CommandOperation) -> Self {
        self.command_operation = Some(op);
        self
    }

    pub fn with_code_context(mut self, ctx: CodeContext) -> Self {
        self.code_context = Some(ctx);
        self
    }
}

/// 计划状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    Planning,
    Executing,
    Completed,
    Failed,
    Retrying,
}

impl PlanStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PlanStatus::Completed | PlanStatus::Failed)
    }
}

/// 步骤状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

/// 步骤类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepType {
    Code,
    Analysis,
    Validation,
    General,
}

impl fmt::Display for StepType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepType::Code => write!(f, "code"),
            StepType::Analysis => write!(f, "analysis"),
            StepType::Validation => write!(f, "validation"),
            StepType::General => write!(f, "general"),
        }
    }
}

/// 计划中的一个步骤
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanStep {
    pub id: String,
    pub description: String,
    pub step_type: StepType,
    pub requires_backend: BackendRole,
    /// 前置步骤 ID；全部 completed 后才能进入 in_progress
    pub dependencies: Vec<String>,
    pub status: StepStatus,
    pub retry_count: u32,
    pub result: Option<String>,
    pub last_error: Option<String>,
    /// 代码步骤产生并已写入工作区的文件修改
    #[serde(default)]
    pub changes: Vec<FileOperation>,
}

impl PlanStep {
    pub fn new(
        id: impl Into<String>,
        description: impl Into<String>,
        step_type: StepType,
        requires_backend: BackendRole,
    ) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            step_type,
            requires_backend,
            dependencies: Vec::new(),
            status: StepStatus::Pending,
            retry_count: 0,
            result: None,
            last_error: None,
            changes: Vec::new(),
        }
    }

    pub fn with_dependencies(mut self, deps: Vec<String>) -> Self {
        self.dependencies = deps;
        self
    }
}

/// 计划修订类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RevisionKind {
    Modify,
    Insert,
    Remove,
    Reorder,
}

/// 一条计划修订建议
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanRevision {
    pub kind: RevisionKind,
    /// Insert / Modify 携带的新步骤内容
    pub step: Option<PlanStep>,
    /// Modify / Remove / Reorder 的目标步骤
    pub target_step_id: Option<String>,
    /// Insert / Reorder 的目标位置
    pub position: Option<usize>,
    pub reason: String,
}

impl PlanRevision {
    pub fn modify(step: PlanStep, reason: impl Into<String>) -> Self {
        Self {
            kind: RevisionKind::Modify,
            target_step_id: Some(step.id.clone()),
            step: Some(step),
            position: None,
            reason: reason.into(),
        }
    }

    pub fn insert(step: PlanStep, position: usize, reason: impl Into<String>) -> Self {
        Self {
            kind: RevisionKind::Insert,
            step: Some(step),
            target_step_id: None,
            position: Some(position),
            reason: reason.into(),
        }
    }

    pub fn remove(step_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            kind: RevisionKind::Remove,
            step: None,
            target_step_id: Some(step_id.into()),
            position: None,
            reason: reason.into(),
        }
    }

    pub fn reorder(step_id: impl Into<String>, position: usize, reason: impl Into<String>) -> Self {
        Self {
            kind: RevisionKind::Reorder,
            step: None,
            target_step_id: Some(step_id.into()),
            position: Some(position),
            reason: reason.into(),
        }
    }
}

impl fmt::Display for PlanRevision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let target = self
            .target_step_id
            .as_deref()
            .or_else(|| self.step.as_ref().map(|s| s.description.as_str()))
            .unwrap_or("-");
        write!(f, "{:?} {}: {}", self.kind, target, self.reason)
    }
}

/// 计划修订无法应用的原因
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RevisionError {
    #[error("Step not found: {0}")]
    StepNotFound(String),
    #[error("Step {0} is already completed or running")]
    StepLocked(String),
    #[error("Position {0} is before the current step")]
    PositionLocked(usize),
    #[error("Revision is missing its step payload")]
    MissingStep,
}

/// 执行计划；生命周期内由编排器独占
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionPlan {
    pub id: String,
    pub objective: String,
    pub steps: Vec<PlanStep>,
    pub current_step_index: usize,
    pub status: PlanStatus,
    /// 需要人工处理的修订建议（校验失败且自动修正未能解决时）
    #[serde(default)]
    pub pending_revisions: Vec<PlanRevision>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl ExecutionPlan {
    pub fn new(objective: impl Into<String>, steps: Vec<PlanStep>) -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        Self {
            id: format!("plan_{}", uuid::Uuid::new_v4()),
            objective: objective.into(),
            steps,
            current_step_index: 0,
            status: PlanStatus::Planning,
            pending_revisions: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = chrono::Utc::now().timestamp_millis();
    }

    pub fn current_step(&self) -> Option<&PlanStep> {
        self.steps.get(self.current_step_index)
    }

    pub fn current_step_mut(&mut self) -> Option<&mut PlanStep> {
        self.steps.get_mut(self.current_step_index)
    }

    pub fn step(&self, id: &str) -> Option<&PlanStep> {
        self.steps.iter().find(|s| s.id == id)
    }

    fn index_of(&self, id: &str) -> Option<usize> {
        self.steps.iter().position(|s| s.id == id)
    }

    pub fn step_types(&self) -> Vec<StepType> {
        self.steps.iter().map(|s| s.step_type).collect()
    }

    pub fn completed_count(&self) -> usize {
        self.steps
            .iter()
            .filter(|s| s.status == StepStatus::Completed)
            .count()
    }

    /// 返回该步骤第一个未完成的依赖（不存在的依赖同样视为未满足）
    pub fn unmet_dependency(&self, step: &PlanStep) -> Option<String> {
        step.dependencies
            .iter()
            .find(|dep| {
                self.step(dep)
                    .map(|d| d.status != StepStatus::Completed)
                    .unwrap_or(true)
            })
            .cloned()
    }

    /// 只允许修改当前步骤及之后、且尚未完成的步骤
    fn check_mutable(&self, index: usize) -> Result<(), RevisionError> {
        let step = &self.steps[index];
        if index < self.current_step_index
            || matches!(step.status, StepStatus::Completed | StepStatus::InProgress)
        {
            return Err(RevisionError::StepLocked(step.id.clone()));
        }
        Ok(())
    }

    /// 应用一条修订；已完成的步骤不会被重排或重新执行
    pub fn apply_revision(&mut self, revision: &PlanRevision) -> Result<(), RevisionError> {
        match revision.kind {
            RevisionKind::Insert => {
                let step = revision.step.clone().ok_or(RevisionError::MissingStep)?;
                let position = revision
                    .position
                    .unwrap_or(self.steps.len())
                    .min(self.steps.len());
                if position < self.current_step_index {
                    return Err(RevisionError::PositionLocked(position));
                }
                self.steps.insert(position, step);
            }
            RevisionKind::Remove => {
                let id = revision.target_step_id.as_deref().unwrap_or_default();
                let index = self
                    .index_of(id)
                    .ok_or_else(|| RevisionError::StepNotFound(id.to_string()))?;
                self.check_mutable(index)?;
                let removed = self.steps.remove(index);
                // 依赖被删除步骤的步骤改为继承它的依赖
                for step in self.steps.iter_mut() {
                    if let Some(pos) = step.dependencies.iter().position(|d| d == &removed.id) {
                        step.dependencies.remove(pos);
                        for dep in &removed.dependencies {
                            if !step.dependencies.contains(dep) {
                                step.dependencies.push(dep.clone());
                            }
                        }
                    }
                }
            }
            RevisionKind::Reorder => {
                let id = revision.target_step_id.as_deref().unwrap_or_default();
                let index = self
                    .index_of(id)
                    .ok_or_else(|| RevisionError::StepNotFound(id.to_string()))?;
                self.check_mutable(index)?;
                let position = revision.position.unwrap_or(index).min(self.steps.len() - 1);
                if position < self.current_step_index {
                    return Err(RevisionError::PositionLocked(position));
                }
                let step = self.steps.remove(index);
                self.steps.insert(position, step);
            }
            RevisionKind::Modify => {
                let replacement = revision.step.clone().ok_or(RevisionError::MissingStep)?;
                let id = revision
                    .target_step_id
                    .clone()
                    .unwrap_or_else(|| replacement.id.clone());
                let index = self
                    .index_of(&id)
                    .ok_or_else(|| RevisionError::StepNotFound(id.clone()))?;
                self.check_mutable(index)?;
                let step = &mut self.steps[index];
                step.description = replacement.description;
                step.step_type = replacement.step_type;
                step.requires_backend = replacement.requires_backend;
                step.status = StepStatus::Pending;
            }
        }
        self.touch();
        Ok(())
    }

    /// 用户可读的计划摘要
    pub fn summary(&self) -> String {
        let mut s = format!(
            "Plan {} [{:?}] {}/{} steps completed\n",
            self.id,
            self.status,
            self.completed_count(),
            self.steps.len()
        );
        for (i, step) in self.steps.iter().enumerate() {
            let marker = if i == self.current_step_index && !self.status.is_terminal() {
                ">"
            } else {
                " "
            };
            s.push_str(&format!(
                "{} {}. [{:?}] ({}) {}\n",
                marker,
                i + 1,
                step.status,
                step.step_type,
                step.description
            ));
        }
        s
    }
}
