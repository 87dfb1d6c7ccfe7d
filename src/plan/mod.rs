//! 计划层：任务与执行计划数据模型、计划分解、计划模式库与计划适配器

pub mod adapter;
pub mod patterns;
pub mod planner;
pub mod types;

pub use adapter::{PlanAdapter, PlanModification, PlanRisk, PlanSuggestions, RiskSeverity};
pub use patterns::{OutcomeCounts, PlanPattern, PlanPatternStore};
pub use planner::{decomposition_prompt, parse_decomposition, parse_fenced_edits, step_prompt};
pub use types::{
    CodeContext, CommandOperation, ExecutionPlan, PlanRevision, PlanStatus, PlanStep, RevisionError,
    RevisionKind, StepStatus, StepType, Task, TaskAnalysis, TaskKind,
};
