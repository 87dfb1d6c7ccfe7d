//! 记忆存储接口
//!
//! 编排核心写入：每步执行后的计划快照、修正结果、分析结果；读取：活动计划（崩溃恢复）、
//! 历史修正（预热修正模式库）、最近分析结果（上下文冲突检查）。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::correction::{ErrorCorrection, ErrorKind};
use crate::plan::ExecutionPlan;

#[derive(Error, Debug)]
pub enum MemoryError {
    #[error("Memory store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Memory store serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// 一次修正尝试的结果（只含实际应用的那个修复）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrectionRecord {
    pub correction: ErrorCorrection,
    pub success: bool,
    pub recorded_at: i64,
}

/// 分析结果（分析步骤或代码分析任务的输出）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisRecord {
    /// 产生该结果的计划，直接任务为 None
    pub plan_id: Option<String>,
    pub source: String,
    pub summary: String,
    pub recorded_at: i64,
}

impl AnalysisRecord {
    pub fn new(plan_id: Option<&str>, source: &str, summary: &str) -> Self {
        Self {
            plan_id: plan_id.map(str::to_string),
            source: source.to_string(),
            summary: summary.to_string(),
            recorded_at: chrono::Utc::now().timestamp_millis(),
        }
    }
}

#[async_trait]
pub trait MemoryStore: Send + Sync {
    /// 保存计划快照，并将其设为活动计划
    async fn save_plan_state(&self, plan: &ExecutionPlan) -> Result<(), MemoryError>;

    /// 最近保存的计划（可能已结束，由调用方判断）
    async fn get_active_plan(&self) -> Result<Option<ExecutionPlan>, MemoryError>;

    async fn add_correction(&self, correction: &ErrorCorrection, success: bool) -> Result<(), MemoryError>;

    /// 历史修正，按记录顺序；可按错误类型过滤
    async fn get_corrections(&self, kind: Option<ErrorKind>) -> Result<Vec<CorrectionRecord>, MemoryError>;

    async fn record_analysis(&self, record: AnalysisRecord) -> Result<(), MemoryError>;

    /// 最近的分析结果，最新在前
    async fn recent_analyses(&self, limit: usize) -> Result<Vec<AnalysisRecord>, MemoryError>;
}
