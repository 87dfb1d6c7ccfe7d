//! 计划适配器：根据历史计划模式主动建议修改计划，并标记高风险的步骤转移
//!
//! 匹配条件：步骤类型序列相似度与目标上下文相似度都超过阈值（默认 0.7）。
//! 整份计划模式与整个计划比较；2~3 步的窗口模式与当前计划中长度相近的连续子窗口比较。
//! - 成功模式中出现、当前计划缺失的步骤类型 → 建议插入（置信度 = 模式成功率）
//! - 失败模式中出现、成功模式中没有的待执行步骤 → 建议删除（置信度 = 1 - 模式成功率）
//! - 相邻类型转移的历史失败率超过 0.3 → 风险（>0.7 high，>0.4 medium，否则 low）

use std::collections::HashSet;

use crate::config::AdapterSection;
use crate::llm::TaskClassifier;
use crate::plan::patterns::{context_signature, sequence_similarity, PatternScope, PlanPattern};
use crate::plan::{ExecutionPlan, PlanPatternStore, PlanRevision, PlanStep, StepStatus, StepType};

/// 一条带置信度的修改建议
#[derive(Debug, Clone, PartialEq)]
pub struct PlanModification {
    pub revision: PlanRevision,
    pub confidence: f64,
    pub pattern_key: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RiskSeverity {
    Low,
    Medium,
    High,
}

impl RiskSeverity {
    pub fn from_failure_rate(rate: f64) -> Self {
        if rate > 0.7 {
            RiskSeverity::High
        } else if rate > 0.4 {
            RiskSeverity::Medium
        } else {
            RiskSeverity::Low
        }
    }
}

/// 高风险的相邻步骤转移
#[derive(Debug, Clone, PartialEq)]
pub struct PlanRisk {
    pub from_step: String,
    pub to_step: String,
    pub from_type: StepType,
    pub to_type: StepType,
    pub failure_rate: f64,
    pub severity: RiskSeverity,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlanSuggestions {
    /// 按置信度降序
    pub modifications: Vec<PlanModification>,
    /// 按严重程度降序
    pub risks: Vec<PlanRisk>,
}

pub struct PlanAdapter {
    store: PlanPatternStore,
    config: AdapterSection,
}

impl PlanAdapter {
    pub fn new(store: PlanPatternStore, config: AdapterSection) -> Self {
        Self { store, config }
    }

    pub fn store(&self) -> &PlanPatternStore {
        &self.store
    }

    /// 计划结束后学习
    pub fn learn_from_plan_execution(&mut self, plan: &ExecutionPlan, success: bool) {
        self.store.record(plan, success);
        tracing::info!(
            "Learned from plan {} ({} steps, success={}); {} plan patterns known",
            plan.id,
            plan.steps.len(),
            success,
            self.store.len()
        );
    }

    /// 匹配的模式及其在当前计划中的对齐起点
    fn matching_patterns(&self, plan: &ExecutionPlan) -> Vec<(&PlanPattern, usize)> {
        let types = plan.step_types();
        let signature = context_signature(&plan.objective);
        self.store
            .patterns()
            .filter(|p| p.context_similarity(&signature) > self.config.similarity)
            .filter_map(|p| {
                let pattern_types = p.step_types();
                let (offset, similarity) = match p.scope {
                    PatternScope::Full => (0, sequence_similarity(&pattern_types, &types)),
                    PatternScope::Window => best_window(&pattern_types, &types)?,
                };
                (similarity > self.config.similarity).then_some((p, offset))
            })
            .collect()
    }

    pub fn suggest_plan_modifications(&self, plan: &ExecutionPlan) -> PlanSuggestions {
        let matches = self.matching_patterns(plan);
        let (successful, failing): (Vec<(&PlanPattern, usize)>, Vec<(&PlanPattern, usize)>) =
            matches.into_iter().partition(|(p, _)| p.success_rate() >= 0.5);

        let mut modifications = Vec::new();
        let present: HashSet<StepType> = plan.step_types().into_iter().collect();

        let mut proposed_types = HashSet::new();
        let mut taken_ids: HashSet<String> = plan.steps.iter().map(|s| s.id.clone()).collect();
        for (pattern, offset) in &successful {
            for (index, missing) in pattern.steps.iter().enumerate() {
                if present.contains(&missing.step_type) || !proposed_types.insert(missing.step_type) {
                    continue;
                }
                let position = (offset + index)
                    .min(plan.steps.len())
                    .max(plan.current_step_index);
                let id = next_step_id(&mut taken_ids, plan.steps.len());
                let backend = TaskClassifier::backend_for_step(&missing.description, missing.step_type);
                let mut step = PlanStep::new(id, missing.description.clone(), missing.step_type, backend);
                if let Some(previous) = position.checked_sub(1).and_then(|i| plan.steps.get(i)) {
                    step.dependencies = vec![previous.id.clone()];
                }
                modifications.push(PlanModification {
                    revision: PlanRevision::insert(
                        step,
                        position,
                        format!(
                            "successful runs of similar plans include a {} step",
                            missing.step_type
                        ),
                    ),
                    confidence: pattern.success_rate(),
                    pattern_key: pattern.key.clone(),
                });
            }
        }

        let successful_types: HashSet<StepType> = successful
            .iter()
            .flat_map(|(p, _)| p.steps.iter().map(|s| s.step_type))
            .collect();
        let mut proposed_removals = HashSet::new();
        if plan.steps.len() > 1 {
            for (pattern, _) in failing.iter().filter(|(p, _)| p.counts.failure_rate() > 0.5) {
                let failing_types: HashSet<StepType> =
                    pattern.steps.iter().map(|s| s.step_type).collect();
                for step in plan.steps.iter().skip(plan.current_step_index) {
                    if step.status != StepStatus::Pending
                        || !failing_types.contains(&step.step_type)
                        || successful_types.contains(&step.step_type)
                        || !proposed_removals.insert(step.id.clone())
                    {
                        continue;
                    }
                    modifications.push(PlanModification {
                        revision: PlanRevision::remove(
                            step.id.clone(),
                            format!("{} steps correlate with failure in similar plans", step.step_type),
                        ),
                        confidence: 1.0 - pattern.success_rate(),
                        pattern_key: pattern.key.clone(),
                    });
                }
            }
        }

        modifications.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

        let mut risks: Vec<PlanRisk> = plan
            .steps
            .windows(2)
            .filter(|pair| pair[1].status != StepStatus::Completed)
            .filter_map(|pair| {
                let counts = self.store.transition(pair[0].step_type, pair[1].step_type)?;
                let failure_rate = counts.failure_rate();
                (counts.total() > 0 && failure_rate > self.config.risk_failure_rate).then(|| PlanRisk {
                    from_step: pair[0].id.clone(),
                    to_step: pair[1].id.clone(),
                    from_type: pair[0].step_type,
                    to_type: pair[1].step_type,
                    failure_rate,
                    severity: RiskSeverity::from_failure_rate(failure_rate),
                })
            })
            .collect();
        risks.sort_by(|a, b| {
            b.severity
                .cmp(&a.severity)
                .then(b.failure_rate.total_cmp(&a.failure_rate))
        });

        PlanSuggestions {
            modifications,
            risks,
        }
    }
}

/// 当前计划中与窗口模式最相似的连续子窗口（长度为模式长度 ±1）：(起点, 相似度)
fn best_window(pattern: &[StepType], plan: &[StepType]) -> Option<(usize, f64)> {
    let width = pattern.len();
    let mut best: Option<(usize, f64)> = None;
    for len in width.saturating_sub(1).max(1)..=width + 1 {
        if len > plan.len() {
            break;
        }
        for start in 0..=plan.len() - len {
            let similarity = sequence_similarity(pattern, &plan[start..start + len]);
            if best.map_or(true, |(_, b)| similarity > b) {
                best = Some((start, similarity));
            }
        }
    }
    best
}

fn next_step_id(taken: &mut HashSet<String>, base: usize) -> String {
    let mut n = base + 1;
    loop {
        let id = format!("step_{}", n);
        if taken.insert(id.clone()) {
            return id;
        }
        n += 1;
    }
}
