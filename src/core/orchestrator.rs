//! 编排器：任务分类、计划生成与逐步执行
//!
//! 一次只处理一个任务。简单任务直接交给目标后端；复杂任务先让对话模型分解为执行计划，再逐步执行：
//! 计划适配建议 → 依赖检查 → 切换后端 → 执行前校验 → 调用后端 → 应用代码修改 → 执行后校验 → 持久化。
//! 步骤失败时在重试预算内回到 pending，预算用尽则计划失败。

use std::sync::Arc;

use tokio::sync::watch;

use crate::config::OrchestratorSection;
use crate::core::{
    OrchestratorError, OrchestratorPhase, OrchestratorStatus, RecoveryAction, RecoveryEngine,
};
use crate::correction::SharedSwitcher;
use crate::llm::{BackendRole, ModelBackend, TaskClassifier};
use crate::memory::{AnalysisRecord, AuditLog, MemoryError, MemoryStore};
use crate::plan::{
    decomposition_prompt, parse_decomposition, parse_fenced_edits, step_prompt, CommandOperation,
    ExecutionPlan, PlanAdapter, PlanRevision, PlanStatus, RevisionKind, RiskSeverity, StepStatus,
    StepType, Task, TaskAnalysis, TaskKind,
};
use crate::tools::FileEditor;
use crate::validation::{PlanValidationContext, PlanValidationResult, PlanValidator};

/// 一次 execute_next_step 的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// 当前步骤完成，计划继续
    Advanced,
    /// 当前步骤失败，将在重试预算内重新执行
    Retrying(String),
    /// 计划被修订（如依赖重排），本次未执行步骤
    Revised(String),
    PlanCompleted,
    PlanFailed(String),
}

/// 构造编排器所需的组件
pub struct OrchestratorParts {
    pub config: OrchestratorSection,
    /// 记忆冲突检查读取的最近分析条数
    pub analysis_window: usize,
    pub switcher: SharedSwitcher,
    pub validator: PlanValidator,
    pub adapter: PlanAdapter,
    pub memory: Arc<dyn MemoryStore>,
    pub editor: FileEditor,
    pub audit: Option<AuditLog>,
}

pub struct Orchestrator {
    config: OrchestratorSection,
    analysis_window: usize,
    switcher: SharedSwitcher,
    validator: PlanValidator,
    adapter: PlanAdapter,
    memory: Arc<dyn MemoryStore>,
    editor: FileEditor,
    audit: Option<AuditLog>,
    recovery: RecoveryEngine,
    plan: Option<ExecutionPlan>,
    current_task: Option<Task>,
    status: watch::Sender<OrchestratorStatus>,
}

impl Orchestrator {
    pub fn from_parts(parts: OrchestratorParts) -> Self {
        let (status, _) = watch::channel(OrchestratorStatus::default());
        Self {
            config: parts.config,
            analysis_window: parts.analysis_window,
            switcher: parts.switcher,
            validator: parts.validator,
            adapter: parts.adapter,
            memory: parts.memory,
            editor: parts.editor,
            audit: parts.audit,
            recovery: RecoveryEngine::new(),
            plan: None,
            current_task: None,
            status,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<OrchestratorStatus> {
        self.status.subscribe()
    }

    pub fn status(&self) -> OrchestratorStatus {
        self.status.borrow().clone()
    }

    pub fn active_plan(&self) -> Option<&ExecutionPlan> {
        self.plan.as_ref()
    }

    pub fn adapter(&self) -> &PlanAdapter {
        &self.adapter
    }

    pub fn validator(&self) -> &PlanValidator {
        &self.validator
    }

    /// 当前激活的模型 ID
    pub async fn current_model(&self) -> Option<String> {
        self.switcher
            .lock()
            .await
            .current_model()
            .map(str::to_string)
    }

    /// 处理一条用户输入，返回给展示层的状态文本。错误不会越过这里。
    pub async fn handle_task(&mut self, text: &str) -> String {
        let text = text.trim();
        if text.is_empty() {
            return "Nothing to do".to_string();
        }

        let analysis = TaskClassifier::classify(text);
        let mut task = Task::from_analysis(text, &analysis);
        match task.kind {
            TaskKind::Command => task = task.with_command(TaskClassifier::parse_command(text)),
            TaskKind::Code | TaskKind::CodeAnalysis => {
                if let Some(ctx) = TaskClassifier::code_context(text) {
                    task = task.with_code_context(ctx);
                }
            }
            _ => {}
        }
        tracing::info!(
            "Task {} classified as {:?} (complexity {}, backend {})",
            task.id,
            task.kind,
            analysis.complexity,
            analysis.target_backend
        );
        self.current_task = Some(task.clone());
        self.status.send_modify(|s| s.last_error = None);

        let reply = match self.dispatch(&task, &analysis).await {
            Ok(reply) => {
                self.publish(OrchestratorPhase::Idle, self.plan.as_ref());
                reply
            }
            Err(e) => {
                tracing::warn!("Task {} failed: {}", task.id, e);
                self.publish_error(e.to_string());
                format!("Error: {}", e)
            }
        };
        self.current_task = None;
        reply
    }

    async fn dispatch(&mut self, task: &Task, analysis: &TaskAnalysis) -> Result<String, OrchestratorError> {
        if let Some(op) = &task.command_operation {
            return self.run_command(op).await;
        }
        // 直接执行没有校验环节，需要校验的任务一律走计划
        if analysis.complexity >= self.config.plan_min_complexity || analysis.validation_required {
            self.create_plan(&task.objective).await?;
            return self.run_plan().await;
        }
        self.execute_direct(task).await
    }

    async fn run_command(&mut self, op: &CommandOperation) -> Result<String, OrchestratorError> {
        match op {
            CommandOperation::ListModels => {
                let switcher = self.switcher.lock().await;
                let models = switcher.list_available().await?;
                Ok(format!(
                    "Available models: {}\nActive: {}",
                    models.join(", "),
                    switcher.current_model().unwrap_or("none")
                ))
            }
            CommandOperation::Switch(role) => {
                let mut switcher = self.switcher.lock().await;
                let model = switcher.model_for(*role).to_string();
                if switcher.switch(*role).await {
                    Ok(format!("Switched to {} ({})", role, model))
                } else {
                    Err(OrchestratorError::BackendSwitchFailed(format!("{} ({})", role, model)))
                }
            }
            CommandOperation::ShowPlan => Ok(match &self.plan {
                Some(plan) => describe_plan(plan),
                None => "No active plan".to_string(),
            }),
            CommandOperation::Resume => self.resume().await,
            CommandOperation::Unknown(raw) => Ok(format!("Unknown command: {}", raw)),
        }
    }

    async fn execute_direct(&mut self, task: &Task) -> Result<String, OrchestratorError> {
        self.publish(OrchestratorPhase::Switching, None);
        let (backend, model) = self.activate(task.target_backend).await?;
        self.publish(OrchestratorPhase::Executing, None);
        let prompt = self.prompt_with_context(task).await;
        let response = backend.generate(&model, &prompt).await?;
        if task.kind == TaskKind::CodeAnalysis {
            self.remember_analysis(AnalysisRecord::new(None, &task.id, &response))
                .await;
        }
        Ok(response)
    }

    /// 任务提到的文件存在于工作区时，把文件内容附在 prompt 后
    async fn prompt_with_context(&self, task: &Task) -> String {
        let Some(file) = task.code_context.as_ref().and_then(|c| c.file.as_ref()) else {
            return task.prompt.clone();
        };
        match self.editor.read(file).await {
            Ok(Some(content)) => format!(
                "{}\n\nFile {}:\n```\n{}\n```",
                task.prompt,
                file.display(),
                content.trim_end()
            ),
            Ok(None) => task.prompt.clone(),
            Err(e) => {
                tracing::debug!("Ignoring code context {}: {}", file.display(), e);
                task.prompt.clone()
            }
        }
    }

    /// 激活目标后端（必要时先卸载当前模型），返回后端与模型 ID
    async fn activate(&self, role: BackendRole) -> Result<(Arc<dyn ModelBackend>, String), OrchestratorError> {
        let mut switcher = self.switcher.lock().await;
        switcher
            .ensure_active(role)
            .await
            .map_err(|e| OrchestratorError::BackendSwitchFailed(format!("{}: {}", role, e)))?;
        Ok((switcher.backend().clone(), switcher.model_for(role).to_string()))
    }

    /// 让对话模型分解目标，生成新的活动计划
    pub async fn create_plan(&mut self, objective: &str) -> Result<&ExecutionPlan, OrchestratorError> {
        self.publish(OrchestratorPhase::Planning, None);
        let (backend, model) = self.activate(BackendRole::Chat).await?;
        let reply = backend.generate(&model, &decomposition_prompt(objective)).await?;
        let mut plan = ExecutionPlan::new(objective, parse_decomposition(objective, &reply));

        if let Some(previous) = &self.plan {
            if !previous.status.is_terminal() {
                tracing::warn!("Replacing unfinished plan {}", previous.id);
            }
        }
        tracing::info!(
            "Created plan {} with {} steps for: {}",
            plan.id,
            plan.steps.len(),
            objective
        );
        self.persist(&mut plan).await;
        self.publish(OrchestratorPhase::Planning, Some(&plan));
        Ok(self.plan.insert(plan))
    }

    /// 执行活动计划直到完成或失败，返回结果报告
    pub async fn run_plan(&mut self) -> Result<String, OrchestratorError> {
        loop {
            match self.execute_next_step().await? {
                StepOutcome::Advanced | StepOutcome::Retrying(_) | StepOutcome::Revised(_) => {}
                StepOutcome::PlanCompleted | StepOutcome::PlanFailed(_) => break,
            }
        }
        self.plan
            .as_ref()
            .map(plan_report)
            .ok_or(OrchestratorError::NoActivePlan)
    }

    /// 重新加载活动计划（内存中没有未完成计划时从记忆存储读取），把中断的 in_progress 步骤重置为 pending 后继续执行
    pub async fn resume(&mut self) -> Result<String, OrchestratorError> {
        let mut plan = match self.plan.take() {
            Some(plan) if !plan.status.is_terminal() => plan,
            other => {
                self.plan = other;
                self.memory
                    .get_active_plan()
                    .await?
                    .ok_or(OrchestratorError::NoActivePlan)?
            }
        };
        if plan.status.is_terminal() {
            let report = plan_report(&plan);
            self.plan = Some(plan);
            return Ok(report);
        }

        for step in plan
            .steps
            .iter_mut()
            .filter(|s| s.status == StepStatus::InProgress)
        {
            tracing::info!("Resetting interrupted step {} to pending", step.id);
            step.status = StepStatus::Pending;
        }
        tracing::info!(
            "Resuming plan {} at step {}/{}",
            plan.id,
            plan.current_step_index + 1,
            plan.steps.len()
        );
        self.plan = Some(plan);
        self.run_plan().await
    }

    /// 执行活动计划的下一步
    pub async fn execute_next_step(&mut self) -> Result<StepOutcome, OrchestratorError> {
        let mut plan = self.plan.take().ok_or(OrchestratorError::NoActivePlan)?;
        let outcome = self.advance(&mut plan).await;
        self.publish(OrchestratorPhase::Executing, Some(&plan));
        self.plan = Some(plan);
        outcome
    }

    async fn advance(&mut self, plan: &mut ExecutionPlan) -> Result<StepOutcome, OrchestratorError> {
        if plan.steps.is_empty() {
            return Err(OrchestratorError::EmptyPlan);
        }
        match plan.status {
            PlanStatus::Completed => return Ok(StepOutcome::PlanCompleted),
            PlanStatus::Failed => return Ok(StepOutcome::PlanFailed(failure_reason(plan))),
            _ => {}
        }

        plan.status = PlanStatus::Executing;
        self.apply_adapter_suggestions(plan);
        if plan.current_step_index >= plan.steps.len() {
            self.finish(plan, true, None).await;
            return Ok(StepOutcome::PlanCompleted);
        }

        let index = plan.current_step_index;
        let step = plan.steps[index].clone();
        if let Some(dependency) = plan.unmet_dependency(&step) {
            return Ok(self.resolve_dependency(plan, &step.id, dependency).await);
        }

        plan.steps[index].status = StepStatus::InProgress;
        self.persist(plan).await;
        tracing::info!(
            "Executing step {} ({}/{}) on {}: {}",
            step.id,
            index + 1,
            plan.steps.len(),
            step.requires_backend,
            step.description
        );

        match self.attempt_step(plan, index).await {
            Ok(()) => {
                plan.steps[index].status = StepStatus::Completed;
                plan.steps[index].last_error = None;
                plan.current_step_index += 1;
                if plan.current_step_index >= plan.steps.len() {
                    self.finish(plan, true, None).await;
                    return Ok(StepOutcome::PlanCompleted);
                }
                self.persist(plan).await;
                Ok(StepOutcome::Advanced)
            }
            Err(OrchestratorError::RollbackFailed(e)) => {
                tracing::error!("Rollback failed during step {}: {}", step.id, e);
                let err = OrchestratorError::RollbackFailed(e);
                plan.steps[index].status = StepStatus::Failed;
                plan.steps[index].last_error = Some(err.to_string());
                self.finish(plan, false, Some(err.to_string())).await;
                Err(err)
            }
            Err(err) => match self.recovery.handle(&err) {
                RecoveryAction::Abort => {
                    let reason = err.to_string();
                    plan.steps[index].status = StepStatus::Failed;
                    plan.steps[index].last_error = Some(reason.clone());
                    self.finish(plan, false, Some(reason.clone())).await;
                    Ok(StepOutcome::PlanFailed(reason))
                }
                _ => Ok(self.register_failure(plan, index, err.to_string()).await),
            },
        }
    }

    /// 一次步骤尝试：切换后端、执行前校验、调用后端、应用修改、执行后校验
    async fn attempt_step(&mut self, plan: &mut ExecutionPlan, index: usize) -> Result<(), OrchestratorError> {
        let step = plan.steps[index].clone();

        self.publish(OrchestratorPhase::Switching, Some(&*plan));
        let (backend, model) = self.activate(step.requires_backend).await?;

        let analyses = match self.memory.recent_analyses(self.analysis_window).await {
            Ok(records) => records,
            Err(e) => {
                self.note_memory_error(e);
                Vec::new()
            }
        };

        self.publish(OrchestratorPhase::Validating, Some(&*plan));
        let pre = {
            let ctx = PlanValidationContext::pre(plan, &step).with_analyses(&analyses);
            self.validator
                .validate_step(&ctx)
                .await
                .map_err(OrchestratorError::RollbackFailed)?
        };
        if !pre.is_valid {
            note_revisions(plan, &pre);
            return Err(OrchestratorError::ValidationFailed(pre.summary()));
        }

        self.publish(OrchestratorPhase::Executing, Some(&*plan));
        let response = backend
            .generate(&model, &step_prompt(&plan.objective, &step))
            .await?;
        let changes = if step.step_type == StepType::Code {
            parse_fenced_edits(&response)
        } else {
            Vec::new()
        };
        let baseline = if changes.is_empty() {
            None
        } else {
            Some(self.editor.apply(&changes).await?)
        };

        self.publish(OrchestratorPhase::Validating, Some(&*plan));
        let post = {
            let ctx = PlanValidationContext::post(plan, &step, &changes, baseline.as_ref())
                .with_analyses(&analyses);
            self.validator
                .validate_step(&ctx)
                .await
                .map_err(OrchestratorError::RollbackFailed)?
        };
        if !post.is_valid {
            if let Some(baseline) = &baseline {
                self.editor
                    .rollback(baseline)
                    .await
                    .map_err(OrchestratorError::RollbackFailed)?;
                tracing::info!(
                    "Rolled back {} file(s) from step {}",
                    baseline.paths().count(),
                    step.id
                );
            }
            note_revisions(plan, &post);
            return Err(OrchestratorError::ValidationFailed(post.summary()));
        }

        if !changes.is_empty() {
            self.validator.checks_mut().rescan().await;
        }
        if step.step_type == StepType::Analysis {
            self.remember_analysis(AnalysisRecord::new(Some(&plan.id), &step.id, &response))
                .await;
        }
        let slot = &mut plan.steps[index];
        slot.result = Some(response);
        slot.changes = changes;
        Ok(())
    }

    /// 记一次失败：预算内回到 pending，用尽则计划失败
    async fn register_failure(&mut self, plan: &mut ExecutionPlan, index: usize, reason: String) -> StepOutcome {
        let max_retries = self.config.max_step_retries.max(1);
        let step = &mut plan.steps[index];
        step.retry_count += 1;
        step.last_error = Some(reason.clone());
        let (id, attempts) = (step.id.clone(), step.retry_count);

        if attempts >= max_retries {
            step.status = StepStatus::Failed;
            tracing::warn!("Step {} failed after {} attempts: {}", id, attempts, reason);
            self.finish(
                plan,
                false,
                Some(format!("{} failed after {} attempts: {}", id, attempts, reason)),
            )
            .await;
            return StepOutcome::PlanFailed(reason);
        }

        step.status = StepStatus::Pending;
        plan.status = PlanStatus::Retrying;
        tracing::info!(
            "Retrying step {} (attempt {}/{}): {}",
            id,
            attempts + 1,
            max_retries,
            reason
        );
        self.persist(plan).await;
        StepOutcome::Retrying(reason)
    }

    /// 依赖未满足：依赖步骤可立即执行时把它移到当前位置，否则计划失败。当前步骤不会进入 in_progress。
    async fn resolve_dependency(&mut self, plan: &mut ExecutionPlan, step_id: &str, dependency: String) -> StepOutcome {
        let err = OrchestratorError::DependencyNotSatisfied {
            step: step_id.to_string(),
            dependency: dependency.clone(),
        };
        tracing::warn!("{}", err);

        if let RecoveryAction::RevisePlan(reason) = self.recovery.handle(&err) {
            let ready = plan
                .step(&dependency)
                .map(|d| d.status == StepStatus::Pending && plan.unmet_dependency(d).is_none())
                .unwrap_or(false);
            if ready {
                let revision = PlanRevision::reorder(dependency, plan.current_step_index, reason.clone());
                match plan.apply_revision(&revision) {
                    Ok(()) => {
                        tracing::info!("Revised plan {}: {}", plan.id, revision);
                        self.persist(plan).await;
                        return StepOutcome::Revised(reason);
                    }
                    Err(e) => tracing::debug!("Cannot apply {}: {}", revision, e),
                }
            }
        }

        let reason = err.to_string();
        if let Some(step) = plan.current_step_mut() {
            step.last_error = Some(reason.clone());
        }
        self.finish(plan, false, Some(reason.clone())).await;
        StepOutcome::PlanFailed(reason)
    }

    /// 自动应用高置信度的计划修改；其余建议与风险只记日志
    fn apply_adapter_suggestions(&self, plan: &mut ExecutionPlan) {
        let suggestions = self.adapter.suggest_plan_modifications(plan);
        for risk in &suggestions.risks {
            if risk.severity >= RiskSeverity::Medium {
                tracing::warn!(
                    "Risky transition {} -> {} ({} -> {}), historical failure rate {:.2}",
                    risk.from_step,
                    risk.to_step,
                    risk.from_type,
                    risk.to_type,
                    risk.failure_rate
                );
            } else {
                tracing::debug!(
                    "Transition {} -> {} failure rate {:.2}",
                    risk.from_step,
                    risk.to_step,
                    risk.failure_rate
                );
            }
        }

        for modification in suggestions.modifications {
            if modification.confidence <= self.config.auto_apply_confidence {
                tracing::debug!(
                    "Advisory revision {} (confidence {:.2})",
                    modification.revision,
                    modification.confidence
                );
                continue;
            }
            if modification.revision.kind == RevisionKind::Remove && plan.steps.len() <= 1 {
                continue;
            }
            match plan.apply_revision(&modification.revision) {
                Ok(()) => tracing::info!(
                    "Applied revision {} to plan {} (confidence {:.2})",
                    modification.revision,
                    plan.id,
                    modification.confidence
                ),
                Err(e) => tracing::debug!("Skipped revision {}: {}", modification.revision, e),
            }
        }
    }

    async fn finish(&mut self, plan: &mut ExecutionPlan, success: bool, reason: Option<String>) {
        plan.status = if success {
            PlanStatus::Completed
        } else {
            PlanStatus::Failed
        };
        self.adapter.learn_from_plan_execution(plan, success);
        self.persist(plan).await;

        if success {
            tracing::info!("Plan {} completed ({} steps)", plan.id, plan.steps.len());
            return;
        }
        let reason = reason.unwrap_or_else(|| failure_reason(plan));
        tracing::warn!("Plan {} failed: {}", plan.id, reason);
        if let Some(audit) = &self.audit {
            audit.record_plan_failure(plan, &reason);
        }
        self.status.send_modify(|s| s.last_error = Some(reason));
    }

    async fn persist(&self, plan: &mut ExecutionPlan) {
        plan.touch();
        if let Err(e) = self.memory.save_plan_state(plan).await {
            self.note_memory_error(e);
        }
    }

    async fn remember_analysis(&self, record: AnalysisRecord) {
        if let Err(e) = self.memory.record_analysis(record).await {
            self.note_memory_error(e);
        }
    }

    fn note_memory_error(&self, e: MemoryError) {
        let err = OrchestratorError::from(e);
        match self.recovery.handle(&err) {
            RecoveryAction::Continue => tracing::warn!("{}; continuing", err),
            action => tracing::warn!("{} ({:?})", err, action),
        }
    }

    fn publish(&self, phase: OrchestratorPhase, plan: Option<&ExecutionPlan>) {
        // 协调器被占用时沿用上一次的模型
        let model = self
            .switcher
            .try_lock()
            .ok()
            .map(|s| s.current_model().map(str::to_string));
        let task_id = self.current_task.as_ref().map(|t| t.id.clone());
        self.status.send_modify(|s| {
            s.phase = phase;
            s.task_id = task_id;
            if let Some(plan) = plan {
                s.plan_id = Some(plan.id.clone());
                s.step_index = Some(plan.current_step_index.min(plan.steps.len().saturating_sub(1)));
                s.total_steps = plan.steps.len();
            }
            if let Some(model) = model {
                s.current_model = model;
            }
        });
    }

    fn publish_error(&self, message: String) {
        self.status.send_modify(|s| {
            s.phase = OrchestratorPhase::Error;
            s.last_error = Some(message);
        });
    }
}

fn note_revisions(plan: &mut ExecutionPlan, result: &PlanValidationResult) {
    for revision in &result.suggested_revisions {
        if !plan.pending_revisions.contains(revision) {
            plan.pending_revisions.push(revision.clone());
        }
    }
}

fn failure_reason(plan: &ExecutionPlan) -> String {
    plan.current_step()
        .and_then(|s| s.last_error.clone())
        .unwrap_or_else(|| "plan failed".to_string())
}

fn describe_plan(plan: &ExecutionPlan) -> String {
    let mut text = plan.summary();
    for revision in &plan.pending_revisions {
        text.push_str(&format!("Suggested revision: {}\n", revision));
    }
    text
}

/// 计划结束后的报告：成功时带最后一个步骤的结果，失败时带失败步骤、原因与修订建议
fn plan_report(plan: &ExecutionPlan) -> String {
    match plan.status {
        PlanStatus::Completed => {
            let last = plan
                .steps
                .iter()
                .rev()
                .find_map(|s| s.result.as_deref())
                .unwrap_or_default();
            format!("Plan {} completed ({} steps).\n{}", plan.id, plan.steps.len(), last)
        }
        PlanStatus::Failed => {
            let step = plan
                .current_step()
                .map(|s| format!("{} ({})", s.id, s.description))
                .unwrap_or_else(|| "-".to_string());
            let mut text = format!(
                "Plan {} failed at step {}: {}",
                plan.id,
                step,
                failure_reason(plan)
            );
            for revision in &plan.pending_revisions {
                text.push_str(&format!("\nSuggested revision: {}", revision));
            }
            text
        }
        _ => describe_plan(plan),
    }
}
