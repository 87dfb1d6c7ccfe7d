//! 步骤校验器
//!
//! 按顺序执行目标对齐、代码有效性、依赖满足、记忆冲突四项检查，遇到第一项失败即停。
//! 失败时先交给自动修正引擎；修正成功则从头重新校验（最多 `max_revalidation_depth` 次），
//! 修正失败则返回 `requires_plan_revision` 与修订建议，并撤销本次校验中已接受的修正。

use async_trait::async_trait;

use crate::correction::{AutoCorrectEngine, CorrectionVerifier, ErrorCorrection};
use crate::tools::{EditError, EditSnapshot};
use crate::validation::{PlanValidationContext, PlanValidationResult, StepChecks};

/// 重新执行原先失败的检查：该文件上不再有同类错误才算修复。
/// 换成另一处同类错误的修复不算数。
struct CheckVerifier<'c, 'a> {
    checks: &'c StepChecks,
    ctx: &'c PlanValidationContext<'a>,
}

#[async_trait]
impl<'c, 'a> CorrectionVerifier for CheckVerifier<'c, 'a> {
    async fn verify(&self, correction: &ErrorCorrection) -> bool {
        let remaining = self.checks.run(correction.error_kind, self.ctx).await;
        !remaining.iter().any(|e| {
            e.error_kind == correction.error_kind && e.context.file == correction.context.file
        })
    }
}

pub struct PlanValidator {
    checks: StepChecks,
    engine: AutoCorrectEngine,
    max_revalidation_depth: usize,
}

impl PlanValidator {
    pub fn new(checks: StepChecks, engine: AutoCorrectEngine, max_revalidation_depth: usize) -> Self {
        Self {
            checks,
            engine,
            max_revalidation_depth,
        }
    }

    pub fn checks(&self) -> &StepChecks {
        &self.checks
    }

    pub fn checks_mut(&mut self) -> &mut StepChecks {
        &mut self.checks
    }

    pub fn engine(&self) -> &AutoCorrectEngine {
        &self.engine
    }

    /// 依次执行各项检查，返回第一项失败检查的全部错误
    pub async fn run_checks(&self, ctx: &PlanValidationContext<'_>) -> Vec<ErrorCorrection> {
        let errors = self.checks.check_alignment(ctx);
        if !errors.is_empty() {
            return errors;
        }
        let errors = self.checks.check_code(ctx).await;
        if !errors.is_empty() {
            return errors;
        }
        let errors = self.checks.check_dependencies(ctx);
        if !errors.is_empty() {
            return errors;
        }
        self.checks.check_memory(ctx)
    }

    /// 校验一个步骤。只有回滚写入失败会返回错误。
    /// 最终无效时，本次校验中已接受的修正按相反顺序撤销。
    pub async fn validate_step(
        &mut self,
        ctx: &PlanValidationContext<'_>,
    ) -> Result<PlanValidationResult, EditError> {
        let mut accepted: Vec<EditSnapshot> = Vec::new();
        loop {
            let corrections_applied = accepted.len();
            let errors = self.run_checks(ctx).await;
            let Some(first) = errors.first() else {
                return Ok(PlanValidationResult::valid(corrections_applied));
            };

            if corrections_applied >= self.max_revalidation_depth {
                tracing::warn!(
                    "Step {} still invalid after {} corrections, giving up",
                    ctx.step.id,
                    corrections_applied
                );
                let mut result = self.unresolved(ctx, errors, corrections_applied);
                result
                    .suggestions
                    .push("re-validation depth exhausted".to_string());
                self.restore(&accepted).await?;
                return Ok(result);
            }

            match self.correct(first, ctx).await? {
                Some(snapshot) => accepted.push(snapshot),
                None => {
                    tracing::info!(
                        "Step {} failed {:?} validation: {}",
                        ctx.step.id,
                        ctx.phase,
                        first
                    );
                    let result = self.unresolved(ctx, errors, corrections_applied);
                    self.restore(&accepted).await?;
                    return Ok(result);
                }
            }
        }
    }

    async fn correct(
        &mut self,
        error: &ErrorCorrection,
        ctx: &PlanValidationContext<'_>,
    ) -> Result<Option<EditSnapshot>, EditError> {
        let candidates = self.engine.generate_corrections(error).await;
        let verifier = CheckVerifier {
            checks: &self.checks,
            ctx,
        };
        for candidate in &candidates {
            if let Some(snapshot) = self.engine.apply_correction(candidate, &verifier).await? {
                return Ok(Some(snapshot));
            }
        }
        Ok(None)
    }

    async fn restore(&self, accepted: &[EditSnapshot]) -> Result<(), EditError> {
        if accepted.is_empty() {
            return Ok(());
        }
        let editor = self.engine.editor();
        for snapshot in accepted.iter().rev() {
            editor.rollback(snapshot).await?;
        }
        tracing::info!("Reverted {} accepted correction(s)", accepted.len());
        Ok(())
    }

    fn unresolved(
        &self,
        ctx: &PlanValidationContext<'_>,
        errors: Vec<ErrorCorrection>,
        corrections_applied: usize,
    ) -> PlanValidationResult {
        PlanValidationResult {
            is_valid: false,
            suggestions: errors.iter().map(|e| e.to_string()).collect(),
            suggested_revisions: self.checks.revisions_for(ctx, &errors),
            requires_plan_revision: true,
            errors,
            corrections_applied,
        }
    }
}
