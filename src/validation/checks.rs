//! 单项校验：目标对齐、代码有效性（语法 + 影响分析）、依赖满足、记忆冲突
//!
//! 每项检查返回发现的错误（空表示通过），并能为错误给出计划修订建议。

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;

use crate::analysis::{AnalyzerRegistry, DependencyGraph, SyntaxError};
use crate::config::ValidationSection;
use crate::correction::{ErrorContext, ErrorCorrection, ErrorKind, Severity};
use crate::llm::BackendRole;
use crate::memory::AnalysisRecord;
use crate::plan::{PlanRevision, PlanStep, StepStatus, StepType};
use crate::tools::FileEditor;
use crate::validation::PlanValidationContext;

static CONFLICT_WORDS: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?i)\b(error|conflict)s?\b").ok());

fn words(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// 目标关键词（保留重复）在步骤描述中出现的比例；按整词匹配
pub fn alignment_score(objective: &str, description: &str) -> f64 {
    let objective = words(objective);
    if objective.is_empty() {
        return 1.0;
    }
    let step: BTreeSet<String> = words(description).into_iter().collect();
    let hits = objective.iter().filter(|t| step.contains(*t)).count();
    hits as f64 / objective.len() as f64
}

/// 分析结果是否提到错误或冲突
pub fn mentions_conflict(text: &str) -> bool {
    CONFLICT_WORDS
        .as_ref()
        .map(|re| re.is_match(text))
        .unwrap_or(false)
}

fn excerpt(text: &str, max_chars: usize) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max_chars {
        flat
    } else {
        format!("{}...", flat.chars().take(max_chars).collect::<String>())
    }
}

fn line_text(content: &str, line: usize) -> String {
    content
        .lines()
        .nth(line.saturating_sub(1))
        .unwrap_or_default()
        .trim()
        .to_string()
}

pub struct StepChecks {
    analyzers: AnalyzerRegistry,
    graph: DependencyGraph,
    editor: FileEditor,
    config: ValidationSection,
}

impl StepChecks {
    pub fn new(
        analyzers: AnalyzerRegistry,
        graph: DependencyGraph,
        editor: FileEditor,
        config: ValidationSection,
    ) -> Self {
        Self {
            analyzers,
            graph,
            editor,
            config,
        }
    }

    pub fn editor(&self) -> &FileEditor {
        &self.editor
    }

    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    /// 代码修改落盘后重建依赖图
    pub async fn rescan(&mut self) {
        self.graph = DependencyGraph::scan(self.editor.root(), &self.analyzers).await;
    }

    /// 重新执行某类错误对应的检查
    pub async fn run(&self, kind: ErrorKind, ctx: &PlanValidationContext<'_>) -> Vec<ErrorCorrection> {
        match kind {
            ErrorKind::Semantic => self.check_alignment(ctx),
            ErrorKind::Syntax | ErrorKind::Impact => self.check_code(ctx).await,
            ErrorKind::Dependency => self.check_dependencies(ctx),
            ErrorKind::Memory => self.check_memory(ctx),
        }
    }

    pub fn check_alignment(&self, ctx: &PlanValidationContext<'_>) -> Vec<ErrorCorrection> {
        let score = alignment_score(ctx.objective(), &ctx.step.description);
        if score >= self.config.alignment_threshold {
            return Vec::new();
        }
        tracing::debug!(
            "Step {} alignment {:.3} below {:.2}",
            ctx.step.id,
            score,
            self.config.alignment_threshold
        );
        vec![ErrorCorrection::new(
            ErrorKind::Semantic,
            Severity::Medium,
            format!(
                "Step {} does not address the objective (alignment {:.2})",
                ctx.step.id, score
            ),
            ErrorContext::default().with_code(ctx.step.description.clone()),
        )]
    }

    /// 代码步骤：先查改动文件的语法，语法无误再做影响分析
    pub async fn check_code(&self, ctx: &PlanValidationContext<'_>) -> Vec<ErrorCorrection> {
        if ctx.step.step_type != StepType::Code || ctx.changes.is_empty() {
            return Vec::new();
        }

        let mut files: Vec<PathBuf> = Vec::new();
        for op in ctx.changes {
            match self.editor.resolve(op.path()) {
                Ok(abs) => {
                    let rel = self.editor.relative(&abs);
                    if !files.contains(&rel) {
                        files.push(rel);
                    }
                }
                Err(e) => tracing::debug!("Skipping change outside workspace: {}", e),
            }
        }

        let mut errors = Vec::new();
        for file in &files {
            let Some(analyzer) = self.analyzers.for_path(file) else {
                continue;
            };
            let Ok(Some(content)) = self.editor.read(file).await else {
                continue;
            };
            for e in analyzer.detect_syntax_errors(&content).await {
                errors.push(syntax_error(file, &content, &e));
            }
        }
        if !errors.is_empty() {
            return errors;
        }

        for file in &files {
            errors.extend(self.impact_errors(file, ctx).await);
        }
        errors
    }

    /// 改动删除的符号若仍被依赖方引用，则每处引用记一个 impact 错误
    async fn impact_errors(&self, file: &Path, ctx: &PlanValidationContext<'_>) -> Vec<ErrorCorrection> {
        let Some(analyzer) = self.analyzers.for_path(file) else {
            return Vec::new();
        };
        let Some(old) = ctx.baseline.and_then(|b| b.original_text(file)).flatten() else {
            return Vec::new();
        };
        let new = self.editor.read(file).await.ok().flatten().unwrap_or_default();

        let old_names: BTreeSet<String> = analyzer
            .analyze_structure(&old)
            .await
            .into_iter()
            .map(|s| s.name)
            .collect();
        let new_names: BTreeSet<String> = analyzer
            .analyze_structure(&new)
            .await
            .into_iter()
            .map(|s| s.name)
            .collect();
        let removed: Vec<&String> = old_names.difference(&new_names).collect();
        if removed.is_empty() {
            return Vec::new();
        }

        let mut errors = Vec::new();
        for dependent in self.graph.dependents_of(file) {
            let Ok(Some(text)) = self.editor.read(&dependent).await else {
                continue;
            };
            for symbol in &removed {
                let Ok(re) = Regex::new(&format!(r"\b{}\b", regex::escape(symbol))) else {
                    continue;
                };
                let Some((index, line)) = text.lines().enumerate().find(|(_, l)| re.is_match(l)) else {
                    continue;
                };
                errors.push(ErrorCorrection::new(
                    ErrorKind::Impact,
                    Severity::High,
                    format!(
                        "`{}` was removed from {} but is still used",
                        symbol,
                        file.display()
                    ),
                    ErrorContext::for_file(dependent.clone())
                        .at_line(index + 1)
                        .with_code(line.trim())
                        .with_symbols(vec![symbol.to_string()]),
                ));
            }
        }
        errors
    }

    pub fn check_dependencies(&self, ctx: &PlanValidationContext<'_>) -> Vec<ErrorCorrection> {
        ctx.step
            .dependencies
            .iter()
            .filter_map(|dep| {
                let message = match ctx.plan.step(dep) {
                    Some(d) if d.status == StepStatus::Completed => return None,
                    Some(d) => format!(
                        "Step {} depends on {}, which is {:?}",
                        ctx.step.id, dep, d.status
                    ),
                    None => format!("Step {} depends on unknown step {}", ctx.step.id, dep),
                };
                Some(ErrorCorrection::new(
                    ErrorKind::Dependency,
                    Severity::Medium,
                    message,
                    ErrorContext::default().with_symbols(vec![dep.clone()]),
                ))
            })
            .collect()
    }

    /// 本计划最近的分析结果里，从最新一条起连续提到错误或冲突的记录；
    /// 更新的一条无冲突分析会覆盖更早的冲突。分析步骤本身不受此检查限制。
    pub fn check_memory(&self, ctx: &PlanValidationContext<'_>) -> Vec<ErrorCorrection> {
        if ctx.step.step_type == StepType::Analysis {
            return Vec::new();
        }
        let plan_id = ctx.plan.id.as_str();
        ctx.recent_analyses
            .iter()
            .filter(|r| r.plan_id.as_deref() == Some(plan_id))
            .take(self.config.recent_analysis_window)
            .take_while(|r| mentions_conflict(&r.summary))
            .map(memory_conflict)
            .collect()
    }

    /// 校验失败且无法自动修正时给出的修订建议
    pub fn revisions_for(
        &self,
        ctx: &PlanValidationContext<'_>,
        errors: &[ErrorCorrection],
    ) -> Vec<PlanRevision> {
        let step = ctx.step;
        let position = ctx
            .plan
            .steps
            .iter()
            .position(|s| s.id == step.id)
            .unwrap_or(ctx.plan.current_step_index);

        let mut revisions = Vec::new();
        for error in errors {
            let revision = match error.error_kind {
                ErrorKind::Semantic => {
                    let mut revised = pristine(step);
                    revised.description = format!("{} ({})", step.description, ctx.objective());
                    PlanRevision::modify(revised, "step does not reference the objective")
                }
                ErrorKind::Syntax | ErrorKind::Impact => {
                    let mut revised = pristine(step);
                    revised.description = format!("{}; resolve {}", step.description, error);
                    PlanRevision::modify(revised, error.message.clone())
                }
                ErrorKind::Dependency => {
                    let Some(dep) = error.context.related_symbols.first() else {
                        continue;
                    };
                    match ctx.plan.steps.iter().position(|s| &s.id == dep) {
                        Some(index) if index > position => PlanRevision::reorder(
                            dep.clone(),
                            position,
                            format!("{} must run before {}", dep, step.id),
                        ),
                        _ => {
                            let mut revised = pristine(step);
                            revised.dependencies.retain(|d| d != dep);
                            PlanRevision::modify(
                                revised,
                                format!("dependency {} cannot be satisfied", dep),
                            )
                        }
                    }
                }
                ErrorKind::Memory => {
                    let detail = error.context.code.clone().unwrap_or_default();
                    let review = PlanStep::new(
                        format!("{}_review", step.id),
                        format!("Analyze and resolve the reported issues before {}: {}", step.description, detail),
                        StepType::Analysis,
                        BackendRole::Chat,
                    )
                    .with_dependencies(step.dependencies.clone());
                    PlanRevision::insert(review, position, "recent analysis reports unresolved issues")
                }
            };
            if !revisions.contains(&revision) {
                revisions.push(revision);
            }
        }
        revisions
    }
}

/// 修订用的步骤副本，不带运行期状态
fn pristine(step: &PlanStep) -> PlanStep {
    PlanStep::new(
        step.id.clone(),
        step.description.clone(),
        step.step_type,
        step.requires_backend,
    )
    .with_dependencies(step.dependencies.clone())
}

fn syntax_error(file: &Path, content: &str, e: &SyntaxError) -> ErrorCorrection {
    ErrorCorrection::new(
        ErrorKind::Syntax,
        Severity::High,
        e.message.clone(),
        ErrorContext::for_file(file)
            .at_line(e.line)
            .with_code(line_text(content, e.line)),
    )
}

fn memory_conflict(record: &AnalysisRecord) -> ErrorCorrection {
    let detail = excerpt(&record.summary, 160);
    ErrorCorrection::new(
        ErrorKind::Memory,
        Severity::Medium,
        format!("Analysis from {} reports unresolved issues", record.source),
        ErrorContext::default().with_code(detail),
    )
}
