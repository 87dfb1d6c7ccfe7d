//! 自动修正引擎：生成 → 排序 → 应用 → 校验 → 失败回滚
//!
//! 候选来源：修正模式库中相似模式的历史成功策略，以及代码模型新生成的修复。候选按修改重叠度分组，
//! 组得分 = 置信度 + 2 × 历史成功率 + 上下文相似度 + 影响面估计，高分组在前。
//! 应用时按自适应阈值过滤、按置信度降序逐个尝试：快照 → 应用 → 重跑原先失败的检查；
//! 通过则记录成功并停止，不通过则逐字节回滚、记录失败、尝试下一个。

use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use regex::Regex;
use tokio::sync::Mutex;

use crate::config::CorrectionSection;
use crate::correction::patterns::change_overlap;
use crate::correction::{
    CorrectionPatternStore, ErrorCorrection, FixOrigin, SuggestedFix, ThresholdManager,
};
use crate::llm::{BackendRole, ModelSwitchCoordinator};
use crate::memory::{AuditLog, MemoryStore};
use crate::plan::parse_fenced_edits;
use crate::tools::{EditError, EditSnapshot, FileEditor, FileOperation};

/// 与编排器共享的模型切换协调器
pub type SharedSwitcher = Arc<Mutex<ModelSwitchCoordinator>>;

/// 代码模型回复未给出置信度时使用
const SYNTHESIZED_CONFIDENCE: f64 = 0.75;

/// 新生成修复的上下文相似度（针对当前错误生成）
const SYNTHESIZED_CONTEXT_SIMILARITY: f64 = 0.5;

static CONFIDENCE_LINE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?i)confidence\s*[:=]\s*([01](?:\.\d+)?)").ok());

/// 重新执行最初失败的那项检查
#[async_trait]
pub trait CorrectionVerifier: Send + Sync {
    async fn verify(&self, correction: &ErrorCorrection) -> bool;
}

/// 影响面估计：涉及文件越多越低，删除文件额外扣分
pub fn impact_estimate(changes: &[FileOperation]) -> f64 {
    let files = changes
        .iter()
        .map(|c| c.path())
        .collect::<std::collections::BTreeSet<_>>()
        .len();
    let mut score = 1.0 - 0.1 * files.saturating_sub(1) as f64;
    if changes.iter().any(|c| matches!(c, FileOperation::Delete { .. })) {
        score -= 0.2;
    }
    score.clamp(0.0, 1.0)
}

struct ScoredFix {
    fix: SuggestedFix,
    score: f64,
}

pub struct AutoCorrectEngine {
    patterns: CorrectionPatternStore,
    thresholds: ThresholdManager,
    editor: FileEditor,
    memory: Arc<dyn MemoryStore>,
    audit: Option<AuditLog>,
    switcher: Option<SharedSwitcher>,
    config: CorrectionSection,
}

impl AutoCorrectEngine {
    pub fn new(
        patterns: CorrectionPatternStore,
        thresholds: ThresholdManager,
        editor: FileEditor,
        memory: Arc<dyn MemoryStore>,
        config: CorrectionSection,
    ) -> Self {
        Self {
            patterns,
            thresholds,
            editor,
            memory,
            audit: None,
            switcher: None,
            config,
        }
    }

    pub fn with_audit(mut self, audit: AuditLog) -> Self {
        self.audit = Some(audit);
        self
    }

    /// 启用代码模型生成修复
    pub fn with_synthesizer(mut self, switcher: SharedSwitcher) -> Self {
        self.switcher = Some(switcher);
        self
    }

    pub fn editor(&self) -> &FileEditor {
        &self.editor
    }

    pub fn patterns(&self) -> &CorrectionPatternStore {
        &self.patterns
    }

    pub fn patterns_mut(&mut self) -> &mut CorrectionPatternStore {
        &mut self.patterns
    }

    pub fn thresholds(&self) -> &ThresholdManager {
        &self.thresholds
    }

    /// 用记忆存储中的历史修正预热模式库，返回重放条数
    pub async fn warm_from_history(&mut self) -> usize {
        let records = match self.memory.get_corrections(None).await {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!("Could not load correction history: {}", e);
                return 0;
            }
        };
        let mut replayed = 0;
        for record in &records {
            if let Some(fix) = record.correction.suggested_fixes.first() {
                self.patterns.record_outcome(&record.correction, fix, record.success);
                replayed += 1;
            }
        }
        if replayed > 0 {
            tracing::info!(
                "Warmed correction patterns from {} historical corrections ({} patterns)",
                replayed,
                self.patterns.len()
            );
        }
        replayed
    }

    /// 为一个错误生成候选修正，按组得分降序
    pub async fn generate_corrections(&self, error: &ErrorCorrection) -> Vec<ErrorCorrection> {
        let mut candidates: Vec<ScoredFix> = self
            .patterns
            .suggest(
                error,
                self.config.pattern_similarity,
                self.config.max_pattern_strategies,
            )
            .into_iter()
            .map(|s| {
                let score = s.fix.confidence
                    + 2.0 * s.pattern_success_rate
                    + s.similarity
                    + impact_estimate(&s.fix.changes);
                ScoredFix { fix: s.fix, score }
            })
            .collect();

        if self.config.synthesize_fixes && error.context.file.is_some() {
            let historical = self
                .patterns
                .get(&error.fingerprint())
                .map(|p| p.stats.success_rate())
                .unwrap_or(0.0);
            for fix in self.synthesize(error).await {
                let score = fix.confidence
                    + 2.0 * historical
                    + SYNTHESIZED_CONTEXT_SIMILARITY
                    + impact_estimate(&fix.changes);
                candidates.push(ScoredFix { fix, score });
            }
        }

        let mut groups: Vec<Vec<ScoredFix>> = Vec::new();
        for candidate in candidates.into_iter().filter(|c| !c.fix.changes.is_empty()) {
            match groups.iter_mut().find(|g| {
                g.iter()
                    .any(|m| change_overlap(&m.fix.changes, &candidate.fix.changes) >= self.config.group_overlap)
            }) {
                Some(group) => group.push(candidate),
                None => groups.push(vec![candidate]),
            }
        }

        let mut scored: Vec<(f64, ErrorCorrection)> = groups
            .into_iter()
            .map(|mut group| {
                group.sort_by(|a, b| b.score.total_cmp(&a.score));
                let best = group.first().map(|f| f.score).unwrap_or(0.0);
                let fixes = group.into_iter().map(|f| f.fix).collect();
                (best, error.clone().with_fixes(fixes))
            })
            .collect();
        scored.sort_by(|a, b| b.0.total_cmp(&a.0));
        tracing::debug!(
            "Generated {} correction groups for {}",
            scored.len(),
            error
        );
        scored.into_iter().map(|(_, c)| c).collect()
    }

    async fn synthesize(&self, error: &ErrorCorrection) -> Vec<SuggestedFix> {
        let (Some(switcher), Some(file)) = (&self.switcher, &error.context.file) else {
            return Vec::new();
        };
        let current = match self.editor.read(file).await {
            Ok(content) => content.unwrap_or_default(),
            Err(e) => {
                tracing::debug!("Cannot read {} for fix synthesis: {}", file.display(), e);
                return Vec::new();
            }
        };
        let prompt = format!(
            "Fix the following {} error.\nError: {}\nFile: {}\n\n```\n{}\n```\n\n\
             Reply with the corrected file as a fenced block whose info string is `path={}`, \
             followed by a line `Confidence: <0..1>`.",
            error.error_kind,
            error.message,
            file.display(),
            current,
            file.display()
        );

        let mut switcher = switcher.lock().await;
        if let Err(e) = switcher.ensure_active(BackendRole::Code).await {
            tracing::warn!("Code backend unavailable for fix synthesis: {}", e);
            return Vec::new();
        }
        let model = switcher.model_for(BackendRole::Code).to_string();
        let reply = match switcher.backend().generate(&model, &prompt).await {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!("Fix synthesis failed: {}", e);
                return Vec::new();
            }
        };
        drop(switcher);

        let changes = parse_fenced_edits(&reply);
        if changes.is_empty() {
            return Vec::new();
        }
        let confidence = CONFIDENCE_LINE
            .as_ref()
            .and_then(|re| re.captures(&reply))
            .and_then(|c| c[1].parse::<f64>().ok())
            .unwrap_or(SYNTHESIZED_CONFIDENCE);
        vec![SuggestedFix::new(
            format!("Model-generated fix for {}", error.message),
            changes,
            confidence,
        )
        .with_origin(FixOrigin::Synthesized)]
    }

    /// 依次尝试候选修复，直到某个通过校验，返回其应用前的快照；全部失败返回 None。
    /// 只有回滚写入失败会返回错误。
    pub async fn apply_correction(
        &mut self,
        correction: &ErrorCorrection,
        verifier: &dyn CorrectionVerifier,
    ) -> Result<Option<EditSnapshot>, EditError> {
        let context = correction.context_key();
        let threshold = self.thresholds.get_threshold(correction.error_kind, &context);
        let mut fixes: Vec<&SuggestedFix> = correction
            .suggested_fixes
            .iter()
            .filter(|f| !f.changes.is_empty() && f.confidence >= threshold)
            .collect();
        fixes.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

        if fixes.is_empty() {
            tracing::debug!(
                "No fix for {} clears threshold {:.2} ({} candidates)",
                correction,
                threshold,
                correction.suggested_fixes.len()
            );
            return Ok(None);
        }

        for fix in fixes {
            let applied = correction.clone().with_fixes(vec![fix.clone()]);
            let snapshot = match self.editor.apply(&fix.changes).await {
                Ok(s) => s,
                Err(e) if e.is_rollback_failure() => {
                    tracing::error!("Partial fix '{}' could not be undone: {}", fix.description, e);
                    return Err(e);
                }
                Err(e) => {
                    tracing::warn!("Could not apply fix '{}': {}", fix.description, e);
                    self.record_outcome(&applied, fix, &context, false).await;
                    continue;
                }
            };

            if verifier.verify(correction).await {
                self.record_outcome(&applied, fix, &context, true).await;
                if let Some(audit) = &self.audit {
                    audit.record_correction(correction, fix);
                }
                tracing::info!(
                    "Auto-corrected {} with '{}' (confidence {:.2})",
                    correction,
                    fix.description,
                    fix.confidence
                );
                return Ok(Some(snapshot));
            }

            if let Err(e) = self.editor.rollback(&snapshot).await {
                tracing::error!("Rollback after failed fix '{}' failed: {}", fix.description, e);
                return Err(e);
            }
            tracing::debug!("Fix '{}' did not resolve {}, rolled back", fix.description, correction);
            self.record_outcome(&applied, fix, &context, false).await;
        }
        Ok(None)
    }

    async fn record_outcome(
        &mut self,
        applied: &ErrorCorrection,
        fix: &SuggestedFix,
        context: &str,
        success: bool,
    ) {
        self.patterns.record_outcome(applied, fix, success);
        self.thresholds
            .adjust_threshold(applied.error_kind, context, success);
        if let Err(e) = self.memory.add_correction(applied, success).await {
            tracing::warn!("Failed to persist correction outcome: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    use crate::config::{BackendsSection, ThresholdSection};
    use crate::correction::{ErrorContext, ErrorKind, Severity};
    use crate::llm::MockBackend;
    use crate::memory::InMemoryStore;

    /// 文件内容不含 `bad` 即通过
    struct NoBadWord {
        editor: FileEditor,
    }

    #[async_trait]
    impl CorrectionVerifier for NoBadWord {
        async fn verify(&self, correction: &ErrorCorrection) -> bool {
            let Some(file) = &correction.context.file else {
                return false;
            };
            matches!(self.editor.read(file).await, Ok(Some(c)) if !c.contains("bad"))
        }
    }

    fn engine(root: &Path, memory: Arc<InMemoryStore>) -> AutoCorrectEngine {
        AutoCorrectEngine::new(
            CorrectionPatternStore::new(0.7),
            ThresholdManager::new(ThresholdSection::default()),
            FileEditor::new(root),
            memory,
            CorrectionSection::default(),
        )
    }

    fn error_in(file: &str) -> ErrorCorrection {
        ErrorCorrection::new(
            ErrorKind::Syntax,
            Severity::High,
            "contains bad token",
            ErrorContext::for_file(file).with_code("let bad = 1;"),
        )
    }

    fn replace(path: &str, find: &str, replace: &str, confidence: f64) -> SuggestedFix {
        SuggestedFix::new(
            format!("{} -> {}", find, replace),
            vec![FileOperation::Replace {
                path: path.into(),
                find: find.into(),
                replace: replace.into(),
            }],
            confidence,
        )
    }

    #[test]
    fn test_impact_estimate() {
        let one = vec![FileOperation::Write { path: "a".into(), content: String::new() }];
        assert_eq!(impact_estimate(&one), 1.0);
        let three = vec![
            FileOperation::Write { path: "a".into(), content: String::new() },
            FileOperation::Write { path: "b".into(), content: String::new() },
            FileOperation::Delete { path: "c".into() },
        ];
        assert!((impact_estimate(&three) - 0.6).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_failed_fix_rolls_back_then_next_fix_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let original = "let bad = 1;\r\n// keep\n";
        std::fs::write(dir.path().join("a.rs"), original).unwrap();
        let memory = Arc::new(InMemoryStore::new());
        let mut engine = engine(dir.path(), memory.clone());
        let verifier = NoBadWord { editor: FileEditor::new(dir.path()) };

        let correction = error_in("a.rs").with_fixes(vec![
            // 置信度最高但不解决问题
            replace("a.rs", "// keep", "// changed", 0.95),
            replace("a.rs", "bad", "good", 0.8),
            // 低于阈值，不会尝试
            replace("a.rs", "let", "const", 0.1),
        ]);
        assert!(engine.apply_correction(&correction, &verifier).await.unwrap().is_some());
        assert_eq!(
            std::fs::read_to_string(dir.path().join("a.rs")).unwrap(),
            "let good = 1;\r\n// keep\n"
        );

        let history = memory.get_corrections(None).await.unwrap();
        assert_eq!(history.len(), 2);
        assert!(!history[0].success && history[1].success);
        let pattern = engine.patterns().get(&correction.fingerprint()).unwrap();
        assert_eq!((pattern.stats.success_count, pattern.stats.failure_count), (1, 1));
    }

    #[tokio::test]
    async fn test_exhausted_fixes_leave_file_byte_identical() {
        let dir = tempfile::tempdir().unwrap();
        let original: &[u8] = b"let bad = 1;\n\xc3\xa9\n";
        std::fs::write(dir.path().join("a.rs"), original).unwrap();
        let mut engine = engine(dir.path(), Arc::new(InMemoryStore::new()));
        let verifier = NoBadWord { editor: FileEditor::new(dir.path()) };

        let correction = error_in("a.rs").with_fixes(vec![
            replace("a.rs", "1;", "2;", 0.9),
            SuggestedFix::new(
                "new helper file",
                vec![FileOperation::Write { path: "helper.rs".into(), content: "bad".into() }],
                0.85,
            ),
            replace("a.rs", "missing text", "x", 0.8),
        ]);
        assert!(engine.apply_correction(&correction, &verifier).await.unwrap().is_none());
        assert_eq!(std::fs::read(dir.path().join("a.rs")).unwrap(), original);
        assert!(!dir.path().join("helper.rs").exists());
        assert!(engine.thresholds().get_threshold(ErrorKind::Syntax, "rs") < 0.7);
    }

    #[tokio::test]
    async fn test_pattern_ranking_prefers_reliable_history() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = engine(dir.path(), Arc::new(InMemoryStore::new()));

        let reliable = error_in("src/a.rs");
        let mut unreliable = error_in("src/a.rs");
        unreliable.context.code = Some("let bad = 1 ;".into());
        assert_ne!(reliable.fingerprint(), unreliable.fingerprint());

        let good_fix = replace("src/a.rs", "bad", "good", 0.9);
        let weak_fix = replace("src/a.rs", "let", "var", 0.9);
        for i in 0..10 {
            engine.patterns_mut().record_outcome(&reliable, &good_fix, i != 0);
            engine.patterns_mut().record_outcome(&unreliable, &weak_fix, i == 0);
        }

        let new_error = error_in("src/b.rs");
        let groups = engine.generate_corrections(&new_error).await;
        assert_eq!(groups.len(), 2);
        let first = &groups[0].suggested_fixes[0];
        assert_eq!(first.changes[0].path(), Path::new("src/b.rs"));
        assert!(matches!(
            &first.changes[0],
            FileOperation::Replace { replace, .. } if replace == "good"
        ));
        assert!(matches!(
            &groups[1].suggested_fixes[0].changes[0],
            FileOperation::Replace { replace, .. } if replace == "var"
        ));
    }

    #[tokio::test]
    async fn test_synthesized_fix_uses_code_backend() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.rs"), "let bad = 1;\n").unwrap();
        let mock = Arc::new(MockBackend::new(["llama3", "codellama", "llava"]));
        mock.push_response(
            "codellama",
            "Here you go:\n```rust path=a.rs\nlet good = 1;\n```\nConfidence: 0.9",
        );
        let switcher = Arc::new(Mutex::new(ModelSwitchCoordinator::new(
            mock.clone(),
            BackendsSection::default(),
        )));
        let engine = engine(dir.path(), Arc::new(InMemoryStore::new())).with_synthesizer(switcher.clone());

        let groups = engine.generate_corrections(&error_in("a.rs")).await;
        assert_eq!(groups.len(), 1);
        let fix = &groups[0].suggested_fixes[0];
        assert_eq!(fix.origin, FixOrigin::Synthesized);
        assert_eq!(fix.confidence, 0.9);
        assert_eq!(switcher.lock().await.active_role(), Some(BackendRole::Code));
        assert_eq!(mock.generate_count("codellama"), 1);
    }

    #[tokio::test]
    async fn test_warm_from_history() {
        let dir = tempfile::tempdir().unwrap();
        let memory = Arc::new(InMemoryStore::new());
        let fix = replace("a.rs", "bad", "good", 0.9);
        let applied = error_in("a.rs").with_fixes(vec![fix]);
        memory.add_correction(&applied, true).await.unwrap();
        memory.add_correction(&applied, true).await.unwrap();

        let mut engine = engine(dir.path(), memory);
        assert_eq!(engine.warm_from_history().await, 2);
        let pattern = engine.patterns().get(&applied.fingerprint()).unwrap();
        assert_eq!(pattern.stats.success_count, 2);
    }
}
