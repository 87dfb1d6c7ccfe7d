//! 修正模式库：记住哪些修复对哪些错误指纹有效
//!
//! 模式按 `ErrorCorrection::fingerprint()` 存储，只增不删。每个模式保存统计信息与两组策略（成功 / 失败），
//! 修改内容重叠度 >= 0.7 的修复归入同一策略并累计成功率。相似度：错误类型 ×5、文件路径 ×3、
//! 代码文本 ×4、相关符号 ×2，按总权重归一化。

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use crate::correction::types::code_tokens;
use crate::correction::{ErrorCorrection, ErrorKind, FixOrigin, SuggestedFix};
use crate::plan::patterns::jaccard;
use crate::tools::FileOperation;

const KIND_WEIGHT: f64 = 5.0;
const PATH_WEIGHT: f64 = 3.0;
const CODE_WEIGHT: f64 = 4.0;
const SYMBOL_WEIGHT: f64 = 2.0;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PatternStats {
    pub success_count: u32,
    pub failure_count: u32,
    /// 毫秒时间戳
    pub last_used: i64,
    pub contexts: BTreeSet<String>,
}

impl PatternStats {
    pub fn success_rate(&self) -> f64 {
        match self.success_count + self.failure_count {
            0 => 0.0,
            n => self.success_count as f64 / n as f64,
        }
    }
}

/// 一组相似修复的累计结果
#[derive(Debug, Clone, PartialEq)]
pub struct StrategyRecord {
    pub description: String,
    pub changes: Vec<FileOperation>,
    pub success_count: u32,
    pub failure_count: u32,
    pub contexts: BTreeSet<String>,
}

impl StrategyRecord {
    fn from_fix(fix: &SuggestedFix) -> Self {
        Self {
            description: fix.description.clone(),
            changes: fix.changes.clone(),
            success_count: 0,
            failure_count: 0,
            contexts: BTreeSet::new(),
        }
    }

    pub fn success_rate(&self) -> f64 {
        match self.success_count + self.failure_count {
            0 => 0.0,
            n => self.success_count as f64 / n as f64,
        }
    }

    fn record(&mut self, success: bool, context: &str) {
        if success {
            self.success_count += 1;
        } else {
            self.failure_count += 1;
        }
        self.contexts.insert(context.to_string());
    }
}

#[derive(Debug, Clone)]
pub struct CorrectionPattern {
    pub key: String,
    pub error_kind: ErrorKind,
    pub file: Option<PathBuf>,
    pub code: String,
    pub related_symbols: Vec<String>,
    pub stats: PatternStats,
    pub successful: Vec<StrategyRecord>,
    pub failed: Vec<StrategyRecord>,
}

/// 修复内容的路径无关签名，用于跨文件比较
fn change_signature(op: &FileOperation) -> String {
    match op {
        FileOperation::Write { content, .. } => format!("write\u{1f}{}", content),
        FileOperation::Replace { find, replace, .. } => {
            format!("replace\u{1f}{}\u{1f}{}", find, replace)
        }
        FileOperation::Delete { .. } => "delete".to_string(),
    }
}

/// 两组修改的重叠度：签名集合的 Jaccard
pub fn change_overlap(a: &[FileOperation], b: &[FileOperation]) -> f64 {
    let a: BTreeSet<String> = a.iter().map(change_signature).collect();
    let b: BTreeSet<String> = b.iter().map(change_signature).collect();
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    jaccard(&a, &b)
}

fn path_similarity(a: Option<&Path>, b: Option<&Path>) -> f64 {
    match (a, b) {
        (Some(a), Some(b)) if a == b => 1.0,
        (Some(a), Some(b)) if a.extension().is_some() && a.extension() == b.extension() => 0.5,
        (None, None) => 0.5,
        _ => 0.0,
    }
}

fn symbol_similarity(a: &[String], b: &[String]) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    let a: BTreeSet<String> = a.iter().cloned().collect();
    let b: BTreeSet<String> = b.iter().cloned().collect();
    jaccard(&a, &b)
}

impl CorrectionPattern {
    /// 与某个错误的加权相似度（0..=1）
    pub fn similarity(&self, error: &ErrorCorrection) -> f64 {
        let kind = if self.error_kind == error.error_kind { 1.0 } else { 0.0 };
        let path = path_similarity(self.file.as_deref(), error.context.file.as_deref());
        let code = jaccard(
            &code_tokens(&self.code),
            &code_tokens(error.context.code.as_deref().unwrap_or_default()),
        );
        let symbols = symbol_similarity(&self.related_symbols, &error.context.related_symbols);

        (kind * KIND_WEIGHT + path * PATH_WEIGHT + code * CODE_WEIGHT + symbols * SYMBOL_WEIGHT)
            / (KIND_WEIGHT + PATH_WEIGHT + CODE_WEIGHT + SYMBOL_WEIGHT)
    }

    fn record(&mut self, fix: &SuggestedFix, success: bool, context: &str, group_overlap: f64) {
        if success {
            self.stats.success_count += 1;
        } else {
            self.stats.failure_count += 1;
        }
        self.stats.last_used = chrono::Utc::now().timestamp_millis();
        self.stats.contexts.insert(context.to_string());

        // 目标列表没有相似策略时新建；另一列表中的相似策略同步累计
        let (primary, secondary) = if success {
            (&mut self.successful, &mut self.failed)
        } else {
            (&mut self.failed, &mut self.successful)
        };
        match primary
            .iter_mut()
            .find(|s| change_overlap(&s.changes, &fix.changes) >= group_overlap)
        {
            Some(strategy) => strategy.record(success, context),
            None => {
                let mut strategy = StrategyRecord::from_fix(fix);
                strategy.record(success, context);
                primary.push(strategy);
            }
        }
        if let Some(strategy) = secondary
            .iter_mut()
            .find(|s| change_overlap(&s.changes, &fix.changes) >= group_overlap)
        {
            strategy.record(success, context);
        }
    }

    /// 成功策略按成功率、成功次数降序
    pub fn ranked_strategies(&self) -> Vec<&StrategyRecord> {
        let mut strategies: Vec<&StrategyRecord> = self.successful.iter().collect();
        strategies.sort_by(|a, b| {
            b.success_rate()
                .total_cmp(&a.success_rate())
                .then(b.success_count.cmp(&a.success_count))
        });
        strategies
    }
}

/// 匹配到的历史模式与其重放出的修复
#[derive(Debug, Clone)]
pub struct PatternSuggestion {
    pub pattern_key: String,
    pub similarity: f64,
    pub pattern_success_rate: f64,
    pub fix: SuggestedFix,
}

/// 修正模式库；由调用方持有并注入到 AutoCorrectEngine
#[derive(Debug, Default)]
pub struct CorrectionPatternStore {
    patterns: HashMap<String, CorrectionPattern>,
    group_overlap: f64,
}

impl CorrectionPatternStore {
    pub fn new(group_overlap: f64) -> Self {
        Self {
            patterns: HashMap::new(),
            group_overlap,
        }
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&CorrectionPattern> {
        self.patterns.get(key)
    }

    /// 记录一次修复结果
    pub fn record_outcome(&mut self, error: &ErrorCorrection, fix: &SuggestedFix, success: bool) {
        let key = error.fingerprint();
        let context = error.context_key();
        let group_overlap = self.group_overlap;
        let pattern = self.patterns.entry(key.clone()).or_insert_with(|| CorrectionPattern {
            key,
            error_kind: error.error_kind,
            file: error.context.file.clone(),
            code: error.context.code.clone().unwrap_or_default(),
            related_symbols: error.context.related_symbols.clone(),
            stats: PatternStats::default(),
            successful: Vec::new(),
            failed: Vec::new(),
        });
        pattern.record(fix, success, &context, group_overlap);
        tracing::debug!(
            "Pattern {} now {}/{} (success/failure)",
            &pattern.key[..12],
            pattern.stats.success_count,
            pattern.stats.failure_count
        );
    }

    /// 相似度超过阈值的模式，重放其前 `max_strategies` 个成功策略并改写到当前文件
    pub fn suggest(
        &self,
        error: &ErrorCorrection,
        min_similarity: f64,
        max_strategies: usize,
    ) -> Vec<PatternSuggestion> {
        let mut matches: Vec<(&CorrectionPattern, f64)> = self
            .patterns
            .values()
            .map(|p| (p, p.similarity(error)))
            .filter(|(_, sim)| *sim > min_similarity)
            .collect();
        matches.sort_by(|a, b| {
            b.0.stats
                .success_rate()
                .total_cmp(&a.0.stats.success_rate())
                .then(b.1.total_cmp(&a.1))
        });

        let mut suggestions = Vec::new();
        for (pattern, similarity) in matches {
            for strategy in pattern.ranked_strategies().into_iter().take(max_strategies) {
                let changes = adapt_changes(&strategy.changes, pattern.file.as_deref(), error);
                let fix = SuggestedFix::new(
                    strategy.description.clone(),
                    changes,
                    strategy.success_rate() * similarity,
                )
                .with_origin(FixOrigin::Pattern {
                    key: pattern.key.clone(),
                    similarity,
                });
                suggestions.push(PatternSuggestion {
                    pattern_key: pattern.key.clone(),
                    similarity,
                    pattern_success_rate: pattern.stats.success_rate(),
                    fix,
                });
            }
        }
        suggestions
    }
}

/// 把针对原文件的修改改写到当前错误所在文件；其他文件上的修改保持不变
fn adapt_changes(
    changes: &[FileOperation],
    original_file: Option<&Path>,
    error: &ErrorCorrection,
) -> Vec<FileOperation> {
    match (original_file, error.context.file.as_deref()) {
        (Some(original), Some(target)) if original != target => changes
            .iter()
            .map(|op| {
                if op.path() == original {
                    op.retarget(target)
                } else {
                    op.clone()
                }
            })
            .collect(),
        _ => changes.to_vec(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::correction::{ErrorContext, Severity};

    fn syntax_error(file: &str, code: &str) -> ErrorCorrection {
        ErrorCorrection::new(
            ErrorKind::Syntax,
            Severity::High,
            "unclosed delimiter",
            ErrorContext::for_file(file).with_code(code),
        )
    }

    fn replace_fix(path: &str, find: &str, replace: &str) -> SuggestedFix {
        SuggestedFix::new(
            format!("replace {} with {}", find, replace),
            vec![FileOperation::Replace {
                path: path.into(),
                find: find.into(),
                replace: replace.into(),
            }],
            0.9,
        )
    }

    #[test]
    fn test_similarity_weights() {
        let mut store = CorrectionPatternStore::new(0.7);
        let err = syntax_error("src/a.rs", "let x = (1;");
        store.record_outcome(&err, &replace_fix("src/a.rs", "(1;", "(1);"), true);
        let pattern = store.get(&err.fingerprint()).unwrap();

        assert!((pattern.similarity(&err) - 1.0).abs() < 1e-9);
        // 换文件（同扩展名）：路径得分 0.5
        let moved = syntax_error("src/b.rs", "let x = (1;");
        assert!((pattern.similarity(&moved) - 12.5 / 14.0).abs() < 1e-9);
        // 错误类型不同
        let mut other_kind = err.clone();
        other_kind.error_kind = ErrorKind::Impact;
        assert!((pattern.similarity(&other_kind) - 9.0 / 14.0).abs() < 1e-9);
    }

    #[test]
    fn test_strategies_group_by_overlap() {
        let mut store = CorrectionPatternStore::new(0.7);
        let err = syntax_error("src/a.rs", "let x = (1;");
        let fix = replace_fix("src/a.rs", "(1;", "(1);");
        store.record_outcome(&err, &fix, true);
        store.record_outcome(&err, &fix, true);
        store.record_outcome(&err, &fix, false);
        store.record_outcome(&err, &replace_fix("src/a.rs", "let", "const"), false);

        let pattern = store.get(&err.fingerprint()).unwrap();
        assert_eq!(pattern.stats.success_count, 2);
        assert_eq!(pattern.stats.failure_count, 2);
        assert_eq!(pattern.successful.len(), 1);
        assert_eq!(pattern.successful[0].success_count, 2);
        assert_eq!(pattern.successful[0].failure_count, 1);
        assert_eq!(pattern.failed.len(), 2);
        assert!(pattern.stats.contexts.contains("rs"));
    }

    #[test]
    fn test_suggest_retargets_to_new_file() {
        let mut store = CorrectionPatternStore::new(0.7);
        let err = syntax_error("src/a.rs", "let x = (1;");
        store.record_outcome(&err, &replace_fix("src/a.rs", "(1;", "(1);"), true);

        let new_err = syntax_error("src/b.rs", "let x = (1;");
        let suggestions = store.suggest(&new_err, 0.7, 3);
        assert_eq!(suggestions.len(), 1);
        assert_eq!(suggestions[0].fix.changes[0].path(), Path::new("src/b.rs"));
        assert!(matches!(suggestions[0].fix.origin, FixOrigin::Pattern { .. }));

        let unrelated = ErrorCorrection::new(
            ErrorKind::Memory,
            Severity::Low,
            "conflict",
            ErrorContext::default(),
        );
        assert!(store.suggest(&unrelated, 0.7, 3).is_empty());
    }

    #[test]
    fn test_suggest_caps_strategies_per_pattern() {
        let mut store = CorrectionPatternStore::new(0.7);
        let err = syntax_error("src/a.rs", "let x = (1;");
        for i in 0..5 {
            store.record_outcome(&err, &replace_fix("src/a.rs", &format!("f{}", i), "g"), true);
        }
        assert_eq!(store.suggest(&err, 0.7, 3).len(), 3);
    }
}
