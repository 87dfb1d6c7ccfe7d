//! 任务分类器：把自由文本目标映射为任务类型与目标后端
//!
//! 纯函数：关键词集合命中、代码标识符启发式、长度与关键词推导的复杂度（1..=10），
//! 再经决策表得到 (kind, targetBackend, requiresSwitch, validationRequired)。
//! 计划步骤的类型与后端推断复用同一套词汇，启发式不外泄到其他模块。

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::LazyLock;

use regex::Regex;

use crate::llm::BackendRole;
use crate::plan::{CodeContext, CommandOperation, StepType, TaskAnalysis, TaskKind};

const CODE_KEYWORDS: &[&str] = &[
    "code", "function", "class", "method", "implement", "refactor", "debug", "bug", "compile",
    "compiler", "variable", "struct", "enum", "trait", "module", "api", "syntax", "import",
    "endpoint", "rust", "python", "javascript", "typescript", "java", "golang", "sql",
    "database", "library", "crate", "package", "exception", "stacktrace", "unittest",
];

const VISION_KEYWORDS: &[&str] = &[
    "image", "picture", "photo", "screenshot", "diagram", "visual", "draw", "drawing", "png",
    "jpg", "jpeg", "chart", "icon", "logo", "illustration",
];

const ANALYSIS_KEYWORDS: &[&str] = &[
    "analyze", "analyse", "analysis", "review", "explain", "inspect", "audit", "investigate",
    "understand", "examine", "assess", "why",
];

const VALIDATION_KEYWORDS: &[&str] = &[
    "test", "tests", "verify", "validate", "validation", "check", "ensure", "confirm",
];

const WRITE_VERBS: &[&str] = &[
    "implement", "write", "add", "create", "refactor", "fix", "update", "modify", "rename",
    "remove", "delete", "replace", "extract",
];

const COMPLEX_KEYWORDS: &[&str] = &[
    "architecture", "design", "refactor", "optimize", "performance", "concurrent", "async",
    "distributed", "algorithm", "security", "migrate", "migration", "integrate", "scalable",
];

const MULTI_STEP_MARKERS: &[&str] = &[" then ", " after that", " finally", " and also", "; "];

const SOURCE_FILE: &str = r"^[\w/.-]+\.(rs|py|js|jsx|ts|tsx|go|java|kt|c|cc|cpp|h|hpp|rb|cs|swift)$";

static SOURCE_FILE_RULE: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(SOURCE_FILE).ok());

/// 代码标识符规则（按原始词匹配，不区分上下文）：
/// - snake_case：`parse_config`、`max_retries`
/// - camelCase：`loadUser`、`getHTTPClient`
/// - PascalCase 且至少两段：`LoginForm`、`HttpServer`
/// - 调用形式：`render()`、`foo(x)`
/// - 路径形式：`std::fs`、`crate::plan`
/// - 源文件名：`main.rs`、`app.tsx`
static IDENTIFIER_RULES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"^[a-z]+(_[a-z0-9]+)+$",
        r"^[a-z][a-z0-9]*[A-Z][A-Za-z0-9]*$",
        r"^[A-Z][a-z0-9]+[A-Z][A-Za-z0-9]*$",
        r"^[A-Za-z_][A-Za-z0-9_]*\(.*\)$",
        r"^[A-Za-z_][A-Za-z0-9_]*(::[A-Za-z_][A-Za-z0-9_]*)+$",
        SOURCE_FILE,
    ]
    .iter()
    .filter_map(|p| Regex::new(p).ok())
    .collect()
});

fn strip_punctuation(word: &str) -> &str {
    let word = word.trim_matches(|c: char| matches!(c, ',' | ';' | '`' | '"' | '\'' | '?' | '!'));
    word.strip_suffix('.').unwrap_or(word)
}

/// 是否"看起来像"代码标识符（函数名、类型名、路径、源文件）
pub fn looks_like_code_identifier(word: &str) -> bool {
    let word = strip_punctuation(word);
    if word.len() < 3 {
        return false;
    }
    IDENTIFIER_RULES.iter().any(|re| re.is_match(word))
}

/// 小写词集合（按非字母数字切分）
fn word_set(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_string)
        .collect()
}

/// 词表命中：全等，或关键词 >= 5 字符时的前缀命中（functions -> function）
fn hits(words: &HashSet<String>, vocabulary: &[&str]) -> usize {
    vocabulary
        .iter()
        .filter(|kw| {
            words
                .iter()
                .any(|w| w == *kw || (kw.len() >= 5 && w.starts_with(*kw)))
        })
        .count()
}

pub struct TaskClassifier;

impl TaskClassifier {
    /// 对输入分类；总是返回结果，不会失败
    pub fn classify(text: &str) -> TaskAnalysis {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return TaskAnalysis::fallback();
        }

        if trimmed.starts_with('/') {
            return TaskAnalysis {
                kind: TaskKind::Command,
                target_backend: BackendRole::Chat,
                requires_switch: false,
                validation_required: false,
                complexity: 1,
            };
        }

        let words = word_set(trimmed);
        let has_code = Self::has_code(trimmed, &words);
        let has_vision = hits(&words, VISION_KEYWORDS) > 0;
        let has_analysis = hits(&words, ANALYSIS_KEYWORDS) > 0;
        let complexity = Self::complexity(trimmed, &words, has_code, has_vision);

        let (kind, target_backend) = match (has_code, has_vision) {
            (_, true) => (TaskKind::Image, BackendRole::Vision),
            (true, false) if has_analysis => (TaskKind::CodeAnalysis, BackendRole::Code),
            (true, false) => (TaskKind::Code, BackendRole::Code),
            (false, false) => (TaskKind::General, BackendRole::Chat),
        };

        TaskAnalysis {
            kind,
            target_backend,
            requires_switch: target_backend != BackendRole::Chat,
            validation_required: complexity > 7,
            complexity,
        }
    }

    fn has_code(text: &str, words: &HashSet<String>) -> bool {
        text.contains("```")
            || hits(words, CODE_KEYWORDS) > 0
            || text.split_whitespace().any(looks_like_code_identifier)
    }

    /// 复杂度：1 + 长度档位(0..3) + 复杂关键词(<=3) + 代码/视觉各 1 + 多步标记(<=2)，截断到 1..=10
    fn complexity(text: &str, words: &HashSet<String>, has_code: bool, has_vision: bool) -> u8 {
        let word_count = text.split_whitespace().count();
        let length_score = match word_count {
            0..=9 => 0,
            10..=29 => 1,
            30..=59 => 2,
            _ => 3,
        };
        let lower = format!(" {} ", text.to_lowercase());
        let multi_step = MULTI_STEP_MARKERS
            .iter()
            .map(|m| lower.matches(m).count())
            .sum::<usize>()
            .min(2);

        let score = 1
            + length_score
            + hits(words, COMPLEX_KEYWORDS).min(3)
            + usize::from(has_code)
            + usize::from(has_vision)
            + multi_step;
        score.clamp(1, 10) as u8
    }

    /// 计划步骤的类型推断
    pub fn step_type_for(description: &str) -> StepType {
        let words = word_set(description);
        let has_write = hits(&words, WRITE_VERBS) > 0;
        let has_analysis = hits(&words, ANALYSIS_KEYWORDS) > 0;
        let has_validation = hits(&words, VALIDATION_KEYWORDS) > 0;
        let has_code = Self::has_code(description, &words);

        if has_analysis && !has_write {
            StepType::Analysis
        } else if has_validation && !has_write {
            StepType::Validation
        } else if has_code || (has_write && has_validation) {
            StepType::Code
        } else {
            StepType::General
        }
    }

    /// 计划步骤的目标后端推断
    pub fn backend_for_step(description: &str, step_type: StepType) -> BackendRole {
        let words = word_set(description);
        if hits(&words, VISION_KEYWORDS) > 0 {
            return BackendRole::Vision;
        }
        match step_type {
            StepType::Code => BackendRole::Code,
            StepType::Analysis if Self::has_code(description, &words) => BackendRole::Code,
            _ => BackendRole::Chat,
        }
    }

    /// 文本中提到的第一个源文件，作为代码上下文
    pub fn code_context(text: &str) -> Option<CodeContext> {
        let rule = SOURCE_FILE_RULE.as_ref()?;
        let file = text
            .split_whitespace()
            .map(strip_punctuation)
            .find(|w| rule.is_match(w))?;
        let file = PathBuf::from(file);
        let language = file
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_lowercase);
        Some(CodeContext {
            file: Some(file),
            language,
            snippet: None,
        })
    }

    /// 解析 `/command args`
    pub fn parse_command(text: &str) -> CommandOperation {
        let mut parts = text.trim().trim_start_matches('/').split_whitespace();
        let name = parts.next().unwrap_or_default().to_lowercase();
        match name.as_str() {
            "models" => CommandOperation::ListModels,
            "plan" => CommandOperation::ShowPlan,
            "resume" => CommandOperation::Resume,
            "switch" => match parts.next().and_then(BackendRole::parse) {
                Some(role) => CommandOperation::Switch(role),
                None => CommandOperation::Unknown(text.trim().to_string()),
            },
            _ => CommandOperation::Unknown(text.trim().to_string()),
        }
    }
}
