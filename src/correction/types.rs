//! 修正数据模型：错误分类、错误上下文、候选修复与指纹

use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::tools::FileOperation;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorKind {
    Syntax,
    Semantic,
    Dependency,
    Memory,
    Impact,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Syntax => "syntax",
            ErrorKind::Semantic => "semantic",
            ErrorKind::Dependency => "dependency",
            ErrorKind::Memory => "memory",
            ErrorKind::Impact => "impact",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

/// 错误发生的位置与相关代码
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorContext {
    pub file: Option<PathBuf>,
    pub line: Option<usize>,
    pub code: Option<String>,
    #[serde(default)]
    pub related_symbols: Vec<String>,
}

impl ErrorContext {
    pub fn for_file(file: impl Into<PathBuf>) -> Self {
        Self {
            file: Some(file.into()),
            ..Default::default()
        }
    }

    pub fn at_line(mut self, line: usize) -> Self {
        self.line = Some(line);
        self
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn with_symbols(mut self, symbols: Vec<String>) -> Self {
        self.related_symbols = symbols;
        self
    }
}

/// 候选修复的来源
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum FixOrigin {
    /// 由历史修正模式重放，带模式键与指纹相似度
    Pattern { key: String, similarity: f64 },
    /// 由代码模型新生成
    Synthesized,
    #[default]
    Manual,
}

/// 一个候选修复：一组文件修改 + 置信度
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuggestedFix {
    pub description: String,
    pub changes: Vec<FileOperation>,
    /// 0..=1
    pub confidence: f64,
    #[serde(default)]
    pub origin: FixOrigin,
}

impl SuggestedFix {
    pub fn new(description: impl Into<String>, changes: Vec<FileOperation>, confidence: f64) -> Self {
        Self {
            description: description.into(),
            changes,
            confidence: confidence.clamp(0.0, 1.0),
            origin: FixOrigin::Manual,
        }
    }

    pub fn with_origin(mut self, origin: FixOrigin) -> Self {
        self.origin = origin;
        self
    }

    pub fn touched_files(&self) -> BTreeSet<PathBuf> {
        self.changes.iter().map(|c| c.path().to_path_buf()).collect()
    }
}

/// 一个校验错误及其候选修复
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorCorrection {
    pub error_kind: ErrorKind,
    pub severity: Severity,
    pub message: String,
    pub context: ErrorContext,
    #[serde(default)]
    pub suggested_fixes: Vec<SuggestedFix>,
}

impl ErrorCorrection {
    pub fn new(
        error_kind: ErrorKind,
        severity: Severity,
        message: impl Into<String>,
        context: ErrorContext,
    ) -> Self {
        Self {
            error_kind,
            severity,
            message: message.into(),
            context,
            suggested_fixes: Vec::new(),
        }
    }

    pub fn with_fixes(mut self, fixes: Vec<SuggestedFix>) -> Self {
        self.suggested_fixes = fixes;
        self
    }

    /// 模式键：SHA-256(错误类型 + 代码片段)
    pub fn fingerprint(&self) -> String {
        fingerprint(self.error_kind, self.context.code.as_deref().unwrap_or_default())
    }

    /// 阈值上下文：文件扩展名，没有文件时为 `general`
    pub fn context_key(&self) -> String {
        self.context
            .file
            .as_ref()
            .and_then(|f| f.extension())
            .and_then(|e| e.to_str())
            .map(str::to_lowercase)
            .unwrap_or_else(|| "general".to_string())
    }
}

impl fmt::Display for ErrorCorrection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.error_kind, self.message)?;
        if let Some(file) = &self.context.file {
            write!(f, " ({}", file.display())?;
            if let Some(line) = self.context.line {
                write!(f, ":{}", line)?;
            }
            write!(f, ")")?;
        }
        Ok(())
    }
}

pub fn fingerprint(kind: ErrorKind, code: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(kind.to_string().as_bytes());
    hasher.update(code.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// 代码文本的标识符 / 符号 token 集合
pub fn code_tokens(code: &str) -> BTreeSet<String> {
    code.split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_depends_on_kind_and_code() {
        let a = ErrorCorrection::new(
            ErrorKind::Syntax,
            Severity::High,
            "unclosed",
            ErrorContext::for_file("src/a.rs").with_code("fn a( {"),
        );
        let mut b = a.clone();
        b.context.file = Some("src/other.rs".into());
        b.message = "different message".into();
        assert_eq!(a.fingerprint(), b.fingerprint());

        b.error_kind = ErrorKind::Impact;
        assert_ne!(a.fingerprint(), b.fingerprint());
        assert_eq!(a.fingerprint().len(), 64);
    }

    #[test]
    fn test_context_key_and_display() {
        let err = ErrorCorrection::new(
            ErrorKind::Syntax,
            Severity::High,
            "unclosed delimiter",
            ErrorContext::for_file("src/Lib.RS").at_line(3),
        );
        assert_eq!(err.context_key(), "rs");
        assert_eq!(err.to_string(), "[syntax] unclosed delimiter (src/Lib.RS:3)");

        let general = ErrorCorrection::new(ErrorKind::Memory, Severity::Low, "conflict", ErrorContext::default());
        assert_eq!(general.context_key(), "general");
    }

    #[test]
    fn test_fix_confidence_is_clamped() {
        assert_eq!(SuggestedFix::new("x", vec![], 1.7).confidence, 1.0);
        assert_eq!(SuggestedFix::new("x", vec![], -0.2).confidence, 0.0);
    }
}
