//! 语言分析器抽象
//!
//! 每种语言一个实现，按扩展名查找；结构、导入、语法错误三类查询。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// 文件中的一个结构项（函数、类型、模块等）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructureItem {
    /// 结构种类，如 `function` / `struct` / `class`
    pub kind: String,
    pub name: String,
    pub start_line: usize,
    pub end_line: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyntaxError {
    pub line: usize,
    pub column: usize,
    pub message: String,
}

#[async_trait]
pub trait LanguageAnalyzer: Send + Sync {
    /// 语言 ID，如 `rust`
    fn language_id(&self) -> &str;

    /// 负责的文件扩展名（不含点）
    fn extensions(&self) -> &[&str];

    async fn analyze_structure(&self, content: &str) -> Vec<StructureItem>;

    async fn analyze_imports(&self, content: &str) -> Vec<String>;

    async fn detect_syntax_errors(&self, content: &str) -> Vec<SyntaxError>;

    async fn validate_syntax(&self, content: &str) -> bool {
        self.detect_syntax_errors(content).await.is_empty()
    }

    async fn validate_imports(&self, _content: &str) -> bool {
        true
    }

    async fn validate_structure(&self, _content: &str) -> bool {
        true
    }
}
