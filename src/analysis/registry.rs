//! 分析器注册表：按扩展名或语言 ID 查找 LanguageAnalyzer
//!
//! 没有对应分析器的文件视为"无法校验"，调用方按通过处理。

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use crate::analysis::LanguageAnalyzer;

#[derive(Default, Clone)]
pub struct AnalyzerRegistry {
    analyzers: Vec<Arc<dyn LanguageAnalyzer>>,
    by_extension: HashMap<String, usize>,
}

impl AnalyzerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册分析器；同一扩展名后注册的覆盖先注册的
    pub fn register(&mut self, analyzer: Arc<dyn LanguageAnalyzer>) {
        let index = self.analyzers.len();
        for ext in analyzer.extensions() {
            self.by_extension.insert(ext.to_lowercase(), index);
        }
        tracing::debug!("Registered language analyzer: {}", analyzer.language_id());
        self.analyzers.push(analyzer);
    }

    pub fn with(mut self, analyzer: Arc<dyn LanguageAnalyzer>) -> Self {
        self.register(analyzer);
        self
    }

    pub fn for_path(&self, path: &Path) -> Option<Arc<dyn LanguageAnalyzer>> {
        let ext = path.extension()?.to_str()?.to_lowercase();
        self.by_extension
            .get(&ext)
            .and_then(|i| self.analyzers.get(*i))
            .cloned()
    }

    pub fn for_language(&self, language_id: &str) -> Option<Arc<dyn LanguageAnalyzer>> {
        self.analyzers
            .iter()
            .find(|a| a.language_id().eq_ignore_ascii_case(language_id))
            .cloned()
    }

    pub fn is_empty(&self) -> bool {
        self.analyzers.is_empty()
    }
}
