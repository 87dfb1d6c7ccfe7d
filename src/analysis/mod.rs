//! 代码分析层：语言分析器接口、按扩展名查找的注册表、影响分析用的文件依赖图

pub mod graph;
pub mod registry;
pub mod rust_lite;
pub mod traits;

pub use graph::DependencyGraph;
pub use registry::AnalyzerRegistry;
pub use rust_lite::RustLiteAnalyzer;
pub use traits::{LanguageAnalyzer, StructureItem, SyntaxError};
