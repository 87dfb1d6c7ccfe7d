//! 文件依赖图：记录"谁依赖谁"，用于代码修改后的影响分析
//!
//! 路径统一存为工作区相对路径。扫描时用分析器提取导入，按文件名（不含扩展名）解析到工作区内的文件。

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::analysis::AnalyzerRegistry;

const SKIPPED_DIRS: &[&str] = &["target", "node_modules", "dist", "build"];

#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    /// 被依赖文件 -> 依赖它的文件
    dependents: HashMap<PathBuf, BTreeSet<PathBuf>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// `dependent` 依赖 `dependency`
    pub fn add_dependency(&mut self, dependent: impl Into<PathBuf>, dependency: impl Into<PathBuf>) {
        let dependent = dependent.into();
        let dependency = dependency.into();
        if dependent == dependency {
            return;
        }
        self.dependents.entry(dependency).or_default().insert(dependent);
    }

    /// 直接依赖该文件的所有文件
    pub fn dependents_of(&self, path: &Path) -> Vec<PathBuf> {
        self.dependents
            .get(path)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.dependents.is_empty()
    }

    pub fn edge_count(&self) -> usize {
        self.dependents.values().map(BTreeSet::len).sum()
    }

    /// 扫描工作区构建依赖图；没有分析器的文件不参与
    pub async fn scan(root: &Path, registry: &AnalyzerRegistry) -> Self {
        let files: Vec<PathBuf> = WalkDir::new(root)
            .max_depth(12)
            .into_iter()
            .filter_entry(|e| {
                let name = e.file_name().to_string_lossy();
                e.depth() == 0 || (!name.starts_with('.') && !SKIPPED_DIRS.contains(&&*name))
            })
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .filter(|e| registry.for_path(e.path()).is_some())
            .filter_map(|e| e.path().strip_prefix(root).ok().map(Path::to_path_buf))
            .collect();

        let mut by_stem: HashMap<String, Vec<PathBuf>> = HashMap::new();
        for file in &files {
            if let Some(stem) = file.file_stem().and_then(|s| s.to_str()) {
                by_stem.entry(stem.to_string()).or_default().push(file.clone());
            }
        }

        let mut graph = Self::new();
        for file in &files {
            let Some(analyzer) = registry.for_path(file) else {
                continue;
            };
            let content = match tokio::fs::read_to_string(root.join(file)).await {
                Ok(c) => c,
                Err(e) => {
                    tracing::debug!("Skipping {} in dependency scan: {}", file.display(), e);
                    continue;
                }
            };
            for import in analyzer.analyze_imports(&content).await {
                for segment in import_segments(&import) {
                    for target in by_stem.get(segment).into_iter().flatten() {
                        graph.add_dependency(file.clone(), target.clone());
                    }
                }
            }
        }
        tracing::debug!(
            "Dependency scan of {} found {} files with dependents",
            root.display(),
            graph.dependents.len()
        );
        graph
    }
}

/// 导入路径的各段：`crate::auth::login::{a, b}` -> auth, login, a, b
fn import_segments(import: &str) -> impl Iterator<Item = &str> {
    import
        .split(|c: char| !(c.is_alphanumeric() || c == '_' || c == '-'))
        .filter(|s| !s.is_empty() && !matches!(*s, "crate" | "self" | "super" | "std" | "mod"))
}
