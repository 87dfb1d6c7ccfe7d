//! 代码编辑：在工作区内安全地应用文件修改
//!
//! 每次应用前先对涉及的文件做快照（原始字节，或"文件不存在"），校验失败时据此逐字节回滚。

use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 单个文件修改操作
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum FileOperation {
    /// 整体写入（文件不存在则创建）
    Write { path: PathBuf, content: String },
    /// 精确字符串替换（找不到时容忍缩进差异）
    Replace {
        path: PathBuf,
        find: String,
        replace: String,
    },
    Delete { path: PathBuf },
}

impl FileOperation {
    pub fn path(&self) -> &Path {
        match self {
            FileOperation::Write { path, .. }
            | FileOperation::Replace { path, .. }
            | FileOperation::Delete { path } => path,
        }
    }

    /// 同一修改换到另一个文件上（复用历史修正策略时使用）
    pub fn retarget(&self, new_path: &Path) -> Self {
        let path = new_path.to_path_buf();
        match self {
            FileOperation::Write { content, .. } => FileOperation::Write {
                path,
                content: content.clone(),
            },
            FileOperation::Replace { find, replace, .. } => FileOperation::Replace {
                path,
                find: find.clone(),
                replace: replace.clone(),
            },
            FileOperation::Delete { .. } => FileOperation::Delete { path },
        }
    }
}

#[derive(Error, Debug)]
pub enum EditError {
    #[error("Access denied: path '{0}' is outside the workspace")]
    PathEscape(String),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Text to replace not found in {0}")]
    SearchNotFound(String),

    /// 恢复快照时写入失败，文件停留在修改后的状态
    #[error("Could not restore {path}: {source}")]
    RollbackFailed {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl EditError {
    pub fn is_rollback_failure(&self) -> bool {
        matches!(self, EditError::RollbackFailed { .. })
    }
}

/// 应用前的文件状态：None 表示文件原本不存在
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EditSnapshot {
    entries: Vec<(PathBuf, Option<Vec<u8>>)>,
}

impl EditSnapshot {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 快照中某文件的原始文本（相对或绝对路径均可）
    pub fn original_text(&self, path: &Path) -> Option<Option<String>> {
        self.entries
            .iter()
            .find(|(p, _)| p == path || p.ends_with(path))
            .map(|(_, bytes)| bytes.as_ref().map(|b| String::from_utf8_lossy(b).into_owned()))
    }

    pub fn paths(&self) -> impl Iterator<Item = &Path> {
        self.entries.iter().map(|(p, _)| p.as_path())
    }
}

/// 工作区文件编辑器
#[derive(Debug, Clone)]
pub struct FileEditor {
    root: PathBuf,
}

impl FileEditor {
    pub fn new(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        let root = root.canonicalize().unwrap_or_else(|_| root.to_path_buf());
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// 解析为工作区内的绝对路径；按词法消解 `..`，越界则拒绝
    pub fn resolve(&self, path: &Path) -> Result<PathBuf, EditError> {
        let joined = if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        };

        let mut normalized = PathBuf::new();
        for component in joined.components() {
            match component {
                Component::ParentDir => {
                    if !normalized.pop() {
                        return Err(EditError::PathEscape(path.display().to_string()));
                    }
                }
                Component::CurDir => {}
                other => normalized.push(other),
            }
        }

        if !normalized.starts_with(&self.root) {
            return Err(EditError::PathEscape(path.display().to_string()));
        }
        Ok(normalized)
    }

    /// 相对工作区根的路径（用于日志与指纹）
    pub fn relative(&self, path: &Path) -> PathBuf {
        path.strip_prefix(&self.root)
            .map(Path::to_path_buf)
            .unwrap_or_else(|_| path.to_path_buf())
    }

    /// 读取文本；文件不存在时返回 None
    pub async fn read(&self, path: &Path) -> Result<Option<String>, EditError> {
        let abs = self.resolve(path)?;
        match tokio::fs::read_to_string(&abs).await {
            Ok(s) => Ok(Some(s)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(EditError::Io {
                path: abs.display().to_string(),
                source,
            }),
        }
    }

    async fn read_bytes(abs: &Path) -> Result<Option<Vec<u8>>, EditError> {
        match tokio::fs::read(abs).await {
            Ok(b) => Ok(Some(b)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(EditError::Io {
                path: abs.display().to_string(),
                source,
            }),
        }
    }

    /// 记录操作涉及文件的当前状态
    pub async fn snapshot(&self, ops: &[FileOperation]) -> Result<EditSnapshot, EditError> {
        let mut snapshot = EditSnapshot::default();
        for op in ops {
            let abs = self.resolve(op.path())?;
            if snapshot.entries.iter().any(|(p, _)| p == &abs) {
                continue;
            }
            let bytes = Self::read_bytes(&abs).await?;
            snapshot.entries.push((abs, bytes));
        }
        Ok(snapshot)
    }

    /// 快照后依次应用；中途失败会先回滚再返回错误，回滚本身失败时返回 `RollbackFailed`
    pub async fn apply(&self, ops: &[FileOperation]) -> Result<EditSnapshot, EditError> {
        let snapshot = self.snapshot(ops).await?;
        for op in ops {
            if let Err(e) = self.apply_one(op).await {
                tracing::warn!("Edit on {} failed, rolling back: {}", op.path().display(), e);
                self.rollback(&snapshot).await?;
                return Err(e);
            }
        }
        Ok(snapshot)
    }

    async fn apply_one(&self, op: &FileOperation) -> Result<(), EditError> {
        let abs = self.resolve(op.path())?;
        let io_err = |source| EditError::Io {
            path: abs.display().to_string(),
            source,
        };
        match op {
            FileOperation::Write { content, .. } => {
                if let Some(parent) = abs.parent() {
                    tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
                }
                tokio::fs::write(&abs, content).await.map_err(io_err)?;
            }
            FileOperation::Replace { find, replace, .. } => {
                let content = tokio::fs::read_to_string(&abs).await.map_err(io_err)?;
                let updated = replace_once(&content, find, replace)
                    .ok_or_else(|| EditError::SearchNotFound(abs.display().to_string()))?;
                tokio::fs::write(&abs, updated).await.map_err(io_err)?;
            }
            FileOperation::Delete { .. } => match tokio::fs::remove_file(&abs).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(io_err(e)),
            },
        }
        Ok(())
    }

    /// 恢复快照：原本存在的文件写回原始字节，原本不存在的文件删除
    pub async fn rollback(&self, snapshot: &EditSnapshot) -> Result<(), EditError> {
        for (abs, original) in &snapshot.entries {
            let io_err = |source| EditError::RollbackFailed {
                path: abs.display().to_string(),
                source,
            };
            match original {
                Some(bytes) => tokio::fs::write(abs, bytes).await.map_err(io_err)?,
                None => match tokio::fs::remove_file(abs).await {
                    Ok(()) => {}
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => return Err(io_err(e)),
                },
            }
        }
        Ok(())
    }
}

/// 替换第一次出现；精确匹配失败时按去除行首缩进后逐行比对
fn replace_once(content: &str, find: &str, replace: &str) -> Option<String> {
    if find.is_empty() {
        return None;
    }
    if let Some(pos) = content.find(find) {
        let mut out = String::with_capacity(content.len() + replace.len());
        out.push_str(&content[..pos]);
        out.push_str(replace);
        out.push_str(&content[pos + find.len()..]);
        return Some(out);
    }
    let (start, matched) = find_with_indentation_tolerance(content, find)?;
    let mut out = String::with_capacity(content.len() + replace.len());
    out.push_str(&content[..start]);
    out.push_str(replace);
    out.push_str(&content[start + matched.len()..]);
    Some(out)
}

fn find_with_indentation_tolerance(content: &str, find: &str) -> Option<(usize, String)> {
    let find_lines: Vec<&str> = find.lines().collect();
    let first = find_lines.first()?.trim_start();
    let content_lines: Vec<&str> = content.lines().collect();

    let mut offset = 0usize;
    for (i, line) in content_lines.iter().enumerate() {
        if line.trim_start() == first && i + find_lines.len() <= content_lines.len() {
            let window = &content_lines[i..i + find_lines.len()];
            let matched = window
                .iter()
                .zip(&find_lines)
                .all(|(c, f)| c.trim_start() == f.trim_start());
            if matched {
                return Some((offset, window.join("\n")));
            }
        }
        // 行长 + 换行符
        offset += line.len() + 1;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_replace_exact_and_indent_tolerant() {
        let src = "fn main() {\n    let x = 1;\n    println!(\"{}\", x);\n}\n";
        let out = replace_once(src, "let x = 1;", "let x = 2;").unwrap();
        assert!(out.contains("let x = 2;"));

        let out = replace_once(src, "let x = 1;\nprintln!(\"{}\", x);", "let y = 3;").unwrap();
        assert_eq!(out, "fn main() {\nlet y = 3;\n}\n");

        assert!(replace_once(src, "missing", "x").is_none());
    }

    #[test]
    fn test_resolve_rejects_escape() {
        let dir = tempfile::tempdir().unwrap();
        let editor = FileEditor::new(dir.path());
        assert!(editor.resolve(Path::new("src/../lib.rs")).is_ok());
        assert!(matches!(
            editor.resolve(Path::new("../outside.rs")),
            Err(EditError::PathEscape(_))
        ));
        assert!(matches!(
            editor.resolve(Path::new("/etc/passwd")),
            Err(EditError::PathEscape(_))
        ));
    }

    #[tokio::test]
    async fn test_rollback_is_byte_exact() {
        let dir = tempfile::tempdir().unwrap();
        let editor = FileEditor::new(dir.path());
        let original: &[u8] = b"line one\r\nline two\n\xe2\x9c\x93 trailing";
        std::fs::write(dir.path().join("a.txt"), original).unwrap();

        let ops = vec![
            FileOperation::Write {
                path: "a.txt".into(),
                content: "rewritten".into(),
            },
            FileOperation::Write {
                path: "nested/new.txt".into(),
                content: "created".into(),
            },
        ];
        let snapshot = editor.apply(&ops).await.unwrap();
        assert_eq!(std::fs::read_to_string(dir.path().join("a.txt")).unwrap(), "rewritten");

        editor.rollback(&snapshot).await.unwrap();
        assert_eq!(std::fs::read(dir.path().join("a.txt")).unwrap(), original);
        assert!(!dir.path().join("nested/new.txt").exists());
    }

    #[tokio::test]
    async fn test_failed_apply_restores_earlier_edits() {
        let dir = tempfile::tempdir().unwrap();
        let editor = FileEditor::new(dir.path());
        std::fs::write(dir.path().join("a.rs"), "fn a() {}\n").unwrap();

        let ops = vec![
            FileOperation::Write {
                path: "a.rs".into(),
                content: "fn a() { changed }\n".into(),
            },
            FileOperation::Replace {
                path: "a.rs".into(),
                find: "not present".into(),
                replace: "x".into(),
            },
        ];
        let err = editor.apply(&ops).await.unwrap_err();
        assert!(matches!(err, EditError::SearchNotFound(_)));
        assert_eq!(std::fs::read_to_string(dir.path().join("a.rs")).unwrap(), "fn a() {}\n");
    }

    #[tokio::test]
    async fn test_rollback_write_failure_is_distinguished() {
        let dir = tempfile::tempdir().unwrap();
        let editor = FileEditor::new(dir.path());
        std::fs::write(dir.path().join("a.rs"), "fn a() {}\n").unwrap();

        let ops = vec![FileOperation::Write {
            path: "a.rs".into(),
            content: "fn b() {}\n".into(),
        }];
        let snapshot = editor.apply(&ops).await.unwrap();
        // 原文件位置被目录占据，写回必然失败
        std::fs::remove_file(dir.path().join("a.rs")).unwrap();
        std::fs::create_dir(dir.path().join("a.rs")).unwrap();

        let err = editor.rollback(&snapshot).await.unwrap_err();
        assert!(err.is_rollback_failure());
        assert!(!EditError::SearchNotFound("a.rs".into()).is_rollback_failure());
    }
}
