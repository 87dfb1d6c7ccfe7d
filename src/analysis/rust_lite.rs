//! 轻量 Rust 分析器：按行正则识别条目与 `use`/`mod`，括号配对检测语法错误
//!
//! 不做真正的解析，只覆盖校验需要的信号：未闭合 / 多余的括号、未闭合字符串、顶层条目名称。

use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;

use crate::analysis::{LanguageAnalyzer, StructureItem, SyntaxError};

static ITEM: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(
        r"^\s*(?:pub(?:\([^)]*\))?\s+)?(?:async\s+)?(?:unsafe\s+)?(fn|struct|enum|trait|type|const|static|mod)\s+([A-Za-z_][A-Za-z0-9_]*)",
    )
    .ok()
});

static USE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^\s*(?:pub(?:\([^)]*\))?\s+)?use\s+([^;]+);").ok());

static MOD_DECL: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^\s*(?:pub(?:\([^)]*\))?\s+)?mod\s+([A-Za-z_][A-Za-z0-9_]*)\s*;").ok());

#[derive(Debug, Default)]
pub struct RustLiteAnalyzer;

impl RustLiteAnalyzer {
    pub fn new() -> Self {
        Self
    }
}

fn closing_for(open: char) -> char {
    match open {
        '(' => ')',
        '[' => ']',
        _ => '}',
    }
}

/// 去掉行注释；字符串内的 `//` 不处理（只影响极少数误报）
fn strip_line_comment(line: &str) -> &str {
    match line.find("//") {
        Some(pos) => &line[..pos],
        None => line,
    }
}

/// 条目结束行：从起始行开始括号归零处；单行条目（以 `;` 结尾）即起始行
fn item_end_line(lines: &[&str], start: usize) -> usize {
    let mut depth = 0i32;
    let mut opened = false;
    for (i, line) in lines.iter().enumerate().skip(start) {
        let code = strip_line_comment(line);
        for c in code.chars() {
            match c {
                '{' => {
                    depth += 1;
                    opened = true;
                }
                '}' => depth -= 1,
                _ => {}
            }
        }
        if (opened && depth <= 0) || (!opened && code.trim_end().ends_with(';')) {
            return i + 1;
        }
    }
    lines.len()
}

#[async_trait]
impl LanguageAnalyzer for RustLiteAnalyzer {
    fn language_id(&self) -> &str {
        "rust"
    }

    fn extensions(&self) -> &[&str] {
        &["rs"]
    }

    async fn analyze_structure(&self, content: &str) -> Vec<StructureItem> {
        let Some(item) = ITEM.as_ref() else {
            return Vec::new();
        };
        let lines: Vec<&str> = content.lines().collect();
        lines
            .iter()
            .enumerate()
            .filter_map(|(i, line)| {
                let caps = item.captures(line)?;
                let kind = match &caps[1] {
                    "fn" => "function",
                    "mod" => "module",
                    other => other,
                };
                Some(StructureItem {
                    kind: kind.to_string(),
                    name: caps[2].to_string(),
                    start_line: i + 1,
                    end_line: item_end_line(&lines, i),
                })
            })
            .collect()
    }

    async fn analyze_imports(&self, content: &str) -> Vec<String> {
        let (Some(use_re), Some(mod_re)) = (USE.as_ref(), MOD_DECL.as_ref()) else {
            return Vec::new();
        };
        let mut imports = Vec::new();
        for line in content.lines() {
            if let Some(caps) = use_re.captures(line) {
                imports.push(caps[1].trim().to_string());
            } else if let Some(caps) = mod_re.captures(line) {
                imports.push(caps[1].to_string());
            }
        }
        imports
    }

    async fn detect_syntax_errors(&self, content: &str) -> Vec<SyntaxError> {
        let mut errors = Vec::new();
        let mut stack: Vec<(char, usize, usize)> = Vec::new();
        let mut in_string = false;
        let mut string_start = (0, 0);

        for (i, line) in content.lines().enumerate() {
            let line_no = i + 1;
            let mut chars = line.char_indices().peekable();
            while let Some((col, c)) = chars.next() {
                if in_string {
                    match c {
                        '\\' => {
                            chars.next();
                        }
                        '"' => in_string = false,
                        _ => {}
                    }
                    continue;
                }
                match c {
                    '/' if matches!(chars.peek(), Some((_, '/'))) => break,
                    '"' => {
                        in_string = true;
                        string_start = (line_no, col + 1);
                    }
                    // 字符字面量 'x' / '\n'，生命周期 'a 不处理
                    '\'' => {
                        let rest = &line[col + 1..];
                        let literal_len = if rest.starts_with('\\') {
                            rest.find('\'').map(|p| p + 1)
                        } else {
                            rest.chars()
                                .next()
                                .filter(|_| rest.chars().nth(1) == Some('\''))
                                .map(|ch| ch.len_utf8() + 1)
                        };
                        if let Some(len) = literal_len {
                            for _ in 0..rest[..len].chars().count() {
                                chars.next();
                            }
                        }
                    }
                    '(' | '[' | '{' => stack.push((c, line_no, col + 1)),
                    ')' | ']' | '}' => match stack.pop() {
                        Some((open, _, _)) if closing_for(open) == c => {}
                        Some((open, open_line, open_col)) => {
                            errors.push(SyntaxError {
                                line: line_no,
                                column: col + 1,
                                message: format!(
                                    "mismatched closing delimiter `{}` (opened `{}` at {}:{})",
                                    c, open, open_line, open_col
                                ),
                            });
                        }
                        None => errors.push(SyntaxError {
                            line: line_no,
                            column: col + 1,
                            message: format!("unexpected closing delimiter `{}`", c),
                        }),
                    },
                    _ => {}
                }
            }
        }

        if in_string {
            errors.push(SyntaxError {
                line: string_start.0,
                column: string_start.1,
                message: "unterminated string literal".to_string(),
            });
        }
        for (open, line, column) in stack {
            errors.push(SyntaxError {
                line,
                column,
                message: format!("unclosed delimiter `{}`", open),
            });
        }
        errors
    }
}
