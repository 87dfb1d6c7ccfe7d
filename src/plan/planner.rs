//! 计划分解：构造分解 prompt，把对话模型的回复解析为 PlanStep 列表
//!
//! 编号行（`1.` / `2)`）或项目符号行（`-` / `*`）各成一步；`depends on step 1, 3` 标注显式依赖，
//! 没有标注时依赖前一步。代码步骤回复中带 `path=` 的围栏代码块解析为文件写入。

use std::path::PathBuf;
use std::sync::LazyLock;

use regex::Regex;

use crate::llm::TaskClassifier;
use crate::plan::{PlanStep, StepType};
use crate::tools::FileOperation;

static STEP_LINE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^\s*(?:\d+[.)]|[-*])\s+(.+)$").ok());

static DEPENDS_ON: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"(?i)\(?\s*depends?\s+on\s+steps?\s+([\d,\s]+(?:and\s+\d+)?)\s*\)?").ok()
});

static FENCE_OPEN: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^```[\w+-]*\s+.*?path=([^\s`]+)").ok());

/// 分解 prompt：要求编号步骤，依赖用 `depends on step N` 标注
pub fn decomposition_prompt(objective: &str) -> String {
    format!(
        "Break the following objective into a short numbered list of concrete steps.\n\
         One step per line, formatted as `1. <description>`.\n\
         If a step needs an earlier step other than the one right before it, \
         append `(depends on step N)`.\n\
         Keep the objective's key terms in every step description.\n\n\
         Objective: {}",
        objective
    )
}

/// 单步执行 prompt
pub fn step_prompt(objective: &str, step: &PlanStep) -> String {
    let mut prompt = format!(
        "Objective: {}\nCurrent step ({}): {}\n",
        objective, step.step_type, step.description
    );
    if let Some(err) = &step.last_error {
        prompt.push_str(&format!("The previous attempt failed: {}\n", err));
    }
    if step.step_type == StepType::Code {
        prompt.push_str(
            "Return every changed file in full as a fenced block whose info string carries \
             the file path, e.g. ```rust path=src/lib.rs\n",
        );
    }
    prompt
}

fn step_numbers(text: &str) -> Vec<usize> {
    text.split(|c: char| !c.is_ascii_digit())
        .filter_map(|n| n.parse().ok())
        .collect()
}

/// 解析分解回复；没有可识别的步骤时退化为一个承载完整目标的步骤
pub fn parse_decomposition(objective: &str, response: &str) -> Vec<PlanStep> {
    let (Some(step_line), Some(depends_on)) = (STEP_LINE.as_ref(), DEPENDS_ON.as_ref()) else {
        return vec![single_step(objective)];
    };

    let mut raw: Vec<(String, Option<Vec<usize>>)> = Vec::new();
    for line in response.lines() {
        let Some(caps) = step_line.captures(line) else {
            continue;
        };
        let text = caps[1].trim();
        let (description, deps) = match depends_on.captures(text) {
            Some(dep_caps) => {
                let numbers = step_numbers(&dep_caps[1]);
                let cleaned = depends_on.replace(text, "").trim().to_string();
                (cleaned, Some(numbers))
            }
            None => (text.to_string(), None),
        };
        let description = description
            .trim_end_matches(|c: char| c == '.' || c == ',' || c.is_whitespace())
            .trim_matches('*')
            .trim()
            .to_string();
        if !description.is_empty() {
            raw.push((description, deps));
        }
    }

    if raw.is_empty() {
        return vec![single_step(objective)];
    }

    let count = raw.len();
    raw.into_iter()
        .enumerate()
        .map(|(i, (description, deps))| {
            let number = i + 1;
            let step_type = TaskClassifier::step_type_for(&description);
            let backend = TaskClassifier::backend_for_step(&description, step_type);
            let dependencies = match deps {
                // 只接受指向更早步骤的依赖
                Some(numbers) => numbers
                    .into_iter()
                    .filter(|n| *n >= 1 && *n < number && *n <= count)
                    .map(|n| format!("step_{}", n))
                    .collect(),
                None if number > 1 => vec![format!("step_{}", number - 1)],
                None => Vec::new(),
            };
            PlanStep::new(format!("step_{}", number), description, step_type, backend)
                .with_dependencies(dependencies)
        })
        .collect()
}

fn single_step(objective: &str) -> PlanStep {
    let step_type = TaskClassifier::step_type_for(objective);
    let backend = TaskClassifier::backend_for_step(objective, step_type);
    PlanStep::new("step_1", objective.trim(), step_type, backend)
}

/// 从回复中提取带 `path=` 的围栏代码块，每块对应一次整文件写入
pub fn parse_fenced_edits(response: &str) -> Vec<FileOperation> {
    let Some(fence_open) = FENCE_OPEN.as_ref() else {
        return Vec::new();
    };

    let mut ops = Vec::new();
    let mut current: Option<(PathBuf, Vec<&str>)> = None;
    for line in response.lines() {
        match current.take() {
            Some((path, body)) if line.trim_start().starts_with("```") => {
                let mut content = body.join("\n");
                content.push('\n');
                ops.push(FileOperation::Write { path, content });
            }
            Some((path, mut body)) => {
                body.push(line);
                current = Some((path, body));
            }
            None => {
                if let Some(caps) = fence_open.captures(line.trim_start()) {
                    current = Some((PathBuf::from(&caps[1]), Vec::new()));
                }
            }
        }
    }
    ops
}
