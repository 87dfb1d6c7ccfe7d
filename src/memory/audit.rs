//! 审计日志：自动修正与计划失败追加到 `<workspace>/.learnings/*.md`
//!
//! - 成功的自动修正 → .learnings/CORRECTIONS.md
//! - 失败的计划（失败步骤、原因、待人工处理的修订建议）→ .learnings/PLAN_FAILURES.md
//!
//! 尽力而为：写入失败只记 debug 日志，不影响执行。

use std::io::Write;
use std::path::{Path, PathBuf};

use crate::correction::{ErrorCorrection, SuggestedFix};
use crate::plan::ExecutionPlan;

/// .learnings 目录：位于 workspace 下
pub fn learnings_root(workspace: &Path) -> PathBuf {
    workspace.join(".learnings")
}

pub fn corrections_path(workspace: &Path) -> PathBuf {
    learnings_root(workspace).join("CORRECTIONS.md")
}

pub fn plan_failures_path(workspace: &Path) -> PathBuf {
    learnings_root(workspace).join("PLAN_FAILURES.md")
}

fn timestamp() -> String {
    chrono::Local::now().format("%Y-%m-%d %H:%M").to_string()
}

/// 确保文件存在且带标题（首次创建时写入）
fn ensure_header(path: &Path, title: &str) -> std::io::Result<()> {
    if path.exists() {
        return Ok(());
    }
    if let Some(p) = path.parent() {
        std::fs::create_dir_all(p)?;
    }
    let header = format!("# {}\n\n*Entries are appended automatically.*\n\n---\n\n", title);
    std::fs::write(path, header)
}

fn append(path: &Path, title: &str, block: &str) {
    let result = ensure_header(path, title).and_then(|_| {
        std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .and_then(|mut f| f.write_all(block.as_bytes()))
    });
    if let Err(e) = result {
        tracing::debug!("Audit log write to {} failed: {}", path.display(), e);
    }
}

#[derive(Debug, Clone)]
pub struct AuditLog {
    workspace: PathBuf,
}

impl AuditLog {
    pub fn new(workspace: impl AsRef<Path>) -> Self {
        Self {
            workspace: workspace.as_ref().to_path_buf(),
        }
    }

    pub fn record_correction(&self, correction: &ErrorCorrection, fix: &SuggestedFix) {
        let files: Vec<String> = fix
            .touched_files()
            .iter()
            .map(|p| format!("`{}`", p.display()))
            .collect();
        let block = format!(
            "\n## {} [{}]\n\n- **Error**: {}\n- **Fix**: {}\n- **Confidence**: {:.2}\n- **Files**: {}\n\n",
            timestamp(),
            correction.error_kind,
            correction.to_string().replace('\n', " "),
            fix.description.trim().replace('\n', " "),
            fix.confidence,
            files.join(", ")
        );
        append(&corrections_path(&self.workspace), "Corrections", &block);
    }

    pub fn record_plan_failure(&self, plan: &ExecutionPlan, reason: &str) {
        let failed_step = plan
            .current_step()
            .map(|s| format!("{} ({})", s.id, s.description))
            .unwrap_or_else(|| "-".to_string());
        let mut block = format!(
            "\n## {} {}\n\n- **Objective**: {}\n- **Failed step**: {}\n- **Reason**: {}\n",
            timestamp(),
            plan.id,
            plan.objective.trim().replace('\n', " "),
            failed_step,
            reason.trim().replace('\n', " ")
        );
        for revision in &plan.pending_revisions {
            block.push_str(&format!("- **Suggested revision**: {}\n", revision));
        }
        block.push('\n');
        append(&plan_failures_path(&self.workspace), "Plan Failures", &block);
    }
}
