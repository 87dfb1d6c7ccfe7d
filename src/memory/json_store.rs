//! 文件持久化的记忆存储
//!
//! 状态目录下：`active_plan.json`（每步覆盖写，先写临时文件再 rename）、`corrections.jsonl` 与
//! `analyses.jsonl`（逐行追加）。文件不存在时视为空。

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::correction::{ErrorCorrection, ErrorKind};
use crate::memory::{AnalysisRecord, CorrectionRecord, MemoryError, MemoryStore};
use crate::plan::ExecutionPlan;

pub struct JsonFileStore {
    dir: PathBuf,
    /// 串行化写入
    write_lock: Mutex<()>,
}

impl JsonFileStore {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn plan_path(&self) -> PathBuf {
        self.dir.join("active_plan.json")
    }

    fn corrections_path(&self) -> PathBuf {
        self.dir.join("corrections.jsonl")
    }

    fn analyses_path(&self) -> PathBuf {
        self.dir.join("analyses.jsonl")
    }

    async fn append_line<T: serde::Serialize>(&self, path: &Path, value: &T) -> Result<(), MemoryError> {
        let mut line = serde_json::to_string(value)?;
        line.push('\n');
        let _guard = self.write_lock.lock().await;
        tokio::fs::create_dir_all(&self.dir).await?;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    /// 读取 JSONL；损坏的行跳过并记日志
    async fn read_lines<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>, MemoryError> {
        let data = match tokio::fs::read_to_string(path).await {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        Ok(data
            .lines()
            .filter(|l| !l.trim().is_empty())
            .filter_map(|l| match serde_json::from_str(l) {
                Ok(v) => Some(v),
                Err(e) => {
                    tracing::warn!("Skipping corrupt record in {}: {}", path.display(), e);
                    None
                }
            })
            .collect())
    }
}

#[async_trait]
impl MemoryStore for JsonFileStore {
    async fn save_plan_state(&self, plan: &ExecutionPlan) -> Result<(), MemoryError> {
        let data = serde_json::to_string_pretty(plan)?;
        let _guard = self.write_lock.lock().await;
        tokio::fs::create_dir_all(&self.dir).await?;
        let tmp = self.dir.join("active_plan.json.tmp");
        tokio::fs::write(&tmp, data).await?;
        tokio::fs::rename(&tmp, self.plan_path()).await?;
        Ok(())
    }

    async fn get_active_plan(&self) -> Result<Option<ExecutionPlan>, MemoryError> {
        match tokio::fs::read_to_string(self.plan_path()).await {
            Ok(data) => Ok(Some(serde_json::from_str(&data)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn add_correction(&self, correction: &ErrorCorrection, success: bool) -> Result<(), MemoryError> {
        let record = CorrectionRecord {
            correction: correction.clone(),
            success,
            recorded_at: chrono::Utc::now().timestamp_millis(),
        };
        self.append_line(&self.corrections_path(), &record).await
    }

    async fn get_corrections(&self, kind: Option<ErrorKind>) -> Result<Vec<CorrectionRecord>, MemoryError> {
        let records: Vec<CorrectionRecord> = Self::read_lines(&self.corrections_path()).await?;
        Ok(records
            .into_iter()
            .filter(|r| kind.map_or(true, |k| r.correction.error_kind == k))
            .collect())
    }

    async fn record_analysis(&self, record: AnalysisRecord) -> Result<(), MemoryError> {
        self.append_line(&self.analyses_path(), &record).await
    }

    async fn recent_analyses(&self, limit: usize) -> Result<Vec<AnalysisRecord>, MemoryError> {
        let mut records: Vec<AnalysisRecord> = Self::read_lines(&self.analyses_path()).await?;
        records.reverse();
        records.truncate(limit);
        Ok(records)
    }
}
