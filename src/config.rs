//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `SWITCHBOARD__*` 覆盖（双下划线表示嵌套，如 `SWITCHBOARD__BACKENDS__CODE=deepseek-coder`）。

use std::path::PathBuf;

use serde::Deserialize;

use crate::llm::BackendRole;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub backends: BackendsSection,
    pub orchestrator: OrchestratorSection,
    pub validation: ValidationSection,
    pub correction: CorrectionSection,
    pub thresholds: ThresholdSection,
    pub adapter: AdapterSection,
}

/// [app] 段：工作目录与状态目录
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppSection {
    /// 代码修改的沙箱根目录，未设置时用 ./workspace
    pub workspace_root: Option<PathBuf>,
    /// 计划快照与修正历史目录，未设置时为 workspace/.switchboard
    pub state_dir: Option<PathBuf>,
}

impl AppSection {
    pub fn workspace(&self) -> PathBuf {
        self.workspace_root
            .clone()
            .unwrap_or_else(|| PathBuf::from("workspace"))
    }

    pub fn state(&self) -> PathBuf {
        self.state_dir
            .clone()
            .unwrap_or_else(|| self.workspace().join(".switchboard"))
    }
}

/// [llm] 段：后端地址与超时
#[derive(Debug, Clone, Deserialize)]
pub struct LlmSection {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub timeouts: LlmTimeoutsSection,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeouts: LlmTimeoutsSection::default(),
        }
    }
}

fn default_base_url() -> String {
    "http://localhost:11434".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmTimeoutsSection {
    #[serde(default = "default_request_timeout")]
    pub request: u64,
    #[serde(default = "default_stream_timeout")]
    pub stream: u64,
}

impl Default for LlmTimeoutsSection {
    fn default() -> Self {
        Self {
            request: default_request_timeout(),
            stream: default_stream_timeout(),
        }
    }
}

fn default_request_timeout() -> u64 {
    60
}

fn default_stream_timeout() -> u64 {
    120
}

/// [backends] 段：每个角色对应的模型 ID
#[derive(Debug, Clone, Deserialize)]
pub struct BackendsSection {
    #[serde(default = "default_chat_model")]
    pub chat: String,
    #[serde(default = "default_code_model")]
    pub code: String,
    #[serde(default = "default_vision_model")]
    pub vision: String,
}

impl BackendsSection {
    /// 角色 -> 模型 ID
    pub fn model_for(&self, role: BackendRole) -> &str {
        match role {
            BackendRole::Chat => &self.chat,
            BackendRole::Code => &self.code,
            BackendRole::Vision => &self.vision,
        }
    }
}

impl Default for BackendsSection {
    fn default() -> Self {
        Self {
            chat: default_chat_model(),
            code: default_code_model(),
            vision: default_vision_model(),
        }
    }
}

fn default_chat_model() -> String {
    "llama3".to_string()
}

fn default_code_model() -> String {
    "codellama".to_string()
}

fn default_vision_model() -> String {
    "llava".to_string()
}

/// [orchestrator] 段：重试预算、计划触发复杂度、自动应用置信度、重校验深度
#[derive(Debug, Clone, Deserialize)]
pub struct OrchestratorSection {
    #[serde(default = "default_max_step_retries")]
    pub max_step_retries: u32,
    /// 复杂度达到该值时先生成执行计划，否则直接执行
    #[serde(default = "default_plan_min_complexity")]
    pub plan_min_complexity: u8,
    /// Plan Adapter 建议的置信度超过该值才会在计划中途自动应用
    #[serde(default = "default_auto_apply_confidence")]
    pub auto_apply_confidence: f64,
    /// 自动修正成功后重新校验的最大次数
    #[serde(default = "default_max_revalidation_depth")]
    pub max_revalidation_depth: usize,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

impl Default for OrchestratorSection {
    fn default() -> Self {
        Self {
            max_step_retries: default_max_step_retries(),
            plan_min_complexity: default_plan_min_complexity(),
            auto_apply_confidence: default_auto_apply_confidence(),
            max_revalidation_depth: default_max_revalidation_depth(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

fn default_max_step_retries() -> u32 {
    3
}

fn default_plan_min_complexity() -> u8 {
    5
}

fn default_auto_apply_confidence() -> f64 {
    0.8
}

fn default_max_revalidation_depth() -> usize {
    3
}

fn default_queue_capacity() -> usize {
    32
}

/// [validation] 段
#[derive(Debug, Clone, Deserialize)]
pub struct ValidationSection {
    /// 目标关键词命中率低于该值视为偏离目标
    #[serde(default = "default_alignment_threshold")]
    pub alignment_threshold: f64,
    /// 记忆冲突检查时读取的最近分析条数
    #[serde(default = "default_recent_analysis_window")]
    pub recent_analysis_window: usize,
}

impl Default for ValidationSection {
    fn default() -> Self {
        Self {
            alignment_threshold: default_alignment_threshold(),
            recent_analysis_window: default_recent_analysis_window(),
        }
    }
}

fn default_alignment_threshold() -> f64 {
    0.3
}

fn default_recent_analysis_window() -> usize {
    5
}

/// [correction] 段
#[derive(Debug, Clone, Deserialize)]
pub struct CorrectionSection {
    #[serde(default = "default_similarity")]
    pub pattern_similarity: f64,
    #[serde(default = "default_max_pattern_strategies")]
    pub max_pattern_strategies: usize,
    /// 修改操作重叠率达到该值的候选归为同组
    #[serde(default = "default_similarity")]
    pub group_overlap: f64,
    /// 是否调用代码模型生成新修正
    #[serde(default = "default_true")]
    pub synthesize_fixes: bool,
}

impl Default for CorrectionSection {
    fn default() -> Self {
        Self {
            pattern_similarity: default_similarity(),
            max_pattern_strategies: default_max_pattern_strategies(),
            group_overlap: default_similarity(),
            synthesize_fixes: true,
        }
    }
}

fn default_similarity() -> f64 {
    0.7
}

fn default_max_pattern_strategies() -> usize {
    3
}

fn default_true() -> bool {
    true
}

/// [thresholds] 段：自适应置信度阈值
#[derive(Debug, Clone, Deserialize)]
pub struct ThresholdSection {
    #[serde(default = "default_threshold")]
    pub default: f64,
    #[serde(default = "default_threshold_min")]
    pub min: f64,
    #[serde(default = "default_threshold_max")]
    pub max: f64,
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
    /// 每累计多少个样本重算一次基准阈值
    #[serde(default = "default_recompute_interval")]
    pub recompute_interval: u64,
}

impl Default for ThresholdSection {
    fn default() -> Self {
        Self {
            default: default_threshold(),
            min: default_threshold_min(),
            max: default_threshold_max(),
            history_limit: default_history_limit(),
            recompute_interval: default_recompute_interval(),
        }
    }
}

fn default_threshold() -> f64 {
    0.7
}

fn default_threshold_min() -> f64 {
    0.3
}

fn default_threshold_max() -> f64 {
    0.9
}

fn default_history_limit() -> usize {
    1000
}

fn default_recompute_interval() -> u64 {
    100
}

/// [adapter] 段：计划模式匹配
#[derive(Debug, Clone, Deserialize)]
pub struct AdapterSection {
    #[serde(default = "default_similarity")]
    pub similarity: f64,
    #[serde(default = "default_risk_failure_rate")]
    pub risk_failure_rate: f64,
}

impl Default for AdapterSection {
    fn default() -> Self {
        Self {
            similarity: default_similarity(),
            risk_failure_rate: default_risk_failure_rate(),
        }
    }
}

fn default_risk_failure_rate() -> f64 {
    0.3
}

/// 从 config 目录加载配置，环境变量 SWITCHBOARD__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 SWITCHBOARD__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("SWITCHBOARD")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}
