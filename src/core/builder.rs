//! 编排器构建器：统一的组件装配
//!
//! 主程序与测试共用同一套装配逻辑，测试通过 `with_*` 注入 Mock 后端与内存存储。

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::analysis::{AnalyzerRegistry, DependencyGraph, LanguageAnalyzer, RustLiteAnalyzer};
use crate::config::AppConfig;
use crate::core::{Orchestrator, OrchestratorParts};
use crate::correction::{AutoCorrectEngine, CorrectionPatternStore, SharedSwitcher, ThresholdManager};
use crate::llm::{ModelBackend, ModelSwitchCoordinator, OllamaBackend};
use crate::memory::{AuditLog, JsonFileStore, MemoryStore};
use crate::plan::{PlanAdapter, PlanPatternStore};
use crate::tools::FileEditor;
use crate::validation::{PlanValidator, StepChecks};

/// 编排器构建器：未注入的组件按配置创建默认实现
pub struct OrchestratorBuilder {
    config: AppConfig,
    workspace: PathBuf,
    backend: Option<Arc<dyn ModelBackend>>,
    memory: Option<Arc<dyn MemoryStore>>,
    analyzers: Vec<Arc<dyn LanguageAnalyzer>>,
    plan_patterns: Option<PlanPatternStore>,
    enable_audit: bool,
    history_warmup: bool,
}

impl OrchestratorBuilder {
    pub fn new(config: AppConfig, workspace: PathBuf) -> Self {
        Self {
            config,
            workspace,
            backend: None,
            memory: None,
            analyzers: Vec::new(),
            plan_patterns: None,
            enable_audit: true,
            history_warmup: true,
        }
    }

    /// 指定模型后端（默认按 [llm] 段连接 Ollama）
    pub fn with_backend(mut self, backend: Arc<dyn ModelBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// 指定记忆存储（默认为状态目录下的 JSON 文件）
    pub fn with_memory(mut self, memory: Arc<dyn MemoryStore>) -> Self {
        self.memory = Some(memory);
        self
    }

    /// 追加语言分析器；Rust 分析器总是注册
    pub fn with_analyzer(mut self, analyzer: Arc<dyn LanguageAnalyzer>) -> Self {
        self.analyzers.push(analyzer);
        self
    }

    pub fn with_plan_patterns(mut self, store: PlanPatternStore) -> Self {
        self.plan_patterns = Some(store);
        self
    }

    /// 是否写 markdown 审计日志
    pub fn with_audit(mut self, enable: bool) -> Self {
        self.enable_audit = enable;
        self
    }

    /// 是否在启动时用修正历史预热模式库
    pub fn with_history_warmup(mut self, enable: bool) -> Self {
        self.history_warmup = enable;
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    fn state_dir(&self) -> PathBuf {
        self.config
            .app
            .state_dir
            .clone()
            .unwrap_or_else(|| self.workspace.join(".switchboard"))
    }

    pub async fn build(self) -> Orchestrator {
        let cfg = &self.config;
        let backend: Arc<dyn ModelBackend> = match &self.backend {
            Some(backend) => backend.clone(),
            None => Arc::new(OllamaBackend::from_config(&cfg.llm)),
        };
        let memory: Arc<dyn MemoryStore> = match &self.memory {
            Some(memory) => memory.clone(),
            None => Arc::new(JsonFileStore::new(self.state_dir())),
        };
        let switcher: SharedSwitcher = Arc::new(Mutex::new(ModelSwitchCoordinator::new(
            backend,
            cfg.backends.clone(),
        )));
        let editor = FileEditor::new(&self.workspace);

        let mut analyzers = AnalyzerRegistry::new().with(Arc::new(RustLiteAnalyzer::new()));
        for analyzer in &self.analyzers {
            analyzers = analyzers.with(analyzer.clone());
        }
        let graph = DependencyGraph::scan(editor.root(), &analyzers).await;
        tracing::info!(
            "Workspace {} scanned: {} dependency edges",
            editor.root().display(),
            graph.edge_count()
        );

        let mut engine = AutoCorrectEngine::new(
            CorrectionPatternStore::new(cfg.correction.group_overlap),
            ThresholdManager::new(cfg.thresholds.clone()),
            editor.clone(),
            memory.clone(),
            cfg.correction.clone(),
        )
        .with_synthesizer(switcher.clone());
        let audit = self.enable_audit.then(|| AuditLog::new(&self.workspace));
        if let Some(audit) = &audit {
            engine = engine.with_audit(audit.clone());
        }
        if self.history_warmup {
            engine.warm_from_history().await;
        }

        let checks = StepChecks::new(analyzers, graph, editor.clone(), cfg.validation.clone());
        let validator = PlanValidator::new(checks, engine, cfg.orchestrator.max_revalidation_depth);
        let adapter = PlanAdapter::new(
            self.plan_patterns.unwrap_or_default(),
            cfg.adapter.clone(),
        );

        Orchestrator::from_parts(OrchestratorParts {
            config: cfg.orchestrator.clone(),
            analysis_window: cfg.validation.recent_analysis_window,
            switcher,
            validator,
            adapter,
            memory,
            editor,
            audit,
        })
    }
}

/// 便捷函数：加载配置（失败时使用默认值）并准备工作目录
pub fn create_orchestrator_builder(config_path: Option<PathBuf>) -> OrchestratorBuilder {
    let config = crate::config::load_config(config_path).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        AppConfig::default()
    });

    let workspace = config.app.workspace();
    if let Err(e) = std::fs::create_dir_all(&workspace) {
        tracing::warn!("Cannot create workspace {}: {}", workspace.display(), e);
    }
    let workspace = workspace.canonicalize().unwrap_or(workspace);

    OrchestratorBuilder::new(config, workspace)
}
