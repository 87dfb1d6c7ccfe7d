//! 编排器集成测试：Mock 后端 + 内存存储 + 临时工作区

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::sync::Arc;

    use async_trait::async_trait;
    use switchboard::analysis::{LanguageAnalyzer, StructureItem, SyntaxError};
    use switchboard::config::AppConfig;
    use switchboard::core::{Orchestrator, OrchestratorBuilder, OrchestratorError, OrchestratorHandle, OrchestratorPhase};
    use switchboard::llm::{BackendEvent, BackendRole, LlmError, MockBackend, TaskClassifier};
    use switchboard::memory::{InMemoryStore, JsonFileStore, MemoryStore};
    use switchboard::correction::{ErrorContext, ErrorCorrection, ErrorKind, Severity, SuggestedFix};
    use switchboard::plan::{ExecutionPlan, PlanPatternStore, PlanStatus, PlanStep, RevisionKind, StepStatus, StepType};
    use switchboard::tools::FileOperation;

    const MODELS: [&str; 3] = ["llama3", "codellama", "llava"];

    async fn orchestrator(dir: &Path, mock: &Arc<MockBackend>, memory: &Arc<InMemoryStore>) -> Orchestrator {
        let mut config = AppConfig::default();
        config.correction.synthesize_fixes = false;
        OrchestratorBuilder::new(config, dir.to_path_buf())
            .with_backend(mock.clone())
            .with_memory(memory.clone())
            .with_audit(false)
            .build()
            .await
    }

    fn chat_step(id: &str, description: &str, deps: &[&str]) -> PlanStep {
        PlanStep::new(id, description, StepType::General, BackendRole::Chat)
            .with_dependencies(deps.iter().map(|d| d.to_string()).collect())
    }

    #[tokio::test]
    async fn test_simple_task_runs_directly() {
        let dir = tempfile::tempdir().unwrap();
        let mock = Arc::new(MockBackend::new(MODELS));
        let memory = Arc::new(InMemoryStore::new());
        let mut orch = orchestrator(dir.path(), &mock, &memory).await;

        let reply = orch.handle_task("what is the capital of France").await;
        assert_eq!(reply, "[llama3] what is the capital of France");
        assert!(orch.active_plan().is_none());
        assert_eq!(orch.current_model().await.as_deref(), Some("llama3"));
    }

    #[tokio::test]
    async fn test_code_analysis_result_is_remembered() {
        let dir = tempfile::tempdir().unwrap();
        let mock = Arc::new(MockBackend::new(MODELS));
        let memory = Arc::new(InMemoryStore::new());
        let mut orch = orchestrator(dir.path(), &mock, &memory).await;

        let reply = orch.handle_task("explain why this function panics").await;
        assert_eq!(reply, "[codellama] explain why this function panics");

        let analyses = memory.recent_analyses(5).await.unwrap();
        assert_eq!(analyses.len(), 1);
        assert!(analyses[0].plan_id.is_none());
        assert_eq!(analyses[0].summary, reply);
    }

    #[tokio::test]
    async fn test_complex_objective_is_planned_and_completed() {
        let dir = tempfile::tempdir().unwrap();
        let mock = Arc::new(MockBackend::new(MODELS));
        mock.push_response(
            "llama3",
            "1. Outline the payment service architecture design\n\
             2. Document the migration approach for the payment service",
        );
        let memory = Arc::new(InMemoryStore::new());
        let mut orch = orchestrator(dir.path(), &mock, &memory).await;

        let reply = orch
            .handle_task("design a scalable architecture for the payment service then document the migration approach")
            .await;
        assert!(reply.contains("completed"), "unexpected reply: {}", reply);

        let plan = orch.active_plan().unwrap();
        assert_eq!(plan.status, PlanStatus::Completed);
        assert_eq!(plan.steps.len(), 2);
        assert!(plan.steps.iter().all(|s| s.status == StepStatus::Completed));
        assert_eq!(plan.steps[1].dependencies, vec!["step_1".to_string()]);
        // 分解 + 两个步骤
        assert_eq!(mock.generate_count("llama3"), 3);

        // 成功的计划被学习，快照写入存储
        assert_eq!(orch.adapter().store().len(), 1);
        assert!(memory.plan_save_count().await > 0);
        let saved = memory.get_active_plan().await.unwrap().unwrap();
        assert_eq!(saved.status, PlanStatus::Completed);

        let status = orch.status();
        assert_eq!(status.phase, OrchestratorPhase::Idle);
        assert_eq!(status.plan_id.as_deref(), Some(plan.id.as_str()));
    }

    #[tokio::test]
    async fn test_step_fails_after_three_attempts() {
        let dir = tempfile::tempdir().unwrap();
        let mock = Arc::new(MockBackend::new(MODELS));
        mock.push_response("llama3", "1. Draft the payment service architecture design");
        for _ in 0..3 {
            mock.push_error("llama3", LlmError::Timeout);
        }
        let memory = Arc::new(InMemoryStore::new());
        let mut orch = orchestrator(dir.path(), &mock, &memory).await;

        let reply = orch
            .handle_task("design a scalable architecture for the payment service then document the migration approach")
            .await;
        assert!(reply.contains("failed at step step_1"), "unexpected reply: {}", reply);

        let plan = orch.active_plan().unwrap();
        assert_eq!(plan.status, PlanStatus::Failed);
        assert_eq!(plan.steps[0].status, StepStatus::Failed);
        assert_eq!(plan.steps[0].retry_count, 3);
        assert!(plan.steps[0].last_error.is_some());
        assert_eq!(mock.generate_count("llama3"), 4);
        assert!(orch.status().last_error.is_some());
    }

    #[tokio::test]
    async fn test_missing_dependency_fails_without_starting_step() {
        let dir = tempfile::tempdir().unwrap();
        let mock = Arc::new(MockBackend::new(MODELS));
        let memory = Arc::new(InMemoryStore::new());
        let plan = ExecutionPlan::new(
            "summarize the release notes",
            vec![chat_step("step_1", "summarize the release notes", &["step_9"])],
        );
        memory.save_plan_state(&plan).await.unwrap();
        let mut orch = orchestrator(dir.path(), &mock, &memory).await;

        let reply = orch.handle_task("/resume").await;
        assert!(reply.contains("step_9"), "unexpected reply: {}", reply);

        let plan = orch.active_plan().unwrap();
        assert_eq!(plan.status, PlanStatus::Failed);
        assert_eq!(plan.steps[0].status, StepStatus::Pending);
        assert_eq!(plan.steps[0].retry_count, 0);
        assert!(mock.journal().is_empty());
    }

    #[tokio::test]
    async fn test_later_dependency_is_moved_forward() {
        let dir = tempfile::tempdir().unwrap();
        let mock = Arc::new(MockBackend::new(MODELS));
        let memory = Arc::new(InMemoryStore::new());
        let plan = ExecutionPlan::new(
            "summarize the release notes",
            vec![
                chat_step("step_1", "summarize the release notes", &["step_2"]),
                chat_step("step_2", "collect the release notes", &[]),
            ],
        );
        memory.save_plan_state(&plan).await.unwrap();
        let mut orch = orchestrator(dir.path(), &mock, &memory).await;

        let reply = orch.handle_task("/resume").await;
        assert!(reply.contains("completed"), "unexpected reply: {}", reply);

        let plan = orch.active_plan().unwrap();
        assert_eq!(plan.status, PlanStatus::Completed);
        let order: Vec<&str> = plan.steps.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(order, vec!["step_2", "step_1"]);
        assert_eq!(mock.generate_count("llama3"), 2);
    }

    #[tokio::test]
    async fn test_misaligned_step_reports_revision() {
        let dir = tempfile::tempdir().unwrap();
        let mock = Arc::new(MockBackend::new(MODELS));
        let memory = Arc::new(InMemoryStore::new());
        let plan = ExecutionPlan::new(
            "Implement user authentication",
            vec![chat_step("step_1", "Update CSS colors", &[])],
        );
        memory.save_plan_state(&plan).await.unwrap();
        let mut orch = orchestrator(dir.path(), &mock, &memory).await;

        let reply = orch.handle_task("/resume").await;
        assert!(reply.contains("Suggested revision"), "unexpected reply: {}", reply);

        let plan = orch.active_plan().unwrap();
        assert_eq!(plan.status, PlanStatus::Failed);
        assert_eq!(plan.pending_revisions.len(), 1);
        let revision = &plan.pending_revisions[0];
        assert_eq!(revision.kind, RevisionKind::Modify);
        assert_eq!(
            revision.step.as_ref().unwrap().description,
            "Update CSS colors (Implement user authentication)"
        );
        // 执行前校验未通过，步骤从未调用后端
        assert_eq!(mock.generate_count("llama3"), 0);
    }

    fn code_plan() -> ExecutionPlan {
        ExecutionPlan::new(
            "Implement the greeting helper",
            vec![PlanStep::new(
                "step_1",
                "Implement the greeting helper in src/lib.rs",
                StepType::Code,
                BackendRole::Code,
            )],
        )
    }

    const ORIGINAL: &str = "pub fn greet() -> String {\r\n    String::from(\"hello\")\r\n}\r\n";
    const BROKEN: &str = "```rust path=src/lib.rs\npub fn greet() -> String {\n    String::from(\"hi\")\n```";
    const FIXED: &str = "```rust path=src/lib.rs\npub fn greet() -> String {\n    String::from(\"hi\")\n}\n```";

    #[tokio::test]
    async fn test_rejected_edits_are_rolled_back_byte_for_byte() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        std::fs::write(dir.path().join("src/lib.rs"), ORIGINAL).unwrap();

        let mock = Arc::new(MockBackend::new(MODELS));
        for _ in 0..3 {
            mock.push_response("codellama", BROKEN);
        }
        let memory = Arc::new(InMemoryStore::new());
        memory.save_plan_state(&code_plan()).await.unwrap();
        let mut orch = orchestrator(dir.path(), &mock, &memory).await;

        let reply = orch.handle_task("/resume").await;
        assert!(reply.contains("failed"), "unexpected reply: {}", reply);

        let plan = orch.active_plan().unwrap();
        assert_eq!(plan.status, PlanStatus::Failed);
        assert_eq!(plan.steps[0].retry_count, 3);
        assert!(plan.steps[0].changes.is_empty());
        assert_eq!(mock.generate_count("codellama"), 3);
        assert_eq!(std::fs::read(dir.path().join("src/lib.rs")).unwrap(), ORIGINAL.as_bytes());
    }

    #[tokio::test]
    async fn test_retry_after_rejected_edit_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        std::fs::write(dir.path().join("src/lib.rs"), ORIGINAL).unwrap();

        let mock = Arc::new(MockBackend::new(MODELS));
        mock.push_response("codellama", BROKEN);
        mock.push_response("codellama", FIXED);
        let memory = Arc::new(InMemoryStore::new());
        memory.save_plan_state(&code_plan()).await.unwrap();
        let mut orch = orchestrator(dir.path(), &mock, &memory).await;

        let reply = orch.handle_task("/resume").await;
        assert!(reply.contains("completed"), "unexpected reply: {}", reply);

        let plan = orch.active_plan().unwrap();
        assert_eq!(plan.steps[0].status, StepStatus::Completed);
        assert_eq!(plan.steps[0].retry_count, 1);
        assert_eq!(plan.steps[0].changes.len(), 1);
        assert!(plan
            .pending_revisions
            .iter()
            .all(|r| r.kind == RevisionKind::Modify));
        assert_eq!(
            std::fs::read_to_string(dir.path().join("src/lib.rs")).unwrap(),
            "pub fn greet() -> String {\n    String::from(\"hi\")\n}\n"
        );
        // 第二次尝试的 prompt 带上了上一次的失败原因
        let prompts: Vec<String> = mock
            .journal()
            .into_iter()
            .filter_map(|e| match e {
                BackendEvent::Generate { model, prompt } if model == "codellama" => Some(prompt),
                _ => None,
            })
            .collect();
        assert!(prompts[1].contains("The previous attempt failed"));
    }

    #[tokio::test]
    async fn test_resume_after_restart_resets_interrupted_step() {
        let dir = tempfile::tempdir().unwrap();
        let state = dir.path().join(".switchboard");

        // 模拟崩溃：step_1 已完成，step_2 停在 in_progress
        let mut plan = ExecutionPlan::new(
            "summarize the release notes",
            vec![
                chat_step("step_1", "collect the release notes", &[]),
                chat_step("step_2", "summarize the release notes", &["step_1"]),
            ],
        );
        plan.status = PlanStatus::Executing;
        plan.steps[0].status = StepStatus::Completed;
        plan.steps[1].status = StepStatus::InProgress;
        plan.current_step_index = 1;
        JsonFileStore::new(&state).save_plan_state(&plan).await.unwrap();

        let mock = Arc::new(MockBackend::new(MODELS));
        let mut orch = OrchestratorBuilder::new(AppConfig::default(), dir.path().to_path_buf())
            .with_backend(mock.clone())
            .with_audit(false)
            .build()
            .await;

        let reply = orch.handle_task("/resume").await;
        assert!(reply.contains("completed"), "unexpected reply: {}", reply);
        assert_eq!(mock.generate_count("llama3"), 1);

        let saved = JsonFileStore::new(&state).get_active_plan().await.unwrap().unwrap();
        assert_eq!(saved.id, plan.id);
        assert_eq!(saved.status, PlanStatus::Completed);
    }

    #[tokio::test]
    async fn test_resume_without_plan() {
        let dir = tempfile::tempdir().unwrap();
        let mock = Arc::new(MockBackend::new(MODELS));
        let memory = Arc::new(InMemoryStore::new());
        let mut orch = orchestrator(dir.path(), &mock, &memory).await;

        assert_eq!(orch.handle_task("/plan").await, "No active plan");
        let reply = orch.handle_task("/resume").await;
        assert!(reply.starts_with("Error: No execution plan"), "unexpected reply: {}", reply);
        assert_eq!(orch.status().phase, OrchestratorPhase::Error);
    }

    #[tokio::test]
    async fn test_switch_and_unknown_commands() {
        let dir = tempfile::tempdir().unwrap();
        let mock = Arc::new(MockBackend::new(MODELS));
        mock.fail_loads_for("llava");
        let memory = Arc::new(InMemoryStore::new());
        let mut orch = orchestrator(dir.path(), &mock, &memory).await;

        assert_eq!(orch.handle_task("/switch code").await, "Switched to code (codellama)");
        let reply = orch.handle_task("/switch vision").await;
        assert!(reply.starts_with("Error: Backend switch failed"), "unexpected reply: {}", reply);
        assert_eq!(orch.handle_task("/bogus").await, "Unknown command: /bogus");
    }

    #[tokio::test]
    async fn test_handle_round_trip_and_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let mock = Arc::new(MockBackend::new(MODELS));
        let memory = Arc::new(InMemoryStore::new());
        let orch = orchestrator(dir.path(), &mock, &memory).await;
        let (handle, worker) = OrchestratorHandle::spawn(orch, 4);

        let models = handle.handle_task("/models").await.unwrap();
        assert!(models.starts_with("Available models: llama3, codellama, llava"));

        let reply = handle.handle_task("/switch code").await.unwrap();
        assert_eq!(reply, "Switched to code (codellama)");
        assert_eq!(handle.current_model().await.unwrap().as_deref(), Some("codellama"));
        assert_eq!(handle.status().current_model.as_deref(), Some("codellama"));
        assert!(mock
            .journal()
            .contains(&BackendEvent::Load("codellama".to_string())));

        let other = handle.clone();
        handle.shutdown();
        worker.await.unwrap();
        assert!(matches!(
            other.handle_task("hello").await,
            Err(OrchestratorError::WorkerStopped)
        ));
    }

    #[tokio::test]
    async fn test_code_task_prompt_includes_referenced_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        std::fs::write(dir.path().join("src/lib.rs"), "pub fn parse_config() {}\n").unwrap();
        let mock = Arc::new(MockBackend::new(MODELS));
        let memory = Arc::new(InMemoryStore::new());
        let mut orch = orchestrator(dir.path(), &mock, &memory).await;

        let reply = orch.handle_task("explain why parse_config in src/lib.rs panics").await;
        assert_eq!(reply, "[codellama] explain why parse_config in src/lib.rs panics");

        let prompt = mock
            .journal()
            .into_iter()
            .find_map(|e| match e {
                BackendEvent::Generate { model, prompt } if model == "codellama" => Some(prompt),
                _ => None,
            })
            .unwrap();
        assert!(prompt.contains("File src/lib.rs:"));
        assert!(prompt.contains("pub fn parse_config() {}"));
    }

    #[tokio::test]
    async fn test_history_warmup_seeds_correction_patterns() {
        let dir = tempfile::tempdir().unwrap();
        let mock = Arc::new(MockBackend::new(MODELS));
        let memory = Arc::new(InMemoryStore::new());
        let fix = SuggestedFix::new(
            "close the call",
            vec![FileOperation::Replace {
                path: "src/lib.rs".into(),
                find: "foo(1;".into(),
                replace: "foo(1);".into(),
            }],
            0.9,
        );
        let correction = ErrorCorrection::new(
            ErrorKind::Syntax,
            Severity::High,
            "unclosed delimiter",
            ErrorContext::for_file("src/lib.rs").at_line(2).with_code("let x = foo(1;"),
        )
        .with_fixes(vec![fix]);
        memory.add_correction(&correction, true).await.unwrap();

        let warmed = orchestrator(dir.path(), &mock, &memory).await;
        assert_eq!(warmed.validator().engine().patterns().len(), 1);

        let cold = OrchestratorBuilder::new(AppConfig::default(), dir.path().to_path_buf())
            .with_backend(mock.clone())
            .with_memory(memory.clone())
            .with_audit(false)
            .with_history_warmup(false)
            .build()
            .await;
        assert_eq!(cold.validator().engine().patterns().len(), 0);
    }

    #[tokio::test]
    async fn test_learned_validation_step_is_inserted() {
        let dir = tempfile::tempdir().unwrap();
        let mut patterns = PlanPatternStore::new();
        let learned = ExecutionPlan::new(
            "summarize the release notes",
            vec![
                chat_step("step_1", "collect the release notes", &[]),
                chat_step("step_2", "summarize the release notes", &["step_1"]),
                PlanStep::new(
                    "step_3",
                    "verify the release notes summary",
                    StepType::Validation,
                    BackendRole::Chat,
                )
                .with_dependencies(vec!["step_2".to_string()]),
            ],
        );
        patterns.record(&learned, true);

        let mock = Arc::new(MockBackend::new(MODELS));
        let memory = Arc::new(InMemoryStore::new());
        let plan = ExecutionPlan::new(
            "summarize the release notes",
            vec![
                chat_step("step_1", "collect the release notes", &[]),
                chat_step("step_2", "summarize the release notes", &["step_1"]),
            ],
        );
        memory.save_plan_state(&plan).await.unwrap();
        let mut orch = OrchestratorBuilder::new(AppConfig::default(), dir.path().to_path_buf())
            .with_backend(mock.clone())
            .with_memory(memory.clone())
            .with_audit(false)
            .with_plan_patterns(patterns)
            .build()
            .await;

        let reply = orch.handle_task("/resume").await;
        assert!(reply.contains("completed (3 steps)"), "unexpected reply: {}", reply);

        let plan = orch.active_plan().unwrap();
        assert_eq!(plan.steps.len(), 3);
        assert_eq!(plan.steps[2].id, "step_3");
        assert_eq!(plan.steps[2].step_type, StepType::Validation);
        assert_eq!(plan.steps[2].dependencies, vec!["step_2".to_string()]);
        assert!(plan.steps.iter().all(|s| s.status == StepStatus::Completed));
        assert_eq!(mock.generate_count("llama3"), 3);
    }

    /// `key = value` 配置文件：没有 `=` 的非空非注释行算语法错误
    struct KeyValueAnalyzer;

    #[async_trait]
    impl LanguageAnalyzer for KeyValueAnalyzer {
        fn language_id(&self) -> &str {
            "keyvalue"
        }

        fn extensions(&self) -> &[&str] {
            &["cfg"]
        }

        async fn analyze_structure(&self, _content: &str) -> Vec<StructureItem> {
            Vec::new()
        }

        async fn analyze_imports(&self, _content: &str) -> Vec<String> {
            Vec::new()
        }

        async fn detect_syntax_errors(&self, content: &str) -> Vec<SyntaxError> {
            content
                .lines()
                .enumerate()
                .filter(|(_, l)| {
                    let l = l.trim();
                    !l.is_empty() && !l.starts_with('#') && !l.contains('=')
                })
                .map(|(i, _)| SyntaxError {
                    line: i + 1,
                    column: 1,
                    message: "expected `key = value`".to_string(),
                })
                .collect()
        }
    }

    #[tokio::test]
    async fn test_registered_analyzer_guards_its_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("app.cfg"), "timeout = 10\n").unwrap();

        let mock = Arc::new(MockBackend::new(MODELS));
        mock.push_response("codellama", "```ini path=app.cfg\ntimeout 30\n```");
        mock.push_response("codellama", "```ini path=app.cfg\ntimeout = 30\n```");
        let memory = Arc::new(InMemoryStore::new());
        let plan = ExecutionPlan::new(
            "Update the timeout setting",
            vec![PlanStep::new(
                "step_1",
                "Update the timeout setting in app.cfg",
                StepType::Code,
                BackendRole::Code,
            )],
        );
        memory.save_plan_state(&plan).await.unwrap();

        let mut config = AppConfig::default();
        config.correction.synthesize_fixes = false;
        let mut orch = OrchestratorBuilder::new(config, dir.path().to_path_buf())
            .with_backend(mock.clone())
            .with_memory(memory.clone())
            .with_audit(false)
            .with_analyzer(Arc::new(KeyValueAnalyzer))
            .build()
            .await;

        let reply = orch.handle_task("/resume").await;
        assert!(reply.contains("completed"), "unexpected reply: {}", reply);

        let plan = orch.active_plan().unwrap();
        assert_eq!(plan.steps[0].retry_count, 1);
        assert_eq!(
            std::fs::read_to_string(dir.path().join("app.cfg")).unwrap(),
            "timeout = 30\n"
        );
    }

    #[tokio::test]
    async fn test_failed_step_reverts_corrections_in_dependent_files() {
        let dir = tempfile::tempdir().unwrap();
        let main = "use crate::auth;\n\nfn main() {\n    auth::login();\n}\n";
        let worker = "use crate::auth;\n\npub fn run() {\n    if auth::login() {}\n}\n";
        std::fs::write(dir.path().join("auth.rs"), "pub fn login() {}\n").unwrap();
        std::fs::write(dir.path().join("main.rs"), main).unwrap();
        std::fs::write(dir.path().join("worker.rs"), worker).unwrap();

        // 历史：main.rs 中的调用改名修复成功过
        let memory = Arc::new(InMemoryStore::new());
        let fix = SuggestedFix::new(
            "call the renamed function",
            vec![FileOperation::Replace {
                path: "main.rs".into(),
                find: "auth::login();".into(),
                replace: "auth::sign_in();".into(),
            }],
            0.9,
        );
        let learned = ErrorCorrection::new(
            ErrorKind::Impact,
            Severity::High,
            "`login` was removed from auth.rs but is still used",
            ErrorContext::for_file("main.rs")
                .with_code("auth::login();")
                .with_symbols(vec!["login".to_string()]),
        )
        .with_fixes(vec![fix]);
        memory.add_correction(&learned, true).await.unwrap();

        let plan = ExecutionPlan::new(
            "rename login in auth.rs",
            vec![PlanStep::new(
                "step_1",
                "rename login in auth.rs",
                StepType::Code,
                BackendRole::Code,
            )],
        );
        memory.save_plan_state(&plan).await.unwrap();

        let mock = Arc::new(MockBackend::new(MODELS));
        mock.push_response("codellama", "```rust path=auth.rs\npub fn sign_in() {}\n```");
        let mut orch = orchestrator(dir.path(), &mock, &memory).await;

        // 第一次尝试：main.rs 被自动修正，worker.rs 无法修正，整步回滚；第二次回复不带修改
        let reply = orch.handle_task("/resume").await;
        assert!(reply.contains("completed"), "unexpected reply: {}", reply);
        let plan = orch.active_plan().unwrap();
        assert_eq!(plan.steps[0].retry_count, 1);

        assert_eq!(std::fs::read_to_string(dir.path().join("auth.rs")).unwrap(), "pub fn login() {}\n");
        assert_eq!(std::fs::read_to_string(dir.path().join("main.rs")).unwrap(), main);
        assert_eq!(std::fs::read_to_string(dir.path().join("worker.rs")).unwrap(), worker);

        // 预置的一条 + 本次 main.rs 上被接受的一条
        let history = memory.get_corrections(None).await.unwrap();
        assert_eq!(history.iter().filter(|r| r.success).count(), 2);
    }

    #[tokio::test]
    async fn test_task_requiring_validation_is_planned() {
        let dir = tempfile::tempdir().unwrap();
        let text = "design a scalable distributed architecture for the payment database \
                    then optimize performance and finally document the migration";
        let analysis = TaskClassifier::classify(text);
        assert!(analysis.validation_required);
        assert!(analysis.complexity < 10);

        let mock = Arc::new(MockBackend::new(MODELS));
        mock.push_response(
            "llama3",
            "1. Design the distributed payment database architecture\n\
             2. Document the payment database migration and optimize performance",
        );
        let memory = Arc::new(InMemoryStore::new());
        let mut config = AppConfig::default();
        config.orchestrator.plan_min_complexity = 10;
        let mut orch = OrchestratorBuilder::new(config, dir.path().to_path_buf())
            .with_backend(mock.clone())
            .with_memory(memory.clone())
            .with_audit(false)
            .build()
            .await;

        let reply = orch.handle_task(text).await;
        assert!(reply.contains("completed (2 steps)"), "unexpected reply: {}", reply);
        assert_eq!(orch.active_plan().unwrap().steps.len(), 2);

        // 简单任务仍然直接执行
        let reply = orch.handle_task("what is the capital of France").await;
        assert_eq!(reply, "[llama3] what is the capital of France");
    }
}
