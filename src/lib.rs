//! Switchboard - 多模型编排核心
//!
//! 模块划分：
//! - **analysis**: 语言分析器接口、Rust 轻量分析器、文件依赖图
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 编排器、actor 句柄、状态投影、错误与恢复、构建器
//! - **correction**: 错误修正模式库、自适应阈值、自动修正引擎（带回滚）
//! - **llm**: 模型后端抽象与实现（Ollama / Mock）、模型切换、任务分类
//! - **memory**: 计划快照、修正历史与分析结果的存储，markdown 审计日志
//! - **plan**: 任务与执行计划数据模型、计划分解、计划模式库与适配器
//! - **tools**: 工作区内的文件修改与回滚
//! - **validation**: 步骤校验（目标对齐、代码有效性、依赖、记忆冲突）

pub mod analysis;
pub mod config;
pub mod core;
pub mod correction;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod plan;
pub mod tools;
pub mod validation;

pub use crate::core::{create_orchestrator_builder, Orchestrator, OrchestratorBuilder, OrchestratorHandle};
