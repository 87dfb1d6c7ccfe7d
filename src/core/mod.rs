//! 核心编排层：错误与恢复、状态投影、编排器主体、actor 句柄与构建器

pub mod builder;
pub mod error;
pub mod handle;
pub mod orchestrator;
pub mod recovery;
pub mod state;

pub use builder::{create_orchestrator_builder, OrchestratorBuilder};
pub use error::{OrchestratorError, RecoveryAction};
pub use handle::{Command, OrchestratorHandle};
pub use orchestrator::{Orchestrator, OrchestratorParts, StepOutcome};
pub use recovery::RecoveryEngine;
pub use state::{OrchestratorPhase, OrchestratorStatus};
