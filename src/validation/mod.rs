//! 计划步骤校验

pub mod checks;
pub mod context;
pub mod validator;

pub use checks::{alignment_score, mentions_conflict, StepChecks};
pub use context::{PlanValidationContext, PlanValidationResult, ValidationPhase};
pub use validator::PlanValidator;
