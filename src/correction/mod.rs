//! 自动修正：错误模型、修正模式库、自适应阈值与修正引擎

pub mod engine;
pub mod patterns;
pub mod threshold;
pub mod types;

pub use engine::{impact_estimate, AutoCorrectEngine, CorrectionVerifier, SharedSwitcher};
pub use patterns::{CorrectionPattern, CorrectionPatternStore, PatternStats, PatternSuggestion, StrategyRecord};
pub use threshold::{ContextThreshold, ThresholdData, ThresholdManager};
pub use types::{fingerprint, ErrorContext, ErrorCorrection, ErrorKind, FixOrigin, Severity, SuggestedFix};
