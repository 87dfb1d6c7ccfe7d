//! 记忆层：计划快照、修正历史、分析结果的存储，以及 markdown 审计日志

pub mod audit;
pub mod in_memory;
pub mod json_store;
pub mod store;

pub use audit::AuditLog;
pub use in_memory::InMemoryStore;
pub use json_store::JsonFileStore;
pub use store::{AnalysisRecord, CorrectionRecord, MemoryError, MemoryStore};
