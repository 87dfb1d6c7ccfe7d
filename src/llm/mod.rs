//! 模型后端层：后端抽象与实现（Ollama HTTP / Mock）、模型切换、任务分类

pub mod mock;
pub mod ollama;
pub mod router;
pub mod switch;
pub mod traits;

pub use mock::{BackendEvent, MockBackend};
pub use ollama::OllamaBackend;
pub use router::TaskClassifier;
pub use switch::ModelSwitchCoordinator;
pub use traits::{collect_stream, BackendRole, ChunkStream, LlmError, ModelBackend, StreamChunk};
