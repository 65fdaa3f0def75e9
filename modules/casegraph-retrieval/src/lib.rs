pub mod context;
pub mod orchestrator;
pub mod providers;
pub mod query_guard;
pub mod rerank;
pub mod trace;

pub use context::ContextBuilder;
pub use orchestrator::{Answer, RetrievalOrchestrator};
pub use providers::{ClaudeModel, VoyageEmbedder};
pub use query_guard::screen_query;
pub use rerank::{Reranked, Reranker, ScoredChunk, ScoredEntity};
pub use trace::{PipelineTrace, StageEvent, StageRecord};
