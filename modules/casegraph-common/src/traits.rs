// Boundaries to the external services the engine treats as pluggable: embeddings,
// vector search and the language model. Implementations return anyhow errors;
// callers decide whether a failure degrades a stage or aborts.

use anyhow::Result;
use async_trait::async_trait;

use crate::types::{Candidate, CandidateScore, QuestionKind, SchemaSummary, VectorHit};

#[async_trait]
pub trait TextEmbedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
    async fn embed_batch(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>>;
}

/// Similarity search over chunk and entity embeddings, always scoped to one case.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Chunk hits carry `text`, `doc_name`, `page_start` and `page_end` metadata.
    async fn search_chunks(
        &self,
        case_id: &str,
        embedding: &[f32],
        top_k: usize,
    ) -> Result<Vec<VectorHit>>;

    /// Entity hits use the node key as id.
    async fn search_entities(
        &self,
        case_id: &str,
        embedding: &[f32],
        top_k: usize,
    ) -> Result<Vec<VectorHit>>;
}

#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn classify(&self, question: &str) -> Result<QuestionKind>;

    /// Produce a single read-only Cypher statement answering `question`. The statement
    /// must filter every node on `$case_id`.
    async fn generate_query(&self, question: &str, schema: &SchemaSummary) -> Result<String>;

    /// Score every candidate 0-10 for relevance to the question in one call.
    async fn score_candidates(
        &self,
        question: &str,
        candidates: &[Candidate],
    ) -> Result<Vec<CandidateScore>>;

    async fn answer(&self, question: &str, context: &str) -> Result<String>;
}
