use std::env;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::CaseGraphError;

/// Which re-ranking strategy the retrieval pipeline uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RerankStrategy {
    Score,
    Llm,
}

impl FromStr for RerankStrategy {
    type Err = CaseGraphError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "score" => Ok(Self::Score),
            "llm" => Ok(Self::Llm),
            other => Err(CaseGraphError::Config(format!(
                "unknown reranker '{other}', expected 'score' or 'llm'"
            ))),
        }
    }
}

/// Knobs for the question-answering pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalConfig {
    pub reranker: RerankStrategy,
    /// Chunks requested from the vector service.
    pub chunk_search_k: usize,
    /// Entities requested from the vector service.
    pub entity_search_k: usize,
    /// Chunks kept after re-ranking.
    pub chunk_top_k: usize,
    /// Entities kept after re-ranking.
    pub entity_top_k: usize,
    /// Character budget for chunk text; entities may overflow it by 20%.
    pub context_char_budget: usize,
    /// Chunk hits farther than this are dropped.
    pub max_chunk_distance: f64,
    /// Entities searched when building the answer's result graph.
    pub result_graph_top_k: usize,
    /// Cap on rows kept from a generated structural query.
    pub max_structural_rows: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            reranker: RerankStrategy::Score,
            chunk_search_k: 20,
            entity_search_k: 20,
            chunk_top_k: 8,
            entity_top_k: 10,
            context_char_budget: 12_000,
            max_chunk_distance: 0.6,
            result_graph_top_k: 10,
            max_structural_rows: 50,
        }
    }
}

impl RetrievalConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            reranker: env::var("RERANKER")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.reranker),
            chunk_search_k: parsed_env("CHUNK_SEARCH_K", defaults.chunk_search_k),
            entity_search_k: parsed_env("ENTITY_SEARCH_K", defaults.entity_search_k),
            chunk_top_k: parsed_env("CHUNK_TOP_K", defaults.chunk_top_k),
            entity_top_k: parsed_env("ENTITY_TOP_K", defaults.entity_top_k),
            context_char_budget: parsed_env("CONTEXT_CHAR_BUDGET", defaults.context_char_budget),
            max_chunk_distance: parsed_env("MAX_CHUNK_DISTANCE", defaults.max_chunk_distance),
            result_graph_top_k: parsed_env("RESULT_GRAPH_TOP_K", defaults.result_graph_top_k),
            max_structural_rows: parsed_env("MAX_STRUCTURAL_ROWS", defaults.max_structural_rows),
        }
    }
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    // Neo4j
    pub neo4j_uri: String,
    pub neo4j_user: String,
    pub neo4j_password: String,

    // AI providers
    pub anthropic_api_key: String,
    pub anthropic_model: String,
    /// Absent key means no vector service: retrieval falls back to graph-only context.
    pub voyage_api_key: Option<String>,
    pub embedding_model: String,

    pub retrieval: RetrievalConfig,
}

impl Config {
    /// Load the full configuration. Panics with a clear message if required vars are missing.
    pub fn from_env() -> Self {
        Self {
            anthropic_api_key: required_env("ANTHROPIC_API_KEY"),
            ..Self::graph_from_env()
        }
    }

    /// Configuration for graph-only commands (analytics, resolution): no LLM key needed.
    pub fn graph_from_env() -> Self {
        Self {
            neo4j_uri: required_env("NEO4J_URI"),
            neo4j_user: required_env("NEO4J_USER"),
            neo4j_password: required_env("NEO4J_PASSWORD"),
            anthropic_api_key: String::new(),
            anthropic_model: env::var("ANTHROPIC_MODEL")
                .unwrap_or_else(|_| "claude-haiku-4-5-20251001".to_string()),
            voyage_api_key: env::var("VOYAGE_API_KEY").ok().filter(|k| !k.is_empty()),
            embedding_model: env::var("EMBEDDING_MODEL")
                .unwrap_or_else(|_| "voyage-3-large".to_string()),
            retrieval: RetrievalConfig::from_env(),
        }
    }

    /// Log the configuration with secrets reduced to presence flags.
    pub fn log_redacted(&self) {
        info!(
            neo4j_uri = self.neo4j_uri.as_str(),
            neo4j_user = self.neo4j_user.as_str(),
            anthropic_key_set = !self.anthropic_api_key.is_empty(),
            anthropic_model = self.anthropic_model.as_str(),
            voyage_key_set = self.voyage_api_key.is_some(),
            embedding_model = self.embedding_model.as_str(),
            reranker = ?self.retrieval.reranker,
            context_char_budget = self.retrieval.context_char_budget,
            "Configuration loaded"
        );
    }
}

fn required_env(key: &str) -> String {
    env::var(key).unwrap_or_else(|_| panic!("{key} environment variable is required"))
}

fn parsed_env<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rerank_strategy_parses_case_insensitively() {
        assert_eq!("LLM".parse::<RerankStrategy>().unwrap(), RerankStrategy::Llm);
        assert_eq!(" score ".parse::<RerankStrategy>().unwrap(), RerankStrategy::Score);
        assert!("bm25".parse::<RerankStrategy>().is_err());
    }

    #[test]
    fn default_retrieval_config_uses_score_reranker() {
        let cfg = RetrievalConfig::default();
        assert_eq!(cfg.reranker, RerankStrategy::Score);
        assert!(cfg.chunk_top_k <= cfg.chunk_search_k);
    }
}
