use std::collections::HashMap;

use tracing::{debug, warn};

use casegraph_common::{
    Candidate, CandidateKind, Chunk, LanguageModel, Node, RerankStrategy, RetrievalConfig,
};

use crate::context::entity_text;

/// Candidate passages shown to the scorer are cut to this many characters.
const CANDIDATE_TEXT_CHARS: usize = 1_000;
/// LLM scores below this are dropped.
const MIN_LLM_SCORE: f64 = 5.0;
/// Entities may push the running total this far past the character budget.
const ENTITY_BUDGET_FACTOR: f64 = 1.2;

#[derive(Debug, Clone, PartialEq)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub distance: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScoredEntity {
    pub node: Node,
    pub distance: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Reranked {
    pub chunks: Vec<ScoredChunk>,
    pub entities: Vec<ScoredEntity>,
    /// Strategy that actually produced the result, after any fallback.
    pub strategy: RerankStrategy,
}

impl Reranked {
    pub fn char_count(&self) -> usize {
        self.chunks.iter().map(|c| c.chunk.text.len()).sum::<usize>()
            + self
                .entities
                .iter()
                .map(|e| entity_text(&e.node).len())
                .sum::<usize>()
    }
}

pub struct Reranker<'a> {
    config: &'a RetrievalConfig,
    model: &'a dyn LanguageModel,
}

impl<'a> Reranker<'a> {
    pub fn new(config: &'a RetrievalConfig, model: &'a dyn LanguageModel) -> Self {
        Self { config, model }
    }

    pub async fn rerank(
        &self,
        question: &str,
        chunks: Vec<ScoredChunk>,
        entities: Vec<ScoredEntity>,
    ) -> Reranked {
        match self.config.reranker {
            RerankStrategy::Score => score_rerank(self.config, chunks, entities),
            RerankStrategy::Llm => self.llm_rerank(question, chunks, entities).await,
        }
    }

    async fn llm_rerank(
        &self,
        question: &str,
        chunks: Vec<ScoredChunk>,
        entities: Vec<ScoredEntity>,
    ) -> Reranked {
        let candidates: Vec<Candidate> = chunks
            .iter()
            .enumerate()
            .map(|(i, c)| Candidate {
                id: format!("c{i}"),
                kind: CandidateKind::Chunk,
                text: c.chunk.text.chars().take(CANDIDATE_TEXT_CHARS).collect(),
            })
            .chain(entities.iter().enumerate().map(|(i, e)| Candidate {
                id: format!("e{i}"),
                kind: CandidateKind::Entity,
                text: entity_text(&e.node).chars().take(CANDIDATE_TEXT_CHARS).collect(),
            }))
            .collect();
        if candidates.is_empty() {
            return score_rerank(self.config, chunks, entities);
        }

        let scores = match self.model.score_candidates(question, &candidates).await {
            Ok(scores) if !scores.is_empty() => scores,
            Ok(_) => {
                warn!("LLM reranker returned no scores, falling back to distance ranking");
                return score_rerank(self.config, chunks, entities);
            }
            Err(e) => {
                warn!(error = %e, "LLM reranker failed, falling back to distance ranking");
                return score_rerank(self.config, chunks, entities);
            }
        };
        let by_id: HashMap<&str, f64> = scores.iter().map(|s| (s.id.as_str(), s.score)).collect();

        let chunks = keep_scored(chunks, "c", &by_id, self.config.chunk_top_k);
        let entities = keep_scored(entities, "e", &by_id, self.config.entity_top_k);
        debug!(
            chunks = chunks.len(),
            entities = entities.len(),
            "LLM rerank complete"
        );
        let (chunks, entities) = pack(self.config.context_char_budget, chunks, entities);
        Reranked {
            chunks,
            entities,
            strategy: RerankStrategy::Llm,
        }
    }
}

/// Keep items scoring at least [`MIN_LLM_SCORE`], best first, capped at `top_k`.
fn keep_scored<T>(items: Vec<T>, prefix: &str, scores: &HashMap<&str, f64>, top_k: usize) -> Vec<T> {
    let mut kept: Vec<(f64, usize, T)> = items
        .into_iter()
        .enumerate()
        .filter_map(|(i, item)| {
            let score = *scores.get(format!("{prefix}{i}").as_str())?;
            (score >= MIN_LLM_SCORE).then_some((score, i, item))
        })
        .collect();
    kept.sort_by(|a, b| b.0.total_cmp(&a.0).then(a.1.cmp(&b.1)));
    kept.into_iter().take(top_k).map(|(_, _, item)| item).collect()
}

/// Distance ordering with per-kind caps and the character budget.
pub fn score_rerank(
    config: &RetrievalConfig,
    mut chunks: Vec<ScoredChunk>,
    mut entities: Vec<ScoredEntity>,
) -> Reranked {
    chunks.sort_by(|a, b| a.distance.total_cmp(&b.distance));
    entities.sort_by(|a, b| a.distance.total_cmp(&b.distance));
    chunks.truncate(config.chunk_top_k);
    entities.truncate(config.entity_top_k);
    let (chunks, entities) = pack(config.context_char_budget, chunks, entities);
    Reranked {
        chunks,
        entities,
        strategy: RerankStrategy::Score,
    }
}

/// Take chunks in order while the running total stays within `budget`, then entities
/// while it stays within the entity allowance. Stops at the first item that would overflow.
fn pack(
    budget: usize,
    chunks: Vec<ScoredChunk>,
    entities: Vec<ScoredEntity>,
) -> (Vec<ScoredChunk>, Vec<ScoredEntity>) {
    let mut used = 0usize;
    let mut kept_chunks = Vec::new();
    for c in chunks {
        let next = used + c.chunk.text.len();
        if next > budget {
            break;
        }
        used = next;
        kept_chunks.push(c);
    }

    let entity_budget = (budget as f64 * ENTITY_BUDGET_FACTOR) as usize;
    let mut kept_entities = Vec::new();
    for e in entities {
        let next = used + entity_text(&e.node).len();
        if next > entity_budget {
            break;
        }
        used = next;
        kept_entities.push(e);
    }
    (kept_chunks, kept_entities)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(id: &str, len: usize, distance: f64) -> ScoredChunk {
        ScoredChunk {
            chunk: Chunk {
                id: id.into(),
                text: "x".repeat(len),
                doc_name: "doc".into(),
                ..Default::default()
            },
            distance,
        }
    }

    fn entity(key: &str, distance: f64) -> ScoredEntity {
        ScoredEntity {
            node: Node::new(key, "Person", key),
            distance,
        }
    }

    #[test]
    fn score_strategy_orders_by_distance_and_caps() {
        let config = RetrievalConfig {
            chunk_top_k: 2,
            entity_top_k: 1,
            ..Default::default()
        };
        let result = score_rerank(
            &config,
            vec![chunk("far", 10, 0.5), chunk("near", 10, 0.1), chunk("mid", 10, 0.3)],
            vec![entity("b", 0.4), entity("a", 0.0)],
        );
        let ids: Vec<&str> = result.chunks.iter().map(|c| c.chunk.id.as_str()).collect();
        assert_eq!(ids, vec!["near", "mid"]);
        assert_eq!(result.entities.len(), 1);
        assert_eq!(result.entities[0].node.key, "a");
    }

    #[test]
    fn budget_stops_chunks_and_lets_entities_overflow() {
        let config = RetrievalConfig {
            context_char_budget: 100,
            ..Default::default()
        };
        let result = score_rerank(
            &config,
            vec![chunk("a", 60, 0.1), chunk("b", 35, 0.2), chunk("c", 30, 0.3)],
            vec![entity("p1", 0.1)],
        );
        assert_eq!(result.chunks.len(), 2);
        // 95 chars of chunks plus a short entity fits inside 120
        assert_eq!(result.entities.len(), 1);
        assert!(result.char_count() <= 120);
    }
}
