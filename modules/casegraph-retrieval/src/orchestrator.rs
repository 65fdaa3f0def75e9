use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use casegraph_common::{
    CaseGraphError, Chunk, LanguageModel, QuestionKind, Result, RetrievalConfig, Subgraph,
    TextEmbedder, VectorIndex,
};
use casegraph_graph::{GraphStore, QueryRow};

use crate::context::ContextBuilder;
use crate::query_guard::screen_query;
use crate::rerank::{Reranked, Reranker, ScoredChunk, ScoredEntity};
use crate::trace::{stage, PipelineTrace, Progress, StageEvent, StageRecord, StageRun};

/// Connection lines handed to the context are capped at this many.
const MAX_CONNECTION_LINES: usize = 200;

/// The answer to one question, with everything needed to show how it was reached.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Answer {
    pub answer: String,
    pub classification: QuestionKind,
    pub used_entity_keys: Vec<String>,
    /// Entities close to the answer text and the relationships among them.
    pub result_graph: Subgraph,
    pub trace: PipelineTrace,
}

/// Hybrid question answering over one case: structured graph queries, vector search
/// over chunks and entities, graph expansion and LLM synthesis.
pub struct RetrievalOrchestrator {
    store: Arc<dyn GraphStore>,
    model: Arc<dyn LanguageModel>,
    embedder: Option<Arc<dyn TextEmbedder>>,
    vectors: Option<Arc<dyn VectorIndex>>,
    config: RetrievalConfig,
}

impl RetrievalOrchestrator {
    /// Graph-only orchestrator. Add vector search with [`Self::with_vector_search`].
    pub fn new(
        store: Arc<dyn GraphStore>,
        model: Arc<dyn LanguageModel>,
        config: RetrievalConfig,
    ) -> Self {
        Self {
            store,
            model,
            embedder: None,
            vectors: None,
            config,
        }
    }

    pub fn with_vector_search(
        mut self,
        embedder: Arc<dyn TextEmbedder>,
        vectors: Arc<dyn VectorIndex>,
    ) -> Self {
        self.embedder = Some(embedder);
        self.vectors = Some(vectors);
        self
    }

    pub async fn answer_question(
        &self,
        case_id: &str,
        question: &str,
        pinned_keys: &[String],
    ) -> Result<Answer> {
        self.run(case_id, question, pinned_keys, Progress::default())
            .await
    }

    /// Same as [`Self::answer_question`], reporting stage start and finish on `progress`.
    pub async fn answer_question_with_progress(
        &self,
        case_id: &str,
        question: &str,
        pinned_keys: &[String],
        progress: mpsc::Sender<StageEvent>,
    ) -> Result<Answer> {
        self.run(case_id, question, pinned_keys, Progress::new(progress))
            .await
    }

    async fn run(
        &self,
        case_id: &str,
        question: &str,
        pinned_keys: &[String],
        progress: Progress,
    ) -> Result<Answer> {
        let started = Instant::now();
        info!(case_id, pinned = pinned_keys.len(), "Answering question");
        let mut trace = PipelineTrace::default();

        // 1. Classify
        let run = StageRun::start(stage::CLASSIFY, &progress).await;
        let (kind, error) = match self.model.classify(question).await {
            Ok(kind) => (kind, None),
            Err(e) => {
                warn!(case_id, error = %e, "Classification failed, treating question as hybrid");
                (QuestionKind::Hybrid, Some(e.to_string()))
            }
        };
        trace.push(run.finish(&progress, question, kind.to_string(), error).await);

        // 2. Structured query
        let run = StageRun::start(stage::STRUCTURED_QUERY, &progress).await;
        let rows = if kind == QuestionKind::Semantic {
            trace.push(run.finish(&progress, question, "skipped", None).await);
            Vec::new()
        } else {
            match self.structured_query(case_id, question).await {
                Ok((text, rows)) => {
                    let output = format!("{} rows", rows.len());
                    trace.push(run.finish(&progress, text, output, None).await);
                    rows
                }
                Err(e) => {
                    warn!(case_id, error = %e, "Structured query stage produced no rows");
                    trace.push(run.finish(&progress, question, "0 rows", Some(e.to_string())).await);
                    Vec::new()
                }
            }
        };

        // 3 + 4. Chunk and entity retrieval share one question embedding.
        let embedding = self.embed_question(case_id, question).await;
        let skip_chunks = kind == QuestionKind::Structural && !rows.is_empty();
        let (chunk_stage, entity_stage) = tokio::join!(
            self.chunk_stage(case_id, embedding.as_ref(), skip_chunks, &progress),
            self.entity_stage(case_id, embedding.as_ref(), &progress),
        );
        let (chunks, record) = chunk_stage;
        trace.push(record);
        let (mut entities, record) = entity_stage;
        trace.push(record);

        // 5. Pinned entities
        let record = self
            .pinned_stage(case_id, pinned_keys, &mut entities, &progress)
            .await;
        trace.push(record);

        // 6. Graph traversal
        let (connections, record) = self.traversal_stage(case_id, &entities, &progress).await;
        trace.push(record);

        // 7. Rerank
        let run = StageRun::start(stage::RERANK, &progress).await;
        let input = format!("{} chunks, {} entities", chunks.len(), entities.len());
        let reranked = Reranker::new(&self.config, self.model.as_ref())
            .rerank(question, chunks, entities)
            .await;
        let output = format!(
            "{} chunks, {} entities via {:?}",
            reranked.chunks.len(),
            reranked.entities.len(),
            reranked.strategy
        );
        trace.push(run.finish(&progress, input, output, None).await);

        // 8. Context assembly
        let run = StageRun::start(stage::CONTEXT_ASSEMBLY, &progress).await;
        let context = assemble_context(&reranked, connections, &rows);
        trace.push(
            run.finish(&progress, "", format!("{} chars", context.len()), None)
                .await,
        );

        // 9. Synthesis
        let run = StageRun::start(stage::SYNTHESIS, &progress).await;
        let answer = match self.model.answer(question, &context).await {
            Ok(answer) => {
                trace.push(
                    run.finish(&progress, question, format!("{} chars", answer.len()), None)
                        .await,
                );
                answer
            }
            Err(e) => {
                warn!(case_id, error = %e, "Answer synthesis failed");
                run.finish(&progress, question, "", Some(e.to_string())).await;
                return Err(CaseGraphError::UpstreamUnavailable(format!(
                    "answer synthesis failed: {e}"
                )));
            }
        };

        let (result_graph, record) = self.result_graph_stage(case_id, &answer, &progress).await;
        trace.push(record);

        let used_entity_keys: Vec<String> =
            reranked.entities.iter().map(|e| e.node.key.clone()).collect();
        info!(
            case_id,
            classification = %kind,
            entities = used_entity_keys.len(),
            failed_stages = trace.failed_stages().len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Question answered"
        );

        Ok(Answer {
            answer,
            classification: kind,
            used_entity_keys,
            result_graph,
            trace,
        })
    }

    async fn structured_query(&self, case_id: &str, question: &str) -> Result<(String, Vec<QueryRow>)> {
        let schema = self.store.schema_summary(case_id).await?;
        let generated = self.model.generate_query(question, &schema).await?;
        let text = match screen_query(&generated) {
            Ok(text) => text,
            Err(e) => {
                warn!(case_id, query = generated.as_str(), "Generated query rejected");
                return Err(e);
            }
        };
        let params = BTreeMap::from([("case_id".to_string(), Value::String(case_id.to_string()))]);
        let mut rows = self.store.run_query(&text, &params).await?;
        rows.truncate(self.config.max_structural_rows);
        debug!(case_id, rows = rows.len(), "Structured query returned");
        Ok((text, rows))
    }

    /// `None` when no vector service is configured.
    async fn embed_question(
        &self,
        case_id: &str,
        question: &str,
    ) -> Option<std::result::Result<Vec<f32>, String>> {
        let embedder = self.embedder.as_ref()?;
        if self.vectors.is_none() {
            return None;
        }
        Some(embedder.embed(question).await.map_err(|e| {
            warn!(case_id, error = %e, "Question embedding failed");
            format!("embedding failed: {e}")
        }))
    }

    async fn chunk_stage(
        &self,
        case_id: &str,
        embedding: Option<&std::result::Result<Vec<f32>, String>>,
        skip: bool,
        progress: &Progress,
    ) -> (Vec<ScoredChunk>, StageRecord) {
        let run = StageRun::start(stage::CHUNK_RETRIEVAL, progress).await;
        if skip {
            return (Vec::new(), run.finish(progress, "", "skipped", None).await);
        }
        let (embedding, vectors) = match (embedding, &self.vectors) {
            (Some(Ok(embedding)), Some(vectors)) => (embedding, vectors),
            (Some(Err(e)), _) => {
                return (Vec::new(), run.finish(progress, "", "0 chunks", Some(e.clone())).await)
            }
            _ => {
                let output = "0 chunks (no vector search)";
                return (Vec::new(), run.finish(progress, "", output, None).await);
            }
        };

        match vectors
            .search_chunks(case_id, embedding, self.config.chunk_search_k)
            .await
        {
            Ok(hits) => {
                let found = hits.len();
                let chunks: Vec<ScoredChunk> = hits
                    .iter()
                    .filter(|h| h.distance <= self.config.max_chunk_distance)
                    .map(|h| ScoredChunk {
                        chunk: Chunk::from_hit(h),
                        distance: h.distance,
                    })
                    .collect();
                let input = format!("{found} hits");
                let output = format!("{} chunks", chunks.len());
                (chunks, run.finish(progress, input, output, None).await)
            }
            Err(e) => {
                warn!(case_id, error = %e, "Chunk search failed");
                let error = Some(format!("chunk search failed: {e}"));
                (Vec::new(), run.finish(progress, "", "0 chunks", error).await)
            }
        }
    }

    async fn entity_stage(
        &self,
        case_id: &str,
        embedding: Option<&std::result::Result<Vec<f32>, String>>,
        progress: &Progress,
    ) -> (Vec<ScoredEntity>, StageRecord) {
        let run = StageRun::start(stage::ENTITY_RETRIEVAL, progress).await;
        let (embedding, vectors) = match (embedding, &self.vectors) {
            (Some(Ok(embedding)), Some(vectors)) => (embedding, vectors),
            (Some(Err(e)), _) => {
                return (Vec::new(), run.finish(progress, "", "0 entities", Some(e.clone())).await)
            }
            _ => {
                let output = "0 entities (no vector search)";
                return (Vec::new(), run.finish(progress, "", output, None).await);
            }
        };

        let hits = match vectors
            .search_entities(case_id, embedding, self.config.entity_search_k)
            .await
        {
            Ok(hits) => hits,
            Err(e) => {
                warn!(case_id, error = %e, "Entity search failed");
                let error = Some(format!("entity search failed: {e}"));
                return (Vec::new(), run.finish(progress, "", "0 entities", error).await);
            }
        };

        let mut entities = Vec::with_capacity(hits.len());
        for hit in &hits {
            match self.store.get_node(case_id, &hit.id).await {
                Ok(node) => entities.push(ScoredEntity {
                    node,
                    distance: hit.distance,
                }),
                Err(CaseGraphError::NotFound(_)) => {
                    debug!(case_id, key = hit.id.as_str(), "Vector hit has no graph node");
                }
                Err(e) => {
                    warn!(case_id, key = hit.id.as_str(), error = %e, "Entity lookup failed");
                }
            }
        }
        let input = format!("{} hits", hits.len());
        let output = format!("{} entities", entities.len());
        (entities, run.finish(progress, input, output, None).await)
    }

    async fn pinned_stage(
        &self,
        case_id: &str,
        pinned_keys: &[String],
        entities: &mut Vec<ScoredEntity>,
        progress: &Progress,
    ) -> StageRecord {
        let run = StageRun::start(stage::PINNED_ENTITIES, progress).await;
        let mut added = 0;
        let mut missing = Vec::new();
        for key in pinned_keys {
            if entities.iter().any(|e| &e.node.key == key) {
                continue;
            }
            match self.store.get_node(case_id, key).await {
                Ok(node) => {
                    entities.push(ScoredEntity { node, distance: 0.0 });
                    added += 1;
                }
                Err(e) => {
                    warn!(case_id, key = key.as_str(), error = %e, "Pinned entity unavailable");
                    missing.push(key.clone());
                }
            }
        }
        let error = (!missing.is_empty()).then(|| format!("missing pinned keys: {}", missing.join(", ")));
        run.finish(progress, pinned_keys.join(", "), format!("{added} added"), error)
            .await
    }

    async fn traversal_stage(
        &self,
        case_id: &str,
        entities: &[ScoredEntity],
        progress: &Progress,
    ) -> (Vec<String>, StageRecord) {
        let run = StageRun::start(stage::GRAPH_TRAVERSAL, progress).await;
        if entities.is_empty() {
            return (Vec::new(), run.finish(progress, "", "no seed entities", None).await);
        }
        let seeds: Vec<String> = entities.iter().map(|e| e.node.key.clone()).collect();
        match self.store.expand(case_id, &seeds, 1).await {
            Ok(graph) => {
                let lines = connection_lines(&graph);
                let input = format!("{} seeds", seeds.len());
                let output = format!("{} connections", lines.len());
                (lines, run.finish(progress, input, output, None).await)
            }
            Err(e) => {
                warn!(case_id, error = %e, "Graph traversal failed");
                let error = Some(e.to_string());
                (Vec::new(), run.finish(progress, "", "0 connections", error).await)
            }
        }
    }

    async fn result_graph_stage(
        &self,
        case_id: &str,
        answer: &str,
        progress: &Progress,
    ) -> (Subgraph, StageRecord) {
        let run = StageRun::start(stage::RESULT_GRAPH, progress).await;
        let (Some(embedder), Some(vectors)) = (&self.embedder, &self.vectors) else {
            let output = "empty (no vector search)";
            return (Subgraph::default(), run.finish(progress, "", output, None).await);
        };

        let graph = async {
            let embedding = embedder.embed(answer).await?;
            let hits = vectors
                .search_entities(case_id, &embedding, self.config.result_graph_top_k)
                .await?;
            let keys: Vec<String> = hits.into_iter().map(|h| h.id).collect();
            let graph = self.store.induced_subgraph(case_id, &keys).await?;
            Ok::<_, anyhow::Error>(graph)
        }
        .await;

        match graph {
            Ok(graph) => {
                let output = format!(
                    "{} nodes, {} relationships",
                    graph.nodes.len(),
                    graph.relationships.len()
                );
                (graph, run.finish(progress, "", output, None).await)
            }
            Err(e) => {
                warn!(case_id, error = %e, "Result graph unavailable");
                let error = Some(e.to_string());
                (Subgraph::default(), run.finish(progress, "", "empty", error).await)
            }
        }
    }
}

fn assemble_context(reranked: &Reranked, connections: Vec<String>, rows: &[QueryRow]) -> String {
    let mut builder = ContextBuilder::new();
    for scored in &reranked.chunks {
        builder.passage(&scored.chunk);
    }
    for scored in &reranked.entities {
        builder.entity(&scored.node);
    }
    builder.connections(connections).structured_rows(rows);
    builder.build()
}

/// `Source -[TYPE]-> Target` for every relationship, using node names where known.
fn connection_lines(graph: &Subgraph) -> Vec<String> {
    let names: HashMap<&str, &str> = graph
        .nodes
        .iter()
        .map(|n| {
            let label = if n.name.is_empty() { n.key.as_str() } else { n.name.as_str() };
            (n.key.as_str(), label)
        })
        .collect();
    let name_of = |key: &str| names.get(key).copied().unwrap_or(key).to_string();
    graph
        .relationships
        .iter()
        .take(MAX_CONNECTION_LINES)
        .map(|r| format!("{} -[{}]-> {}", name_of(&r.source_key), r.rel_type, name_of(&r.target_key)))
        .collect()
}
