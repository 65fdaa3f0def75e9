use std::collections::BTreeMap;

use anyhow::Result;
use async_trait::async_trait;
use neo4rs::{query, Row};
use serde_json::Value;
use tracing::{debug, warn};

use casegraph_common::{VectorHit, VectorIndex};

use crate::client::GraphClient;

pub const CHUNK_INDEX: &str = "chunk_embedding";
pub const DOCUMENT_INDEX: &str = "document_embedding";
pub const ENTITY_INDEX: &str = "entity_embedding";

/// Vector indexes are global, so hits are over-fetched and then filtered to the case.
const CASE_OVERFETCH: usize = 4;

/// Vector search over the Neo4j vector indexes. Distance is `1 - score`.
#[derive(Clone)]
pub struct Neo4jVectorIndex {
    client: GraphClient,
}

impl Neo4jVectorIndex {
    pub fn new(client: GraphClient) -> Self {
        Self { client }
    }

    async fn query_index(
        &self,
        index: &str,
        columns: &str,
        case_id: &str,
        embedding: &[f32],
        top_k: usize,
    ) -> std::result::Result<Vec<Row>, neo4rs::Error> {
        let cypher = format!(
            "CALL db.index.vector.queryNodes('{index}', $k, $embedding)
             YIELD node, score
             WHERE node.case_id = $case_id
             RETURN score, {columns}
             ORDER BY score DESC
             LIMIT $top_k"
        );
        let q = query(&cypher)
            .param("k", (top_k * CASE_OVERFETCH) as i64)
            .param("embedding", embedding_to_f64(embedding))
            .param("case_id", case_id)
            .param("top_k", top_k as i64);

        let mut stream = self.client.graph.execute(q).await?;
        let mut rows = Vec::new();
        while let Some(row) = stream.next().await? {
            rows.push(row);
        }
        Ok(rows)
    }
}

#[async_trait]
impl VectorIndex for Neo4jVectorIndex {
    async fn search_chunks(&self, case_id: &str, embedding: &[f32], top_k: usize) -> Result<Vec<VectorHit>> {
        let chunk_columns = "node.id AS id, node.text AS text, node.doc_name AS doc_name,
                             node.page_start AS page_start, node.page_end AS page_end";
        let rows = match self
            .query_index(CHUNK_INDEX, chunk_columns, case_id, embedding, top_k)
            .await
        {
            Ok(rows) => rows,
            Err(e) if is_missing_index(&e) => {
                warn!(case_id, "No chunk index, falling back to document embeddings");
                let document_columns = "node.key AS id, coalesce(node.summary, '') AS text,
                                        node.name AS doc_name, null AS page_start, null AS page_end";
                self.query_index(DOCUMENT_INDEX, document_columns, case_id, embedding, top_k)
                    .await?
            }
            Err(e) => return Err(e.into()),
        };

        let hits = rows
            .iter()
            .map(|row| hit_from_row(row, &["text", "doc_name", "page_start", "page_end"]))
            .collect::<Result<Vec<_>>>()?;
        debug!(case_id, hits = hits.len(), "Chunk search complete");
        Ok(hits)
    }

    async fn search_entities(&self, case_id: &str, embedding: &[f32], top_k: usize) -> Result<Vec<VectorHit>> {
        let columns = "node.key AS id, node.name AS name,
                       [l IN labels(node) WHERE l <> 'Entity'][0] AS type";
        let rows = self
            .query_index(ENTITY_INDEX, columns, case_id, embedding, top_k)
            .await?;
        let hits = rows
            .iter()
            .map(|row| hit_from_row(row, &["name", "type"]))
            .collect::<Result<Vec<_>>>()?;
        debug!(case_id, hits = hits.len(), "Entity search complete");
        Ok(hits)
    }
}

fn hit_from_row(row: &Row, metadata_columns: &[&str]) -> Result<VectorHit> {
    let id: String = row.get("id")?;
    let score: f64 = row.get("score")?;
    let mut metadata = BTreeMap::new();
    for column in metadata_columns {
        let value: Value = row.get(column).unwrap_or(Value::Null);
        if !value.is_null() {
            metadata.insert(column.to_string(), value);
        }
    }
    Ok(VectorHit {
        id,
        distance: 1.0 - score,
        metadata,
    })
}

fn is_missing_index(e: &neo4rs::Error) -> bool {
    let msg = e.to_string().to_lowercase();
    msg.contains("no such") && msg.contains("index")
}

fn embedding_to_f64(embedding: &[f32]) -> Vec<f64> {
    embedding.iter().map(|&v| v as f64).collect()
}
