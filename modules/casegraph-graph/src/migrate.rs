use neo4rs::query;
use tracing::{info, warn};

use casegraph_common::Result;

use crate::client::{db_error, GraphClient};
use crate::vector::{CHUNK_INDEX, DOCUMENT_INDEX, ENTITY_INDEX};

/// Run idempotent schema migrations: key uniqueness per case, lookup indexes and the
/// vector indexes used by retrieval.
pub async fn migrate(client: &GraphClient, embedding_dimensions: usize) -> Result<()> {
    let g = &client.graph;

    info!("Running schema migrations...");

    let constraints = [
        "CREATE CONSTRAINT entity_key IF NOT EXISTS FOR (n:Entity) REQUIRE (n.case_id, n.key) IS UNIQUE",
        "CREATE CONSTRAINT rejected_pair IF NOT EXISTS FOR (p:RejectedPair) REQUIRE (p.case_id, p.key1, p.key2) IS UNIQUE",
    ];
    for c in &constraints {
        run_ignoring_exists(g, c).await?;
    }
    info!("Uniqueness constraints created");

    let indexes = [
        "CREATE INDEX entity_case IF NOT EXISTS FOR (n:Entity) ON (n.case_id)",
        "CREATE INDEX chunk_case IF NOT EXISTS FOR (c:Chunk) ON (c.case_id)",
    ];
    for idx in &indexes {
        run_ignoring_exists(g, idx).await?;
    }
    info!("Property indexes created");

    for (name, label) in [
        (CHUNK_INDEX, "Chunk"),
        (DOCUMENT_INDEX, "Document"),
        (ENTITY_INDEX, "Entity"),
    ] {
        let cypher = format!(
            "CREATE VECTOR INDEX {name} IF NOT EXISTS FOR (n:{label}) ON (n.embedding)
             OPTIONS {{indexConfig: {{`vector.dimensions`: {embedding_dimensions}, `vector.similarity_function`: 'cosine'}}}}"
        );
        run_ignoring_exists(g, &cypher).await?;
    }
    info!(dimensions = embedding_dimensions, "Vector indexes created");

    Ok(())
}

async fn run_ignoring_exists(g: &neo4rs::Graph, cypher: &str) -> Result<()> {
    match g.run(query(cypher)).await {
        Ok(_) => Ok(()),
        Err(e) => {
            let msg = e.to_string().to_lowercase();
            if msg.contains("already exists") || msg.contains("equivalent") {
                warn!("Already exists (skipped): {}", cypher.chars().take(80).collect::<String>());
                Ok(())
            } else {
                Err(db_error(e))
            }
        }
    }
}
