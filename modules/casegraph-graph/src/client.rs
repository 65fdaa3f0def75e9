use neo4rs::{ConfigBuilder, Graph};
use tracing::info;

use casegraph_common::{CaseGraphError, Result};

/// Explicitly constructed handle to the graph database. Components receive a clone;
/// the underlying connection pool is shared.
#[derive(Clone)]
pub struct GraphClient {
    pub(crate) graph: Graph,
}

impl GraphClient {
    /// Connect to Neo4j with the given credentials.
    pub async fn connect(uri: &str, user: &str, password: &str) -> Result<Self> {
        let config = ConfigBuilder::default()
            .uri(uri)
            .user(user)
            .password(password)
            .fetch_size(500)
            .max_connections(10)
            .build()
            .map_err(|e| CaseGraphError::Config(format!("invalid Neo4j config: {e}")))?;
        let graph = Graph::connect(config).await.map_err(db_error)?;
        info!(uri, "Connected to Neo4j");
        Ok(Self { graph })
    }

    /// Get a reference to the underlying neo4rs Graph.
    pub fn inner(&self) -> &Graph {
        &self.graph
    }

    /// Release this handle. Pooled connections close once the last clone is dropped.
    pub fn close(self) {
        drop(self.graph);
        info!("Graph client closed");
    }
}

pub(crate) fn db_error(e: neo4rs::Error) -> CaseGraphError {
    CaseGraphError::Internal(format!("graph database error: {e}"))
}
