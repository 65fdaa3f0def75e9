use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::{Map, Value};

use casegraph_common::{
    CaseGraphError, DateRange, DeletionCounts, Node, NodeUpdate, RejectedPair, Relationship,
    Result, SchemaSummary, Subgraph,
};

use crate::resolution::MergePlan;

pub const MAX_NEIGHBOUR_DEPTH: u32 = 3;
pub const MAX_EXPAND_DEPTH: u32 = 5;

/// A row returned by [`GraphStore::run_query`], keyed by column name.
pub type QueryRow = Map<String, Value>;

/// Case-scoped access to the property graph. Every operation takes the owning
/// `case_id` and never returns data from another case; a key that only exists in a
/// different case is reported as `NotFound`.
#[async_trait]
pub trait GraphStore: Send + Sync {
    async fn get_full_graph(&self, case_id: &str, date_range: Option<DateRange>)
        -> Result<Subgraph>;

    async fn get_node(&self, case_id: &str, key: &str) -> Result<Node>;

    /// Undirected neighbourhood of `key` up to `depth` hops (1..=3).
    async fn get_neighbours(&self, case_id: &str, key: &str, depth: u32) -> Result<Subgraph>;

    /// Union of undirected expansions from each seed (depth 1..=5). Unknown seeds are ignored.
    async fn expand(&self, case_id: &str, keys: &[String], depth: u32) -> Result<Subgraph>;

    /// Exactly the named nodes and the relationships among them.
    async fn induced_subgraph(&self, case_id: &str, keys: &[String]) -> Result<Subgraph>;

    async fn search(&self, case_id: &str, query: &str, limit: usize) -> Result<Vec<Node>>;

    async fn create_node(&self, case_id: &str, node: Node) -> Result<Node>;

    async fn update_node(&self, case_id: &str, key: &str, update: &NodeUpdate) -> Result<Node>;

    /// Both endpoints of every relationship must belong to `case_id`. Nothing is
    /// written if any endpoint is missing.
    async fn create_relationships(&self, case_id: &str, rels: Vec<Relationship>) -> Result<usize>;

    async fn delete_node(&self, case_id: &str, key: &str) -> Result<DeletionCounts>;

    async fn pin_fact(&self, case_id: &str, key: &str, fact_index: usize, pinned: bool)
        -> Result<Node>;

    async fn verify_insight(
        &self,
        case_id: &str,
        key: &str,
        insight_index: usize,
        verifier: &str,
    ) -> Result<Node>;

    /// One shortest undirected path between two nodes, or `None` when they are not
    /// connected within `max_depth` hops.
    async fn shortest_path(
        &self,
        case_id: &str,
        from: &str,
        to: &str,
        max_depth: u32,
    ) -> Result<Option<Subgraph>>;

    async fn schema_summary(&self, case_id: &str) -> Result<SchemaSummary>;

    /// Execute one read statement. Callers screen the text before it gets here.
    async fn run_query(&self, text: &str, params: &BTreeMap<String, Value>)
        -> Result<Vec<QueryRow>>;

    /// Apply a merge plan atomically and return the final target snapshot.
    async fn apply_merge(&self, case_id: &str, plan: &MergePlan) -> Result<Node>;

    async fn rejected_pairs(&self, case_id: &str) -> Result<Vec<RejectedPair>>;

    async fn reject_pair(&self, pair: RejectedPair) -> Result<()>;

    /// Returns whether a rejection existed.
    async fn undo_rejection(&self, case_id: &str, key1: &str, key2: &str) -> Result<bool>;
}

pub fn validate_depth(depth: u32, max: u32) -> Result<()> {
    if depth == 0 || depth > max {
        return Err(CaseGraphError::invalid(format!(
            "depth must be between 1 and {max}, got {depth}"
        )));
    }
    Ok(())
}

/// Labels and relationship types are interpolated into Cypher, so only plain
/// identifiers are accepted.
pub fn validate_identifier(kind: &str, value: &str) -> Result<()> {
    let mut chars = value.chars();
    let valid_start = chars
        .next()
        .map(|c| c.is_ascii_alphabetic() || c == '_')
        .unwrap_or(false);
    if !valid_start || !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(CaseGraphError::invalid(format!("invalid {kind} '{value}'")));
    }
    Ok(())
}
