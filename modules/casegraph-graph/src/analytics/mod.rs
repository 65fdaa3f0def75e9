//! Graph algorithms over an in-memory snapshot of a case.
//!
//! The facade pulls a [`Subgraph`] from the store once per call, builds an
//! [`Adjacency`] from it and runs a pure algorithm over that snapshot. Every result
//! carries both the scores or partition and the subgraph they describe.

mod adjacency;
mod betweenness;
mod louvain;
mod pagerank;
mod paths;

pub use adjacency::Adjacency;
pub use betweenness::betweenness;
pub use louvain::{louvain, modularity, Partition};
pub use pagerank::pagerank;
pub use paths::{shortest_paths_subgraph, PathsResult, MAX_PATH_DEPTH};

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::info;

use casegraph_common::{CaseGraphError, Node, Result, Subgraph};

use crate::store::GraphStore;

/// Largest seed expansion accepted for analytics.
pub const MAX_SCOPE_DEPTH: u32 = 2;

/// Which part of a case an algorithm runs on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "scope", rename_all = "snake_case")]
pub enum AnalysisScope {
    Full,
    /// Seeds expanded by `depth` hops; depth 0 keeps only the seeds and the
    /// relationships among them.
    Seeds { keys: Vec<String>, depth: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PageRankParams {
    pub damping: f64,
    pub iterations: u32,
    pub top_n: usize,
}

impl Default for PageRankParams {
    fn default() -> Self {
        Self {
            damping: 0.85,
            iterations: 20,
            top_n: 20,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LouvainParams {
    pub resolution: f64,
    pub max_iterations: u32,
    pub seed: Option<u64>,
}

impl Default for LouvainParams {
    fn default() -> Self {
        Self {
            resolution: 1.0,
            max_iterations: 10,
            seed: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BetweennessParams {
    pub top_n: usize,
    pub normalized: bool,
}

impl Default for BetweennessParams {
    fn default() -> Self {
        Self {
            top_n: 20,
            normalized: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredNode {
    pub key: String,
    pub name: String,
    #[serde(rename = "type")]
    pub node_type: String,
    pub score: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RankingResult {
    pub scores: Vec<ScoredNode>,
    /// The ranked nodes and the relationships among them.
    pub subgraph: Subgraph,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommunityResult {
    pub assignments: BTreeMap<String, usize>,
    pub community_count: usize,
    pub modularity: f64,
    pub subgraph: Subgraph,
}

impl CommunityResult {
    /// Member keys of each community, indexed by community id.
    pub fn members(&self) -> Vec<Vec<String>> {
        let mut groups = vec![Vec::new(); self.community_count];
        for (key, &community) in &self.assignments {
            if let Some(group) = groups.get_mut(community) {
                group.push(key.clone());
            }
        }
        groups
    }
}

/// Case-scoped analytics over a shared graph store.
pub struct GraphAnalytics {
    store: Arc<dyn GraphStore>,
}

impl GraphAnalytics {
    pub fn new(store: Arc<dyn GraphStore>) -> Self {
        Self { store }
    }

    /// Load the subgraph an algorithm runs on.
    pub async fn snapshot(&self, case_id: &str, scope: &AnalysisScope) -> Result<Subgraph> {
        match scope {
            AnalysisScope::Full => self.store.get_full_graph(case_id, None).await,
            AnalysisScope::Seeds { depth, .. } if *depth > MAX_SCOPE_DEPTH => {
                Err(CaseGraphError::invalid(format!(
                    "analysis depth must be at most {MAX_SCOPE_DEPTH}, got {depth}"
                )))
            }
            AnalysisScope::Seeds { keys, depth: 0 } => {
                self.store.induced_subgraph(case_id, keys).await
            }
            AnalysisScope::Seeds { keys, depth } => self.store.expand(case_id, keys, *depth).await,
        }
    }

    pub async fn pagerank(
        &self,
        case_id: &str,
        scope: &AnalysisScope,
        params: &PageRankParams,
    ) -> Result<RankingResult> {
        let started = Instant::now();
        let graph = self.snapshot(case_id, scope).await?;
        let adj = Adjacency::from_subgraph(&graph);
        if adj.len() < 2 {
            // still validate parameters on trivial graphs
            pagerank(&Adjacency::default(), params.damping, params.iterations)?;
            return Ok(RankingResult::default());
        }
        let scores = pagerank(&adj, params.damping, params.iterations)?;
        let result = ranking(&graph, &adj, &scores, params.top_n);
        info!(
            case_id,
            nodes = adj.len(),
            iterations = params.iterations,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "PageRank computed"
        );
        Ok(result)
    }

    pub async fn communities(
        &self,
        case_id: &str,
        scope: &AnalysisScope,
        params: &LouvainParams,
    ) -> Result<CommunityResult> {
        let started = Instant::now();
        let graph = self.snapshot(case_id, scope).await?;
        let adj = Adjacency::from_subgraph(&graph);
        if adj.len() < 2 {
            louvain(&Adjacency::default(), params.resolution, params.max_iterations, params.seed)?;
            return Ok(CommunityResult::default());
        }
        let partition = louvain(&adj, params.resolution, params.max_iterations, params.seed)?;
        let assignments = partition
            .membership
            .iter()
            .enumerate()
            .map(|(i, &c)| (adj.key(i).to_string(), c))
            .collect();
        info!(
            case_id,
            nodes = adj.len(),
            communities = partition.community_count,
            modularity = partition.modularity,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Communities detected"
        );
        Ok(CommunityResult {
            assignments,
            community_count: partition.community_count,
            modularity: partition.modularity,
            subgraph: graph,
        })
    }

    pub async fn betweenness(
        &self,
        case_id: &str,
        scope: &AnalysisScope,
        params: &BetweennessParams,
    ) -> Result<RankingResult> {
        let started = Instant::now();
        let graph = self.snapshot(case_id, scope).await?;
        let adj = Adjacency::from_subgraph(&graph);
        if adj.len() < 2 {
            return Ok(RankingResult::default());
        }
        let scores = betweenness(&adj, params.normalized);
        let result = ranking(&graph, &adj, &scores, params.top_n);
        info!(
            case_id,
            nodes = adj.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Betweenness computed"
        );
        Ok(result)
    }

    pub async fn shortest_paths(
        &self,
        case_id: &str,
        seed_keys: &[String],
        max_depth: u32,
    ) -> Result<PathsResult> {
        let result =
            shortest_paths_subgraph(self.store.as_ref(), case_id, seed_keys, max_depth).await?;
        info!(
            case_id,
            pairs = result.pairs_total,
            connected = result.pairs_connected,
            nodes = result.subgraph.nodes.len(),
            "Shortest-path subgraph built"
        );
        Ok(result)
    }
}

fn ranking(graph: &Subgraph, adj: &Adjacency, scores: &[f64], top_n: usize) -> RankingResult {
    let by_key: BTreeMap<&str, &Node> = graph.nodes.iter().map(|n| (n.key.as_str(), n)).collect();
    let top = adj.top_n(scores, top_n);
    let keys: BTreeSet<String> = top.iter().map(|(i, _)| adj.key(*i).to_string()).collect();
    let scores = top
        .into_iter()
        .filter_map(|(i, score)| {
            by_key.get(adj.key(i)).map(|node| ScoredNode {
                key: node.key.clone(),
                name: node.name.clone(),
                node_type: node.node_type.clone(),
                score,
            })
        })
        .collect();
    RankingResult {
        scores,
        subgraph: graph.restricted_to(&keys),
    }
}
