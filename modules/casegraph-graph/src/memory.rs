//! In-process graph store. Backs tests and demos with the same case-scoping rules as
//! the Neo4j store.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tokio::sync::RwLock;

use casegraph_common::{
    normalize_pair, CaseGraphError, DateRange, DeletionCounts, Node, NodeUpdate, RejectedPair,
    Relationship, Result, SchemaSummary, Subgraph,
};

use crate::resolution::MergePlan;
use crate::store::{
    validate_depth, validate_identifier, GraphStore, QueryRow, MAX_EXPAND_DEPTH,
    MAX_NEIGHBOUR_DEPTH,
};

#[derive(Default)]
struct CaseGraph {
    nodes: BTreeMap<String, Node>,
    relationships: Vec<Relationship>,
}

impl CaseGraph {
    fn node(&self, key: &str) -> Result<&Node> {
        self.nodes
            .get(key)
            .ok_or_else(|| CaseGraphError::node_not_found(key))
    }

    fn node_mut(&mut self, key: &str) -> Result<&mut Node> {
        self.nodes
            .get_mut(key)
            .ok_or_else(|| CaseGraphError::node_not_found(key))
    }

    fn undirected_neighbours(&self, key: &str) -> impl Iterator<Item = &str> + '_ {
        let key = key.to_string();
        self.relationships.iter().filter_map(move |r| {
            if r.source_key == key {
                Some(r.target_key.as_str())
            } else if r.target_key == key {
                Some(r.source_key.as_str())
            } else {
                None
            }
        })
    }

    fn bfs_keys(&self, seeds: &[String], depth: u32) -> BTreeSet<String> {
        let mut seen = BTreeSet::new();
        let mut queue = VecDeque::new();
        for seed in seeds {
            if self.nodes.contains_key(seed) && seen.insert(seed.clone()) {
                queue.push_back((seed.clone(), 0));
            }
        }
        while let Some((key, d)) = queue.pop_front() {
            if d == depth {
                continue;
            }
            for next in self.undirected_neighbours(&key) {
                if seen.insert(next.to_string()) {
                    queue.push_back((next.to_string(), d + 1));
                }
            }
        }
        seen
    }

    fn subgraph(&self, keys: &BTreeSet<String>) -> Subgraph {
        Subgraph {
            nodes: keys.iter().filter_map(|k| self.nodes.get(k)).cloned().collect(),
            relationships: self
                .relationships
                .iter()
                .filter(|r| keys.contains(&r.source_key) && keys.contains(&r.target_key))
                .cloned()
                .collect(),
        }
    }
}

#[derive(Default)]
struct MemoryState {
    cases: BTreeMap<String, CaseGraph>,
    rejected: BTreeMap<String, Vec<RejectedPair>>,
    query_log: Vec<String>,
    query_rows: Vec<QueryRow>,
}

impl MemoryState {
    fn case(&self, case_id: &str) -> Option<&CaseGraph> {
        self.cases.get(case_id)
    }
}

#[derive(Default)]
pub struct InMemoryGraphStore {
    state: RwLock<MemoryState>,
}

impl InMemoryGraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rows returned by every `run_query` call.
    pub async fn set_query_rows(&self, rows: Vec<QueryRow>) {
        self.state.write().await.query_rows = rows;
    }

    /// Every statement passed to `run_query`, in order.
    pub async fn executed_queries(&self) -> Vec<String> {
        self.state.read().await.query_log.clone()
    }
}

#[async_trait]
impl GraphStore for InMemoryGraphStore {
    async fn get_full_graph(&self, case_id: &str, date_range: Option<DateRange>) -> Result<Subgraph> {
        let state = self.state.read().await;
        let Some(case) = state.case(case_id) else {
            return Ok(Subgraph::default());
        };
        let graph = Subgraph {
            nodes: case.nodes.values().cloned().collect(),
            relationships: case.relationships.clone(),
        };
        Ok(match date_range {
            Some(range) => range.filter(graph),
            None => graph,
        })
    }

    async fn get_node(&self, case_id: &str, key: &str) -> Result<Node> {
        let state = self.state.read().await;
        state
            .case(case_id)
            .and_then(|c| c.nodes.get(key))
            .cloned()
            .ok_or_else(|| CaseGraphError::node_not_found(key))
    }

    async fn get_neighbours(&self, case_id: &str, key: &str, depth: u32) -> Result<Subgraph> {
        validate_depth(depth, MAX_NEIGHBOUR_DEPTH)?;
        let state = self.state.read().await;
        let case = state
            .case(case_id)
            .ok_or_else(|| CaseGraphError::node_not_found(key))?;
        case.node(key)?;
        Ok(case.subgraph(&case.bfs_keys(&[key.to_string()], depth)))
    }

    async fn expand(&self, case_id: &str, keys: &[String], depth: u32) -> Result<Subgraph> {
        validate_depth(depth, MAX_EXPAND_DEPTH)?;
        let state = self.state.read().await;
        Ok(state
            .case(case_id)
            .map(|c| c.subgraph(&c.bfs_keys(keys, depth)))
            .unwrap_or_default())
    }

    async fn induced_subgraph(&self, case_id: &str, keys: &[String]) -> Result<Subgraph> {
        let state = self.state.read().await;
        let wanted: BTreeSet<String> = keys.iter().cloned().collect();
        Ok(state
            .case(case_id)
            .map(|c| c.subgraph(&wanted))
            .unwrap_or_default())
    }

    async fn search(&self, case_id: &str, query: &str, limit: usize) -> Result<Vec<Node>> {
        let needle = query.trim().to_lowercase();
        let state = self.state.read().await;
        Ok(state
            .case(case_id)
            .map(|c| {
                c.nodes
                    .values()
                    .filter(|n| n.matches_text(&needle))
                    .take(limit)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn create_node(&self, case_id: &str, mut node: Node) -> Result<Node> {
        validate_identifier("node type", &node.node_type)?;
        if node.key.trim().is_empty() {
            return Err(CaseGraphError::invalid("node key must not be empty"));
        }
        node.case_id = case_id.to_string();
        let mut state = self.state.write().await;
        let case = state.cases.entry(case_id.to_string()).or_default();
        if case.nodes.contains_key(&node.key) {
            return Err(CaseGraphError::invalid(format!(
                "node '{}' already exists",
                node.key
            )));
        }
        case.nodes.insert(node.key.clone(), node.clone());
        Ok(node)
    }

    async fn update_node(&self, case_id: &str, key: &str, update: &NodeUpdate) -> Result<Node> {
        let mut state = self.state.write().await;
        let node = state
            .cases
            .get_mut(case_id)
            .ok_or_else(|| CaseGraphError::node_not_found(key))?
            .node_mut(key)?;
        update.apply_to(node);
        Ok(node.clone())
    }

    async fn create_relationships(&self, case_id: &str, rels: Vec<Relationship>) -> Result<usize> {
        let mut state = self.state.write().await;
        let case = state
            .cases
            .get_mut(case_id)
            .ok_or_else(|| CaseGraphError::not_found("relationship endpoints not found"))?;
        for rel in &rels {
            validate_identifier("relationship type", &rel.rel_type)?;
            case.node(&rel.source_key)?;
            case.node(&rel.target_key)?;
        }
        let count = rels.len();
        for mut rel in rels {
            rel.case_id = case_id.to_string();
            case.relationships.push(rel);
        }
        Ok(count)
    }

    async fn delete_node(&self, case_id: &str, key: &str) -> Result<DeletionCounts> {
        let mut state = self.state.write().await;
        let case = state
            .cases
            .get_mut(case_id)
            .ok_or_else(|| CaseGraphError::node_not_found(key))?;
        if case.nodes.remove(key).is_none() {
            return Err(CaseGraphError::node_not_found(key));
        }
        let before = case.relationships.len();
        case.relationships.retain(|r| !r.touches(key));
        Ok(DeletionCounts {
            nodes_deleted: 1,
            relationships_deleted: (before - case.relationships.len()) as u64,
        })
    }

    async fn pin_fact(&self, case_id: &str, key: &str, fact_index: usize, pinned: bool) -> Result<Node> {
        let mut state = self.state.write().await;
        let node = state
            .cases
            .get_mut(case_id)
            .ok_or_else(|| CaseGraphError::node_not_found(key))?
            .node_mut(key)?;
        let fact = node.verified_facts.get_mut(fact_index).ok_or_else(|| {
            CaseGraphError::not_found(format!("fact {fact_index} not found on node '{key}'"))
        })?;
        fact.pinned = pinned;
        Ok(node.clone())
    }

    async fn verify_insight(
        &self,
        case_id: &str,
        key: &str,
        insight_index: usize,
        verifier: &str,
    ) -> Result<Node> {
        let mut state = self.state.write().await;
        let node = state
            .cases
            .get_mut(case_id)
            .ok_or_else(|| CaseGraphError::node_not_found(key))?
            .node_mut(key)?;
        if insight_index >= node.ai_insights.len() {
            return Err(CaseGraphError::not_found(format!(
                "insight {insight_index} not found on node '{key}'"
            )));
        }
        let insight = node.ai_insights.remove(insight_index);
        node.verified_facts.push(insight.into_verified(verifier, Utc::now()));
        Ok(node.clone())
    }

    async fn shortest_path(
        &self,
        case_id: &str,
        from: &str,
        to: &str,
        max_depth: u32,
    ) -> Result<Option<Subgraph>> {
        let state = self.state.read().await;
        let Some(case) = state.case(case_id) else {
            return Ok(None);
        };
        if !case.nodes.contains_key(from) || !case.nodes.contains_key(to) {
            return Ok(None);
        }

        // BFS recording the relationship used to reach each node.
        let mut parent: BTreeMap<String, (String, usize)> = BTreeMap::new();
        let mut seen = BTreeSet::from([from.to_string()]);
        let mut queue = VecDeque::from([(from.to_string(), 0u32)]);
        while let Some((key, d)) = queue.pop_front() {
            if key == to || d == max_depth {
                continue;
            }
            for (idx, rel) in case.relationships.iter().enumerate() {
                let next = if rel.source_key == key {
                    &rel.target_key
                } else if rel.target_key == key {
                    &rel.source_key
                } else {
                    continue;
                };
                if seen.insert(next.clone()) {
                    parent.insert(next.clone(), (key.clone(), idx));
                    queue.push_back((next.clone(), d + 1));
                }
            }
        }

        if !seen.contains(to) {
            return Ok(None);
        }
        let mut keys = BTreeSet::from([to.to_string()]);
        let mut relationships = Vec::new();
        let mut cursor = to.to_string();
        while let Some((prev, idx)) = parent.get(&cursor) {
            relationships.push(case.relationships[*idx].clone());
            keys.insert(prev.clone());
            cursor = prev.clone();
        }
        relationships.reverse();
        Ok(Some(Subgraph {
            nodes: keys.iter().filter_map(|k| case.nodes.get(k)).cloned().collect(),
            relationships,
        }))
    }

    async fn schema_summary(&self, case_id: &str) -> Result<SchemaSummary> {
        let state = self.state.read().await;
        let Some(case) = state.case(case_id) else {
            return Ok(SchemaSummary::default());
        };
        let mut labels: BTreeMap<String, u64> = BTreeMap::new();
        for node in case.nodes.values() {
            *labels.entry(node.node_type.clone()).or_default() += 1;
        }
        let mut labels: Vec<(String, u64)> = labels.into_iter().collect();
        labels.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        let relationship_types: BTreeSet<String> =
            case.relationships.iter().map(|r| r.rel_type.clone()).collect();
        Ok(SchemaSummary {
            labels,
            relationship_types: relationship_types.into_iter().collect(),
        })
    }

    async fn run_query(&self, text: &str, _params: &BTreeMap<String, Value>) -> Result<Vec<QueryRow>> {
        let mut state = self.state.write().await;
        state.query_log.push(text.to_string());
        Ok(state.query_rows.clone())
    }

    async fn apply_merge(&self, case_id: &str, plan: &MergePlan) -> Result<Node> {
        let mut state = self.state.write().await;
        let case = state
            .cases
            .get_mut(case_id)
            .ok_or_else(|| CaseGraphError::node_not_found(&plan.source_key))?;
        case.node(&plan.source_key)?;
        case.node(&plan.target_key)?;
        for rel in &plan.new_relationships {
            case.node(&rel.source_key)?;
            case.node(&rel.target_key)?;
        }

        for merged in &plan.property_merges {
            let identity = merged.identity();
            for rel in case.relationships.iter_mut().filter(|r| r.identity() == identity) {
                rel.properties = merged.properties.clone();
            }
        }
        for rel in &plan.new_relationships {
            let mut rel = rel.clone();
            rel.case_id = case_id.to_string();
            case.relationships.push(rel);
        }

        let mut target = plan.target.clone();
        target.case_id = case_id.to_string();
        case.nodes.insert(target.key.clone(), target.clone());

        case.nodes.remove(&plan.source_key);
        case.relationships.retain(|r| !r.touches(&plan.source_key));
        Ok(target)
    }

    async fn rejected_pairs(&self, case_id: &str) -> Result<Vec<RejectedPair>> {
        let state = self.state.read().await;
        Ok(state.rejected.get(case_id).cloned().unwrap_or_default())
    }

    async fn reject_pair(&self, pair: RejectedPair) -> Result<()> {
        let mut state = self.state.write().await;
        let pairs = state.rejected.entry(pair.case_id.clone()).or_default();
        match pairs
            .iter_mut()
            .find(|p| p.key1 == pair.key1 && p.key2 == pair.key2)
        {
            Some(existing) => *existing = pair,
            None => pairs.push(pair),
        }
        Ok(())
    }

    async fn undo_rejection(&self, case_id: &str, key1: &str, key2: &str) -> Result<bool> {
        let (key1, key2) = normalize_pair(key1, key2);
        let mut state = self.state.write().await;
        let Some(pairs) = state.rejected.get_mut(case_id) else {
            return Ok(false);
        };
        let before = pairs.len();
        pairs.retain(|p| !(p.key1 == key1 && p.key2 == key2));
        Ok(pairs.len() != before)
    }
}
