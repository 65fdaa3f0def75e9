use std::collections::{BTreeMap, HashMap};

use casegraph_common::Subgraph;

/// Index-based snapshot of a subgraph, built once per analytics run.
///
/// Node indices follow ascending key order, so every algorithm over the snapshot is
/// deterministic regardless of the order the store returned rows in. Relationships with
/// an endpoint outside the node set are ignored.
#[derive(Debug, Clone, Default)]
pub struct Adjacency {
    keys: Vec<String>,
    index: HashMap<String, usize>,
    /// `forward[u]` lists `v` once per relationship `u -> v`.
    forward: Vec<Vec<usize>>,
    /// `reverse[v]` lists `u` once per relationship `u -> v`.
    reverse: Vec<Vec<usize>>,
    /// Undirected view: neighbour and summed weight of all parallel relationships.
    /// Self loops are left out.
    undirected: Vec<Vec<(usize, f64)>>,
}

impl Adjacency {
    pub fn from_subgraph(graph: &Subgraph) -> Self {
        let mut keys: Vec<String> = graph.nodes.iter().map(|n| n.key.clone()).collect();
        keys.sort();
        keys.dedup();
        let index: HashMap<String, usize> = keys
            .iter()
            .enumerate()
            .map(|(i, k)| (k.clone(), i))
            .collect();

        let n = keys.len();
        let mut forward = vec![Vec::new(); n];
        let mut reverse = vec![Vec::new(); n];
        let mut weights: Vec<BTreeMap<usize, f64>> = vec![BTreeMap::new(); n];

        for rel in &graph.relationships {
            let (Some(&u), Some(&v)) = (index.get(&rel.source_key), index.get(&rel.target_key))
            else {
                continue;
            };
            forward[u].push(v);
            reverse[v].push(u);
            if u != v {
                *weights[u].entry(v).or_default() += 1.0;
                *weights[v].entry(u).or_default() += 1.0;
            }
        }

        let undirected = weights
            .into_iter()
            .map(|m| m.into_iter().collect())
            .collect();

        Self {
            keys,
            index,
            forward,
            reverse,
            undirected,
        }
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn key(&self, i: usize) -> &str {
        &self.keys[i]
    }

    pub fn index_of(&self, key: &str) -> Option<usize> {
        self.index.get(key).copied()
    }

    pub fn out_degree(&self, u: usize) -> usize {
        self.forward[u].len()
    }

    pub fn predecessors(&self, v: usize) -> &[usize] {
        &self.reverse[v]
    }

    pub fn successors(&self, u: usize) -> &[usize] {
        &self.forward[u]
    }

    /// Distinct undirected neighbours with the number of relationships joining them.
    pub fn neighbours(&self, u: usize) -> &[(usize, f64)] {
        &self.undirected[u]
    }

    /// Sum of undirected edge weights, each edge counted once.
    pub fn total_weight(&self) -> f64 {
        self.undirected
            .iter()
            .flat_map(|list| list.iter().map(|(_, w)| w))
            .sum::<f64>()
            / 2.0
    }

    /// Indices of the `n` highest scores, ties broken by ascending key.
    pub fn top_n(&self, scores: &[f64], n: usize) -> Vec<(usize, f64)> {
        let mut ranked: Vec<(usize, f64)> = scores.iter().copied().enumerate().collect();
        ranked.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        ranked.truncate(n);
        ranked
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use casegraph_common::{Node, Relationship};

    #[test]
    fn parallel_edges_add_weight_and_self_loops_are_dropped() {
        let graph = Subgraph {
            nodes: vec![Node::new("b", "X", "B"), Node::new("a", "X", "A")],
            relationships: vec![
                Relationship::new("a", "b", "KNOWS"),
                Relationship::new("b", "a", "PAID"),
                Relationship::new("a", "a", "ALIAS_OF"),
                Relationship::new("a", "ghost", "KNOWS"),
            ],
        };
        let adj = Adjacency::from_subgraph(&graph);
        assert_eq!(adj.key(0), "a");
        assert_eq!(adj.neighbours(0), &[(1, 2.0)]);
        assert_eq!(adj.out_degree(0), 2);
        assert_eq!(adj.predecessors(0), &[1, 0]);
        assert_eq!(adj.total_weight(), 2.0);
    }

    #[test]
    fn top_n_breaks_ties_by_key() {
        let graph = Subgraph {
            nodes: vec![Node::new("b", "X", "B"), Node::new("a", "X", "A"), Node::new("c", "X", "C")],
            relationships: vec![],
        };
        let adj = Adjacency::from_subgraph(&graph);
        let top = adj.top_n(&[0.5, 0.5, 0.9], 2);
        assert_eq!(top, vec![(2, 0.9), (0, 0.5)]);
    }
}
