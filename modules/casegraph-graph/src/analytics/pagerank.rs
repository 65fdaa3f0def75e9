use casegraph_common::{CaseGraphError, Result};

use super::adjacency::Adjacency;

/// Power-iteration PageRank over the directed view.
///
/// `pr[v] = (1 - d) / N + d * Σ_{u -> v} pr[u] / outdeg(u)`, starting from a uniform
/// vector and running exactly `iterations` rounds. Rank held by nodes without outgoing
/// relationships is not redistributed.
pub fn pagerank(adj: &Adjacency, damping: f64, iterations: u32) -> Result<Vec<f64>> {
    if !(0.0..=1.0).contains(&damping) {
        return Err(CaseGraphError::invalid(format!(
            "damping must be within [0, 1], got {damping}"
        )));
    }
    if iterations == 0 {
        return Err(CaseGraphError::invalid("iterations must be at least 1"));
    }

    let n = adj.len();
    if n == 0 {
        return Ok(Vec::new());
    }

    let base = (1.0 - damping) / n as f64;
    let mut rank = vec![1.0 / n as f64; n];
    let mut next = vec![0.0; n];

    for _ in 0..iterations {
        for (v, slot) in next.iter_mut().enumerate() {
            let inflow: f64 = adj
                .predecessors(v)
                .iter()
                .map(|&u| rank[u] / adj.out_degree(u) as f64)
                .sum();
            *slot = base + damping * inflow;
        }
        std::mem::swap(&mut rank, &mut next);
    }

    Ok(rank)
}

#[cfg(test)]
mod tests {
    use super::*;
    use casegraph_common::{Node, Relationship, Subgraph};

    fn graph(edges: &[(&str, &str)]) -> Adjacency {
        let mut keys: Vec<&str> = edges.iter().flat_map(|(a, b)| [*a, *b]).collect();
        keys.sort();
        keys.dedup();
        Adjacency::from_subgraph(&Subgraph {
            nodes: keys.iter().map(|k| Node::new(*k, "Person", *k)).collect(),
            relationships: edges
                .iter()
                .map(|(a, b)| Relationship::new(*a, *b, "LINKS"))
                .collect(),
        })
    }

    #[test]
    fn closed_graph_sums_to_one() {
        let adj = graph(&[("a", "b"), ("b", "c"), ("c", "a"), ("a", "c"), ("d", "a")]);
        // d has no in-links but an out-link; every node has an out-link
        let ranks = pagerank(&adj, 0.85, 50).unwrap();
        let total: f64 = ranks.iter().sum();
        assert!((total - 1.0).abs() < 1e-9, "sum was {total}");
    }

    #[test]
    fn hub_outranks_spokes() {
        let adj = graph(&[("a", "hub"), ("b", "hub"), ("c", "hub"), ("hub", "a")]);
        let ranks = pagerank(&adj, 0.85, 30).unwrap();
        let hub = adj.index_of("hub").unwrap();
        let b = adj.index_of("b").unwrap();
        assert!(ranks[hub] > ranks[b]);
    }

    #[test]
    fn zero_damping_is_uniform() {
        let adj = graph(&[("a", "b"), ("b", "a"), ("b", "c")]);
        let ranks = pagerank(&adj, 0.0, 5).unwrap();
        assert!(ranks.iter().all(|r| (r - 1.0 / 3.0).abs() < 1e-12));
    }

    #[test]
    fn invalid_parameters_are_rejected() {
        let adj = graph(&[("a", "b")]);
        assert!(matches!(
            pagerank(&adj, 1.2, 10),
            Err(CaseGraphError::InvalidArgument(_))
        ));
        assert!(matches!(
            pagerank(&adj, 0.85, 0),
            Err(CaseGraphError::InvalidArgument(_))
        ));
    }
}
