use std::collections::BTreeMap;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use casegraph_common::{CaseGraphError, Result};

use super::adjacency::Adjacency;

/// Gains at or below this are treated as no improvement.
const MIN_GAIN: f64 = 1e-12;

#[derive(Debug, Clone, PartialEq)]
pub struct Partition {
    /// Community of each node index, numbered densely from 0 by first appearance.
    pub membership: Vec<usize>,
    pub community_count: usize,
    pub modularity: f64,
}

/// Single-level Louvain local moving over the undirected weighted view.
///
/// Every node starts alone. Each pass visits nodes in a shuffled order and moves a node
/// to the neighbouring community with the largest strictly positive modularity gain.
/// Passes stop once nothing moves or after `max_iterations`.
pub fn louvain(
    adj: &Adjacency,
    resolution: f64,
    max_iterations: u32,
    seed: Option<u64>,
) -> Result<Partition> {
    if !resolution.is_finite() || resolution <= 0.0 {
        return Err(CaseGraphError::invalid(format!(
            "resolution must be positive, got {resolution}"
        )));
    }
    if max_iterations == 0 {
        return Err(CaseGraphError::invalid("max_iterations must be at least 1"));
    }

    let n = adj.len();
    let mut community: Vec<usize> = (0..n).collect();
    let m = adj.total_weight();
    if n == 0 || m == 0.0 {
        return Ok(renumber(&community, 0.0));
    }

    let degree: Vec<f64> = (0..n)
        .map(|i| adj.neighbours(i).iter().map(|(_, w)| w).sum())
        .collect();
    // Σ_tot per community
    let mut totals = degree.clone();

    let mut rng = match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    };
    let mut order: Vec<usize> = (0..n).collect();

    for _ in 0..max_iterations {
        order.shuffle(&mut rng);
        let mut moved = false;

        for &node in &order {
            let current = community[node];
            let k = degree[node];

            let mut links: BTreeMap<usize, f64> = BTreeMap::new();
            for &(other, w) in adj.neighbours(node) {
                *links.entry(community[other]).or_default() += w;
            }

            totals[current] -= k;
            let gain = |c: usize, w_in: f64| w_in - resolution * totals[c] * k / (2.0 * m);
            let stay = gain(current, links.get(&current).copied().unwrap_or(0.0));

            let mut best = current;
            let mut best_gain = stay;
            for (&c, &w_in) in &links {
                if c == current {
                    continue;
                }
                let g = gain(c, w_in);
                if g - best_gain > MIN_GAIN {
                    best = c;
                    best_gain = g;
                }
            }

            totals[best] += k;
            if best != current {
                community[node] = best;
                moved = true;
            }
        }

        if !moved {
            break;
        }
    }

    let q = modularity(adj, &community, resolution);
    Ok(renumber(&community, q))
}

/// Newman modularity of an assignment, with the resolution applied to the null model.
pub fn modularity(adj: &Adjacency, community: &[usize], resolution: f64) -> f64 {
    let m = adj.total_weight();
    if m == 0.0 {
        return 0.0;
    }
    let mut internal: BTreeMap<usize, f64> = BTreeMap::new();
    let mut totals: BTreeMap<usize, f64> = BTreeMap::new();
    for u in 0..adj.len() {
        for &(v, w) in adj.neighbours(u) {
            *totals.entry(community[u]).or_default() += w;
            if community[u] == community[v] {
                // each internal edge is seen from both ends
                *internal.entry(community[u]).or_default() += w;
            }
        }
    }
    totals
        .iter()
        .map(|(c, tot)| {
            let inside = internal.get(c).copied().unwrap_or(0.0);
            inside / (2.0 * m) - resolution * (tot / (2.0 * m)).powi(2)
        })
        .sum()
}

fn renumber(community: &[usize], modularity: f64) -> Partition {
    let mut ids: BTreeMap<usize, usize> = BTreeMap::new();
    let membership: Vec<usize> = community
        .iter()
        .map(|c| {
            let next = ids.len();
            *ids.entry(*c).or_insert(next)
        })
        .collect();
    Partition {
        community_count: ids.len(),
        membership,
        modularity,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use casegraph_common::{Node, Relationship, Subgraph};

    fn two_triangles() -> Adjacency {
        let keys = ["a1", "a2", "a3", "b1", "b2", "b3"];
        let edges = [
            ("a1", "a2"),
            ("a2", "a3"),
            ("a3", "a1"),
            ("b1", "b2"),
            ("b2", "b3"),
            ("b3", "b1"),
            ("a1", "b1"),
        ];
        Adjacency::from_subgraph(&Subgraph {
            nodes: keys.iter().map(|k| Node::new(*k, "Person", *k)).collect(),
            relationships: edges
                .iter()
                .map(|(a, b)| Relationship::new(*a, *b, "KNOWS"))
                .collect(),
        })
    }

    #[test]
    fn separates_loosely_joined_triangles() {
        let adj = two_triangles();
        let partition = louvain(&adj, 1.0, 10, Some(7)).unwrap();
        assert_eq!(partition.community_count, 2);
        let m = &partition.membership;
        assert_eq!(m[0], m[1]);
        assert_eq!(m[1], m[2]);
        assert_eq!(m[3], m[4]);
        assert_ne!(m[0], m[3]);
        assert!(partition.modularity > 0.3);
    }

    #[test]
    fn seeded_runs_are_reproducible() {
        let adj = two_triangles();
        let first = louvain(&adj, 1.0, 10, Some(42)).unwrap();
        let second = louvain(&adj, 1.0, 10, Some(42)).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn ids_are_dense_by_first_appearance() {
        let partition = renumber(&[4, 4, 1, 9, 1], 0.0);
        assert_eq!(partition.membership, vec![0, 0, 1, 2, 1]);
        assert_eq!(partition.community_count, 3);
    }

    #[test]
    fn edgeless_graph_keeps_singletons() {
        let adj = Adjacency::from_subgraph(&Subgraph {
            nodes: vec![Node::new("a", "X", "A"), Node::new("b", "X", "B")],
            relationships: vec![],
        });
        let partition = louvain(&adj, 1.0, 5, Some(1)).unwrap();
        assert_eq!(partition.community_count, 2);
        assert_eq!(partition.modularity, 0.0);
    }
}
