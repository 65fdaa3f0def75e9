use std::collections::VecDeque;

use super::adjacency::Adjacency;

/// Brandes betweenness centrality over the undirected, unweighted view.
///
/// Each unordered pair is reached from both of its ends, so raw dependencies are
/// halved. With `normalized` and more than two nodes, scores are divided by
/// `(n - 1)(n - 2) / 2` and fall within [0, 1].
pub fn betweenness(adj: &Adjacency, normalized: bool) -> Vec<f64> {
    let n = adj.len();
    let mut centrality = vec![0.0; n];

    let mut sigma = vec![0.0f64; n];
    let mut dist = vec![-1i64; n];
    let mut delta = vec![0.0f64; n];
    let mut preds: Vec<Vec<usize>> = vec![Vec::new(); n];
    let mut order: Vec<usize> = Vec::with_capacity(n);
    let mut queue = VecDeque::new();

    for s in 0..n {
        sigma.fill(0.0);
        dist.fill(-1);
        delta.fill(0.0);
        preds.iter_mut().for_each(Vec::clear);
        order.clear();

        sigma[s] = 1.0;
        dist[s] = 0;
        queue.push_back(s);

        while let Some(v) = queue.pop_front() {
            order.push(v);
            for &(w, _) in adj.neighbours(v) {
                if dist[w] < 0 {
                    dist[w] = dist[v] + 1;
                    queue.push_back(w);
                }
                if dist[w] == dist[v] + 1 {
                    sigma[w] += sigma[v];
                    preds[w].push(v);
                }
            }
        }

        for &w in order.iter().rev() {
            for &v in &preds[w] {
                delta[v] += sigma[v] / sigma[w] * (1.0 + delta[w]);
            }
            if w != s {
                centrality[w] += delta[w];
            }
        }
    }

    let mut scale = 0.5;
    if normalized && n > 2 {
        scale /= ((n - 1) * (n - 2)) as f64 / 2.0;
    }
    centrality.iter_mut().for_each(|c| *c *= scale);
    centrality
}

#[cfg(test)]
mod tests {
    use super::*;
    use casegraph_common::{Node, Relationship, Subgraph};

    fn adjacency(keys: &[&str], edges: &[(&str, &str)]) -> Adjacency {
        Adjacency::from_subgraph(&Subgraph {
            nodes: keys.iter().map(|k| Node::new(*k, "Person", *k)).collect(),
            relationships: edges
                .iter()
                .map(|(a, b)| Relationship::new(*a, *b, "KNOWS"))
                .collect(),
        })
    }

    #[test]
    fn star_centre_carries_every_path() {
        let adj = adjacency(
            &["c", "l1", "l2", "l3", "l4"],
            &[("c", "l1"), ("l2", "c"), ("c", "l3"), ("l4", "c")],
        );
        let scores = betweenness(&adj, true);
        assert!((scores[0] - 1.0).abs() < 1e-12);
        assert!(scores[1..].iter().all(|s| *s == 0.0));

        let raw = betweenness(&adj, false);
        // C(4, 2) leaf pairs route through the centre
        assert!((raw[0] - 6.0).abs() < 1e-12);
    }

    #[test]
    fn path_middle_node_scores_by_pairs_crossed() {
        let adj = adjacency(&["a", "b", "c", "d"], &[("a", "b"), ("b", "c"), ("c", "d")]);
        let raw = betweenness(&adj, false);
        // b sits between (a,c) and (a,d)
        assert!((raw[1] - 2.0).abs() < 1e-12);
        assert!((raw[2] - 2.0).abs() < 1e-12);
        assert_eq!(raw[0], 0.0);
    }

    #[test]
    fn shared_shortest_paths_split_credit() {
        // square a-b-d, a-c-d: b and c each take half of (a, d)
        let adj = adjacency(
            &["a", "b", "c", "d"],
            &[("a", "b"), ("b", "d"), ("a", "c"), ("c", "d")],
        );
        let raw = betweenness(&adj, false);
        assert!((raw[1] - 0.5).abs() < 1e-12);
        assert!((raw[2] - 0.5).abs() < 1e-12);
    }

    #[test]
    fn tiny_graphs_score_zero() {
        let adj = adjacency(&["a", "b"], &[("a", "b")]);
        assert_eq!(betweenness(&adj, true), vec![0.0, 0.0]);
        assert!(betweenness(&Adjacency::default(), true).is_empty());
    }
}
